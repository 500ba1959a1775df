//! Value tables: dense assembly, CSV encoding and streamed exports

pub mod assembler;
pub mod csv;
pub mod export;

pub use assembler::{Cell, ColumnCatalog, RowKey, ValueSource, ValueTableAssembler};
pub use export::{ExportRequest, TableExport, TableExporter, TableKind, export_filename};
