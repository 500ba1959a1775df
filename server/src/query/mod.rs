//! Reference resolution and containment queries

pub mod containment;
pub mod reference;

pub use containment::{ContainedObject, ContainmentQuery, ContainmentQueryEngine};
pub use reference::{ReferenceResolver, ReferenceSelector, ResolvedReference};
