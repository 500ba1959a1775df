//! Comma-separated encoding of table rows

use super::assembler::Cell;

/// Append one line for `cells` to `out`
pub fn encode_row(cells: &[Cell], out: &mut String) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match cell {
            Cell::Integer(v) => out.push_str(&v.to_string()),
            Cell::Number(v) => out.push_str(&format_number(*v)),
            Cell::Text(s) => push_text(s, out),
            Cell::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Cell::Empty => {}
        }
    }
    out.push_str("\r\n");
}

/// Header line for `names`
pub fn encode_header(names: &[String]) -> String {
    let cells: Vec<Cell> = names.iter().cloned().map(Cell::Text).collect();
    let mut out = String::new();
    encode_row(&cells, &mut out);
    out
}

/// Missing values are written as `nan`
pub fn format_number(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        let sign = if v > 0.0 { "" } else { "-" };
        format!("{}inf", sign)
    } else {
        v.to_string()
    }
}

fn push_text(s: &str, out: &mut String) {
    if s.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&s.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(s);
    }
}
