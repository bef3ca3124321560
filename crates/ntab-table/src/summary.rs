//! The record-count description line.
//!
//! After a payload replacement the description is rewritten to
//! `Torrent versions for "<base>" - <n> version(s)`. The base name is taken
//! from a description already in that shape, falling back to the table name.
//! This parse is a heuristic over free text; it lives here alone so the
//! format can change without touching the controller.

const PREFIX: &str = "Torrent versions for";

/// Extract the quoted base name from a summary-shaped description.
pub fn base_name(description: &str) -> Option<&str> {
    let rest = &description[description.find(PREFIX)? + PREFIX.len()..];
    let start = rest.find('"')? + 1;
    let len = rest[start..].find('"')?;
    if len == 0 {
        return None;
    }
    Some(&rest[start..start + len])
}

/// Render the summary line.
pub fn summarize(base: &str, count: usize) -> String {
    format!("{PREFIX} \"{base}\" - {count} version(s)")
}
