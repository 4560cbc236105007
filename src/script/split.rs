//! Splits a raw notebook script into single statements.

/// Statement terminator.
const TERMINATOR: char = ';';

/// Collapses tabs, newlines and runs of spaces into single spaces and trims.
pub fn normalize_whitespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.chars() {
        if ch == ' ' || ch == '\t' || ch == '\n' || ch == '\r' {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }

    out
}

/// Splits a script into statements, keeping the `;` attached to each one.
///
/// Whitespace is normalized first, so a statement spread over several lines
/// comes back as one line. Empty pieces are dropped; a trailing fragment
/// without a terminator is returned as its own statement.
pub fn split(raw: &str) -> Vec<String> {
    let normalized = normalize_whitespace(raw);

    normalized
        .split_inclusive(TERMINATOR)
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(String::from)
        .collect()
}
