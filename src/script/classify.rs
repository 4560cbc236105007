//! Statement intent classification.
//!
//! A small pattern-matching front end decides how a statement is dispatched
//! before it ever reaches the query service.

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// What a statement asks the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Executed as-is against the query service.
    Plain,
    /// `... INTO OUTFILE "<path>" AS STREAM [showimg true|false];`
    Export { path: String, inline_images: bool },
    /// `LOAD DATA FROM INFILE "<path>" AS CSV ...`
    CsvLoad { path: String },
}

/// The trailing export clause of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportClause {
    /// Byte range of the whole clause, terminator included.
    pub span: Range<usize>,
    /// Byte range of the quoted path, quotes excluded.
    pub path_span: Range<usize>,
    /// The requested destination path.
    pub path: String,
    /// Whether produced images should be inlined in the result.
    pub inline_images: bool,
}

/// Target of a CSV load statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub table: String,
    pub columns: Vec<String>,
    pub skip_header: bool,
}

fn clause_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bINTO\s+OUTFILE\s+""#).expect("valid regex"))
}

fn clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)^INTO\s+OUTFILE\s+"([^"]*)"\s+AS\s+STREAM(?:\s+SHOWIMG\s+(TRUE|FALSE))?\s*;$"#,
        )
        .expect("valid regex")
    })
}

fn load_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)^LOAD\s+DATA\s+FROM\s+INFILE\s+"([^"]*)""#).expect("valid regex")
    })
}

fn load_target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bINTO\s+([A-Za-z_][\w.]*)\s*\(([^)]*)\)").expect("valid regex")
    })
}

fn skip_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bSKIPPING\s+HEADER\b").expect("valid regex"))
}

/// Classifies a single statement.
pub fn classify(statement: &str) -> Statement {
    if let Some(clause) = export_clause(statement) {
        return Statement::Export {
            path: clause.path,
            inline_images: clause.inline_images,
        };
    }

    if is_csv_load(statement) {
        if let Some(path) = load_source_path(statement) {
            return Statement::CsvLoad { path };
        }
    }

    Statement::Plain
}

/// Finds the export clause ending the statement.
///
/// Only the last `INTO OUTFILE` occurrence is considered, so earlier
/// occurrences elsewhere in the statement are never treated as the target.
pub fn export_clause(statement: &str) -> Option<ExportClause> {
    let start = clause_start_re().find_iter(statement).last()?.start();
    let caps = clause_re().captures(&statement[start..])?;

    let whole = caps.get(0)?;
    let path = caps.get(1)?;
    let inline_images = caps
        .get(2)
        .is_some_and(|flag| flag.as_str().eq_ignore_ascii_case("true"));

    Some(ExportClause {
        span: start + whole.start()..start + whole.end(),
        path_span: start + path.start()..start + path.end(),
        path: path.as_str().to_string(),
        inline_images,
    })
}

/// Points the statement's export clause at `dir`.
///
/// The rewritten clause is `INTO OUTFILE "<dir>" AS STREAM;`; any `showimg`
/// option is dropped because only this crate understands it. Statements
/// without an export clause are returned unchanged.
pub fn rewrite_export_path(statement: &str, dir: &str) -> String {
    match export_clause(statement) {
        Some(clause) => format!(
            "{}INTO OUTFILE \"{}\" AS STREAM;",
            &statement[..clause.span.start],
            dir
        ),
        None => statement.to_string(),
    }
}

/// Splits an export statement into its query part and destination directory.
pub fn strip_export_clause(statement: &str) -> Option<(String, String)> {
    let clause = export_clause(statement)?;
    let query = statement[..clause.span.start].trim_end().to_string();
    Some((query, clause.path))
}

/// Returns true for `LOAD DATA FROM INFILE ... AS CSV` statements.
pub fn is_csv_load(statement: &str) -> bool {
    let lower = statement.to_lowercase();
    lower.starts_with("load data from infile ") && lower.contains("as csv")
}

/// Extracts the local file path named by a CSV load statement.
pub fn load_source_path(statement: &str) -> Option<String> {
    load_path_re()
        .captures(statement)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extracts the table and column list a CSV load writes into.
pub fn load_target(statement: &str) -> Option<LoadTarget> {
    let caps = load_target_re().captures(statement)?;
    let table = caps.get(1)?.as_str().to_string();
    let columns = caps
        .get(2)?
        .as_str()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();

    Some(LoadTarget {
        table,
        columns,
        skip_header: skip_header_re().is_match(statement),
    })
}

/// Returns true for `EXPLAIN ...` statements.
pub fn is_explain(statement: &str) -> bool {
    statement
        .trim_start()
        .get(..7)
        .is_some_and(|p| p.eq_ignore_ascii_case("explain"))
}
