//! Script handling: splitting raw scripts and classifying statements.

mod classify;
mod split;

pub use classify::{
    classify, export_clause, is_csv_load, is_explain, load_source_path, load_target,
    rewrite_export_path, strip_export_clause, ExportClause, LoadTarget, Statement,
};
pub use split::{normalize_whitespace, split};
