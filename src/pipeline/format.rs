//! Rendering of statement results into notebook messages.
//!
//! Tables are tab-separated with the header row first, which is what the
//! notebook host parses into a table widget.

use crate::output::{MessageKind, QueryOutput};
use crate::script;
use crate::session::{ResultShape, StatementResult, NO_DATA_SUMMARY};

/// Text shown for statements with nothing to display.
pub const SUCCESS_TEXT: &str = "Success!";

/// Rows that open a new section of a cluster-info result.
const CLUSTER_TITLES: [&str; 4] = [
    "Server infos:",
    "Storage engine infos:",
    "Meta Storage infos:",
    "Meta Storage path:",
];

/// Formats a successful statement result by its declared shape.
pub fn statement_output(statement: &str, result: &StatementResult) -> QueryOutput {
    let explain = script::is_explain(statement);

    match result.shape {
        shape if shape.is_single_table() && !explain => {
            QueryOutput::success().with(MessageKind::Table, single_table(&result.rows))
        }
        ResultShape::Query => {
            QueryOutput::success().with(MessageKind::Table, explain_table(&result.rows))
        }
        ResultShape::ClusterInfo => cluster_info(&result.rows),
        _ => {
            if result.summary == NO_DATA_SUMMARY || result.summary.trim().is_empty() {
                QueryOutput::text(SUCCESS_TEXT)
            } else {
                QueryOutput::text(result.summary.clone())
            }
        }
    }
}

/// Renders a table; multi-line data values become HTML.
pub fn single_table(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row
            .iter()
            .map(|val| if i == 0 { val.clone() } else { to_html_cell(val) })
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

/// Renders an explain plan; indentation of the tree column is kept visible.
///
/// The host strips leading whitespace from cells, so every leading space of
/// the first column is replaced by `-`.
pub fn explain_table(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, val)| {
                if i == 0 && val.starts_with(' ') {
                    let body = val.trim_start_matches(' ');
                    format!("{}{}", "-".repeat(val.len() - body.len()), body)
                } else {
                    val.clone()
                }
            })
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

/// Renders a cluster-info result as a title message followed by a table per section.
pub fn cluster_info(rows: &[Vec<String>]) -> QueryOutput {
    let mut output = QueryOutput::success();
    let mut table = String::new();

    for row in rows {
        if row.len() == 1 && CLUSTER_TITLES.contains(&row[0].as_str()) {
            if !table.is_empty() {
                output.push(MessageKind::Table, std::mem::take(&mut table));
            }
            output.push(MessageKind::Text, row[0].clone());
            continue;
        }

        table.push_str(&row.join("\t"));
        table.push('\n');
    }

    if !table.is_empty() {
        output.push(MessageKind::Table, table);
    }
    output
}

fn to_html_cell(val: &str) -> String {
    if val.contains('\n') {
        format!(
            "%html{}",
            val.replace('\n', "<br>")
                .replace('\t', "&nbsp;&nbsp;&nbsp;&nbsp;")
        )
    } else {
        val.to_string()
    }
}
