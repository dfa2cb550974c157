//! Terminal output for listing commands.

use crate::Result;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        }
    }
}

/// Render rows as a rounded table, or `None` when there is nothing to show
pub fn render_table<T: Tabled>(rows: &[T]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }
    Some(
        Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::first()).with(Alignment::left()))
            .to_string(),
    )
}

/// Print rows in the requested format.
///
/// Table output uses the `Tabled` row; JSON output serializes `records`,
/// which usually carry more detail than fits in a table cell.
pub fn print_list<T: Tabled, R: Serialize>(rows: &[T], records: &R, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => match render_table(rows) {
            Some(table) => println!("{table}"),
            None => println!("No saved jobs."),
        },
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(records)?),
    }
    Ok(())
}

pub fn print_detail(key: &str, value: impl std::fmt::Display) {
    println!("  {key:<22} {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Tabled)]
    struct Row {
        name: String,
        mode: String,
    }

    #[test]
    fn test_render_table_includes_headers_and_cells() {
        let rows = vec![Row {
            name: "site".to_string(),
            mode: "restic + 7z".to_string(),
        }];
        let table = render_table(&rows).unwrap();

        assert!(table.contains("name"));
        assert!(table.contains("restic + 7z"));
    }

    #[test]
    fn test_render_table_empty() {
        let rows: Vec<Row> = Vec::new();
        assert!(render_table(&rows).is_none());
    }
}
