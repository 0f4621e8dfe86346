//! Plain-text answers for the deterministic runtime.

use datapac_backend::ToolOutcome;
use datapac_core::domain::catalog::TableDescriptor;
use serde_json::Value;

use crate::executor::ExecutionReport;

pub const MAX_ROWS: usize = 20;
const MAX_CELL_WIDTH: usize = 40;

pub fn render_catalog_choice(tables: &[TableDescriptor]) -> String {
    let mut out = String::from(
        "Não encontrei uma tabela claramente relacionada à pergunta. Qual destas devo usar?\n",
    );
    out.push_str(&render_catalog(tables));
    out.push_str("Responda com o número, o alias ou o nome da tabela.");
    out
}

/// Numbered `alias (dataset.table)` lines.
pub fn render_catalog(tables: &[TableDescriptor]) -> String {
    tables
        .iter()
        .enumerate()
        .map(|(index, table)| {
            let mut line = format!("{}. {}", index + 1, table.display_name());
            if !table.alias.trim().is_empty() {
                line.push_str(&format!(" ({})", table.qualified_name()));
            }
            line.push('\n');
            line
        })
        .collect()
}

pub fn render_report(report: &ExecutionReport) -> String {
    let mut out = match &report.outcome {
        ToolOutcome::Error { message } => format!("Não foi possível executar a consulta: {message}"),
        ToolOutcome::Success(body) => {
            let mut header = format!(
                "Consulta em {} ({})",
                report.table.display_name(),
                report.table.qualified_name()
            );
            if let Some(payload) = report.payload.as_ref().filter(|payload| payload.has_date_filter()) {
                header.push_str(&format!(
                    ", período de {} a {}",
                    payload.date_range.first().map(String::as_str).unwrap_or_default(),
                    payload.date_range.last().map(String::as_str).unwrap_or_default(),
                ));
            }
            format!("{header}:\n{}", render_results(&body.data.results))
        }
    };
    if let Some(note) = &report.note {
        out.push_str(&format!("\n({note})"));
    }
    out
}

pub fn render_results(results: &Value) -> String {
    let rows = match results {
        Value::Array(rows) => rows,
        other => return serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    if rows.is_empty() {
        return "A consulta não retornou dados. Talvez outra tabela relacionada tenha a informação."
            .to_string();
    }

    // Single aggregate value.
    if let [Value::Object(row)] = rows.as_slice() {
        if row.len() == 1 {
            if let Some((name, value)) = row.iter().next() {
                return format!("{name}: {}", cell(value));
            }
        }
    }

    let columns: Vec<String> = match rows.first() {
        Some(Value::Object(first)) => first.keys().cloned().collect(),
        _ => {
            return rows.iter().take(MAX_ROWS).map(|row| format!("{}\n", cell(row))).collect::<String>()
                + &remaining(rows.len());
        }
    };

    let shown: Vec<Vec<String>> = rows
        .iter()
        .take(MAX_ROWS)
        .map(|row| columns.iter().map(|column| cell(row.get(column).unwrap_or(&Value::Null))).collect())
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            shown
                .iter()
                .map(|row| row[index].chars().count())
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    out.push_str(&line(&columns, &widths));
    out.push_str(&line(
        &widths.iter().map(|width| "-".repeat(*width)).collect::<Vec<_>>(),
        &widths,
    ));
    for row in &shown {
        out.push_str(&line(row, &widths));
    }
    out.push_str(&format!("{} linha(s)", rows.len()));
    if rows.len() > MAX_ROWS {
        out.push_str(&format!(", exibindo as primeiras {MAX_ROWS}"));
    }
    out
}

fn remaining(total: usize) -> String {
    if total > MAX_ROWS {
        format!("... e mais {} linha(s)", total - MAX_ROWS)
    } else {
        String::new()
    }
}

fn line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}", width = *width))
        .collect();
    format!("{}\n", padded.join(" | ").trim_end())
}

fn cell(value: &Value) -> String {
    let text = match value {
        Value::Null => "-".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_CELL_WIDTH {
        let cut: String = text.chars().take(MAX_CELL_WIDTH - 3).collect();
        format!("{cut}...")
    } else {
        text
    }
}
