//! Renders result sets as aligned, status-coloured tables.

use std::io::{self, Write};

use console::style;

use crate::dispatcher::{Outcome, ResultSet};
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
    Other,
}

impl StatusClass {
    pub fn of(code: u16) -> Self {
        match code {
            200..=299 => StatusClass::Success,
            300..=304 | 307 | 308 => StatusClass::Redirect,
            400..=408 | 413 | 429 => StatusClass::ClientError,
            500..=505 | 511 => StatusClass::ServerError,
            _ => StatusClass::Other,
        }
    }
}

fn colorize_status(cell: String, code: u16) -> String {
    match StatusClass::of(code) {
        StatusClass::Success => style(cell).green().to_string(),
        StatusClass::Redirect => style(cell).yellow().to_string(),
        StatusClass::ClientError => style(cell).red().to_string(),
        StatusClass::ServerError => style(cell).magenta().to_string(),
        StatusClass::Other => cell,
    }
}

pub fn banner<W: Write>(out: &mut W, strategy: Strategy) -> io::Result<()> {
    writeln!(out, "\n{}", style(format!("[####] {} [####]", strategy.title())).cyan())
}

struct Row<'a> {
    status: String,
    size: String,
    label: String,
    outcome: &'a Outcome,
}

impl<'a> Row<'a> {
    fn new(outcome: &'a Outcome) -> Self {
        match &outcome.response {
            Ok(response) => Self {
                status: response.status.to_string(),
                size: format!("{} bytes", response.length),
                label: outcome.label.clone(),
                outcome,
            },
            Err(err) => Self {
                status: "ERR".to_string(),
                size: "-".to_string(),
                label: format!("{} ({err})", outcome.label),
                outcome,
            },
        }
    }
}

/// One row per outcome, ordered by status code then label. Errors sort last.
pub fn render<W: Write>(out: &mut W, results: &ResultSet) -> io::Result<()> {
    if results.is_empty() {
        return writeln!(out, "{}", style("no variants").dim());
    }

    let mut rows: Vec<Row> = results.iter().map(Row::new).collect();
    rows.sort_by(|a, b| {
        let key = |row: &Row| (row.outcome.status().is_none(), row.outcome.status());
        key(a).cmp(&key(b)).then_with(|| a.label.cmp(&b.label))
    });

    let status_width = rows.iter().map(|r| r.status.len()).max().unwrap_or(0);
    let size_width = rows.iter().map(|r| r.size.len()).max().unwrap_or(0);

    for row in rows {
        let status = format!("{:<status_width$}", row.status);
        let status = match row.outcome.status() {
            Some(code) => colorize_status(status, code),
            None => style(status).red().bold().to_string(),
        };
        let size = style(format!("{:>size_width$}", row.size)).blue();
        writeln!(out, "{status}  {size}  {}", row.label)?;
    }

    Ok(())
}
