//! `hotloop options`: list recognized options with their defaults.

use hotloop_engine::osr::OPTIONS;
use hotloop_engine::OsrConfig;
use serde::Serialize;
use termcolor::ColorChoice;

use crate::output::StyledOutput;

#[derive(Debug, Serialize)]
struct OptionRow {
    name: &'static str,
    default: String,
    help: &'static str,
}

fn rows() -> Vec<OptionRow> {
    let defaults = OsrConfig::default();
    OPTIONS
        .iter()
        .map(|option| OptionRow {
            name: option.name,
            default: defaults.option_value(option.name).unwrap_or_default(),
            help: option.help,
        })
        .collect()
}

pub fn execute(json: bool, color: ColorChoice) -> anyhow::Result<()> {
    let rows = rows();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
    let mut out = StyledOutput::new(color);
    for row in &rows {
        out.bold(&format!("{:<width$}", row.name, width = width));
        out.plain("  ");
        out.info(&format!("{:<8}", row.default));
        out.plain(row.help);
        out.newline();
    }
    out.flush();
    Ok(())
}
