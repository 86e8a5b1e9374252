use anyhow::Result;
use colored::Colorize;
use relsync_core::ReconcileOutcome;
use relsync_storage::Identifier;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

/// Result of one command, printed as JSON or as a table.
#[derive(Debug, Serialize)]
pub struct Report {
    pub parent: String,
    pub association: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
    pub members: Vec<Identifier>,
}

pub fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => print_as_table(report),
    }
    Ok(())
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

fn print_as_table(report: &Report) {
    println!(
        "{} {} {}",
        report.parent.cyan(),
        "→".dimmed(),
        report.association.cyan()
    );

    if let Some(outcome) = &report.outcome {
        let mut builder = Builder::default();
        builder.push_record(["Action", "ID"]);
        let rows = [
            ("linked", &outcome.linked),
            ("unlinked", &outcome.unlinked),
            ("skipped (add)", &outcome.skipped_add),
            ("skipped (remove)", &outcome.skipped_remove),
        ];
        for (action, ids) in rows {
            for id in ids {
                builder.push_record([action.to_string(), id.to_string()]);
            }
        }
        if outcome.is_noop() && outcome.skipped_add.is_empty() && outcome.skipped_remove.is_empty()
        {
            println!("No changes.");
        } else {
            let table = builder.build().with(Style::rounded()).to_string();
            println!("{table}");
        }
    }

    let members: Vec<String> = report.members.iter().map(ToString::to_string).collect();
    println!(
        "{} [{}] ({} total)",
        "Members:".cyan(),
        members.join(", "),
        members.len()
    );
}
