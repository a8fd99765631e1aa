//! Report formatting

use clap::ValueEnum;
use colored::Colorize;
use decision::ExperimentReport;

use crate::CliResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

pub trait Formatter {
    fn format_report(&self, report: &ExperimentReport) -> CliResult<String>;
}

pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_report(&self, report: &ExperimentReport) -> CliResult<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}

/// Human-readable table with colored highlights
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_report(&self, report: &ExperimentReport) -> CliResult<String> {
        let mut out = String::new();

        out.push_str(&format!(
            "{} {} [{:?}]\n",
            "Experiment".bold().cyan(),
            report.name.bold(),
            report.status
        ));
        out.push_str(&format!(
            "Total visitors: {}  Confidence: {:.0}%\n\n",
            report.total_visitors,
            report.confidence_level.value() * 100.0
        ));

        out.push_str(&format!(
            "{:<14} {:>9} {:>11} {:>8} {:>18} {:>9} {:>8}\n",
            "VARIANT", "VISITORS", "CONVERSIONS", "RATE", "INTERVAL", "LIFT", "P-VALUE"
        ));
        out.push_str(&format!("{}\n", "-".repeat(83)));

        for variant in &report.variants {
            let name = if variant.is_control {
                format!("{} (c)", variant.name)
            } else {
                variant.name.clone()
            };
            let (lift, p_value) = match variant.significance {
                Some(s) if s.evaluated => (format!("{:+.1}%", s.lift), format!("{:.4}", s.p_value)),
                Some(_) => ("n/a".to_string(), "n/a".to_string()),
                None => ("-".to_string(), "-".to_string()),
            };

            let line = format!(
                "{:<14} {:>9} {:>11} {:>7.2}% {:>18} {:>9} {:>8}",
                name,
                variant.visitors,
                variant.conversions,
                variant.conversion_rate * 100.0,
                format!(
                    "[{:.2}, {:.2}]",
                    variant.confidence_interval.lower, variant.confidence_interval.upper
                ),
                lift,
                p_value
            );

            if variant.is_winner {
                out.push_str(&format!("{}\n", line.green().bold()));
            } else {
                out.push_str(&format!("{}\n", line));
            }
        }

        out.push('\n');
        match &report.winner {
            Some(winner) => out.push_str(&format!(
                "{} {} (p-value {:.4})\n",
                "Winner:".green().bold(),
                winner.name,
                winner.p_value
            )),
            None => out.push_str(&format!("{} none yet\n", "Winner:".yellow().bold())),
        }

        if let Some(reason) = report.completion_reason {
            out.push_str(&format!("Complete: {:?}\n", reason));
        }
        if report.is_stale {
            out.push_str(&format!("{}\n", "Stale report: record store unavailable".red()));
        }

        out.push_str(&format!("\n{}\n", "Recommendations:".bold()));
        for recommendation in &report.recommendations {
            out.push_str(&format!("  - {}\n", recommendation));
        }

        Ok(out)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}
