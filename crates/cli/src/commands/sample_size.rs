//! Sample size command - plan traffic before starting an experiment

use clap::Args;
use colored::Colorize;
use decision::SampleSizeCalculator;

use crate::CliResult;

#[derive(Args, Debug, Clone)]
pub struct SampleSizeCommand {
    /// Baseline conversion rate, as a fraction (e.g. 0.1)
    #[arg(long, short = 'b')]
    pub baseline: f64,

    /// Minimum relative lift to detect (e.g. 0.2 for +20%)
    #[arg(long, short = 'l')]
    pub lift: f64,

    /// Statistical power
    #[arg(long, short = 'p', default_value = "0.8")]
    pub power: f64,
}

impl SampleSizeCommand {
    /// Visitors needed per variant at significance level `alpha`
    pub fn resolve(&self, alpha: f64) -> CliResult<u64> {
        Ok(SampleSizeCalculator::new(self.baseline, self.lift, self.power, alpha)?.calculate()?)
    }

    pub fn execute(&self, alpha: f64) -> CliResult<()> {
        let per_variant = self.resolve(alpha)?;

        println!(
            "{} {} visitors per variant",
            "Required:".bold().cyan(),
            per_variant.to_string().green().bold()
        );
        println!(
            "  baseline {:.2}%, lift {:+.1}%, power {:.0}%, alpha {}",
            self.baseline * 100.0,
            self.lift * 100.0,
            self.power * 100.0,
            alpha
        );
        Ok(())
    }
}
