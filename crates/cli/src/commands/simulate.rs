//! Simulate command - run a synthetic experiment end to end
//!
//! Subjects are allocated through the real engine; each allocated subject
//! converts with the true rate of its variant. The run stops early once the
//! engine completes the experiment.

use abtest_config::EngineConfig;
use abtest_types::{Experiment, Variant};
use clap::Args;
use colored::Colorize;
use decision::{ABTestEngine, AllocationContext, ExperimentReport};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::{
    output::{get_formatter, OutputFormat},
    parse_list, CliError, CliResult,
};

#[derive(Args, Debug, Clone)]
pub struct SimulateCommand {
    /// Traffic weights, control first (e.g. 50,50)
    #[arg(long, short = 'w')]
    pub weights: String,

    /// True conversion rate per variant (e.g. 0.10,0.12)
    #[arg(long, short = 'r')]
    pub rates: String,

    /// Number of synthetic visitors
    #[arg(long, short = 'n', default_value = "5000")]
    pub visitors: u64,

    /// Seed of the conversion draws
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl SimulateCommand {
    fn variants(&self) -> CliResult<(Vec<Variant>, Vec<f64>)> {
        let weights = parse_list(&self.weights)?;
        let rates = parse_list(&self.rates)?;

        if weights.is_empty() {
            return Err(CliError::InvalidArgument("no weights given".to_string()));
        }
        if weights.len() != rates.len() {
            return Err(CliError::InvalidArgument(format!(
                "{} weights but {} rates",
                weights.len(),
                rates.len()
            )));
        }
        if let Some(rate) = rates.iter().find(|r| !(0.0..=1.0).contains(*r)) {
            return Err(CliError::InvalidArgument(format!(
                "conversion rate {} outside [0, 1]",
                rate
            )));
        }

        let variants = weights
            .iter()
            .enumerate()
            .map(|(i, weight)| {
                if i == 0 {
                    Variant::control("control", *weight)
                } else {
                    Variant::new(format!("variant_{}", i), *weight)
                }
            })
            .collect();

        Ok((variants, rates))
    }

    /// Run the simulation and return the final report
    pub async fn run(&self, config: &EngineConfig) -> CliResult<ExperimentReport> {
        let (variants, rates) = self.variants()?;
        let true_rates: HashMap<Uuid, f64> = variants
            .iter()
            .map(|v| v.id)
            .zip(rates.iter().copied())
            .collect();

        let engine = ABTestEngine::from_config(config).await?;
        let experiment_id = engine
            .create_experiment(Experiment::new("simulation", variants))
            .await?;
        engine.start(&experiment_id).await?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let ctx = AllocationContext::new();
        let mut allocated = 0u64;

        for i in 0..self.visitors {
            let subject = format!("sim-{}", i);
            let Some(allocation) = engine.allocate(&experiment_id, &subject, &ctx).await else {
                break;
            };
            allocated += 1;

            let rate = true_rates.get(&allocation.variant_id).copied().unwrap_or(0.0);
            if rng.gen_bool(rate) {
                engine
                    .record_conversion(&experiment_id, &allocation.variant_id, None)
                    .await?;
            }
        }

        info!(
            "Simulation allocated {} of {} visitors",
            allocated, self.visitors
        );

        Ok(engine.get_results(&experiment_id).await?)
    }

    pub async fn execute(&self, config: &EngineConfig) -> CliResult<()> {
        let report = self.run(config).await?;

        let format = if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        };

        if !self.json {
            println!("{}", "Simulation".bold().cyan());
            println!("{}", "=".repeat(40));
        }
        println!("{}", get_formatter(format).format_report(&report)?);
        Ok(())
    }
}
