//! Bucket command - show where a subject lands

use clap::Args;
use colored::Colorize;
use decision::{bucket, select, BUCKET_SPACE};
use uuid::Uuid;

use crate::{parse_list, CliError, CliResult};

#[derive(Args, Debug, Clone)]
pub struct BucketCommand {
    /// Experiment identifier
    #[arg(long, short = 'e')]
    pub experiment: String,

    /// Subject identifier
    #[arg(long, short = 's')]
    pub subject: String,

    /// Traffic weights of the variants, in order (e.g. 50,30,20)
    #[arg(long, short = 'w')]
    pub weights: Option<String>,
}

/// Bucket and, when weights are given, the index of the selected variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketOutcome {
    pub bucket: u32,
    pub variant_index: Option<usize>,
}

impl BucketCommand {
    pub fn resolve(&self) -> CliResult<BucketOutcome> {
        let bucket = bucket(&self.subject, &self.experiment);

        let variant_index = match &self.weights {
            Some(raw) => {
                let weights = parse_list(raw)?;
                if weights.is_empty() {
                    return Err(CliError::InvalidArgument("no weights given".to_string()));
                }
                // Indices stand in for variant ids
                let table: Vec<(Uuid, f64)> = weights
                    .iter()
                    .enumerate()
                    .map(|(i, w)| (Uuid::from_u128(i as u128), *w))
                    .collect();
                select(bucket, &table).map(|id| id.as_u128() as usize)
            }
            None => None,
        };

        Ok(BucketOutcome { bucket, variant_index })
    }

    pub fn execute(&self) -> CliResult<()> {
        let outcome = self.resolve()?;

        println!(
            "{} {} / {}",
            "Bucket:".bold().cyan(),
            outcome.bucket.to_string().yellow(),
            BUCKET_SPACE
        );
        if let Some(index) = outcome.variant_index {
            println!("{} {}", "Variant index:".bold().cyan(), index.to_string().green());
        }
        Ok(())
    }
}
