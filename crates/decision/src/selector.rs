//! Weighted variant selection
//!
//! Walks the variants in creation order, accumulating weights scaled into the
//! bucket space, and picks the first variant whose cumulative threshold lies
//! above the bucket.
//!
//! ## Fallback policy
//!
//! When the weights sum to slightly less than 100 (rounding), the top buckets
//! are not covered by any threshold. Those buckets go to the **first** variant
//! in the ordering that carries traffic; a zero-weight variant never receives
//! a bucket. The fallback is deterministic, so it never breaks the
//! "same subject, same variant" guarantee.

use tracing::debug;
use uuid::Uuid;

use crate::bucketing::BUCKET_SPACE;

/// Weight scale between a 0-100 share and the bucket space
const WEIGHT_SCALE: f64 = BUCKET_SPACE as f64 / 100.0;

/// Pick the variant owning `bucket`.
///
/// `variants` are `(variant_id, traffic_weight)` pairs in a stable order.
/// Returns `None` only for an empty list.
pub fn select(bucket: u32, variants: &[(Uuid, f64)]) -> Option<Uuid> {
    let (first, _) = variants.first()?;

    let mut cumulative = 0.0;
    for (variant_id, weight) in variants {
        cumulative += weight * WEIGHT_SCALE;
        if (bucket as f64) < cumulative {
            return Some(*variant_id);
        }
    }

    let fallback = variants
        .iter()
        .find(|(_, weight)| *weight > 0.0)
        .map_or(*first, |(variant_id, _)| *variant_id);

    debug!(
        bucket,
        covered = cumulative,
        "Bucket beyond cumulative weights, falling back to first weighted variant"
    );
    Some(fallback)
}
