// ============================================
// Affinity Engine (親和度引擎)
// ============================================
//
// Turns the interaction log into relative interest scores per dimension
// (category, price bucket, venue).
//
// score(key) = SUM(type_weight * 2^(-age_days / half_life_days)) / max over dimension
//
// Type weights:
// - View: 1
// - Click: 10
// - Search: 30
// - Save: 50
// - Unsave: -50
// - Vote: 0 (veto filter only)
//
// The top key of every dimension scores exactly 1.0. A dimension whose
// largest raw sum is not positive scores every key 0.
//
// Category keys are normalized (lowercase, single spaces) so "Music" and
// "music" land on the same key.

use crate::config::RailConfig;
use crate::models::{AffinityProfile, Interaction};
use crate::utils::{age_days, half_life_decay, normalize_by_max, normalize_term};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Raw decayed contributions for one dimension
#[derive(Debug, Default)]
struct DimensionAccumulator {
    contributions: HashMap<String, Vec<f64>>,
}

impl DimensionAccumulator {
    fn add(&mut self, key: &str, value: f64) {
        self.contributions
            .entry(key.to_string())
            .or_default()
            .push(value);
    }

    /// Sum per key in a canonical order so the result does not depend on log order
    fn raw_totals(self) -> BTreeMap<String, f64> {
        self.contributions
            .into_iter()
            .map(|(key, mut values)| {
                values.sort_by(|a, b| a.total_cmp(b));
                (key, values.iter().sum::<f64>())
            })
            .collect()
    }

    fn normalized(self) -> BTreeMap<String, f64> {
        let totals = self.raw_totals();
        let max = totals.values().copied().fold(0.0_f64, f64::max);

        totals
            .into_iter()
            .map(|(key, raw)| (key, normalize_by_max(raw, max)))
            .collect()
    }
}

/// Stateless affinity calculator
#[derive(Debug, Clone)]
pub struct AffinityEngine {
    half_life_days: f64,
}

impl Default for AffinityEngine {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl AffinityEngine {
    pub fn new(half_life_days: f64) -> Self {
        Self { half_life_days }
    }

    pub fn from_config(config: &RailConfig) -> Self {
        Self::new(config.sanitized().half_life())
    }

    pub fn half_life_days(&self) -> f64 {
        self.half_life_days
    }

    /// Decay factor for an interaction observed at `timestamp`
    pub fn decay(&self, now: DateTime<Utc>, timestamp: DateTime<Utc>) -> f64 {
        half_life_decay(age_days(now, timestamp), self.half_life_days)
    }

    /// Compute the affinity profile for a log snapshot.
    ///
    /// 1. Weight each interaction by type and decay it by age
    /// 2. Accumulate into category / price bucket / venue keys
    /// 3. Normalize each dimension by its maximum
    pub fn compute(&self, interactions: &[Interaction], now: DateTime<Utc>) -> AffinityProfile {
        let mut categories = DimensionAccumulator::default();
        let mut price_ranges = DimensionAccumulator::default();
        let mut venues = DimensionAccumulator::default();

        for interaction in interactions {
            let weight = interaction.kind.affinity_weight();
            if weight == 0.0 {
                continue;
            }

            let contribution = weight * self.decay(now, interaction.timestamp);

            if let Some(category) = &interaction.category {
                categories.add(&normalize_term(category), contribution);
            }
            if let Some(bucket) = interaction.price_bucket() {
                price_ranges.add(bucket.as_str(), contribution);
            }
            if let Some(venue) = &interaction.venue {
                venues.add(venue, contribution);
            }
        }

        let profile = AffinityProfile {
            categories: categories.normalized(),
            price_ranges: price_ranges.normalized(),
            venues: venues.normalized(),
            computed_at: now,
        };

        debug!(
            interactions = interactions.len(),
            categories = profile.categories.len(),
            price_ranges = profile.price_ranges.len(),
            venues = profile.venues.len(),
            "Computed affinity profile"
        );

        profile
    }
}

/// Convenience wrapper: `compute_affinity(log, now)` with the configured half-life
pub fn compute_affinity(
    interactions: &[Interaction],
    now: DateTime<Utc>,
    config: &RailConfig,
) -> AffinityProfile {
    AffinityEngine::from_config(config).compute(interactions, now)
}
