// ============================================
// Rail Pipeline
// ============================================
//
// Interaction Log -> {Affinity Engine, Veto Filter}
//                 -> Dynamic Category Generator
//                 -> Rail Assembler
//                 -> RailSet
//
// Pure and synchronous: every call works on a snapshot supplied by the
// caller, so concurrent appends elsewhere can only make a result stale.

use crate::config::RailConfig;
use crate::models::{
    parse_log, AffinityProfile, CategoryDescriptor, ParsedLog, RailSet, RawInteraction,
};
use crate::services::affinity::AffinityEngine;
use crate::services::dynamic_categories::DynamicCategoryGenerator;
use crate::services::rail_assembler::{AssemblyInput, RailAssembler};
use crate::services::sources::InventoryLookup;
use crate::services::veto::compute_vetoed;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

/// Log-derived state of one computation, before inventory is consulted
#[derive(Debug, Clone)]
pub struct PreparedComputation {
    pub affinity: AffinityProfile,
    pub vetoed: HashSet<String>,
    pub generated: Vec<CategoryDescriptor>,
    pub interaction_count: usize,
    pub skipped_records: usize,
    pub now: DateTime<Utc>,
}

pub struct RailPipeline {
    config: RailConfig,
    catalog: Vec<CategoryDescriptor>,
}

impl RailPipeline {
    pub fn new(config: &RailConfig, catalog: Vec<CategoryDescriptor>) -> Self {
        Self {
            config: config.sanitized(),
            catalog,
        }
    }

    pub fn config(&self) -> &RailConfig {
        &self.config
    }

    pub fn catalog(&self) -> &[CategoryDescriptor] {
        &self.catalog
    }

    /// Validate raw records, then compute
    pub fn compute_raw(
        &self,
        records: &[RawInteraction],
        inventory: &dyn InventoryLookup,
        now: DateTime<Utc>,
    ) -> RailSet {
        self.compute(&parse_log(records), inventory, now)
    }

    /// Run one full computation over a validated log snapshot
    pub fn compute(
        &self,
        log: &ParsedLog,
        inventory: &dyn InventoryLookup,
        now: DateTime<Utc>,
    ) -> RailSet {
        self.assemble(self.prepare(log, now), inventory)
    }

    /// Affinity, veto set and generated categories for a log snapshot
    pub fn prepare(&self, log: &ParsedLog, now: DateTime<Utc>) -> PreparedComputation {
        let interactions = &log.interactions;

        let affinity = AffinityEngine::from_config(&self.config).compute(interactions, now);
        let vetoed = compute_vetoed(interactions, self.config.veto_threshold);
        let generated = DynamicCategoryGenerator::from_config(&self.config).generate(
            interactions,
            &affinity,
            &self.catalog,
        );

        PreparedComputation {
            affinity,
            vetoed,
            generated,
            interaction_count: log.len(),
            skipped_records: log.skipped,
            now,
        }
    }

    /// Catalog plus generated categories: everything inventory is needed for
    pub fn categories(&self, prepared: &PreparedComputation) -> Vec<CategoryDescriptor> {
        self.catalog
            .iter()
            .chain(prepared.generated.iter())
            .cloned()
            .collect()
    }

    /// Apply inventory and guardrails to a prepared computation
    pub fn assemble(
        &self,
        prepared: PreparedComputation,
        inventory: &dyn InventoryLookup,
    ) -> RailSet {
        let assembly = RailAssembler::new(&self.config).assemble(&AssemblyInput {
            static_categories: &self.catalog,
            generated: &prepared.generated,
            affinity: &prepared.affinity,
            vetoed: &prepared.vetoed,
            inventory,
            interaction_count: prepared.interaction_count,
        });

        debug!(
            interactions = prepared.interaction_count,
            skipped = prepared.skipped_records,
            vetoed = prepared.vetoed.len(),
            generated = prepared.generated.len(),
            rails = assembly.rails.len(),
            personalized = assembly.personalized,
            "Rail computation finished"
        );

        RailSet {
            rails: assembly.rails,
            personalized: assembly.personalized,
            fallback_reason: assembly.fallback_reason,
            computed_at: prepared.now,
            interaction_count: prepared.interaction_count,
            skipped_records: prepared.skipped_records,
        }
    }
}
