/// Rail Assembler
///
/// Orchestrates scored categories into the final, guardrailed rail layout.
///
/// # Pipeline
/// 1. **Merge**: catalog categories scored from affinity + generated categories
/// 2. **Sort**: score descending, catalog order on ties, generated after static
/// 3. **Personalization gate**: too few interactions (or tracking off) returns the plain catalog
/// 4. **Inventory threshold**: post-veto inventory below `min_events_per_rail` blocks promotion
/// 5. **Discovery floor**: `ceil(N * discovery_floor)` rails stay unpersonalized
/// 6. **Max-rails cap**: at most `max_rails` personalized rails
/// 7. **Emit**: promoted rails, then the remaining catalog in its own order
///
/// Any error in stages 1-6 degrades to the stage-3 fallback. Personalization
/// failures are logged, never surfaced.
pub mod guardrails;

use crate::config::RailConfig;
use crate::models::{AffinityProfile, CategoryDescriptor, FallbackReason, Rail};
use crate::services::sources::InventoryLookup;
use guardrails::{
    apply_inventory_threshold, emit, fallback_rails, merge, select_promotions, sort_by_score,
    verify,
};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("Category has an empty id")]
    EmptyCategoryId,

    #[error("Duplicate category id: {0}")]
    DuplicateCategory(String),

    #[error("Non-finite score for category: {0}")]
    NonFiniteScore(String),

    #[error("Guardrail violated: {0}")]
    GuardrailViolation(String),
}

pub type Result<T> = std::result::Result<T, RankingError>;

/// Everything one assembly needs, already materialized by the caller
pub struct AssemblyInput<'a> {
    pub static_categories: &'a [CategoryDescriptor],
    pub generated: &'a [CategoryDescriptor],
    pub affinity: &'a AffinityProfile,
    pub vetoed: &'a HashSet<String>,
    pub inventory: &'a dyn InventoryLookup,
    /// Valid records in the log snapshot
    pub interaction_count: usize,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub rails: Vec<Rail>,
    /// Whether the personalized path ran (it may still promote nothing)
    pub personalized: bool,
    pub fallback_reason: Option<FallbackReason>,
}

enum Outcome {
    Personalized(Vec<Rail>),
    Bypassed(FallbackReason),
}

pub struct RailAssembler {
    config: RailConfig,
}

impl RailAssembler {
    pub fn new(config: &RailConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &RailConfig {
        &self.config
    }

    /// Assemble rails; never fails
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> Assembly {
        match self.run_stages(input) {
            Ok(Outcome::Personalized(rails)) => {
                debug!(
                    rails = rails.len(),
                    personalized = rails.iter().filter(|r| r.is_personalized).count(),
                    generated = rails.iter().filter(|r| r.is_generated).count(),
                    "Assembled personalized rails"
                );
                Assembly {
                    rails,
                    personalized: true,
                    fallback_reason: None,
                }
            }
            Ok(Outcome::Bypassed(reason)) => {
                debug!(reason = ?reason, "Personalization bypassed");
                self.fallback(input, reason)
            }
            Err(e) => {
                warn!(error = %e, "Rail assembly failed, serving catalog order");
                self.fallback(
                    input,
                    FallbackReason::ComputationFailed {
                        message: e.to_string(),
                    },
                )
            }
        }
    }

    fn run_stages(&self, input: &AssemblyInput<'_>) -> Result<Outcome> {
        let merged = merge(input.static_categories, input.generated, input.affinity)?;
        let sorted = sort_by_score(merged);

        if let Some(reason) = self.gate(input.interaction_count) {
            return Ok(Outcome::Bypassed(reason));
        }

        let screened = apply_inventory_threshold(
            sorted,
            input.inventory,
            input.vetoed,
            self.config.min_events_per_rail,
        );
        let promoted =
            select_promotions(&screened, self.config.max_rails, self.config.discovery_floor);
        let rails = emit(screened, &promoted);

        verify(
            &rails,
            input.vetoed,
            self.config.max_rails,
            self.config.discovery_floor,
        )?;

        Ok(Outcome::Personalized(rails))
    }

    /// Global all-or-nothing gate
    fn gate(&self, interaction_count: usize) -> Option<FallbackReason> {
        if !self.config.tracking_enabled {
            return Some(FallbackReason::TrackingDisabled);
        }
        if interaction_count < self.config.min_interactions {
            return Some(FallbackReason::InsufficientInteractions {
                count: interaction_count,
                required: self.config.min_interactions,
            });
        }
        None
    }

    fn fallback(&self, input: &AssemblyInput<'_>, reason: FallbackReason) -> Assembly {
        Assembly {
            rails: fallback_rails(input.static_categories, input.inventory, input.vetoed),
            personalized: false,
            fallback_reason: Some(reason),
        }
    }
}

/// `assembleRails(...)` with an explicit config
pub fn assemble_rails(input: &AssemblyInput<'_>, config: &RailConfig) -> Assembly {
    RailAssembler::new(config).assemble(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InventoryItem;
    use chrono::Utc;
    use std::collections::HashMap;

    fn catalog() -> Vec<CategoryDescriptor> {
        ["music", "food", "arts", "sports", "comedy"]
            .iter()
            .map(|id| CategoryDescriptor::static_category(*id, id.to_uppercase(), "", *id))
            .collect()
    }

    fn stocked(ids: &[&str], per_category: usize) -> HashMap<String, Vec<InventoryItem>> {
        ids.iter()
            .map(|id| {
                let items = (0..per_category)
                    .map(|i| InventoryItem::new(format!("{}-{}", id, i), "event"))
                    .collect();
                (id.to_string(), items)
            })
            .collect()
    }

    fn profile(scores: &[(&str, f64)]) -> AffinityProfile {
        let mut profile = AffinityProfile::empty(Utc::now());
        for (id, score) in scores {
            profile.categories.insert(id.to_string(), *score);
        }
        profile
    }

    #[test]
    fn test_gate_returns_catalog_order() {
        let catalog = catalog();
        let affinity = profile(&[("comedy", 1.0)]);
        let inventory = stocked(&["music", "food", "arts", "sports", "comedy"], 6);
        let vetoed = HashSet::new();

        let assembly = RailAssembler::new(&RailConfig::default()).assemble(&AssemblyInput {
            static_categories: &catalog,
            generated: &[],
            affinity: &affinity,
            vetoed: &vetoed,
            inventory: &inventory,
            interaction_count: 4,
        });

        assert!(!assembly.personalized);
        assert_eq!(
            assembly.fallback_reason,
            Some(FallbackReason::InsufficientInteractions {
                count: 4,
                required: 5
            })
        );
        let ids: Vec<_> = assembly.rails.iter().map(|r| r.category_id.as_str()).collect();
        assert_eq!(ids, vec!["music", "food", "arts", "sports", "comedy"]);
        assert!(assembly
            .rails
            .iter()
            .all(|r| !r.is_personalized && r.affinity_percent == 0));
    }

    #[test]
    fn test_tracking_disabled_bypasses() {
        let catalog = catalog();
        let affinity = profile(&[("comedy", 1.0)]);
        let inventory = stocked(&["comedy"], 6);
        let vetoed = HashSet::new();
        let config = RailConfig {
            tracking_enabled: false,
            ..Default::default()
        };

        let assembly = assemble_rails(
            &AssemblyInput {
                static_categories: &catalog,
                generated: &[],
                affinity: &affinity,
                vetoed: &vetoed,
                inventory: &inventory,
                interaction_count: 100,
            },
            &config,
        );

        assert_eq!(assembly.fallback_reason, Some(FallbackReason::TrackingDisabled));
        assert_eq!(assembly.rails[0].category_id, "music");
    }

    #[test]
    fn test_promotes_top_category() {
        let catalog = catalog();
        let affinity = profile(&[("comedy", 1.0), ("arts", 0.4)]);
        let inventory = stocked(&["music", "food", "arts", "sports", "comedy"], 6);
        let vetoed = HashSet::new();

        let assembly = RailAssembler::new(&RailConfig::default()).assemble(&AssemblyInput {
            static_categories: &catalog,
            generated: &[],
            affinity: &affinity,
            vetoed: &vetoed,
            inventory: &inventory,
            interaction_count: 10,
        });

        assert!(assembly.personalized);
        let ids: Vec<_> = assembly.rails.iter().map(|r| r.category_id.as_str()).collect();
        assert_eq!(ids, vec!["comedy", "arts", "music", "food", "sports"]);
        assert_eq!(assembly.rails[0].affinity_percent, 100);
        assert_eq!(assembly.rails[1].affinity_percent, 40);
        assert!(assembly.rails[0].is_personalized && assembly.rails[1].is_personalized);
        assert!(!assembly.rails[2].is_personalized);
    }

    #[test]
    fn test_thin_inventory_is_not_promoted() {
        let catalog = catalog();
        let affinity = profile(&[("comedy", 1.0), ("arts", 0.4)]);
        let mut inventory = stocked(&["music", "food", "arts", "sports"], 6);
        inventory.extend(stocked(&["comedy"], 3));
        let vetoed = HashSet::new();

        let assembly = RailAssembler::new(&RailConfig::default()).assemble(&AssemblyInput {
            static_categories: &catalog,
            generated: &[],
            affinity: &affinity,
            vetoed: &vetoed,
            inventory: &inventory,
            interaction_count: 10,
        });

        let ids: Vec<_> = assembly.rails.iter().map(|r| r.category_id.as_str()).collect();
        assert_eq!(ids, vec!["arts", "music", "food", "sports", "comedy"]);
        let comedy = assembly.rails.iter().find(|r| r.category_id == "comedy").unwrap();
        assert!(!comedy.is_personalized);
        assert_eq!(comedy.affinity_percent, 100);
    }

    #[test]
    fn test_duplicate_generated_id_falls_back() {
        let catalog = catalog();
        let affinity = profile(&[("comedy", 1.0)]);
        let inventory = stocked(&["comedy"], 6);
        let vetoed = HashSet::new();
        let clash = CategoryDescriptor {
            score: 0.9,
            is_generated: true,
            ..CategoryDescriptor::static_category("comedy", "Comedy", "", "comedy")
        };

        let assembly = RailAssembler::new(&RailConfig::default()).assemble(&AssemblyInput {
            static_categories: &catalog,
            generated: std::slice::from_ref(&clash),
            affinity: &affinity,
            vetoed: &vetoed,
            inventory: &inventory,
            interaction_count: 10,
        });

        assert!(!assembly.personalized);
        assert!(matches!(
            assembly.fallback_reason,
            Some(FallbackReason::ComputationFailed { .. })
        ));
        assert_eq!(assembly.rails.len(), catalog.len());
        assert!(assembly.rails.iter().all(|r| !r.is_generated));
    }

    #[test]
    fn test_fallback_still_applies_veto() {
        let catalog = catalog();
        let affinity = profile(&[]);
        let inventory = stocked(&["music"], 3);
        let vetoed: HashSet<String> = ["music-1".to_string()].into_iter().collect();

        let assembly = RailAssembler::new(&RailConfig::default()).assemble(&AssemblyInput {
            static_categories: &catalog,
            generated: &[],
            affinity: &affinity,
            vetoed: &vetoed,
            inventory: &inventory,
            interaction_count: 0,
        });

        let events: Vec<_> = assembly.rails[0].events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(events, vec!["music-0", "music-2"]);
    }
}
