// Pipeline stages for the rail assembler. Each stage is a pure transform
// over the list produced by the previous one.

use super::{RankingError, Result};
use crate::models::{AffinityProfile, CategoryDescriptor, InventoryItem, Rail};
use crate::services::sources::InventoryLookup;
use crate::services::veto::filter_vetoed;
use crate::utils::{affinity_percent, discovery_slots};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// A category moving through the assembly stages
#[derive(Debug, Clone)]
pub struct RankedCategory {
    pub descriptor: CategoryDescriptor,
    /// Position in the curated catalog; `None` for generated categories
    pub catalog_index: Option<usize>,
    /// Position among generated categories
    pub generated_index: usize,
    /// Inventory minus vetoed events
    pub usable_events: Vec<InventoryItem>,
    /// Passed the inventory threshold
    pub qualified: bool,
}

impl RankedCategory {
    pub fn is_generated(&self) -> bool {
        self.catalog_index.is_none()
    }

    pub fn is_personalizable(&self) -> bool {
        self.qualified && self.descriptor.score > 0.0
    }

    /// Static entries precede generated ones at equal score
    fn tie_key(&self) -> (u8, usize) {
        match self.catalog_index {
            Some(index) => (0, index),
            None => (1, self.generated_index),
        }
    }

    fn into_rail(self, is_personalized: bool) -> Rail {
        Rail {
            category_id: self.descriptor.id,
            title: self.descriptor.title,
            emoji: self.descriptor.emoji,
            events: self.usable_events,
            is_personalized,
            is_generated: self.descriptor.is_generated,
            affinity_percent: affinity_percent(self.descriptor.score),
            reason: self.descriptor.reason,
        }
    }
}

fn check_category(id: &str, score: f64, seen: &mut HashSet<String>) -> Result<()> {
    if id.trim().is_empty() {
        return Err(RankingError::EmptyCategoryId);
    }
    if !score.is_finite() {
        return Err(RankingError::NonFiniteScore(id.to_string()));
    }
    if !seen.insert(id.to_string()) {
        return Err(RankingError::DuplicateCategory(id.to_string()));
    }
    Ok(())
}

/// Stage 1: union of the catalog (scored from affinity) and generated categories
pub fn merge(
    static_categories: &[CategoryDescriptor],
    generated: &[CategoryDescriptor],
    affinity: &AffinityProfile,
) -> Result<Vec<RankedCategory>> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(static_categories.len() + generated.len());

    for (index, category) in static_categories.iter().enumerate() {
        let score = affinity.category_score(&category.id);
        check_category(&category.id, score, &mut seen)?;

        merged.push(RankedCategory {
            descriptor: CategoryDescriptor {
                score: score.clamp(0.0, 1.0),
                is_generated: false,
                ..category.clone()
            },
            catalog_index: Some(index),
            generated_index: 0,
            usable_events: Vec::new(),
            qualified: false,
        });
    }

    for (index, category) in generated.iter().enumerate() {
        check_category(&category.id, category.score, &mut seen)?;

        merged.push(RankedCategory {
            descriptor: CategoryDescriptor {
                score: category.score.clamp(0.0, 1.0),
                is_generated: true,
                ..category.clone()
            },
            catalog_index: None,
            generated_index: index,
            usable_events: Vec::new(),
            qualified: false,
        });
    }

    Ok(merged)
}

fn rank_cmp(a: &RankedCategory, b: &RankedCategory) -> Ordering {
    b.descriptor
        .score
        .total_cmp(&a.descriptor.score)
        .then_with(|| a.tie_key().cmp(&b.tie_key()))
}

/// Stage 2: score descending, catalog order on ties, generated after static
pub fn sort_by_score(mut categories: Vec<RankedCategory>) -> Vec<RankedCategory> {
    categories.sort_by(rank_cmp);
    categories
}

/// Stage 4: attach post-veto inventory and mark categories that have enough of it
pub fn apply_inventory_threshold(
    categories: Vec<RankedCategory>,
    inventory: &dyn InventoryLookup,
    vetoed: &HashSet<String>,
    min_events_per_rail: usize,
) -> Vec<RankedCategory> {
    categories
        .into_iter()
        .map(|mut category| {
            let available = inventory.available_events(&category.descriptor);
            category.usable_events = filter_vetoed(&available, vetoed);
            category.qualified = category.usable_events.len() >= min_events_per_rail;

            if !category.qualified && category.descriptor.score > 0.0 {
                debug!(
                    category_id = %category.descriptor.id,
                    usable = category.usable_events.len(),
                    required = min_events_per_rail,
                    "Category below inventory threshold"
                );
            }

            category
        })
        .collect()
}

/// Stages 5 and 6: pick the categories flagged as personalized.
///
/// Starts from every personalizable category in score order and drops the
/// lowest-scoring one until both bounds hold for the resulting layout:
/// - at most `max_rails` personalized rails
/// - at least `ceil(N * discovery_floor)` of the `N` shown rails unpersonalized
///
/// `N` counts every static category plus the generated ones still promoted,
/// since unpromoted generated categories are not shown.
pub fn select_promotions(
    categories: &[RankedCategory],
    max_rails: usize,
    discovery_floor: f64,
) -> Vec<usize> {
    let static_count = categories.iter().filter(|c| !c.is_generated()).count();

    let mut promoted: Vec<usize> = categories
        .iter()
        .enumerate()
        .filter(|(_, category)| category.is_personalizable())
        .map(|(index, _)| index)
        .collect();

    loop {
        let generated_shown = promoted
            .iter()
            .filter(|&&index| categories[index].is_generated())
            .count();
        let shown = static_count + generated_shown;
        let allowed = (shown - discovery_slots(shown, discovery_floor)).min(max_rails);

        if promoted.len() <= allowed {
            break;
        }
        if let Some(displaced) = promoted.pop() {
            debug!(
                category_id = %categories[displaced].descriptor.id,
                shown,
                allowed,
                "Displaced by discovery floor or rail cap"
            );
        }
    }

    promoted
}

/// Stage 7: promoted rails by score, then the rest of the catalog in its own order
pub fn emit(categories: Vec<RankedCategory>, promoted: &[usize]) -> Vec<Rail> {
    let promoted: HashSet<usize> = promoted.iter().copied().collect();
    let mut personalized = Vec::with_capacity(promoted.len());
    let mut remaining = Vec::new();

    for (index, category) in categories.into_iter().enumerate() {
        if promoted.contains(&index) {
            personalized.push(category);
        } else if !category.is_generated() {
            remaining.push(category);
        }
    }

    remaining.sort_by_key(|category| category.catalog_index);

    personalized
        .into_iter()
        .map(|category| category.into_rail(true))
        .chain(remaining.into_iter().map(|category| category.into_rail(false)))
        .collect()
}

/// Final check on an emitted layout; a violation aborts personalization
pub fn verify(
    rails: &[Rail],
    vetoed: &HashSet<String>,
    max_rails: usize,
    discovery_floor: f64,
) -> Result<()> {
    let personalized = rails.iter().filter(|rail| rail.is_personalized).count();
    if personalized > max_rails {
        return Err(RankingError::GuardrailViolation(format!(
            "{} personalized rails exceed cap {}",
            personalized, max_rails
        )));
    }

    let required = discovery_slots(rails.len(), discovery_floor);
    if rails.len() - personalized < required {
        return Err(RankingError::GuardrailViolation(format!(
            "{} unpersonalized rails below discovery floor {}",
            rails.len() - personalized,
            required
        )));
    }

    if let Some(rail) = rails
        .iter()
        .find(|rail| rail.events.iter().any(|event| vetoed.contains(&event.id)))
    {
        return Err(RankingError::GuardrailViolation(format!(
            "vetoed event in rail {}",
            rail.category_id
        )));
    }

    Ok(())
}

/// Stage-3 fallback: plain catalog order, zero scores, vetoed events still removed
pub fn fallback_rails(
    static_categories: &[CategoryDescriptor],
    inventory: &dyn InventoryLookup,
    vetoed: &HashSet<String>,
) -> Vec<Rail> {
    static_categories
        .iter()
        .map(|category| Rail {
            category_id: category.id.clone(),
            title: category.title.clone(),
            emoji: category.emoji.clone(),
            events: filter_vetoed(&inventory.available_events(category), vetoed),
            is_personalized: false,
            is_generated: false,
            affinity_percent: 0,
            reason: None,
        })
        .collect()
}
