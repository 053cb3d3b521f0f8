// ============================================
// Veto Filter
// ============================================
//
// Suppresses individual events after repeated explicit down votes.
// Counts are not time-decayed, and veto status is monotonic within a
// computation: up votes never lift it.

use crate::models::{Interaction, InteractionKind, InventoryItem, VoteDirection};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Per-event vote tallies derived from one log snapshot
#[derive(Debug, Clone)]
pub struct VetoRegistry {
    threshold: u32,
    down_votes: HashMap<String, u32>,
    up_votes: HashMap<String, u32>,
}

impl VetoRegistry {
    pub fn from_log(interactions: &[Interaction], threshold: u32) -> Self {
        let mut down_votes: HashMap<String, u32> = HashMap::new();
        let mut up_votes: HashMap<String, u32> = HashMap::new();

        for interaction in interactions {
            let (InteractionKind::Vote { direction }, Some(event_id)) =
                (&interaction.kind, &interaction.event_id)
            else {
                continue;
            };

            let tally = match direction {
                VoteDirection::Down => &mut down_votes,
                VoteDirection::Up => &mut up_votes,
            };
            *tally.entry(event_id.clone()).or_insert(0) += 1;
        }

        Self {
            threshold: threshold.max(1),
            down_votes,
            up_votes,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn down_votes(&self, event_id: &str) -> u32 {
        self.down_votes.get(event_id).copied().unwrap_or(0)
    }

    pub fn up_votes(&self, event_id: &str) -> u32 {
        self.up_votes.get(event_id).copied().unwrap_or(0)
    }

    pub fn is_vetoed(&self, event_id: &str) -> bool {
        self.down_votes(event_id) >= self.threshold
    }

    pub fn vetoed(&self) -> HashSet<String> {
        self.down_votes
            .iter()
            .filter(|(_, count)| **count >= self.threshold)
            .map(|(event_id, _)| event_id.clone())
            .collect()
    }
}

/// `computeVetoed(log)`: event ids whose down votes reached `threshold`
pub fn compute_vetoed(interactions: &[Interaction], threshold: u32) -> HashSet<String> {
    let vetoed = VetoRegistry::from_log(interactions, threshold).vetoed();
    debug!(vetoed = vetoed.len(), threshold, "Computed veto set");
    vetoed
}

/// Inventory items that survive the veto, in their original order
pub fn filter_vetoed(items: &[InventoryItem], vetoed: &HashSet<String>) -> Vec<InventoryItem> {
    items
        .iter()
        .filter(|item| !vetoed.contains(&item.id))
        .cloned()
        .collect()
}
