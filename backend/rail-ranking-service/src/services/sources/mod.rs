// ============================================
// Collaborator Interfaces
// ============================================
//
// The engine never performs I/O. Callers materialize a snapshot of the
// interaction log and the inventory, then hand both to the pipeline.
//
// - InventoryLookup: synchronous per-computation view of available events
// - InteractionLog / InventorySource: async snapshot providers used by the
//   refresh job

use crate::models::{CategoryDescriptor, InventoryItem, RawInteraction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Interaction log unavailable: {0}")]
    LogUnavailable(String),

    #[error("Inventory unavailable: {0}")]
    InventoryUnavailable(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// Available events per category for one computation
pub trait InventoryLookup {
    /// Events currently available for `category`, in display order
    fn available_events(&self, category: &CategoryDescriptor) -> Vec<InventoryItem>;

    fn available_count(&self, category: &CategoryDescriptor) -> usize {
        self.available_events(category).len()
    }
}

impl InventoryLookup for HashMap<String, Vec<InventoryItem>> {
    fn available_events(&self, category: &CategoryDescriptor) -> Vec<InventoryItem> {
        self.get(&category.id).cloned().unwrap_or_default()
    }
}

impl InventoryLookup for BTreeMap<String, Vec<InventoryItem>> {
    fn available_events(&self, category: &CategoryDescriptor) -> Vec<InventoryItem> {
        self.get(&category.id).cloned().unwrap_or_default()
    }
}

/// Inventory keyed by category id, as fetched by an [`InventorySource`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InventorySnapshot {
    pub items: HashMap<String, Vec<InventoryItem>>,
}

impl InventorySnapshot {
    pub fn new(items: HashMap<String, Vec<InventoryItem>>) -> Self {
        Self { items }
    }

    pub fn with_category(
        mut self,
        category_id: impl Into<String>,
        items: Vec<InventoryItem>,
    ) -> Self {
        self.items.insert(category_id.into(), items);
        self
    }
}

impl InventoryLookup for InventorySnapshot {
    fn available_events(&self, category: &CategoryDescriptor) -> Vec<InventoryItem> {
        self.items.available_events(category)
    }
}

/// Read side of the interaction log collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Every retained record, in unspecified order
    async fn snapshot(&self) -> Result<Vec<RawInteraction>>;
}

/// Inventory collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Available events for each requested category
    async fn snapshot(&self, categories: &[CategoryDescriptor]) -> Result<InventorySnapshot>;
}

/// Append-only in-memory log. Retention is left to the caller.
#[derive(Debug, Default)]
pub struct MemoryInteractionLog {
    records: RwLock<Vec<RawInteraction>>,
}

impl MemoryInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<RawInteraction>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub async fn record(&self, record: RawInteraction) {
        self.records.write().await.push(record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl InteractionLog for MemoryInteractionLog {
    async fn snapshot(&self) -> Result<Vec<RawInteraction>> {
        Ok(self.records.read().await.clone())
    }
}

/// Inventory held in memory and replaced wholesale on change
#[derive(Debug, Default)]
pub struct StaticInventory {
    snapshot: RwLock<InventorySnapshot>,
}

impl StaticInventory {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub async fn replace(&self, snapshot: InventorySnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn snapshot(&self, categories: &[CategoryDescriptor]) -> Result<InventorySnapshot> {
        let current = self.snapshot.read().await;
        let items = categories
            .iter()
            .filter_map(|category| {
                current
                    .items
                    .get(&category.id)
                    .map(|items| (category.id.clone(), items.clone()))
            })
            .collect();
        Ok(InventorySnapshot::new(items))
    }
}
