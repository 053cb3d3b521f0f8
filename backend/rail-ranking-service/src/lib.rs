pub mod config;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{default_catalog, ConfigError, RailConfig};
pub use jobs::{RailRefreshJob, RefreshConfig, RefreshTrigger};
pub use models::{
    parse_log, parse_log_json, AffinityProfile, CategoryDescriptor, FallbackReason, Interaction,
    InteractionKind, InventoryItem, Rail, RailSet, RawInteraction,
};
pub use services::{
    AffinityEngine, DynamicCategoryGenerator, InventoryLookup, RailAssembler, RailPipeline,
    VetoRegistry,
};
