use crate::models::CategoryDescriptor;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const MIN_MAX_RAILS: usize = 3;
pub const MAX_MAX_RAILS: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment configuration error: {0}")]
    Env(#[from] envy::Error),
}

/// Personalization parameters, supplied explicitly to every computation.
///
/// Environment variables use the `RAILS_` prefix (`RAILS_MAX_RAILS=4`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RailConfig {
    /// Master switch; when off, every computation returns the plain catalog
    pub tracking_enabled: bool,
    /// Upper bound on rails flagged as personalized (3..=5)
    pub max_rails: usize,
    /// Usable inventory a category needs before it can be promoted
    pub min_events_per_rail: usize,
    /// Interactions required before any personalization happens
    pub min_interactions: usize,
    /// Fraction of displayed rails that must stay unpersonalized
    pub discovery_floor: f64,
    /// Down votes after which an event is suppressed
    pub veto_threshold: u32,
    pub half_life_days: u32,
    /// Cap on synthesized categories per computation
    pub max_generated: usize,
    /// Decay-weighted occurrences a term must exceed to become a category
    pub min_generated_signal: f64,
}

impl Default for RailConfig {
    fn default() -> Self {
        Self {
            tracking_enabled: true,
            max_rails: 5,
            min_events_per_rail: 4,
            min_interactions: 5,
            discovery_floor: 0.3,
            veto_threshold: 2,
            half_life_days: 30,
            max_generated: 3,
            min_generated_signal: 1.5,
        }
    }
}

impl RailConfig {
    /// Load from `RAILS_*` environment variables (and `.env`), defaulting absent keys
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = envy::prefixed("RAILS_").from_env::<RailConfig>()?;
        Ok(config)
    }

    /// Copy with every out-of-range value clamped to the nearest valid one
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let mut config = self.clone();

        let max_rails = config.max_rails.clamp(MIN_MAX_RAILS, MAX_MAX_RAILS);
        if max_rails != config.max_rails {
            warn!(
                value = config.max_rails,
                clamped = max_rails,
                "max_rails out of range"
            );
            config.max_rails = max_rails;
        }

        let floor = if config.discovery_floor.is_finite() {
            config.discovery_floor.clamp(0.0, 1.0)
        } else {
            defaults.discovery_floor
        };
        if floor != config.discovery_floor {
            warn!(
                value = config.discovery_floor,
                clamped = floor,
                "discovery_floor out of range"
            );
            config.discovery_floor = floor;
        }

        if config.veto_threshold == 0 {
            warn!(clamped = 1, "veto_threshold must be at least 1");
            config.veto_threshold = 1;
        }

        if config.half_life_days == 0 {
            warn!(clamped = 1, "half_life_days must be at least 1");
            config.half_life_days = 1;
        }

        if !config.min_generated_signal.is_finite() || config.min_generated_signal < 0.0 {
            warn!(
                value = config.min_generated_signal,
                clamped = defaults.min_generated_signal,
                "min_generated_signal out of range"
            );
            config.min_generated_signal = defaults.min_generated_signal;
        }

        config
    }

    pub fn half_life(&self) -> f64 {
        f64::from(self.half_life_days.max(1))
    }
}

/// Curated catalog used when a caller does not supply one
pub fn default_catalog() -> Vec<CategoryDescriptor> {
    vec![
        CategoryDescriptor::static_category("music", "Live Music", "🎵", "music concert"),
        CategoryDescriptor::static_category("food", "Food & Drink", "🍜", "food drink tasting"),
        CategoryDescriptor::static_category("arts", "Arts & Theatre", "🎭", "art theatre gallery"),
        CategoryDescriptor::static_category("sports", "Sports", "🏟️", "sports game match"),
        CategoryDescriptor::static_category("comedy", "Comedy", "😂", "comedy standup"),
        CategoryDescriptor::static_category("nightlife", "Nightlife", "🌙", "club party dj"),
        CategoryDescriptor::static_category("family", "Family Friendly", "👨‍👩‍👧", "family kids"),
        CategoryDescriptor::static_category("outdoors", "Outdoors", "🌲", "outdoor hike park"),
    ]
}
