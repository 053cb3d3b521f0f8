use crate::utils::normalize_term;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Reasons a logged interaction cannot be used. Always skipped, never fatal.
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("Missing timestamp")]
    MissingTimestamp,

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown interaction type: {0}")]
    UnknownType(String),

    #[error("Vote record without a valid direction: {0:?}")]
    InvalidVote(Option<String>),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Malformed log: {0}")]
    MalformedLog(String),
}

// ============================================
// Interaction log records
// ============================================

/// Timestamp as written by clients: RFC 3339 text or epoch milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

/// Interaction record as stored by the log collaborator, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawInteraction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

/// Validated interaction kind
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionKind {
    View,
    Click,
    Save,
    Unsave,
    Search { query: Option<String> },
    Vote { direction: VoteDirection },
}

impl InteractionKind {
    /// Contribution weight to affinity before decay.
    ///
    /// Unsave mirrors save with the opposite sign. Votes only feed the veto filter.
    pub fn affinity_weight(&self) -> f64 {
        match self {
            InteractionKind::View => 1.0,
            InteractionKind::Click => 10.0,
            InteractionKind::Search { .. } => 30.0,
            InteractionKind::Save => 50.0,
            InteractionKind::Unsave => -50.0,
            InteractionKind::Vote { .. } => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::View => "view",
            InteractionKind::Click => "click",
            InteractionKind::Save => "save",
            InteractionKind::Unsave => "unsave",
            InteractionKind::Search { .. } => "search",
            InteractionKind::Vote { .. } => "vote",
        }
    }
}

/// A validated, immutable interaction
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub timestamp: DateTime<Utc>,
    pub event_id: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub venue: Option<String>,
}

impl Interaction {
    pub fn new(kind: InteractionKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            event_id: None,
            category: None,
            price: None,
            venue: None,
        }
    }

    pub fn with_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn price_bucket(&self) -> Option<PriceBucket> {
        self.price.and_then(PriceBucket::from_price)
    }

    pub fn is_down_vote(&self) -> bool {
        matches!(
            self.kind,
            InteractionKind::Vote {
                direction: VoteDirection::Down
            }
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_timestamp(raw: Option<RawTimestamp>) -> Result<DateTime<Utc>, InputError> {
    match raw {
        None => Err(InputError::MissingTimestamp),
        Some(RawTimestamp::Millis(ms)) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| InputError::InvalidTimestamp(ms.to_string())),
        Some(RawTimestamp::Text(text)) => DateTime::parse_from_rfc3339(text.trim())
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| InputError::InvalidTimestamp(text)),
    }
}

impl TryFrom<RawInteraction> for Interaction {
    type Error = InputError;

    fn try_from(raw: RawInteraction) -> Result<Self, Self::Error> {
        let kind = match raw.kind.trim().to_ascii_lowercase().as_str() {
            "view" => InteractionKind::View,
            "click" => InteractionKind::Click,
            "save" => InteractionKind::Save,
            "unsave" => InteractionKind::Unsave,
            "search" => InteractionKind::Search {
                query: non_empty(raw.query),
            },
            "vote" => {
                let direction = match raw.vote.as_deref().map(str::trim) {
                    Some("up") => VoteDirection::Up,
                    Some("down") => VoteDirection::Down,
                    _ => return Err(InputError::InvalidVote(raw.vote)),
                };
                InteractionKind::Vote { direction }
            }
            _ => return Err(InputError::UnknownType(raw.kind)),
        };

        let timestamp = parse_timestamp(raw.timestamp)?;

        Ok(Interaction {
            kind,
            timestamp,
            event_id: non_empty(raw.event_id),
            category: non_empty(raw.category),
            price: raw.price.filter(|p| p.is_finite() && *p >= 0.0),
            venue: non_empty(raw.venue),
        })
    }
}

/// Validated snapshot of the interaction log
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    pub interactions: Vec<Interaction>,
    pub skipped: usize,
}

impl ParsedLog {
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }
}

/// Validate raw records, skipping malformed ones
pub fn parse_log(records: &[RawInteraction]) -> ParsedLog {
    let mut parsed = ParsedLog::default();

    for record in records {
        match Interaction::try_from(record.clone()) {
            Ok(interaction) => parsed.interactions.push(interaction),
            Err(e) => {
                parsed.skipped += 1;
                debug!(error = %e, "Skipping malformed interaction");
            }
        }
    }

    parsed
}

/// Decode a JSON array of records; elements that do not decode are skipped
pub fn parse_log_json(json: &str) -> Result<ParsedLog, InputError> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| InputError::MalformedLog(e.to_string()))?;
    Ok(parse_log_values(values))
}

/// Same as [`parse_log_json`] for records that are already decoded as JSON values
pub fn parse_log_values(values: Vec<serde_json::Value>) -> ParsedLog {
    let mut records = Vec::with_capacity(values.len());
    let mut undecodable = 0;
    for value in values {
        match serde_json::from_value::<RawInteraction>(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                undecodable += 1;
                let error = InputError::MalformedRecord(e.to_string());
                debug!(error = %error, "Skipping malformed interaction");
            }
        }
    }

    let mut parsed = parse_log(&records);
    parsed.skipped += undecodable;
    parsed
}

// ============================================
// Affinity
// ============================================

/// Fixed price thresholds used as the price affinity dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriceBucket {
    Free,
    Under25,
    From25To50,
    From50To100,
    Over100,
}

impl PriceBucket {
    pub fn from_price(price: f64) -> Option<Self> {
        if !price.is_finite() || price < 0.0 {
            return None;
        }
        let bucket = if price == 0.0 {
            PriceBucket::Free
        } else if price < 25.0 {
            PriceBucket::Under25
        } else if price < 50.0 {
            PriceBucket::From25To50
        } else if price < 100.0 {
            PriceBucket::From50To100
        } else {
            PriceBucket::Over100
        };
        Some(bucket)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceBucket::Free => "free",
            PriceBucket::Under25 => "under25",
            PriceBucket::From25To50 => "25-50",
            PriceBucket::From50To100 => "50-100",
            PriceBucket::Over100 => "100+",
        }
    }
}

impl fmt::Display for PriceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative interest per dimension. The top key of a dimension scores exactly 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AffinityProfile {
    pub categories: BTreeMap<String, f64>,
    pub price_ranges: BTreeMap<String, f64>,
    pub venues: BTreeMap<String, f64>,
    pub computed_at: DateTime<Utc>,
}

impl AffinityProfile {
    pub fn empty(computed_at: DateTime<Utc>) -> Self {
        Self {
            categories: BTreeMap::new(),
            price_ranges: BTreeMap::new(),
            venues: BTreeMap::new(),
            computed_at,
        }
    }

    /// Score for a category id; ids match case- and whitespace-insensitively
    pub fn category_score(&self, category_id: &str) -> f64 {
        self.categories
            .get(category_id)
            .or_else(|| self.categories.get(&normalize_term(category_id)))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn venue_score(&self, venue: &str) -> f64 {
        self.venues.get(venue).copied().unwrap_or(0.0)
    }

    pub fn price_score(&self, bucket: PriceBucket) -> f64 {
        self.price_ranges
            .get(bucket.as_str())
            .copied()
            .unwrap_or(0.0)
    }

    /// Highest scoring category, if any category has signal
    pub fn top_category(&self) -> Option<(&str, f64)> {
        self.categories
            .iter()
            .filter(|(_, score)| **score > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(id, score)| (id.as_str(), *score))
    }
}

// ============================================
// Categories and rails
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDescriptor {
    pub id: String,
    pub title: String,
    pub emoji: String,
    pub query: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub is_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CategoryDescriptor {
    /// Curated catalog entry
    pub fn static_category(
        id: impl Into<String>,
        title: impl Into<String>,
        emoji: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            emoji: emoji.into(),
            query: query.into(),
            score: 0.0,
            is_generated: false,
            reason: None,
        }
    }
}

/// One available event as reported by the inventory collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
}

impl InventoryItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            starts_at: None,
            price: None,
            venue: None,
        }
    }
}

/// A rendered shelf
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rail {
    pub category_id: String,
    pub title: String,
    pub emoji: String,
    pub events: Vec<InventoryItem>,
    pub is_personalized: bool,
    pub is_generated: bool,
    pub affinity_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Why a computation produced the plain catalog order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FallbackReason {
    TrackingDisabled,
    InsufficientInteractions { count: usize, required: usize },
    ComputationFailed { message: String },
}

/// Output of one computation, published to the rendering layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RailSet {
    pub rails: Vec<Rail>,
    pub personalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub computed_at: DateTime<Utc>,
    pub interaction_count: usize,
    pub skipped_records: usize,
}

impl RailSet {
    pub fn personalized_count(&self) -> usize {
        self.rails.iter().filter(|r| r.is_personalized).count()
    }
}
