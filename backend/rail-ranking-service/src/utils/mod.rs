// Utility functions for rail-ranking-service

use chrono::{DateTime, Utc};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Guards ceil() against products like 10 * 0.3 = 3.0000000000000004
const CEIL_EPSILON: f64 = 1e-9;

/// Age of `timestamp` relative to `now` in fractional days.
///
/// Timestamps in the future count as age zero.
pub fn age_days(now: DateTime<Utc>, timestamp: DateTime<Utc>) -> f64 {
    let millis = (now - timestamp).num_milliseconds().max(0);
    millis as f64 / MILLIS_PER_DAY
}

/// Half-life decay: `2^(-age_days / half_life_days)`.
///
/// `decay(0) == 1`, `decay(half_life) == 0.5`, strictly decreasing in age.
pub fn half_life_decay(age_days: f64, half_life_days: f64) -> f64 {
    (-age_days.max(0.0) / half_life_days).exp2()
}

/// Normalize a raw sum against the dimension maximum into [0, 1].
///
/// A non-positive maximum means "no signal" and yields 0.
pub fn normalize_by_max(raw: f64, max: f64) -> f64 {
    if max <= 0.0 || !max.is_finite() {
        0.0
    } else {
        (raw / max).clamp(0.0, 1.0)
    }
}

/// `round(score * 100)` as an integer percentage in 0..=100
pub fn affinity_percent(score: f64) -> u8 {
    if !score.is_finite() {
        return 0;
    }
    (score.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Number of rails out of `n` that must stay unpersonalized: `ceil(n * floor)`.
pub fn discovery_slots(n: usize, floor: f64) -> usize {
    let required = (n as f64 * floor.clamp(0.0, 1.0) - CEIL_EPSILON).ceil();
    (required.max(0.0) as usize).min(n)
}

/// Lowercase, trim and collapse internal whitespace
pub fn normalize_term(raw: &str) -> String {
    raw.split_whitespace()
        .map(|token| token.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// URL-safe slug used in generated category ids
pub fn slugify(term: &str) -> String {
    let mut slug = String::with_capacity(term.len());
    let mut pending_dash = false;
    for ch in term.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.extend(ch.to_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Capitalize the first letter of every word ("jazz brunch" -> "Jazz Brunch")
pub fn title_case(term: &str) -> String {
    term.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
