// ============================================
// Dynamic Category Generator (動態分類生成)
// ============================================
//
// Synthesizes rails the visitor seems to want but that the curated
// catalog does not offer:
// 1. Repeated search terms
// 2. Category ids outside the static catalog
// 3. Venues the visitor keeps returning to
//
// Each occurrence contributes its half-life decay factor, so a candidate's
// signal is a decay-weighted occurrence count. Candidates already covered
// by a static category's keywords are dropped.

use crate::config::RailConfig;
use crate::models::{AffinityProfile, CategoryDescriptor, Interaction, InteractionKind};
use crate::utils::{age_days, half_life_decay, normalize_term, slugify, title_case};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Shortest search term worth a rail
const MIN_TERM_CHARS: usize = 2;
/// Shortest token used for keyword overlap with the catalog
const MIN_KEYWORD_CHARS: usize = 3;
/// A term must occur at least this often to count as repeated
const MIN_OCCURRENCES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SignalSource {
    Search,
    Category,
    Venue,
}

impl SignalSource {
    fn id_prefix(&self) -> &'static str {
        match self {
            SignalSource::Search => "dyn-search",
            SignalSource::Category => "dyn-category",
            SignalSource::Venue => "dyn-venue",
        }
    }

    fn emoji(&self) -> &'static str {
        match self {
            SignalSource::Search => "🔎",
            SignalSource::Category => "✨",
            SignalSource::Venue => "📍",
        }
    }
}

/// Accumulated evidence for one (source, slug) pair.
///
/// Spellings that share a slug ("hip hop", "hip-hop") pool their evidence;
/// the smallest spelling is kept so the result does not depend on log order.
#[derive(Debug)]
struct TermSignal {
    /// Normalized term
    term: String,
    /// Value as it appeared in the log (category id, venue name, query)
    raw: String,
    contributions: Vec<f64>,
    count: u32,
    last_seen: DateTime<Utc>,
}

impl TermSignal {
    fn weighted(&self) -> f64 {
        let mut values = self.contributions.clone();
        values.sort_by(|a, b| a.total_cmp(b));
        values.iter().sum()
    }
}

#[derive(Debug)]
struct Candidate {
    source: SignalSource,
    term: String,
    raw: String,
    score: f64,
    count: u32,
    last_seen: DateTime<Utc>,
}

impl Candidate {
    fn id(&self) -> String {
        format!("{}-{}", self.source.id_prefix(), slugify(&self.term))
    }

    /// score desc, occurrences desc, most recent first, id asc
    fn rank_cmp(&self, other: &Candidate) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.count.cmp(&self.count))
            .then_with(|| other.last_seen.cmp(&self.last_seen))
            .then_with(|| self.id().cmp(&other.id()))
    }

    fn into_descriptor(self) -> CategoryDescriptor {
        let id = self.id();
        let (title, reason) = match self.source {
            SignalSource::Search => (
                title_case(&self.term),
                format!(
                    "You searched for \"{}\" {} times recently",
                    self.term, self.count
                ),
            ),
            SignalSource::Category => (
                title_case(&self.term.replace(['-', '_'], " ")),
                format!("You keep exploring {} events", self.term),
            ),
            SignalSource::Venue => (
                format!("At {}", self.raw),
                format!("You keep coming back to events at {}", self.raw),
            ),
        };

        CategoryDescriptor {
            id,
            title,
            emoji: self.source.emoji().to_string(),
            query: self.raw,
            score: self.score,
            is_generated: true,
            reason: Some(reason),
        }
    }
}

/// Keywords the curated catalog already covers
#[derive(Debug, Default)]
struct CatalogKeywords {
    keywords: HashSet<String>,
}

impl CatalogKeywords {
    fn from_catalog(static_categories: &[CategoryDescriptor]) -> Self {
        let mut keywords = HashSet::new();
        for category in static_categories {
            keywords.insert(normalize_term(&category.id));
            keywords.insert(normalize_term(&category.title));
            let query = normalize_term(&category.query);
            for token in query.split_whitespace() {
                keywords.insert(token.to_string());
            }
            keywords.insert(query);
        }
        keywords.remove("");
        Self { keywords }
    }

    fn represents(&self, term: &str) -> bool {
        self.keywords.contains(term)
            || term
                .split_whitespace()
                .filter(|token| token.chars().count() >= MIN_KEYWORD_CHARS)
                .any(|token| self.keywords.contains(token))
    }
}

pub struct DynamicCategoryGenerator {
    half_life_days: f64,
    min_signal: f64,
    max_generated: usize,
}

impl Default for DynamicCategoryGenerator {
    fn default() -> Self {
        Self::from_config(&RailConfig::default())
    }
}

impl DynamicCategoryGenerator {
    pub fn new(half_life_days: f64, min_signal: f64, max_generated: usize) -> Self {
        Self {
            half_life_days,
            min_signal,
            max_generated,
        }
    }

    pub fn from_config(config: &RailConfig) -> Self {
        let config = config.sanitized();
        Self::new(
            config.half_life(),
            config.min_generated_signal,
            config.max_generated,
        )
    }

    /// Synthesize categories from the log.
    ///
    /// Decay is measured against `affinity.computed_at`, so generation and
    /// scoring see the same clock.
    pub fn generate(
        &self,
        interactions: &[Interaction],
        affinity: &AffinityProfile,
        static_categories: &[CategoryDescriptor],
    ) -> Vec<CategoryDescriptor> {
        if self.max_generated == 0 || interactions.is_empty() {
            return Vec::new();
        }

        let signals = self.collect_signals(interactions, affinity.computed_at);
        let strongest = signals
            .values()
            .map(TermSignal::weighted)
            .fold(0.0_f64, f64::max);
        if strongest <= 0.0 {
            return Vec::new();
        }

        let catalog = CatalogKeywords::from_catalog(static_categories);
        let static_ids: HashSet<String> = static_categories
            .iter()
            .map(|c| normalize_term(&c.id))
            .collect();

        // Best candidate per slug across sources; one candidate per slug keeps ids unique
        let mut by_slug: HashMap<String, Candidate> = HashMap::new();

        for ((source, slug), signal) in signals {
            let weighted = signal.weighted();
            if weighted <= self.min_signal || signal.count < MIN_OCCURRENCES {
                continue;
            }
            if static_ids.contains(signal.term.as_str()) || catalog.represents(&signal.term) {
                continue;
            }

            let has_affinity = match source {
                SignalSource::Search => true,
                SignalSource::Category => affinity.category_score(&signal.raw) > 0.0,
                SignalSource::Venue => affinity.venue_score(&signal.raw) > 0.0,
            };
            if !has_affinity {
                continue;
            }

            let candidate = Candidate {
                source,
                term: signal.term,
                raw: signal.raw,
                score: (weighted / strongest).clamp(0.0, 1.0),
                count: signal.count,
                last_seen: signal.last_seen,
            };

            match by_slug.get(&slug) {
                Some(existing) if existing.rank_cmp(&candidate) != Ordering::Greater => {}
                _ => {
                    by_slug.insert(slug, candidate);
                }
            }
        }

        let mut candidates: Vec<Candidate> = by_slug.into_values().collect();
        candidates.sort_by(|a, b| a.rank_cmp(b));
        candidates.truncate(self.max_generated);

        let generated: Vec<CategoryDescriptor> = candidates
            .into_iter()
            .map(Candidate::into_descriptor)
            .collect();

        for category in &generated {
            debug!(
                category_id = %category.id,
                score = category.score,
                reason = category.reason.as_deref().unwrap_or_default(),
                "Generated dynamic category"
            );
        }

        generated
    }

    fn collect_signals(
        &self,
        interactions: &[Interaction],
        now: DateTime<Utc>,
    ) -> HashMap<(SignalSource, String), TermSignal> {
        let mut signals: HashMap<(SignalSource, String), TermSignal> = HashMap::new();

        for interaction in interactions {
            if interaction.kind.affinity_weight() <= 0.0 {
                continue;
            }
            let decay = half_life_decay(age_days(now, interaction.timestamp), self.half_life_days);

            let mut record = |source: SignalSource, raw: &str| {
                let term = normalize_term(raw);
                let slug = slugify(&term);
                if term.chars().count() < MIN_TERM_CHARS || slug.is_empty() {
                    return;
                }
                let signal = signals.entry((source, slug)).or_insert_with(|| TermSignal {
                    term: term.clone(),
                    raw: raw.to_string(),
                    contributions: Vec::new(),
                    count: 0,
                    last_seen: interaction.timestamp,
                });
                if (term.as_str(), raw) < (signal.term.as_str(), signal.raw.as_str()) {
                    signal.term = term;
                    signal.raw = raw.to_string();
                }
                signal.contributions.push(decay);
                signal.count += 1;
                if interaction.timestamp > signal.last_seen {
                    signal.last_seen = interaction.timestamp;
                }
            };

            if let InteractionKind::Search { query: Some(query) } = &interaction.kind {
                record(SignalSource::Search, query);
            }
            if let Some(category) = &interaction.category {
                record(SignalSource::Category, category);
            }
            if let Some(venue) = &interaction.venue {
                record(SignalSource::Venue, venue);
            }
        }

        signals
    }
}

/// `generate(log, affinity, staticCategories)` with the configured thresholds
pub fn generate_dynamic_categories(
    interactions: &[Interaction],
    affinity: &AffinityProfile,
    static_categories: &[CategoryDescriptor],
    config: &RailConfig,
) -> Vec<CategoryDescriptor> {
    DynamicCategoryGenerator::from_config(config).generate(
        interactions,
        affinity,
        static_categories,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_catalog;
    use crate::services::affinity::AffinityEngine;
    use chrono::Duration;

    fn search(query: &str, now: DateTime<Utc>, days_ago: i64) -> Interaction {
        Interaction::new(
            InteractionKind::Search {
                query: Some(query.to_string()),
            },
            now - Duration::days(days_ago),
        )
    }

    fn generate(log: &[Interaction], now: DateTime<Utc>) -> Vec<CategoryDescriptor> {
        let affinity = AffinityEngine::default().compute(log, now);
        DynamicCategoryGenerator::default().generate(log, &affinity, &default_catalog())
    }

    #[test]
    fn test_repeated_search_generates_category() {
        let now = Utc::now();
        let log = vec![
            search("Jazz", now, 0),
            search("jazz ", now, 1),
            search("jazz", now, 2),
        ];

        let generated = generate(&log, now);
        assert_eq!(generated.len(), 1);
        let jazz = &generated[0];
        assert_eq!(jazz.id, "dyn-search-jazz");
        assert_eq!(jazz.title, "Jazz");
        assert_eq!(jazz.query, "Jazz");
        assert!(jazz.is_generated);
        assert_eq!(jazz.score, 1.0);
        assert!(jazz.reason.as_deref().unwrap().contains("3 times"));
    }

    #[test]
    fn test_single_search_is_not_enough() {
        let now = Utc::now();
        assert!(generate(&[search("jazz", now, 0)], now).is_empty());
    }

    #[test]
    fn test_stale_searches_fall_below_threshold() {
        let now = Utc::now();
        let log = vec![search("jazz", now, 90), search("jazz", now, 95)];
        assert!(generate(&log, now).is_empty());
    }

    #[test]
    fn test_catalog_keywords_suppress_candidates() {
        let now = Utc::now();
        let log = vec![
            search("concert tickets", now, 0),
            search("concert tickets", now, 0),
            search("music", now, 0),
            search("music", now, 0),
        ];
        assert!(generate(&log, now).is_empty());
    }

    #[test]
    fn test_unknown_category_generates() {
        let now = Utc::now();
        let log: Vec<Interaction> = (0..3)
            .map(|_| Interaction::new(InteractionKind::Click, now).with_category("board-games"))
            .collect();

        let generated = generate(&log, now);
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].id, "dyn-category-board-games");
        assert_eq!(generated[0].title, "Board Games");
        assert_eq!(generated[0].query, "board-games");
    }

    #[test]
    fn test_static_category_is_not_regenerated() {
        let now = Utc::now();
        let log: Vec<Interaction> = (0..4)
            .map(|_| Interaction::new(InteractionKind::Save, now).with_category("music"))
            .collect();
        assert!(generate(&log, now).is_empty());
    }

    #[test]
    fn test_venue_needs_positive_affinity() {
        let now = Utc::now();
        let mut log: Vec<Interaction> = (0..3)
            .map(|_| Interaction::new(InteractionKind::View, now).with_venue("The Fillmore"))
            .collect();
        let generated = generate(&log, now);
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].id, "dyn-venue-the-fillmore");
        assert_eq!(generated[0].title, "At The Fillmore");

        log.push(Interaction::new(InteractionKind::Unsave, now).with_venue("The Fillmore"));
        assert!(generate(&log, now).is_empty());
    }

    #[test]
    fn test_cap_keeps_strongest() {
        let now = Utc::now();
        let mut log = Vec::new();
        for (term, times) in [("jazz", 6), ("salsa", 5), ("poetry", 4), ("chess", 3)] {
            for _ in 0..times {
                log.push(search(term, now, 0));
            }
        }

        let ids: Vec<String> = generate(&log, now).into_iter().map(|c| c.id).collect();
        assert_eq!(
            ids,
            vec!["dyn-search-jazz", "dyn-search-salsa", "dyn-search-poetry"]
        );
    }

    #[test]
    fn test_tie_breaks_by_count_then_recency() {
        let now = Utc::now();
        let older = Candidate {
            source: SignalSource::Search,
            term: "a".to_string(),
            raw: "a".to_string(),
            score: 0.5,
            count: 3,
            last_seen: now - Duration::days(2),
        };
        let newer = Candidate {
            term: "b".to_string(),
            raw: "b".to_string(),
            last_seen: now,
            ..older
        };
        let busier = Candidate {
            source: SignalSource::Search,
            term: "c".to_string(),
            raw: "c".to_string(),
            score: 0.5,
            count: 4,
            last_seen: now - Duration::days(9),
        };

        let mut ranked = vec![older, newer, busier];
        ranked.sort_by(|a, b| a.rank_cmp(b));
        let terms: Vec<_> = ranked.iter().map(|c| c.term.as_str()).collect();
        assert_eq!(terms, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_same_term_collapses_across_sources() {
        let now = Utc::now();
        let mut log: Vec<Interaction> = (0..3).map(|_| search("karaoke", now, 0)).collect();
        log.extend(
            (0..2).map(|_| Interaction::new(InteractionKind::Click, now).with_category("karaoke")),
        );

        let generated = generate(&log, now);
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].id, "dyn-search-karaoke");
    }

    #[test]
    fn test_score_is_relative_to_strongest_signal() {
        let now = Utc::now();
        let mut log: Vec<Interaction> = (0..2).map(|_| search("jazz", now, 0)).collect();
        log.extend(
            (0..4).map(|_| Interaction::new(InteractionKind::Click, now).with_category("music")),
        );

        let generated = generate(&log, now);
        assert_eq!(generated.len(), 1);
        assert!((generated[0].score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_spellings_sharing_a_slug_pool_into_one_category() {
        let now = Utc::now();
        let log = vec![
            search("hip hop", now, 0),
            search("hip-hop", now, 0),
            search("hip hop", now, 1),
            search("Hip-Hop!", now, 1),
        ];

        let generated = generate(&log, now);
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].id, "dyn-search-hip-hop");
        assert_eq!(generated[0].title, "Hip Hop");
        assert!(generated[0].reason.as_deref().unwrap().contains("4 times"));

        let mut reversed = log.clone();
        reversed.reverse();
        assert_eq!(generate(&reversed, now), generated);
    }

    #[test]
    fn test_differently_cased_static_category_is_not_regenerated() {
        let now = Utc::now();
        let log: Vec<Interaction> = (0..4)
            .map(|_| Interaction::new(InteractionKind::Click, now).with_category("Music"))
            .collect();
        assert!(generate(&log, now).is_empty());
    }
}
