//! Scoring and S/A/B ranking.
//!
//! A score is the weighted sum of three dimensions, each normalised to 0-100:
//! reach (view count tiers), recency (age relative to a reference day) and
//! keyword relevance (core vs secondary keyword hits). Weights are expected
//! to sum to 1.0 so the score stays on the 0-100 scale; the engine does not
//! enforce it, callers own that.
//!
//! [`RankEngine::apply`] is the single place that writes `score` and `rank`
//! onto a [`Video`].

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TubescopeError},
    types::{Rank, Video},
};

pub const DEFAULT_CORE_KEYWORDS: &[&str] = &[
    "AIPCon",
    "Foundrycon",
    "Paragon",
    "Pipeline",
    "AIP",
    "Foundry",
    "Gotham",
    "Apollo",
];

pub const DEFAULT_SECONDARY_KEYWORDS: &[&str] = &[
    "Demo",
    "Tutorial",
    "Workshop",
    "Case Study",
    "Bootcamp",
    "How to",
    "Guide",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(alias = "view")]
    pub views: f64,
    #[serde(alias = "time")]
    pub recency: f64,
    #[serde(alias = "keyword")]
    pub keywords: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            views: 0.4,
            recency: 0.3,
            keywords: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankThresholds {
    #[serde(rename = "S", alias = "s")]
    pub s: f64,
    #[serde(rename = "A", alias = "a")]
    pub a: f64,
    #[serde(rename = "B", alias = "b")]
    pub b: f64,
}

impl Default for RankThresholds {
    fn default() -> Self {
        Self {
            s: 85.0,
            a: 70.0,
            b: 0.0,
        }
    }
}

impl RankThresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("S", self.s), ("A", self.a), ("B", self.b)] {
            if !value.is_finite() || value < 0.0 {
                return Err(TubescopeError::config(format!(
                    "rank threshold {name} must be a finite, non-negative number (got {value})"
                )));
            }
        }
        if !(self.s >= self.a && self.a >= self.b) {
            return Err(TubescopeError::config(format!(
                "rank thresholds must satisfy S >= A >= B (got S={}, A={}, B={})",
                self.s, self.a, self.b
            )));
        }
        Ok(())
    }
}

/// View-count tier floors; at or above `tier_1` scores 100, then 80, 60, else 40.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewTiers {
    pub tier_1: u64,
    pub tier_2: u64,
    pub tier_3: u64,
}

impl Default for ViewTiers {
    fn default() -> Self {
        Self {
            tier_1: 100_000,
            tier_2: 50_000,
            tier_3: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub thresholds: RankThresholds,
    pub view_tiers: ViewTiers,
    pub core_keywords: Vec<String>,
    pub secondary_keywords: Vec<String>,
    /// Day recency is measured from. Today when unset.
    pub reference_date: Option<NaiveDate>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            thresholds: RankThresholds::default(),
            view_tiers: ViewTiers::default(),
            core_keywords: DEFAULT_CORE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            secondary_keywords: DEFAULT_SECONDARY_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            reference_date: None,
        }
    }
}

/// Rank for a score: checked from S down; below B is unranked.
pub fn rank(score: f64, thresholds: &RankThresholds) -> Option<Rank> {
    if score >= thresholds.s {
        Some(Rank::S)
    } else if score >= thresholds.a {
        Some(Rank::A)
    } else if score >= thresholds.b {
        Some(Rank::B)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct RankEngine {
    weights: ScoringWeights,
    thresholds: RankThresholds,
    view_tiers: ViewTiers,
    core: Vec<String>,
    secondary: Vec<String>,
    reference_date: NaiveDate,
}

impl RankEngine {
    /// Fails on malformed thresholds instead of substituting defaults.
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.thresholds.validate()?;
        let lower = |list: Vec<String>| -> Vec<String> {
            list.into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };
        Ok(Self {
            weights: config.weights,
            thresholds: config.thresholds,
            view_tiers: config.view_tiers,
            core: lower(config.core_keywords),
            secondary: lower(config.secondary_keywords),
            reference_date: config
                .reference_date
                .unwrap_or_else(|| Local::now().date_naive()),
        })
    }

    pub fn thresholds(&self) -> &RankThresholds {
        &self.thresholds
    }

    pub fn view_score(&self, views: u64) -> f64 {
        let tiers = &self.view_tiers;
        if views >= tiers.tier_1 {
            100.0
        } else if views >= tiers.tier_2 {
            80.0
        } else if views >= tiers.tier_3 {
            60.0
        } else {
            40.0
        }
    }

    pub fn recency_score(&self, published: Option<NaiveDate>) -> f64 {
        let Some(day) = published else {
            return 40.0;
        };
        match (self.reference_date - day).num_days() {
            ..=180 => 100.0,
            181..=365 => 80.0,
            366..=545 => 60.0,
            _ => 30.0,
        }
    }

    pub fn keyword_score(&self, text: &str) -> f64 {
        let text = text.to_lowercase();
        if self.core.iter().any(|k| text.contains(k)) {
            100.0
        } else if self.secondary.iter().any(|k| text.contains(k)) {
            70.0
        } else {
            40.0
        }
    }

    /// Weighted score rounded to two decimals.
    pub fn score(&self, video: &Video) -> f64 {
        let text = format!("{} {}", video.title, video.keywords);
        let total = self.view_score(video.views) * self.weights.views
            + self.recency_score(video.day()) * self.weights.recency
            + self.keyword_score(&text) * self.weights.keywords;
        (total * 100.0).round() / 100.0
    }

    pub fn rank(&self, score: f64) -> Option<Rank> {
        rank(score, &self.thresholds)
    }

    pub fn apply(&self, video: &mut Video) {
        video.score = self.score(video);
        video.rank = self.rank(video.score);
    }

    pub fn apply_all(&self, videos: &mut [Video]) {
        for video in videos.iter_mut() {
            self.apply(video);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RankEngine {
        RankEngine::new(ScoringConfig {
            reference_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            ..ScoringConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rank_descending_threshold_check() {
        let t = RankThresholds::default();
        assert_eq!(rank(85.0, &t), Some(Rank::S));
        assert_eq!(rank(84.99, &t), Some(Rank::A));
        assert_eq!(rank(70.0, &t), Some(Rank::A));
        assert_eq!(rank(12.0, &t), Some(Rank::B));

        let strict = RankThresholds { s: 85.0, a: 70.0, b: 50.0 };
        assert_eq!(rank(49.0, &strict), None);
    }

    #[test]
    fn test_rank_is_monotonic_in_score() {
        let t = RankThresholds { s: 85.0, a: 70.0, b: 40.0 };
        let mut previous = 0;
        for step in 0..=240 {
            let score = f64::from(step) * 0.5;
            let weight = Rank::weight_of(rank(score, &t));
            assert!(weight >= previous, "rank went down at {score}");
            previous = weight;
        }
    }

    #[test]
    fn test_malformed_thresholds_are_config_errors() {
        let inverted = ScoringConfig {
            thresholds: RankThresholds { s: 60.0, a: 70.0, b: 0.0 },
            ..ScoringConfig::default()
        };
        assert!(matches!(RankEngine::new(inverted), Err(TubescopeError::Config { .. })));

        let nan = ScoringConfig {
            thresholds: RankThresholds { s: f64::NAN, a: 70.0, b: 0.0 },
            ..ScoringConfig::default()
        };
        assert!(matches!(RankEngine::new(nan), Err(TubescopeError::Config { .. })));
    }

    #[test]
    fn test_score_weights_dimensions() {
        let engine = engine();
        let mut video = Video::new("abcdefghijk", "AIPCon 6 keynote");
        video.views = 150_000;
        video.date = "2025-03-01".into();
        // 100*0.4 + 100*0.3 + 100*0.3
        assert_eq!(engine.score(&video), 100.0);

        let mut quiet = Video::new("abcdefghijl", "Office tour");
        quiet.views = 1_000;
        quiet.date = "Unknown".into();
        // 40*0.4 + 40*0.3 + 40*0.3
        assert_eq!(engine.score(&quiet), 40.0);
    }

    #[test]
    fn test_secondary_keywords_and_recency_tiers() {
        let engine = engine();
        assert_eq!(engine.keyword_score("Bootcamp recap"), 70.0);
        assert_eq!(engine.keyword_score("Gotham bootcamp"), 100.0);
        assert_eq!(engine.recency_score(NaiveDate::from_ymd_opt(2024, 10, 1)), 80.0);
        assert_eq!(engine.recency_score(NaiveDate::from_ymd_opt(2024, 3, 1)), 60.0);
        assert_eq!(engine.recency_score(NaiveDate::from_ymd_opt(2021, 1, 1)), 30.0);
    }

    #[test]
    fn test_apply_writes_score_and_rank() {
        let engine = engine();
        let mut video = Video::new("abcdefghijk", "Foundry demo");
        video.views = 60_000;
        video.date = "2024-10-01".into();
        engine.apply(&mut video);
        // 80*0.4 + 80*0.3 + 100*0.3 = 86
        assert_eq!(video.score, 86.0);
        assert_eq!(video.rank, Some(Rank::S));
    }

    #[test]
    fn test_board_thresholds_deserialize() {
        let t: RankThresholds =
            serde_json::from_value(serde_json::json!({"S": 85, "A": 70, "B": 0})).unwrap();
        assert_eq!(t, RankThresholds::default());
        let w: ScoringWeights =
            serde_json::from_value(serde_json::json!({"view": 0.4, "time": 0.3, "keyword": 0.3}))
                .unwrap();
        assert_eq!(w, ScoringWeights::default());
    }
}
