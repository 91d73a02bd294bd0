//! Filter predicate engine.
//!
//! `matches` and `apply_filters` are pure and are the only selection path:
//! the listing, the report preview and the report submit guard all call them,
//! so the "N videos match" preview always equals the selection a report is
//! built from.

use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::TubescopeError,
    types::{Category, Rank, TranscriptSource, Video},
};

/// Built-in product keywords, used when a board configures none.
pub const DEFAULT_PRODUCT_KEYWORDS: &[&str] = &[
    "AIPCon",
    "Foundrycon",
    "Paragon",
    "Pipeline",
    "AIP",
    "Foundry",
    "Gotham",
    "Apollo",
    "Demo",
    "Tutorial",
    "Workshop",
    "Case Study",
    "Bootcamp",
    "How to",
    "Guide",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptFilter {
    #[default]
    Any,
    Has,
    None,
    Native,
    Whisper,
}

impl TranscriptFilter {
    /// Value the backend's `transcriptFilter` clause compares against.
    pub fn wire_value(self) -> Option<&'static str> {
        match self {
            TranscriptFilter::Any => None,
            TranscriptFilter::Has => Some("有"),
            TranscriptFilter::None => Some("无"),
            TranscriptFilter::Native => Some("youtube"),
            TranscriptFilter::Whisper => Some("whisper"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryFilter {
    #[default]
    Any,
    Product,
    NonProduct,
    Other,
}

impl CategoryFilter {
    /// Value the backend's `categoryFilter` clause compares against.
    pub fn wire_value(self) -> Option<&'static str> {
        match self {
            CategoryFilter::Any => None,
            CategoryFilter::Product => Some("产品介绍"),
            CategoryFilter::NonProduct => Some("非产品介绍"),
            CategoryFilter::Other => Some("其他"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankFilter {
    #[default]
    Any,
    Exact(Rank),
    /// `S+`, `A+`, `B+`: the given rank or better.
    AtLeast(Rank),
}

impl RankFilter {
    pub fn accepts(self, rank: Option<Rank>) -> bool {
        match (self, rank) {
            (RankFilter::Any, _) => true,
            (_, None) => false,
            (RankFilter::Exact(wanted), Some(rank)) => rank == wanted,
            (RankFilter::AtLeast(floor), Some(rank)) => rank >= floor,
        }
    }
}

impl FromStr for RankFilter {
    type Err = TubescopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("any") {
            return Ok(RankFilter::Any);
        }
        match s.strip_suffix('+') {
            Some(floor) => Ok(RankFilter::AtLeast(floor.parse()?)),
            None => Ok(RankFilter::Exact(s.parse()?)),
        }
    }
}

impl fmt::Display for RankFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankFilter::Any => f.write_str("any"),
            RankFilter::Exact(rank) => write!(f, "{rank}"),
            RankFilter::AtLeast(rank) => write!(f, "{rank}+"),
        }
    }
}

/// Immutable filter value. Replace it with the `with_*` builders; never edit in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSpec {
    query: String,
    search_tags: bool,
    transcript: TranscriptFilter,
    category: CategoryFilter,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
    views_min: u64,
    views_max: u64,
    rank: RankFilter,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(self, query: impl Into<String>, search_tags: bool) -> Self {
        Self {
            query: query.into().trim().to_string(),
            search_tags,
            ..self
        }
    }

    pub fn with_transcript(self, transcript: TranscriptFilter) -> Self {
        Self { transcript, ..self }
    }

    pub fn with_category(self, category: CategoryFilter) -> Self {
        Self { category, ..self }
    }

    pub fn with_dates(self, date_from: Option<NaiveDate>, date_to: Option<NaiveDate>) -> Self {
        Self {
            date_from,
            date_to,
            ..self
        }
    }

    /// A zero bound is unbounded on that side.
    pub fn with_views(self, views_min: u64, views_max: u64) -> Self {
        Self {
            views_min,
            views_max,
            ..self
        }
    }

    pub fn with_rank(self, rank: RankFilter) -> Self {
        Self { rank, ..self }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn search_tags(&self) -> bool {
        self.search_tags
    }

    pub fn transcript(&self) -> TranscriptFilter {
        self.transcript
    }

    pub fn category(&self) -> CategoryFilter {
        self.category
    }

    pub fn date_range(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (self.date_from, self.date_to)
    }

    pub fn views_range(&self) -> (u64, u64) {
        (self.views_min, self.views_max)
    }

    pub fn rank(&self) -> RankFilter {
        self.rank
    }

    pub fn is_unconstrained(&self) -> bool {
        *self == FilterSpec::default()
    }

    pub fn to_wire(&self) -> WireFilters {
        WireFilters::from(self)
    }
}

/// Filter payload in the key layout the backend evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WireFilters {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub search: String,
    #[serde(default)]
    pub search_in_keywords: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rank_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rank_filter_multi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transcript_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub date_from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub views_min: u64,
    #[serde(default)]
    pub views_max: u64,
}

impl From<&FilterSpec> for WireFilters {
    fn from(spec: &FilterSpec) -> Self {
        let (rank_filter, rank_filter_multi) = match spec.rank {
            RankFilter::Any => (None, None),
            RankFilter::Exact(rank) => (Some(rank.to_string()), None),
            RankFilter::AtLeast(rank) => (None, Some(format!("{rank}+"))),
        };
        Self {
            search: spec.query.clone(),
            search_in_keywords: spec.search_tags,
            rank_filter,
            rank_filter_multi,
            transcript_filter: spec.transcript.wire_value().map(str::to_string),
            category_filter: spec.category.wire_value().map(str::to_string),
            date_from: spec.date_from,
            date_to: spec.date_to,
            views_min: spec.views_min,
            views_max: spec.views_max,
        }
    }
}

/// Lower-cased product keywords for the `product`/`non-product` category clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductKeywords {
    lowered: Vec<String>,
}

impl ProductKeywords {
    /// Falls back to [`DEFAULT_PRODUCT_KEYWORDS`] when `configured` yields nothing.
    pub fn new<I, S>(configured: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lowered: Vec<String> = configured
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if lowered.is_empty() {
            return Self::default();
        }
        Self { lowered }
    }

    pub fn matches(&self, haystack_lowered: &str) -> bool {
        self.lowered.iter().any(|k| haystack_lowered.contains(k))
    }

    pub fn len(&self) -> usize {
        self.lowered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lowered.is_empty()
    }
}

impl Default for ProductKeywords {
    fn default() -> Self {
        Self {
            lowered: DEFAULT_PRODUCT_KEYWORDS
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }
}

fn tag_text(video: &Video) -> String {
    format!("{} {}", video.title, video.keywords).to_lowercase()
}

pub fn is_product(video: &Video, keywords: &ProductKeywords) -> bool {
    keywords.matches(&tag_text(video))
}

fn matches_query(video: &Video, spec: &FilterSpec) -> bool {
    if spec.query.is_empty() {
        return true;
    }
    let needle = spec.query.to_lowercase();
    video.title.to_lowercase().contains(&needle)
        || (spec.search_tags && tag_text(video).contains(&needle))
}

fn matches_transcript(video: &Video, filter: TranscriptFilter) -> bool {
    match filter {
        TranscriptFilter::Any => true,
        TranscriptFilter::Has => video.has_transcript(),
        TranscriptFilter::None => !video.has_transcript(),
        TranscriptFilter::Native => {
            video.has_transcript() && video.transcript_source == Some(TranscriptSource::Native)
        }
        TranscriptFilter::Whisper => {
            video.has_transcript() && video.transcript_source == Some(TranscriptSource::Whisper)
        }
    }
}

fn matches_category(video: &Video, filter: CategoryFilter, keywords: &ProductKeywords) -> bool {
    match filter {
        CategoryFilter::Any => true,
        CategoryFilter::Product => is_product(video, keywords),
        CategoryFilter::Other => video.category == Category::Other,
        CategoryFilter::NonProduct => {
            video.category != Category::Other && !is_product(video, keywords)
        }
    }
}

fn matches_dates(video: &Video, spec: &FilterSpec) -> bool {
    if spec.date_from.is_none() && spec.date_to.is_none() {
        return true;
    }
    let Some(day) = video.day() else {
        return false;
    };
    spec.date_from.is_none_or(|from| day >= from) && spec.date_to.is_none_or(|to| day <= to)
}

fn matches_views(video: &Video, spec: &FilterSpec) -> bool {
    (spec.views_min == 0 || video.views >= spec.views_min)
        && (spec.views_max == 0 || video.views <= spec.views_max)
}

/// Every clause must hold.
pub fn matches(video: &Video, spec: &FilterSpec, keywords: &ProductKeywords) -> bool {
    matches_query(video, spec)
        && matches_transcript(video, spec.transcript)
        && matches_category(video, spec.category, keywords)
        && matches_dates(video, spec)
        && matches_views(video, spec)
        && spec.rank.accepts(video.rank)
}

/// Ordered sub-sequence of `videos` satisfying [`matches`].
pub fn apply_filters(videos: &[Video], spec: &FilterSpec, keywords: &ProductKeywords) -> Vec<Video> {
    videos
        .iter()
        .filter(|v| matches(v, spec, keywords))
        .cloned()
        .collect()
}

pub fn count_matches(videos: &[Video], spec: &FilterSpec, keywords: &ProductKeywords) -> usize {
    videos.iter().filter(|v| matches(v, spec, keywords)).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Date,
    Score,
    Views,
    Rank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

fn compare(a: &Video, b: &Video, key: SortKey) -> Ordering {
    match key {
        // ISO dates order lexicographically; "Unknown" and empty sort as the empty string.
        SortKey::Date => date_key(a).cmp(date_key(b)),
        SortKey::Score => a.score.total_cmp(&b.score),
        SortKey::Views => a.views.cmp(&b.views),
        SortKey::Rank => Rank::weight_of(a.rank).cmp(&Rank::weight_of(b.rank)),
    }
}

fn date_key(video: &Video) -> &str {
    if video.day().is_some() { &video.date } else { "" }
}

/// Stable in both directions: equal keys keep their prior relative order.
pub fn sort_videos(videos: &mut [Video], key: SortKey, direction: SortDirection) {
    match direction {
        SortDirection::Ascending => videos.sort_by(|a, b| compare(a, b, key)),
        SortDirection::Descending => videos.sort_by(|a, b| compare(b, a, key)),
    }
}

/// First `n` of the filtered, sorted selection. Deterministic across calls.
pub fn top_n(
    videos: &[Video],
    spec: &FilterSpec,
    keywords: &ProductKeywords,
    key: SortKey,
    direction: SortDirection,
    n: usize,
) -> Vec<Video> {
    let mut selected = apply_filters(videos, spec, keywords);
    sort_videos(&mut selected, key, direction);
    selected.truncate(n);
    selected
}

const QUERY_STOPWORDS: &[&str] = &[
    "的", "了", "在", "是", "和", "与", "或", "等", "a", "an", "the", "of", "in", "on",
];

/// Relevance pre-ordering for natural-language report requests.
///
/// Each query word found in the title or category is worth 100, the rank
/// weight 10 per step and every 10k views 1 (capped at 10). Stable for ties.
pub fn rank_by_query(videos: &[Video], query: &str) -> Vec<Video> {
    let lowered = query.trim().to_lowercase();
    let mut words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1 && !QUERY_STOPWORDS.contains(w))
        .collect();
    words.sort_unstable();
    words.dedup();

    let mut scored: Vec<(u64, &Video)> = videos
        .iter()
        .map(|v| {
            let text = format!("{} {}", v.title, v.category.label()).to_lowercase();
            let hits = words.iter().filter(|w| text.contains(**w)).count() as u64;
            let rank = u64::from(Rank::weight_of(v.rank));
            let reach = (v.views / 10_000).min(10);
            (hits * 100 + rank * 10 + reach, v)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, v)| v.clone()).collect()
}
