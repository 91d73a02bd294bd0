use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::TubescopeError;

/// Literal used by the ingestion side when a publish date could not be read.
pub const UNKNOWN_DATE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    B,
    A,
    S,
}

impl Rank {
    /// Sort weight: S=3, A=2, B=1. Unranked videos weigh 0.
    pub fn weight(self) -> u8 {
        match self {
            Rank::S => 3,
            Rank::A => 2,
            Rank::B => 1,
        }
    }

    pub fn weight_of(rank: Option<Rank>) -> u8 {
        rank.map(Rank::weight).unwrap_or(0)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rank::S => "S",
            Rank::A => "A",
            Rank::B => "B",
        };
        f.write_str(s)
    }
}

impl FromStr for Rank {
    type Err = TubescopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "S" | "s" => Ok(Rank::S),
            "A" | "a" => Ok(Rank::A),
            "B" | "b" => Ok(Rank::B),
            other => Err(TubescopeError::Validation(format!("unknown rank '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptPresence {
    Has,
    #[default]
    None,
}

impl TranscriptPresence {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "has" | "有" | "yes" | "true" => TranscriptPresence::Has,
            _ => TranscriptPresence::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSource {
    Native,
    Whisper,
}

impl TranscriptSource {
    /// Case-insensitive; the ingestion side writes `youtube` for captions it did not transcribe itself.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "native" | "youtube" => Some(TranscriptSource::Native),
            "whisper" => Some(TranscriptSource::Whisper),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Product,
    NonProduct,
    Other,
    #[default]
    Unclassified,
}

impl Category {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "product" | "产品介绍" => Category::Product,
            "non-product" | "非产品介绍" => Category::NonProduct,
            "other" | "其他" => Category::Other,
            _ => Category::Unclassified,
        }
    }

    /// Searchable label; empty for rows the ingestion side never classified.
    pub fn label(self) -> &'static str {
        match self {
            Category::Product => "product",
            Category::NonProduct => "non-product",
            Category::Other => "other",
            Category::Unclassified => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    #[serde(default, alias = "_video_id")]
    pub id: String,
    #[serde(default, alias = "Title")]
    pub title: String,
    #[serde(default = "unknown_date", alias = "Date")]
    pub date: String,
    #[serde(default, alias = "Views", deserialize_with = "lenient_u64")]
    pub views: u64,
    #[serde(default, alias = "Rank", deserialize_with = "lenient_rank")]
    pub rank: Option<Rank>,
    #[serde(default, alias = "Score", deserialize_with = "lenient_f64")]
    pub score: f64,
    #[serde(default, alias = "Transcript", deserialize_with = "lenient_presence")]
    pub transcript: TranscriptPresence,
    #[serde(
        default,
        alias = "TranscriptSource",
        deserialize_with = "lenient_source"
    )]
    pub transcript_source: Option<TranscriptSource>,
    #[serde(default, alias = "Keywords", deserialize_with = "lenient_text")]
    pub keywords: String,
    #[serde(default, alias = "Category", deserialize_with = "lenient_category")]
    pub category: Category,
    #[serde(default, alias = "URL")]
    pub url: String,
}

fn unknown_date() -> String {
    UNKNOWN_DATE.to_string()
}

impl Video {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            url: format!("https://www.youtube.com/watch?v={id}"),
            id,
            title: title.into(),
            date: unknown_date(),
            views: 0,
            rank: None,
            score: 0.0,
            transcript: TranscriptPresence::None,
            transcript_source: None,
            keywords: String::new(),
            category: Category::Unclassified,
        }
    }

    /// Publish date truncated to day granularity. `None` for absent or `Unknown` dates.
    pub fn day(&self) -> Option<NaiveDate> {
        parse_day(&self.date)
    }

    pub fn has_transcript(&self) -> bool {
        self.transcript == TranscriptPresence::Has
    }

    /// Fills the id from the URL for rows that only carry a link.
    pub fn normalize(&mut self) {
        if self.id.is_empty()
            && let Some(id) = video_id_from_url(&self.url)
        {
            self.id = id;
        }
    }
}

/// Parses the leading `YYYY-MM-DD` (or compact `YYYYMMDD`) of a date string.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case(UNKNOWN_DATE) {
        return None;
    }
    if let Some(head) = raw.get(..10)
        && let Ok(day) = NaiveDate::parse_from_str(head, "%Y-%m-%d")
    {
        return Some(day);
    }
    raw.get(..8)
        .filter(|head| head.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y%m%d").ok())
}

pub fn is_video_id(candidate: &str) -> bool {
    candidate.len() == 11
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Extracts the 11-character video id from a YouTube link.
///
/// Tracking parameters, timestamps and host variants (`m.`, `music.`,
/// `youtu.be`) collapse to the same id, so this is the dedup key for
/// conversion jobs. A bare id is accepted as-is.
pub fn video_id_from_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if is_video_id(trimmed) {
        return Some(trimmed.to_string());
    }

    let parsed = if trimmed.contains("://") {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("https://{trimmed}"))
    }
    .ok()?;

    let host = parsed.host_str()?;
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .or_else(|| host.strip_prefix("music."))
        .unwrap_or(host);

    let candidate = match host {
        "youtu.be" => parsed.path_segments()?.next().map(str::to_string),
        "youtube.com" | "youtube-nocookie.com" => {
            let mut segments = parsed.path_segments()?;
            match segments.next() {
                Some("watch") => parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

/// Server-side job state. Reports stored before the server tracked status
/// carry none, and the server serves them as `completed`; a missing field
/// reads the same way here, so such entries are terminal and never polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    #[default]
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub created_at: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub selected_count: u64,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub report: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub created_at: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub selected_count: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub with_transcript_count: u64,
    #[serde(default)]
    pub video_titles: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(u64),
    Float(f64),
    Text(String),
    Null(()),
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Int(n) => n,
        Loose::Float(f) if f.is_finite() && f > 0.0 => f as u64,
        Loose::Text(s) => s.trim().replace(',', "").parse::<f64>().map_or(0, |f| {
            if f.is_finite() && f > 0.0 { f as u64 } else { 0 }
        }),
        _ => 0,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Int(n) => n as f64,
        Loose::Float(f) => f,
        Loose::Text(s) => s
            .trim()
            .trim_end_matches("/100")
            .trim()
            .parse()
            .unwrap_or(0.0),
        Loose::Null(()) => 0.0,
    })
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Text(s) => s,
        Loose::Int(n) => n.to_string(),
        Loose::Float(f) => f.to_string(),
        Loose::Null(()) => String::new(),
    })
}

fn lenient_rank<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Rank>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|r| r.parse().ok()))
}

fn lenient_presence<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<TranscriptPresence, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(TranscriptPresence::parse).unwrap_or_default())
}

fn lenient_category<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Category, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(Category::parse).unwrap_or_default())
}

fn lenient_source<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<TranscriptSource>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(TranscriptSource::parse))
}
