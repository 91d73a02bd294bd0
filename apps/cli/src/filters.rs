use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use tubescope_core::{
    BoardConfig, CategoryFilter, FilterSpec, JobApi, RankEngine, RankFilter, ScoringConfig,
    SortDirection, SortKey, TranscriptFilter, Video,
};

#[derive(Clone, Copy, Default, ValueEnum)]
pub enum CliTranscript {
    #[default]
    Any,
    Has,
    None,
    Native,
    Whisper,
}

impl From<CliTranscript> for TranscriptFilter {
    fn from(cli: CliTranscript) -> Self {
        match cli {
            CliTranscript::Any => TranscriptFilter::Any,
            CliTranscript::Has => TranscriptFilter::Has,
            CliTranscript::None => TranscriptFilter::None,
            CliTranscript::Native => TranscriptFilter::Native,
            CliTranscript::Whisper => TranscriptFilter::Whisper,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
pub enum CliCategory {
    #[default]
    Any,
    Product,
    NonProduct,
    Other,
}

impl From<CliCategory> for CategoryFilter {
    fn from(cli: CliCategory) -> Self {
        match cli {
            CliCategory::Any => CategoryFilter::Any,
            CliCategory::Product => CategoryFilter::Product,
            CliCategory::NonProduct => CategoryFilter::NonProduct,
            CliCategory::Other => CategoryFilter::Other,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
pub enum CliSort {
    #[default]
    Date,
    Score,
    Views,
    Rank,
}

impl From<CliSort> for SortKey {
    fn from(cli: CliSort) -> Self {
        match cli {
            CliSort::Date => SortKey::Date,
            CliSort::Score => SortKey::Score,
            CliSort::Views => SortKey::Views,
            CliSort::Rank => SortKey::Rank,
        }
    }
}

/// Filter flags shared by `videos`, `report preview` and `report generate`.
#[derive(Args, Clone, Default)]
pub struct FilterArgs {
    /// Text the title must contain (case-insensitive)
    #[arg(short, long, default_value = "")]
    pub query: String,

    /// Also match the query against tags
    #[arg(long)]
    pub tags: bool,

    #[arg(long, value_enum, default_value = "any")]
    pub transcript: CliTranscript,

    #[arg(long, value_enum, default_value = "any")]
    pub category: CliCategory,

    /// Earliest publish day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Latest publish day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Minimum views; 0 means no bound
    #[arg(long, default_value_t = 0)]
    pub views_min: u64,

    /// Maximum views; 0 means no bound
    #[arg(long, default_value_t = 0)]
    pub views_max: u64,

    /// Rank: S, A, B, or a threshold like A+
    #[arg(long, default_value = "any")]
    pub rank: RankFilter,
}

impl FilterArgs {
    pub fn to_spec(&self) -> FilterSpec {
        FilterSpec::new()
            .with_query(self.query.clone(), self.tags)
            .with_transcript(self.transcript.into())
            .with_category(self.category.into())
            .with_dates(self.from, self.to)
            .with_views(self.views_min, self.views_max)
            .with_rank(self.rank)
    }
}

/// Where board rows come from and how they are scored.
#[derive(Args, Clone, Default)]
pub struct SourceArgs {
    /// Read board rows from a JSON file instead of the server
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Board config.json with keyword weights and thresholds; rescore rows with it
    #[arg(long)]
    pub board_config: Option<PathBuf>,

    /// Recompute score and rank locally even without a board config
    #[arg(long)]
    pub rescore: bool,
}

async fn read_rows(path: &Path) -> Result<Vec<Video>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut rows: Vec<Video> = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    for row in rows.iter_mut() {
        row.normalize();
    }
    Ok(rows)
}

pub async fn load_board(
    source: &SourceArgs,
    api: &dyn JobApi,
    scoring: &ScoringConfig,
) -> Result<(Vec<Video>, Option<BoardConfig>)> {
    let mut videos = match &source.input {
        Some(path) => read_rows(path).await?,
        None => api.master_index().await?,
    };

    let board = match &source.board_config {
        Some(path) => Some(BoardConfig::load(path).await?),
        None => None,
    };

    if board.is_some() || source.rescore {
        let scoring = board
            .as_ref()
            .map(|b| b.scoring(scoring))
            .unwrap_or_else(|| scoring.clone());
        RankEngine::new(scoring)?.apply_all(&mut videos);
    }
    Ok((videos, board))
}

pub fn direction(ascending: bool) -> SortDirection {
    if ascending {
        SortDirection::Ascending
    } else {
        SortDirection::Descending
    }
}
