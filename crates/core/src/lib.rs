pub mod api;
pub mod config;
pub mod conversion;
pub mod error;
pub mod filter;
pub mod poller;
pub mod progress;
pub mod rank;
pub mod report;
pub mod store;
pub mod types;

pub use api::{ApiClient, ApiSettings, JobApi, Quota, ReportMode, ReportPayload};
pub use config::{AppConfig, BoardConfig, PollSettings};
pub use conversion::{ConversionController, ConversionPhase, ConversionStatus, SubmitOutcome};
pub use error::{Result, TubescopeError};
pub use filter::{
    CategoryFilter, FilterSpec, ProductKeywords, RankFilter, SortDirection, SortKey,
    TranscriptFilter, apply_filters, count_matches, rank_by_query, sort_videos, top_n,
};
pub use poller::{PollEnd, PollHandle, PollStep};
pub use progress::{Phase, ProgressRecorder, ProgressStatus, RunRecord, RunState};
pub use rank::{RankEngine, RankThresholds, ScoringConfig, ScoringWeights};
pub use report::{ReportController, ReportRequest};
pub use store::{FileKv, JobStore, KeyValue, MemoryKv, PendingJobStore};
pub use types::{
    Category, JobStatus, Rank, Report, ReportSummary, TranscriptPresence, TranscriptSource, Video,
    video_id_from_url,
};
