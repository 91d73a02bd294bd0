//! AI report jobs.
//!
//! A report is requested either from a filter selection or from a free-form
//! query. The server answers with an id right away and generates in the
//! background; the controller follows progress by polling the history list
//! while any entry is pending or processing. Failed reports are terminal and
//! never resubmitted.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};

use crate::{
    api::{JobApi, ReportMode, ReportPayload},
    config::PollSettings,
    error::{Result, TubescopeError},
    filter::{FilterSpec, ProductKeywords, apply_filters},
    poller::{self, PollEnd, PollHandle, PollStep},
    types::{JobStatus, Report, ReportSummary, Video},
};

pub const MAX_CUSTOM_PROMPT_CHARS: usize = 1000;
pub const MAX_TITLE_CHARS: usize = 80;
pub const FILTER_REPORT_TITLE: &str = "Filtered selection report";

#[derive(Debug, Clone, PartialEq)]
pub enum ReportRequest {
    Filter {
        filters: FilterSpec,
        custom_prompt: Option<String>,
    },
    NaturalLanguage {
        query: String,
        custom_prompt: Option<String>,
    },
}

fn truncate_chars(raw: &str, max: usize) -> String {
    raw.chars().take(max).collect()
}

/// Trimmed, capped prompt; blank prompts are dropped.
pub fn normalize_prompt(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    (!trimmed.is_empty()).then(|| truncate_chars(trimmed, MAX_CUSTOM_PROMPT_CHARS))
}

impl ReportRequest {
    pub fn mode(&self) -> ReportMode {
        match self {
            ReportRequest::Filter { .. } => ReportMode::Filter,
            ReportRequest::NaturalLanguage { .. } => ReportMode::Nl,
        }
    }

    /// Title shown until the server provides one.
    pub fn fallback_title(&self) -> String {
        match self {
            ReportRequest::Filter { .. } => FILTER_REPORT_TITLE.to_string(),
            ReportRequest::NaturalLanguage { query, .. } => {
                truncate_chars(query.trim(), MAX_TITLE_CHARS)
            }
        }
    }

    pub fn to_payload(&self) -> ReportPayload {
        match self {
            ReportRequest::Filter {
                filters,
                custom_prompt,
            } => ReportPayload {
                mode: ReportMode::Filter,
                filters: Some(filters.to_wire()),
                nl_query: None,
                custom_prompt: normalize_prompt(custom_prompt.as_deref()),
            },
            ReportRequest::NaturalLanguage {
                query,
                custom_prompt,
            } => ReportPayload {
                mode: ReportMode::Nl,
                filters: None,
                nl_query: Some(query.trim().to_string()),
                custom_prompt: normalize_prompt(custom_prompt.as_deref()),
            },
        }
    }
}

#[derive(Debug, Default)]
struct ReportState {
    history: Vec<ReportSummary>,
    open: Option<Report>,
    reported_failures: BTreeSet<String>,
}

/// Newest first; entries with equal timestamps keep server order.
pub fn sort_newest_first(history: &mut [ReportSummary]) {
    history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

pub struct ReportController {
    api: Arc<dyn JobApi>,
    keywords: ProductKeywords,
    poll: PollSettings,
    state: Arc<Mutex<ReportState>>,
    active: Option<PollHandle<()>>,
}

impl ReportController {
    pub fn new(api: Arc<dyn JobApi>, keywords: ProductKeywords, poll: PollSettings) -> Self {
        Self {
            api,
            keywords,
            poll,
            state: Arc::new(Mutex::new(ReportState::default())),
            active: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReportState> {
        self.state.lock().expect("report state poisoned")
    }

    pub fn entries(&self) -> Vec<ReportSummary> {
        self.lock().history.clone()
    }

    pub fn open_report(&self) -> Option<Report> {
        self.lock().open.clone()
    }

    pub fn close(&self) {
        self.lock().open = None;
    }

    pub fn is_polling(&self) -> bool {
        self.active.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Failed entries not returned by an earlier call.
    pub fn take_new_failures(&self) -> Vec<ReportSummary> {
        let mut state = self.lock();
        let fresh: Vec<ReportSummary> = state
            .history
            .iter()
            .filter(|r| r.status == JobStatus::Failed && !state.reported_failures.contains(&r.id))
            .cloned()
            .collect();
        state
            .reported_failures
            .extend(fresh.iter().map(|r| r.id.clone()));
        fresh
    }

    /// Validates, submits once, and starts following the history.
    pub async fn submit(&mut self, request: ReportRequest, videos: &[Video]) -> Result<String> {
        match &request {
            ReportRequest::NaturalLanguage { query, .. } if query.trim().is_empty() => {
                return Err(TubescopeError::Validation(
                    "describe the report you want before submitting".into(),
                ));
            }
            ReportRequest::Filter { filters, .. } => {
                let selected = apply_filters(videos, filters, &self.keywords);
                if selected.is_empty() {
                    return Err(TubescopeError::Validation(
                        "no videos match the current filters; relax them and retry".into(),
                    ));
                }
                debug!(selected = selected.len(), "report: filter selection");
            }
            ReportRequest::NaturalLanguage { .. } => {}
        }

        let accepted = self.api.generate_report(&request.to_payload()).await?;
        info!(id = %accepted.id, mode = ?request.mode(), "report: accepted");

        {
            let mut state = self.lock();
            if !state.history.iter().any(|r| r.id == accepted.id) {
                state.history.insert(
                    0,
                    ReportSummary {
                        id: accepted.id.clone(),
                        status: JobStatus::Pending,
                        title: accepted
                            .title
                            .clone()
                            .filter(|t| !t.trim().is_empty())
                            .unwrap_or_else(|| request.fallback_title()),
                        created_at: accepted.created_at.clone().unwrap_or_default(),
                        selected_count: 0,
                        mode: Some(
                            match request.mode() {
                                ReportMode::Filter => "filter",
                                ReportMode::Nl => "nl",
                            }
                            .to_string(),
                        ),
                        error: None,
                    },
                );
            }
        }

        if let Err(e) = self.history().await {
            warn!(err = %e, "report: history refresh failed after submit");
        }
        self.ensure_polling();
        Ok(accepted.id)
    }

    /// Fetches the history, newest first, and keeps polling while anything is
    /// in flight.
    pub async fn history(&mut self) -> Result<Vec<ReportSummary>> {
        let mut list = self.api.report_history().await?;
        sort_newest_first(&mut list);
        self.lock().history = list.clone();
        if list.iter().any(|r| r.status.is_in_flight()) {
            self.ensure_polling();
        }
        Ok(list)
    }

    fn ensure_polling(&mut self) {
        if self.is_polling() {
            return;
        }
        let in_flight = self.lock().history.iter().any(|r| r.status.is_in_flight());
        if !in_flight {
            return;
        }

        let api = self.api.clone();
        let state = self.state.clone();
        self.active = Some(poller::start(
            move |attempt| {
                let api = api.clone();
                let state = state.clone();
                async move {
                    let mut list = api.report_history().await?;
                    sort_newest_first(&mut list);
                    let in_flight = list.iter().filter(|r| r.status.is_in_flight()).count();
                    state.lock().expect("report state poisoned").history = list;
                    debug!(attempt, in_flight, "report: history polled");
                    Ok(if in_flight == 0 {
                        PollStep::Done(())
                    } else {
                        PollStep::Continue
                    })
                }
            },
            self.poll.interval,
            self.poll.max_attempts,
        ));
    }

    /// Waits for history polling to stop.
    pub async fn wait(&mut self) -> PollEnd<()> {
        match self.active.take() {
            Some(handle) => handle.join().await,
            None => PollEnd::Completed(()),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.cancel();
        }
    }

    pub async fn open(&mut self, id: &str) -> Result<Report> {
        let report = self.api.get_report(id).await?;
        self.lock().open = Some(report.clone());
        Ok(report)
    }

    pub async fn delete(&mut self, id: &str) -> Result<()> {
        self.api.delete_report(id).await?;
        let mut state = self.lock();
        state.history.retain(|r| r.id != id);
        if state.open.as_ref().is_some_and(|r| r.id == id) {
            state.open = None;
        }
        info!(id, "report: deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        api::{ConvertAccepted, ConvertStatus, Quota, ReportAccepted},
        filter::RankFilter,
        progress::{ProgressStatus, RunRecord},
        types::Rank,
    };

    #[derive(Clone)]
    enum Step {
        List(Vec<ReportSummary>),
        Down,
    }

    #[derive(Default)]
    struct FakeReports {
        script: Mutex<VecDeque<Step>>,
        history_calls: AtomicU32,
        payloads: Mutex<Vec<ReportPayload>>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeReports {
        fn scripted(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                ..Self::default()
            })
        }

        fn generate_calls(&self) -> usize {
            self.payloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl JobApi for FakeReports {
        async fn generate_report(&self, payload: &ReportPayload) -> Result<ReportAccepted> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(ReportAccepted {
                id: "r-new".into(),
                title: None,
                created_at: Some("2025-06-02T09:00:00".into()),
            })
        }

        async fn report_history(&self) -> Result<Vec<ReportSummary>> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
            };
            match step {
                Some(Step::List(list)) => Ok(list),
                Some(Step::Down) => Err(TubescopeError::Rejected {
                    status: 503,
                    detail: "maintenance".into(),
                }),
                None => Ok(Vec::new()),
            }
        }

        async fn get_report(&self, id: &str) -> Result<Report> {
            Ok(Report {
                id: id.to_string(),
                title: "Weekly digest".into(),
                report: "# Findings".into(),
                created_at: "2025-06-01T08:00:00".into(),
                status: JobStatus::Completed,
                selected_count: 4,
                with_transcript_count: 3,
                video_titles: vec!["AIPCon 4 Keynote".into()],
                error: None,
            })
        }

        async fn delete_report(&self, id: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn convert_videos(&self, _: &[String]) -> Result<ConvertAccepted> {
            unimplemented!()
        }
        async fn convert_status(&self, _: &[String]) -> Result<ConvertStatus> {
            unimplemented!()
        }
        async fn master_index(&self) -> Result<Vec<Video>> {
            unimplemented!()
        }
        async fn status(&self) -> Result<ProgressStatus> {
            unimplemented!()
        }
        async fn status_history(&self) -> Result<Vec<RunRecord>> {
            unimplemented!()
        }
        async fn guest_remaining(&self) -> Result<Quota> {
            unimplemented!()
        }
    }

    fn summary(id: &str, status: JobStatus, created_at: &str) -> ReportSummary {
        ReportSummary {
            id: id.into(),
            status,
            title: format!("report {id}"),
            created_at: created_at.into(),
            selected_count: 3,
            mode: Some("filter".into()),
            error: (status == JobStatus::Failed).then(|| "model unavailable".to_string()),
        }
    }

    fn controller(api: Arc<FakeReports>) -> ReportController {
        ReportController::new(
            api,
            ProductKeywords::default(),
            PollSettings {
                interval: Duration::from_secs(5),
                max_attempts: 50,
            },
        )
    }

    fn board() -> Vec<Video> {
        let mut keynote = Video::new("aaaaaaaaaa1", "AIPCon 4 Keynote");
        keynote.rank = Some(Rank::S);
        let mut recap = Video::new("aaaaaaaaaa2", "Team offsite recap");
        recap.rank = Some(Rank::B);
        vec![keynote, recap]
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_nl_query_makes_no_call() {
        let api = FakeReports::scripted(vec![]);
        let mut reports = controller(api.clone());
        let request = ReportRequest::NaturalLanguage {
            query: "   ".into(),
            custom_prompt: None,
        };
        assert!(matches!(
            reports.submit(request, &board()).await,
            Err(TubescopeError::Validation(_))
        ));
        assert_eq!(api.generate_calls(), 0);
        assert_eq!(api.history_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_filter_selection_makes_no_call() {
        let api = FakeReports::scripted(vec![]);
        let mut reports = controller(api.clone());
        let request = ReportRequest::Filter {
            filters: FilterSpec::new().with_query("quarterly earnings", false),
            custom_prompt: None,
        };
        assert!(reports.submit(request, &board()).await.is_err());
        assert_eq!(api.generate_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_submit_posts_once() {
        let api = FakeReports::scripted(vec![
            Step::List(vec![summary("r-new", JobStatus::Pending, "2025-06-02T09:00:00")]),
            Step::List(vec![summary("r-new", JobStatus::Completed, "2025-06-02T09:00:00")]),
        ]);
        let mut reports = controller(api.clone());
        let request = ReportRequest::Filter {
            filters: FilterSpec::new().with_rank(RankFilter::AtLeast(Rank::A)),
            custom_prompt: Some(format!("  {}  ", "x".repeat(1500))),
        };

        let id = reports.submit(request, &board()).await.unwrap();
        assert_eq!(id, "r-new");
        assert!(reports.is_polling());
        assert_eq!(reports.wait().await, PollEnd::Completed(()));

        let payloads = api.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].mode, ReportMode::Filter);
        assert_eq!(
            payloads[0].custom_prompt.as_ref().map(|p| p.chars().count()),
            Some(MAX_CUSTOM_PROMPT_CHARS)
        );
        assert_eq!(reports.entries()[0].status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_report_stops_polling_without_retry() {
        let api = FakeReports::scripted(vec![
            Step::List(vec![summary("r-new", JobStatus::Pending, "2025-06-02T09:00:00")]),
            Step::List(vec![summary("r-new", JobStatus::Processing, "2025-06-02T09:00:00")]),
            Step::List(vec![summary("r-new", JobStatus::Failed, "2025-06-02T09:00:00")]),
        ]);
        let mut reports = controller(api.clone());
        let request = ReportRequest::NaturalLanguage {
            query: "What did the keynotes say about pricing?".into(),
            custom_prompt: None,
        };

        reports.submit(request, &board()).await.unwrap();
        assert_eq!(reports.wait().await, PollEnd::Completed(()));
        let calls = api.history_calls.load(Ordering::SeqCst);
        assert_eq!(calls, 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.history_calls.load(Ordering::SeqCst), calls);
        assert_eq!(api.generate_calls(), 1);

        let failures = reports.take_new_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error.as_deref(), Some("model unavailable"));
        assert!(reports.take_new_failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_keeps_history() {
        let api = FakeReports::scripted(vec![
            Step::List(vec![summary("r1", JobStatus::Processing, "2025-06-01T08:00:00")]),
            Step::Down,
            Step::List(vec![summary("r1", JobStatus::Completed, "2025-06-01T08:00:00")]),
        ]);
        let mut reports = controller(api.clone());
        reports.history().await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(api.history_calls.load(Ordering::SeqCst), 2);
        assert_eq!(reports.entries()[0].status, JobStatus::Processing);

        assert_eq!(reports.wait().await, PollEnd::Completed(()));
        assert_eq!(reports.entries()[0].status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_sorted_newest_first() {
        let api = FakeReports::scripted(vec![Step::List(vec![
            summary("old", JobStatus::Completed, "2025-05-01T08:00:00"),
            summary("new", JobStatus::Completed, "2025-06-01T08:00:00"),
            summary("mid", JobStatus::Failed, "2025-05-15T08:00:00"),
        ])]);
        let mut reports = controller(api);
        let ids: Vec<String> = reports
            .history()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert!(!reports.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_closes_open_report() {
        let api = FakeReports::scripted(vec![Step::List(vec![
            summary("r1", JobStatus::Completed, "2025-06-01T08:00:00"),
            summary("r2", JobStatus::Completed, "2025-05-01T08:00:00"),
        ])]);
        let mut reports = controller(api.clone());
        reports.history().await.unwrap();

        let opened = reports.open("r1").await.unwrap();
        assert_eq!(opened.report, "# Findings");
        assert!(reports.open_report().is_some());

        reports.delete("r2").await.unwrap();
        assert!(reports.open_report().is_some());
        reports.delete("r1").await.unwrap();
        assert!(reports.open_report().is_none());
        assert!(reports.entries().is_empty());
        assert_eq!(*api.deleted.lock().unwrap(), vec!["r2", "r1"]);
    }

    #[test]
    fn test_nl_title_and_prompt_normalisation() {
        let request = ReportRequest::NaturalLanguage {
            query: format!("  {}", "q".repeat(120)),
            custom_prompt: Some("   ".into()),
        };
        assert_eq!(request.fallback_title().chars().count(), MAX_TITLE_CHARS);
        let payload = request.to_payload();
        assert_eq!(payload.mode, ReportMode::Nl);
        assert!(payload.custom_prompt.is_none());
        assert!(payload.filters.is_none());
    }
}
