//! Ingestion-run progress: the `status.json` document an ingestion run keeps
//! current, and the bounded `status_history.json` of finished runs.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::{
    error::Result,
    poller::{self, PollHandle, PollStep},
};

pub const STATUS_FILE: &str = "status.json";
pub const HISTORY_FILE: &str = "status_history.json";
pub const MAX_HISTORY: usize = 100;

/// The `status` field of the document. Ingestion writes `filtering` and
/// `processing` while it works; any value other than `idle` reads as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Filtering,
    Processing,
    Running,
}

impl RunState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "idle" => RunState::Idle,
            "filtering" => RunState::Filtering,
            "processing" => RunState::Processing,
            _ => RunState::Running,
        }
    }

    pub fn is_active(self) -> bool {
        self != RunState::Idle
    }
}

impl<'de> Deserialize<'de> for RunState {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(RunState::parse).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Filter,
    #[default]
    Process,
    Whisper,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Filter => "Filtering",
            Phase::Process => "Processing",
            Phase::Whisper => "Whisper transcription",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressStatus {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub status: RunState,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub failed_count: u64,
}

impl ProgressStatus {
    pub fn is_running(&self) -> bool {
        self.status.is_active()
    }

    /// Completion ratio in `0.0..=1.0`; zero when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current.min(self.total) as f64) / (self.total as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(flatten)]
    pub status: ProgressStatus,
    #[serde(rename = "completedAt", default)]
    pub completed_at: String,
    #[serde(default)]
    pub phase_label: String,
}

/// Reads a status document. Missing or unreadable files read as idle.
pub async fn read_status(path: &Path) -> ProgressStatus {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), err = %e, "progress: status unreadable");
            }
            return ProgressStatus::default();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), err = %e, "progress: status malformed");
        ProgressStatus::default()
    })
}

pub async fn read_history(path: &Path) -> Vec<RunRecord> {
    match fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), err = %e, "progress: history malformed");
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Writer side of the status file, used by ingestion runs.
#[derive(Debug, Clone)]
pub struct ProgressRecorder {
    dir: PathBuf,
    channel: Option<String>,
}

impl ProgressRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Writes the status document; an idle write with a non-zero total closes
    /// the run and appends it to the history.
    pub async fn record(
        &self,
        current: u64,
        total: u64,
        state: RunState,
        phase: Phase,
        failed_count: u64,
    ) -> Result<ProgressStatus> {
        fs::create_dir_all(&self.dir).await?;
        let status = ProgressStatus {
            current,
            total,
            status: state,
            phase,
            channel: self.channel.clone(),
            updated_at: Some(now_stamp()),
            failed_count,
        };
        fs::write(self.status_path(), serde_json::to_string_pretty(&status)?).await?;

        if state == RunState::Idle && total > 0 {
            self.append_history(&status).await?;
        }
        Ok(status)
    }

    async fn append_history(&self, status: &ProgressStatus) -> Result<()> {
        let path = self.history_path();
        let mut history = read_history(&path).await;
        history.push(RunRecord {
            status: status.clone(),
            completed_at: now_stamp(),
            phase_label: status.phase.label().to_string(),
        });
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
        debug!(path = %path.display(), runs = history.len(), "progress: run recorded");
        fs::write(&path, serde_json::to_string_pretty(&history)?).await?;
        Ok(())
    }
}

/// Polls a status file and reports every observation.
///
/// Completes with the final status once a run that was seen running reads
/// idle again. Observation only; nothing else depends on it.
pub fn watch_status<F>(
    path: PathBuf,
    interval: Duration,
    max_attempts: u32,
    on_observe: F,
) -> PollHandle<ProgressStatus>
where
    F: FnMut(&ProgressStatus) + Send + 'static,
{
    let observer = Arc::new(Mutex::new((on_observe, false)));
    poller::start(
        move |_| {
            let path = path.clone();
            let observer = observer.clone();
            async move {
                let status = read_status(&path).await;
                let mut guard = observer.lock().expect("status observer poisoned");
                let (callback, seen_running) = &mut *guard;
                callback(&status);
                if status.is_running() {
                    *seen_running = true;
                    return Ok(PollStep::Continue);
                }
                Ok(if *seen_running {
                    PollStep::Done(status)
                } else {
                    PollStep::Continue
                })
            }
        },
        interval,
        max_attempts,
    )
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::poller::PollEnd;

    #[tokio::test]
    async fn test_missing_or_invalid_status_reads_idle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STATUS_FILE);
        assert_eq!(read_status(&path).await, ProgressStatus::default());

        fs::write(&path, "{ nope").await.unwrap();
        let status = read_status(&path).await;
        assert_eq!(status.status, RunState::Idle);
        assert_eq!(status.total, 0);
    }

    #[tokio::test]
    async fn test_ingestion_states_read_as_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STATUS_FILE);
        for (raw, state) in [
            ("processing", RunState::Processing),
            ("filtering", RunState::Filtering),
            ("running", RunState::Running),
        ] {
            let doc = serde_json::json!({
                "current": 3,
                "total": 10,
                "status": raw,
                "phase": "process",
                "failed_count": 0,
                "channel": null,
                "updatedAt": "2025-06-01T10:00:00Z",
            });
            fs::write(&path, doc.to_string()).await.unwrap();

            let status = read_status(&path).await;
            assert_eq!(status.status, state);
            assert_eq!((status.current, status.total), (3, 10));
            assert!(status.is_running());
        }

        fs::write(&path, r#"{"current": 10, "total": 10, "status": "idle"}"#)
            .await
            .unwrap();
        assert!(!read_status(&path).await.is_running());
    }

    #[tokio::test]
    async fn test_status_file_layout() {
        let dir = tempdir().unwrap();
        let recorder = ProgressRecorder::new(dir.path()).with_channel("palantirtech");
        recorder
            .record(3, 10, RunState::Processing, Phase::Whisper, 1)
            .await
            .unwrap();

        let raw = fs::read_to_string(recorder.status_path()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "processing");
        assert_eq!(value["phase"], "whisper");
        assert_eq!(value["channel"], "palantirtech");
        assert!(value["updatedAt"].is_string());

        let status = read_status(&recorder.status_path()).await;
        assert_eq!(status.current, 3);
        assert!((status.fraction() - 0.3).abs() < 1e-9);
        assert!(read_history(&recorder.history_path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_idle_with_total_appends_history() {
        let dir = tempdir().unwrap();
        let recorder = ProgressRecorder::new(dir.path());
        recorder.record(0, 0, RunState::Idle, Phase::Process, 0).await.unwrap();
        recorder.record(8, 8, RunState::Idle, Phase::Filter, 0).await.unwrap();

        let history = read_history(&recorder.history_path()).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].phase_label, "Filtering");
        assert_eq!(history[0].status.total, 8);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dir = tempdir().unwrap();
        let recorder = ProgressRecorder::new(dir.path());
        for total in 1..=(MAX_HISTORY as u64 + 5) {
            recorder
                .record(total, total, RunState::Idle, Phase::Process, 0)
                .await
                .unwrap();
        }
        let history = read_history(&recorder.history_path()).await;
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].status.total, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_completes_after_run_goes_idle() {
        let dir = tempdir().unwrap();
        let recorder = ProgressRecorder::new(dir.path());
        recorder.record(1, 4, RunState::Processing, Phase::Process, 0).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = watch_status(
            recorder.status_path(),
            Duration::from_secs(1),
            50,
            move |status| sink.lock().unwrap().push(status.current),
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        recorder.record(4, 4, RunState::Idle, Phase::Process, 0).await.unwrap();

        match handle.join().await {
            PollEnd::Completed(status) => assert_eq!(status.current, 4),
            other => panic!("unexpected end: {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().first(), Some(&1));
    }
}
