//! Video-conversion jobs: pasted links in, transcripts out.
//!
//! The controller validates a batch, posts what the server does not already
//! have, persists the pending ids, and polls `temp-convert-status` until every
//! id is found or the attempt ceiling passes. A fresh pending set left over
//! from an earlier process is picked up again by [`ConversionController::restore`].

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    api::JobApi,
    config::PollSettings,
    error::{Result, TubescopeError},
    poller::{self, PollEnd, PollStep},
    store::PendingJobStore,
    types::video_id_from_url,
};

pub const MAX_BATCH: usize = 5;

pub const TIMED_OUT_MESSAGE: &str =
    "Conversion is still running on the server; refresh manually later to see the new transcripts";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConversionPhase {
    #[default]
    Idle,
    Submitted,
    Polling {
        attempt: u32,
        found: usize,
    },
    Completed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversionStatus {
    pub phase: ConversionPhase,
    pub pending: Vec<String>,
    pub found: Vec<String>,
    pub message: Option<String>,
}

/// What happened to each id of a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitOutcome {
    pub submitted: Vec<String>,
    pub already_pending: Vec<String>,
    pub already_available: Vec<String>,
}

impl SubmitOutcome {
    pub fn is_noop(&self) -> bool {
        self.submitted.is_empty()
    }
}

pub type DataChanged = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    status: ConversionStatus,
    batch: u64,
    notified: bool,
    restoring: bool,
}

struct ActivePoll {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ConversionController {
    api: Arc<dyn JobApi>,
    store: Arc<dyn PendingJobStore>,
    board_id: String,
    poll: PollSettings,
    on_data_changed: Option<DataChanged>,
    state: Arc<Mutex<Inner>>,
    active: Option<ActivePoll>,
}

/// Trims, drops blanks, and checks the 1..=5 batch size. No network.
pub fn validate_batch(urls: &[String]) -> Result<Vec<(String, String)>> {
    let urls: Vec<&str> = urls
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() || urls.len() > MAX_BATCH {
        return Err(TubescopeError::Validation(format!(
            "provide between 1 and {MAX_BATCH} video links (got {})",
            urls.len()
        )));
    }

    let mut seen = BTreeSet::new();
    let mut batch = Vec::with_capacity(urls.len());
    for url in urls {
        let id = video_id_from_url(url).ok_or_else(|| TubescopeError::InvalidUrl {
            url: url.to_string(),
        })?;
        if seen.insert(id.clone()) {
            batch.push((id, url.to_string()));
        }
    }
    Ok(batch)
}

impl ConversionController {
    pub fn new(
        api: Arc<dyn JobApi>,
        store: Arc<dyn PendingJobStore>,
        board_id: impl Into<String>,
        poll: PollSettings,
    ) -> Self {
        Self {
            api,
            store,
            board_id: board_id.into(),
            poll,
            on_data_changed: None,
            state: Arc::new(Mutex::new(Inner::default())),
            active: None,
        }
    }

    /// Called once per batch when every pending id has been found.
    pub fn on_data_changed(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_data_changed = Some(Arc::new(callback));
        self
    }

    pub fn status(&self) -> ConversionStatus {
        self.lock().status.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.state.lock().expect("conversion state poisoned")
    }

    /// Replaces the pending set and persists it unless a restore is running.
    async fn set_pending(&self, ids: Vec<String>) -> Result<()> {
        let restoring = {
            let mut inner = self.lock();
            inner.status.pending = ids.clone();
            inner.restoring
        };
        if restoring {
            return Ok(());
        }
        if ids.is_empty() {
            self.store.clear(&self.board_id).await
        } else {
            self.store.save(&self.board_id, &ids).await
        }
    }

    pub async fn submit(&mut self, urls: &[String]) -> Result<SubmitOutcome> {
        let batch = validate_batch(urls)?;
        let previous = self.lock().status.pending.clone();

        let mut outcome = SubmitOutcome::default();
        let mut fresh = Vec::new();
        for (id, url) in batch {
            if previous.contains(&id) {
                outcome.already_pending.push(id);
            } else {
                fresh.push((id, url));
            }
        }
        if fresh.is_empty() {
            debug!(board = %self.board_id, "conversion: batch already pending");
            return Ok(outcome);
        }

        let fresh_ids: Vec<String> = fresh.iter().map(|(id, _)| id.clone()).collect();
        let found: BTreeSet<String> = match self.api.convert_status(&fresh_ids).await {
            Ok(status) => status.found.into_iter().collect(),
            Err(e) => {
                warn!(err = %e, "conversion: availability check failed, submitting all");
                BTreeSet::new()
            }
        };

        let mut to_post = Vec::new();
        for (id, url) in fresh {
            if found.contains(&id) {
                outcome.already_available.push(id);
            } else {
                to_post.push((id, url));
            }
        }
        if to_post.is_empty() {
            info!(board = %self.board_id, "conversion: every link already has a transcript");
            return Ok(outcome);
        }

        // Stop the running poll before the pending set grows; a finishing
        // batch must not clear ids it never polled.
        self.invalidate_poll();
        let current = self.lock().status.pending.clone();
        let mut merged = current.clone();
        merged.extend(to_post.iter().map(|(id, _)| id.clone()));
        if let Err(e) = self.set_pending(merged).await {
            self.lock().status.pending = current.clone();
            if !current.is_empty() {
                self.start_polling();
            }
            return Err(e);
        }

        let post_urls: Vec<String> = to_post.iter().map(|(_, url)| url.clone()).collect();
        let accepted = match self.api.convert_videos(&post_urls).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(board = %self.board_id, err = %e, "conversion: submission rejected");
                if let Err(restore_err) = self.set_pending(current.clone()).await {
                    warn!(err = %restore_err, "conversion: could not restore pending set");
                }
                if !current.is_empty() {
                    self.start_polling();
                }
                return Err(e);
            }
        };

        let sent: Vec<String> = to_post.into_iter().map(|(id, _)| id).collect();
        outcome.submitted = if accepted.video_ids.is_empty() {
            sent
        } else {
            if accepted.video_ids != sent {
                debug!(
                    sent = ?sent,
                    accepted = ?accepted.video_ids,
                    "conversion: server accepted a different set"
                );
                let mut merged = current;
                for id in &accepted.video_ids {
                    if !merged.contains(id) {
                        merged.push(id.clone());
                    }
                }
                if let Err(e) = self.set_pending(merged).await {
                    warn!(err = %e, "conversion: could not persist accepted ids");
                }
            }
            accepted.video_ids
        };
        info!(board = %self.board_id, count = outcome.submitted.len(), "conversion: submitted");
        self.start_polling();
        Ok(outcome)
    }

    /// Re-enters polling for a fresh persisted pending set. Stale entries are
    /// dropped by the store without any network call.
    pub async fn restore(&mut self) -> Result<Vec<String>> {
        let loaded = self.store.load(&self.board_id).await?;
        let Some(set) = loaded else {
            return Ok(Vec::new());
        };

        self.lock().restoring = true;
        let result = self.set_pending(set.ids.clone()).await;
        self.lock().restoring = false;
        result?;

        info!(board = %self.board_id, count = set.ids.len(), "conversion: resuming pending batch");
        self.start_polling();
        Ok(set.ids)
    }

    /// Waits for the current poll to finish and returns the final status.
    pub async fn wait(&mut self) -> ConversionStatus {
        if let Some(active) = self.active.take()
            && let Err(e) = active.task.await
        {
            warn!(err = %e, "conversion: poll task failed");
        }
        self.status()
    }

    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }

    /// Cancels the active poll and retires its batch so a late finisher
    /// leaves the pending set alone.
    fn invalidate_poll(&mut self) {
        self.cancel();
        self.lock().batch += 1;
    }

    fn start_polling(&mut self) {
        self.cancel();

        let batch = {
            let mut inner = self.lock();
            inner.batch += 1;
            inner.notified = false;
            inner.status.phase = ConversionPhase::Submitted;
            inner.status.found.clear();
            inner.status.message = None;
            inner.batch
        };

        let api = self.api.clone();
        let state = self.state.clone();
        let handle = poller::start(
            move |attempt| {
                let api = api.clone();
                let state = state.clone();
                async move {
                    let ids = state.lock().expect("conversion state poisoned").status.pending.clone();
                    let status = api.convert_status(&ids).await?;
                    {
                        let mut inner = state.lock().expect("conversion state poisoned");
                        if inner.batch == batch {
                            inner.status.phase = ConversionPhase::Polling {
                                attempt,
                                found: status.found.len(),
                            };
                            inner.status.found = status.found;
                        }
                    }
                    debug!(attempt, all_found = status.all_found, "conversion: polled");
                    Ok(if status.all_found {
                        PollStep::Done(())
                    } else {
                        PollStep::Continue
                    })
                }
            },
            self.poll.interval,
            self.poll.max_attempts,
        );

        let finisher = Finisher {
            batch,
            state: self.state.clone(),
            store: self.store.clone(),
            board_id: self.board_id.clone(),
            on_data_changed: self.on_data_changed.clone(),
        };
        let cancel = handle.canceller();
        let task = tokio::spawn(async move {
            let end = handle.join().await;
            finisher.finish(end).await;
        });
        self.active = Some(ActivePoll { cancel, task });
    }
}

impl Drop for ConversionController {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Finisher {
    batch: u64,
    state: Arc<Mutex<Inner>>,
    store: Arc<dyn PendingJobStore>,
    board_id: String,
    on_data_changed: Option<DataChanged>,
}

impl Finisher {
    async fn finish(self, end: PollEnd<()>) {
        let completed = match end {
            PollEnd::Completed(()) => true,
            PollEnd::TimedOut { attempts } => {
                warn!(board = %self.board_id, attempts, "conversion: gave up waiting");
                false
            }
            PollEnd::Cancelled => return,
        };

        let fire = {
            let mut inner = self.state.lock().expect("conversion state poisoned");
            if inner.batch != self.batch {
                return;
            }
            inner.status.pending.clear();
            if completed {
                inner.status.phase = ConversionPhase::Completed;
                let fire = !inner.notified;
                inner.notified = true;
                fire
            } else {
                inner.status.phase = ConversionPhase::TimedOut;
                inner.status.message = Some(TIMED_OUT_MESSAGE.to_string());
                false
            }
        };

        if let Err(e) = self.store.clear(&self.board_id).await {
            warn!(err = %e, "conversion: could not clear pending store");
        }
        // A newer batch may have persisted while the clear was in flight.
        let newer = {
            let inner = self.state.lock().expect("conversion state poisoned");
            (inner.batch != self.batch && !inner.status.pending.is_empty())
                .then(|| inner.status.pending.clone())
        };
        if let Some(ids) = newer
            && let Err(e) = self.store.save(&self.board_id, &ids).await
        {
            warn!(err = %e, "conversion: could not re-save pending store");
        }

        if fire {
            info!(board = %self.board_id, "conversion: batch complete");
            if let Some(callback) = &self.on_data_changed {
                callback();
            }
        }
    }
}
