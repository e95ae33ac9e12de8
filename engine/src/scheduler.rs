// Request scheduler.
//
// The scheduler is the only writer of the queue and of the now-playing record.
// All of its state sits behind one coarse RwLock; the store and the stats
// aggregator are written through while that lock is held, so the durable copy
// always matches the latest in-memory order.
//
// Playback loop, one iteration:
//   1. stop if `running` is false (the only place the flag is observed)
//   2. pick the highest-priority Waiting record (earliest submitted on ties),
//      or idle for `idle_wait` units if there is none
//   3. mark it Playing, publish NowPlaying, persist
//   4. fire the playback trigger (failures are logged only)
//   5. sleep for the clamped track duration, *without* the lock
//   6. mark it Completed, clear NowPlaying, record stats and history
//   7. pause `inter_track_pause` units
//
// The wait in step 5 is a blind timer: there is no end-of-track signal from
// the player. `stop()` therefore never shortens a track that already started;
// it only keeps the next one from starting.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Local;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Timings;
use crate::model::{
    effective_duration_secs, NowPlaying, PlayEvent, RequestRecord, RequestStatus, StatusSnapshot,
    Track,
};
use crate::policy::{OpenPolicy, PriorityRules, RequestPolicy, RequesterNames};
use crate::stats::{StatsAggregator, StatsEvent, StatsSnapshot};
use crate::store::Store;
use crate::trigger::PlaybackTrigger;

/// How many finished plays are kept for the history view.
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a track is required")]
    MissingTrack,
    #[error("invalid track: {0}")]
    InvalidTrack(String),
    #[error("{0}")]
    Rejected(String),
}

struct SchedulerState {
    /// Insertion order. Priority is applied when picking, not when storing.
    queue: Vec<RequestRecord>,
    now_playing: Option<NowPlaying>,
    running: bool,
    /// True while a loop task exists; cleared by the loop itself on exit.
    worker_active: bool,
    history: VecDeque<PlayEvent>,
    #[cfg(test)]
    workers_spawned: usize,
}

struct Inner {
    state: RwLock<SchedulerState>,
    store: Store,
    stats: StatsAggregator,
    trigger: Arc<dyn PlaybackTrigger>,
    policy: Arc<dyn RequestPolicy>,
    priorities: PriorityRules,
    names: RequesterNames,
    timings: Timings,
}

/// Cheap to clone; every clone drives the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

enum Step {
    Stopped,
    Idle,
    Played,
}

/// Index of the record to play next: highest priority among Waiting records,
/// earliest in the queue on ties.
pub fn select_next(queue: &[RequestRecord]) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (i, r) in queue.iter().enumerate() {
        if r.status != RequestStatus::Waiting {
            continue;
        }
        match best {
            Some((_, p)) if r.priority <= p => {}
            _ => best = Some((i, r.priority)),
        }
    }
    best.map(|(i, _)| i)
}

/// Returns any Playing record to Waiting. Outside the loop's timed wait there
/// is no legitimate Playing record, so whatever is found was interrupted.
fn requeue_interrupted(queue: &mut [RequestRecord]) -> usize {
    let mut n = 0;
    for r in queue.iter_mut().filter(|r| r.status == RequestStatus::Playing) {
        r.status = RequestStatus::Waiting;
        n += 1;
    }
    n
}

fn push_history(history: &mut VecDeque<PlayEvent>, event: PlayEvent) {
    while history.len() >= HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(event);
}

impl Scheduler {
    /// Loads queue, now-playing record, and stats from `store`.
    ///
    /// A record left Playing by a previous process is put back to Waiting and
    /// the stale now-playing record is dropped.
    pub async fn open(
        store: Store,
        trigger: Arc<dyn PlaybackTrigger>,
        priorities: PriorityRules,
        timings: Timings,
    ) -> Self {
        let mut queue = store.load_all().await;
        let stale_now = store.load_now_playing().await;
        let stats = StatsAggregator::load(store.clone()).await;

        let requeued = requeue_interrupted(&mut queue);
        if requeued > 0 || stale_now.is_some() {
            tracing::warn!(
                "recovering from interrupted playback: {requeued} record(s) back to waiting"
            );
            if let Err(e) = store.save_all(queue.clone()).await {
                tracing::warn!("failed to persist recovered queue: {e}");
            }
            if let Err(e) = store.save_now_playing(None).await {
                tracing::warn!("failed to clear stale now-playing record: {e}");
            }
        }
        tracing::info!("loaded {} request(s)", queue.len());

        let state = SchedulerState {
            queue,
            now_playing: None,
            running: false,
            worker_active: false,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            #[cfg(test)]
            workers_spawned: 0,
        };

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                store,
                stats,
                trigger,
                policy: Arc::new(OpenPolicy),
                priorities,
                names: RequesterNames::new(),
                timings,
            }),
        }
    }

    /// Replaces the admission policy. Only valid before the scheduler is shared.
    pub fn with_policy(mut self, policy: Arc<dyn RequestPolicy>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.policy = policy,
            None => tracing::warn!("scheduler already shared, policy not replaced"),
        }
        self
    }

    pub async fn submit(
        &self,
        track: Option<Track>,
        requester: Option<&str>,
    ) -> Result<RequestRecord, SubmitError> {
        let track = track.ok_or(SubmitError::MissingTrack)?;
        if track.id.trim().is_empty() {
            return Err(SubmitError::InvalidTrack("missing id".into()));
        }
        if track.title.trim().is_empty() {
            return Err(SubmitError::InvalidTrack("missing title".into()));
        }

        let now = Local::now();
        let requester = self.inner.names.normalize(requester, now);

        let mut st = self.inner.state.write().await;
        self.inner
            .policy
            .check(&requester, &st.queue)
            .map_err(SubmitError::Rejected)?;

        let record = RequestRecord {
            id: Uuid::new_v4(),
            priority: self.inner.priorities.priority_for(&requester),
            track,
            requester,
            requested_at: now,
            status: RequestStatus::Waiting,
        };
        st.queue.push(record.clone());
        self.persist_queue(&st.queue).await;
        self.inner
            .stats
            .record(StatsEvent::RequestAdded, &record.requester, &record.track)
            .await;
        drop(st);

        tracing::info!(
            "request added: {} (requester: {}, priority {})",
            record.track.title,
            record.requester,
            record.priority
        );
        Ok(record)
    }

    /// Removes a record by id, whatever its status.
    ///
    /// Removing the record that is currently playing does not cut it short:
    /// NowPlaying keeps pointing at it until its timed wait ends.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut st = self.inner.state.write().await;
        let removed = self.inner.store.remove_by_id(&mut st.queue, id).await;
        if removed {
            tracing::info!("request removed: {id}");
        }
        removed
    }

    pub async fn start(&self) {
        let mut st = self.inner.state.write().await;
        if st.running {
            return;
        }
        st.running = true;

        // A loop that was stopped mid-track is still alive; it picks the flag
        // back up at its next boundary instead of getting a sibling.
        if st.worker_active {
            tracing::info!("auto-play resumed");
            return;
        }
        st.worker_active = true;
        #[cfg(test)]
        {
            st.workers_spawned += 1;
        }
        drop(st);

        let this = self.clone();
        tokio::spawn(async move { this.run().await });
        tracing::info!("auto-play started");
    }

    pub async fn stop(&self) {
        let mut st = self.inner.state.write().await;
        if st.running {
            st.running = false;
            tracing::info!("auto-play stopping (current track, if any, plays out)");
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        let st = self.inner.state.read().await;
        let count = |s: RequestStatus| st.queue.iter().filter(|r| r.status == s).count();
        StatusSnapshot {
            running: st.running,
            now_playing: st.now_playing.clone(),
            waiting_count: count(RequestStatus::Waiting),
            total_count: st.queue.len(),
            completed_count: count(RequestStatus::Completed),
        }
    }

    pub async fn requests(&self) -> Vec<RequestRecord> {
        self.inner.state.read().await.queue.clone()
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot().await
    }

    /// Most recent plays, oldest first.
    pub async fn history(&self) -> Vec<PlayEvent> {
        self.inner.state.read().await.history.iter().cloned().collect()
    }

    async fn persist_queue(&self, queue: &[RequestRecord]) {
        if let Err(e) = self.inner.store.save_all(queue.to_vec()).await {
            tracing::warn!("failed to persist queue: {e}");
        }
    }

    async fn persist_now_playing(&self, now: Option<NowPlaying>) {
        if let Err(e) = self.inner.store.save_now_playing(now).await {
            tracing::warn!("failed to persist now-playing record: {e}");
        }
    }

    async fn run(self) {
        let t = self.inner.timings;
        loop {
            let step = AssertUnwindSafe(self.step()).catch_unwind().await;
            match step {
                Ok(Step::Stopped) => break,
                Ok(Step::Idle) => tokio::time::sleep(t.duration(t.idle_wait)).await,
                Ok(Step::Played) => tokio::time::sleep(t.duration(t.inter_track_pause)).await,
                Err(_) => {
                    tracing::error!("auto-play iteration panicked");
                    tokio::time::sleep(t.duration(t.error_backoff)).await;
                }
            }
        }
        tracing::info!("auto-play loop exited");
    }

    async fn step(&self) -> Step {
        // Select and mark Playing.
        let (request_id, track, requester) = {
            let mut st = self.inner.state.write().await;

            // Only reachable after a failed iteration. Runs before the stop
            // check so an exiting loop never leaves a record Playing.
            if requeue_interrupted(&mut st.queue) > 0 || st.now_playing.is_some() {
                tracing::warn!("requeueing record left playing by a failed iteration");
                st.now_playing = None;
                self.persist_now_playing(None).await;
                self.persist_queue(&st.queue).await;
            }

            if !st.running {
                st.worker_active = false;
                return Step::Stopped;
            }

            let Some(idx) = select_next(&st.queue) else {
                return Step::Idle;
            };

            let rec = &mut st.queue[idx];
            rec.status = RequestStatus::Playing;
            let now = NowPlaying {
                request_id: rec.id,
                track: rec.track.clone(),
                requester: rec.requester.clone(),
                started_at: Local::now(),
            };
            let picked = (rec.id, rec.track.clone(), rec.requester.clone());

            st.now_playing = Some(now.clone());
            self.persist_now_playing(Some(now)).await;
            self.persist_queue(&st.queue).await;
            picked
        };

        tracing::info!("play start: {} (requester: {})", track.title, requester);

        if let Err(e) = self.inner.trigger.trigger(&track.url).await {
            tracing::warn!("playback trigger failed for {}: {e}", track.url);
        }

        let secs = effective_duration_secs(track.duration);
        tracing::info!("holding {} for {secs}s", track.title);
        tokio::time::sleep(self.inner.timings.duration(secs)).await;

        // Mark Completed and publish the event.
        let mut st = self.inner.state.write().await;
        match st.queue.iter_mut().find(|r| r.id == request_id) {
            Some(rec) => rec.status = RequestStatus::Completed,
            None => tracing::info!("{request_id} was removed while playing"),
        }
        st.now_playing = None;
        self.persist_now_playing(None).await;
        self.persist_queue(&st.queue).await;
        self.inner
            .stats
            .record(StatsEvent::PlayCompleted { played_secs: secs }, &requester, &track)
            .await;

        push_history(
            &mut st.history,
            PlayEvent {
                track: track.clone(),
                requester,
                completed_at: Local::now(),
            },
        );
        drop(st);

        tracing::info!("play complete: {} ({secs}s)", track.title);
        Step::Played
    }
}
