use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::model::Track;
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub requests: u64,
    pub completed: u64,
    pub play_time: u64,
}

/// Aggregate counters. Every field only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub completed_requests: u64,
    /// Sum of effective play durations, in seconds.
    pub total_play_time: u64,
    #[serde(default)]
    pub popular_songs: BTreeMap<String, u64>,
    #[serde(default)]
    pub popular_requesters: BTreeMap<String, u64>,
    /// Keyed by local calendar date, `YYYY-MM-DD`.
    #[serde(default)]
    pub daily_stats: BTreeMap<String, DailyStats>,
    pub created_at: DateTime<Local>,
}

impl StatsSnapshot {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            completed_requests: 0,
            total_play_time: 0,
            popular_songs: BTreeMap::new(),
            popular_requesters: BTreeMap::new(),
            daily_stats: BTreeMap::new(),
            created_at: Local::now(),
        }
    }

    /// Applies one lifecycle event for the calendar day `day`.
    pub fn apply(&mut self, event: StatsEvent, requester: &str, track: &Track, day: &str) {
        let daily = self.daily_stats.entry(day.to_string()).or_default();
        match event {
            StatsEvent::RequestAdded => {
                self.total_requests += 1;
                daily.requests += 1;
                *self.popular_requesters.entry(requester.to_string()).or_default() += 1;
                *self.popular_songs.entry(track.song_key()).or_default() += 1;
            }
            StatsEvent::PlayCompleted { played_secs } => {
                self.completed_requests += 1;
                self.total_play_time += u64::from(played_secs);
                daily.completed += 1;
                daily.play_time += u64::from(played_secs);
            }
        }
    }
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsEvent {
    RequestAdded,
    /// `played_secs` is the effective (clamped) duration the track held the player.
    PlayCompleted { played_secs: u32 },
}

/// Owns the stats snapshot and writes it through to the store after each event.
pub struct StatsAggregator {
    snapshot: Mutex<StatsSnapshot>,
    store: Store,
}

impl StatsAggregator {
    pub async fn load(store: Store) -> Self {
        let snapshot = store.load_stats().await;
        Self {
            snapshot: Mutex::new(snapshot),
            store,
        }
    }

    pub async fn record(&self, event: StatsEvent, requester: &str, track: &Track) {
        let today = Local::now().format("%Y-%m-%d").to_string();

        // The lock is held across the save so snapshots hit the store in order.
        let mut s = self.snapshot.lock().await;
        s.apply(event, requester, track, &today);
        if let Err(e) = self.store.save_stats(s.clone()).await {
            tracing::warn!("failed to persist stats: {e}");
        }
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        self.snapshot.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn track(title: &str, channel: &str) -> Track {
        Track {
            id: title.to_lowercase(),
            title: title.into(),
            duration: 200,
            channel: channel.into(),
            view_count: 0,
            thumbnail: String::new(),
            url: String::new(),
            upload_date: String::new(),
        }
    }

    #[test]
    fn request_added_updates_counters() {
        let mut s = StatsSnapshot::new();
        let t = track("Song", "Band");
        s.apply(StatsEvent::RequestAdded, "alice", &t, "2026-10-19");
        s.apply(StatsEvent::RequestAdded, "alice", &t, "2026-10-19");
        s.apply(StatsEvent::RequestAdded, "bob", &t, "2026-10-20");

        assert_eq!(s.total_requests, 3);
        assert_eq!(s.popular_requesters["alice"], 2);
        assert_eq!(s.popular_requesters["bob"], 1);
        assert_eq!(s.popular_songs["Song - Band"], 3);
        assert_eq!(s.daily_stats["2026-10-19"].requests, 2);
        assert_eq!(s.daily_stats["2026-10-20"].requests, 1);
    }

    #[test]
    fn play_completed_sums_effective_durations() {
        let mut s = StatsSnapshot::new();
        let t = track("Song", "Band");
        s.apply(StatsEvent::PlayCompleted { played_secs: 180 }, "alice", &t, "2026-10-19");
        s.apply(StatsEvent::PlayCompleted { played_secs: 400 }, "alice", &t, "2026-10-19");

        assert_eq!(s.completed_requests, 2);
        assert_eq!(s.total_play_time, 580);
        let day = s.daily_stats["2026-10-19"];
        assert_eq!(day.completed, 2);
        assert_eq!(day.play_time, 580);
        // Completions do not count as new requests.
        assert_eq!(s.total_requests, 0);
    }

    #[test]
    fn counters_never_decrease() {
        let mut s = StatsSnapshot::new();
        let t = track("Song", "");
        let mut last = (0, 0, 0);
        for i in 0..20u32 {
            let event = if i % 3 == 0 {
                StatsEvent::PlayCompleted { played_secs: 180 + i }
            } else {
                StatsEvent::RequestAdded
            };
            s.apply(event, "carol", &t, "2026-10-19");
            let cur = (s.total_requests, s.completed_requests, s.total_play_time);
            assert!(cur.0 >= last.0 && cur.1 >= last.1 && cur.2 >= last.2);
            last = cur;
        }
    }

    #[tokio::test]
    async fn concurrent_records_are_not_lost_and_persist() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("stats.db"));
        let agg = Arc::new(StatsAggregator::load(store.clone()).await);

        let mut handles = Vec::new();
        for i in 0..10 {
            let agg = agg.clone();
            handles.push(tokio::spawn(async move {
                let t = track("Song", "Band");
                agg.record(StatsEvent::RequestAdded, &format!("user{i}"), &t).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(agg.snapshot().await.total_requests, 10);
        assert_eq!(store.load_stats().await.total_requests, 10);
    }
}
