use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Duration assumed for tracks whose provider did not report one.
pub const DEFAULT_DURATION_SECS: u32 = 180;

/// Shortest and longest time a track is allowed to hold the player.
pub const MIN_PLAY_SECS: u32 = 180;
pub const MAX_PLAY_SECS: u32 = 600;

/// Playable item as returned by the search provider.
///
/// Requests embed a full copy, so later provider changes never touch the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default = "default_duration", deserialize_with = "lenient_duration")]
    pub duration: u32,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub upload_date: String,
}

fn default_duration() -> u32 {
    DEFAULT_DURATION_SECS
}

// Providers report `null`, floats, or nothing at all for live/unknown items.
fn lenient_duration<'de, D>(de: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<f64> = Option::deserialize(de)?;
    Ok(match v {
        Some(s) if s.is_finite() && s > 0.0 => s.round().min(u32::MAX as f64) as u32,
        _ => DEFAULT_DURATION_SECS,
    })
}

impl Track {
    /// Key used for the per-song counters.
    pub fn song_key(&self) -> String {
        let channel = if self.channel.trim().is_empty() {
            "Unknown"
        } else {
            self.channel.as_str()
        };
        format!("{} - {}", self.title, channel)
    }
}

/// How long the scheduler holds a track before moving on.
///
/// Zero means "unknown" and falls back to the default before clamping.
pub fn effective_duration_secs(duration: u32) -> u32 {
    let d = if duration == 0 {
        DEFAULT_DURATION_SECS
    } else {
        duration
    };
    d.clamp(MIN_PLAY_SECS, MAX_PLAY_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Waiting,
    Playing,
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Waiting => "waiting",
            RequestStatus::Playing => "playing",
            RequestStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(RequestStatus::Waiting),
            "playing" => Some(RequestStatus::Playing),
            "completed" => Some(RequestStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    #[serde(rename = "music")]
    pub track: Track,
    pub requester: String,
    pub requested_at: DateTime<Local>,
    pub status: RequestStatus,
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub request_id: Uuid,
    #[serde(rename = "music")]
    pub track: Track,
    pub requester: String,
    pub started_at: DateTime<Local>,
}

/// One finished play, as exposed by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayEvent {
    #[serde(rename = "music")]
    pub track: Track,
    pub requester: String,
    pub completed_at: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub now_playing: Option<NowPlaying>,
    pub waiting_count: usize,
    pub total_count: usize,
    pub completed_count: usize,
}
