use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::model::{Track, DEFAULT_DURATION_SECS};

/// Turns free text into candidate tracks.
///
/// Provider faults are reported as an empty list, never as an error.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Vec<Track>;
}

const PRIMARY_RESULTS: usize = 20;
const VARIANT_RESULTS: usize = 10;
/// Below this many primary hits, query variants are tried as well.
const EXPAND_BELOW: usize = 8;
/// Variant searches stop once this many unique tracks are collected.
const EXPAND_UNTIL: usize = 15;
const MAX_RESULTS: usize = 20;

const VARIANT_SUFFIXES: &[&str] = &[
    "music",
    "lyrics",
    "music video",
    "live",
    "official",
    "singer",
    "artist",
];

/// Searches YouTube through the `yt-dlp` program.
pub struct YtDlpSearch {
    program: String,
}

#[derive(Debug, Deserialize)]
struct YtDlpListing {
    #[serde(default)]
    entries: Vec<Option<YtDlpEntry>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    view_count: Option<u64>,
    upload_date: Option<String>,
}

impl YtDlpEntry {
    fn into_track(self) -> Option<Track> {
        if self.kind.as_deref() == Some("playlist") {
            return None;
        }
        let id = self.id.filter(|s| !s.is_empty())?;
        let title = self.title.filter(|s| !s.trim().is_empty())?;
        let duration = match self.duration {
            Some(d) if d.is_finite() && d > 0.0 => d.round() as u32,
            _ => DEFAULT_DURATION_SECS,
        };
        Some(Track {
            thumbnail: format!("https://img.youtube.com/vi/{id}/maxresdefault.jpg"),
            url: format!("https://www.youtube.com/watch?v={id}"),
            title,
            duration,
            channel: self.channel.unwrap_or_default(),
            view_count: self.view_count.unwrap_or(0),
            upload_date: self.upload_date.unwrap_or_default(),
            id,
        })
    }
}

/// Parses `--dump-single-json` output into tracks, skipping playlists and
/// entries without an id or title.
fn parse_listing(json: &[u8]) -> anyhow::Result<Vec<Track>> {
    let listing: YtDlpListing = serde_json::from_slice(json)?;
    Ok(listing
        .entries
        .into_iter()
        .flatten()
        .filter_map(YtDlpEntry::into_track)
        .collect())
}

/// Appends tracks whose id has not been seen yet.
fn merge_unique(into: &mut Vec<Track>, seen: &mut HashSet<String>, found: Vec<Track>) {
    for t in found {
        if seen.insert(t.id.clone()) {
            into.push(t);
        }
    }
}

/// Most viewed first; equal counts keep discovery order.
fn rank(mut tracks: Vec<Track>) -> Vec<Track> {
    tracks.sort_by(|a, b| b.view_count.cmp(&a.view_count));
    tracks.truncate(MAX_RESULTS);
    tracks
}

impl YtDlpSearch {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Track>> {
        let out = Command::new(&self.program)
            .arg("--flat-playlist")
            .arg("--dump-single-json")
            .arg("--no-warnings")
            .arg("--ignore-errors")
            .arg(format!("ytsearch{limit}:{query}"))
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to run {}: {e}", self.program))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, out.status, stderr.trim());
        }
        parse_listing(&out.stdout)
    }
}

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn search(&self, query: &str) -> Vec<Track> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut tracks = Vec::new();
        match self.run(query, PRIMARY_RESULTS).await {
            Ok(found) => merge_unique(&mut tracks, &mut seen, found),
            Err(e) => {
                tracing::error!("search failed for {query:?}: {e}");
                return Vec::new();
            }
        }

        if tracks.len() < EXPAND_BELOW {
            tracing::info!("only {} results for {query:?}, trying variants", tracks.len());
            for suffix in VARIANT_SUFFIXES {
                if tracks.len() >= EXPAND_UNTIL {
                    break;
                }
                let variant = format!("{query} {suffix}");
                match self.run(&variant, VARIANT_RESULTS).await {
                    Ok(found) => merge_unique(&mut tracks, &mut seen, found),
                    Err(e) => tracing::warn!("variant search failed ({variant}): {e}"),
                }
            }
        }

        let tracks = rank(tracks);
        tracing::info!("search {query:?}: {} results", tracks.len());
        tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{
        "_type": "playlist",
        "entries": [
            {"_type": "url", "id": "aaa", "title": "First", "duration": 212.0, "channel": "Band", "view_count": 10},
            {"_type": "playlist", "id": "pl1", "title": "Some playlist"},
            null,
            {"_type": "url", "id": "bbb", "title": "Live stream", "duration": null, "view_count": 500},
            {"_type": "url", "title": "No id"},
            {"_type": "url", "id": "ccc", "view_count": 900},
            {"_type": "url", "id": "ddd", "title": "  ", "view_count": 900}
        ]
    }"#;

    #[test]
    fn parse_skips_playlists_and_broken_entries() {
        let tracks = parse_listing(LISTING.as_bytes()).unwrap();
        let ids: Vec<_> = tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["aaa", "bbb"]);

        assert_eq!(tracks[0].duration, 212);
        assert_eq!(tracks[0].url, "https://www.youtube.com/watch?v=aaa");
        assert_eq!(tracks[0].thumbnail, "https://img.youtube.com/vi/aaa/maxresdefault.jpg");
        assert_eq!(tracks[1].duration, DEFAULT_DURATION_SECS);
        assert_eq!(tracks[1].channel, "");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_listing(b"ERROR: not json").is_err());
    }

    #[test]
    fn merge_and_rank_dedupes_and_sorts_by_views() {
        let mut merged = Vec::new();
        let mut seen = HashSet::new();
        merge_unique(&mut merged, &mut seen, parse_listing(LISTING.as_bytes()).unwrap());
        merge_unique(&mut merged, &mut seen, parse_listing(LISTING.as_bytes()).unwrap());
        assert_eq!(merged.len(), 2);

        let tracks = rank(merged);
        assert_eq!(tracks[0].id, "bbb");
        assert_eq!(tracks[1].id, "aaa");
    }

    #[tokio::test]
    async fn provider_failure_yields_no_results() {
        let s = YtDlpSearch::new("/nonexistent/yt-dlp");
        assert!(s.search("anything").await.is_empty());
        assert!(s.search("   ").await.is_empty());
    }
}
