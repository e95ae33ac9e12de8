// --- Persistence (SQLite) -------------------------------------------------
//
// Three documents live in one SQLite file:
//   - the request collection (table `requests`, one row per record)
//   - the now-playing record (JSON in `documents`, name = "now_playing")
//   - the stats snapshot     (JSON in `documents`, name = "stats")
//
// Every save rewrites the whole document inside a transaction. At the scale of
// a personal queue (tens to low hundreds of rows) this is cheap, and readers
// never see a half-written collection. It is also the scaling limit of this
// store: incremental writes would be the next step if queues ever grow large.
//
// Loads fail soft. A missing, locked, or corrupt database yields the empty or
// default document and a warning; the service keeps running on in-memory state.
//
// rusqlite is synchronous, so every call goes through spawn_blocking.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::model::{NowPlaying, RequestRecord, RequestStatus, Track};
use crate::stats::StatsSnapshot;

const DOC_NOW_PLAYING: &str = "now_playing";
const DOC_STATS: &str = "stats";

#[derive(Clone, Debug)]
pub struct Store {
    path: PathBuf,
}

fn db_init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS requests (
            id            TEXT PRIMARY KEY,
            position      INTEGER NOT NULL,
            requester     TEXT NOT NULL,
            requested_at  TEXT NOT NULL,
            status        TEXT NOT NULL,
            priority      INTEGER NOT NULL,
            track         TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_requests_position ON requests(position);

        CREATE TABLE IF NOT EXISTS documents (
            name  TEXT PRIMARY KEY,
            body  TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn db_load_requests(conn: &Connection) -> anyhow::Result<Vec<RequestRecord>> {
    db_init(conn)?;

    let mut stmt = conn.prepare(
        "SELECT id, requester, requested_at, status, priority, track FROM requests ORDER BY position ASC",
    )?;
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id_str: String = row.get(0)?;
        let id = Uuid::parse_str(&id_str)
            .map_err(|e| anyhow::anyhow!("invalid UUID in DB (id={id_str}): {e}"))?;

        let requested_at: String = row.get(2)?;
        let requested_at = DateTime::parse_from_rfc3339(&requested_at)
            .map_err(|e| anyhow::anyhow!("invalid timestamp for {id}: {e}"))?
            .with_timezone(&Local);

        let status: String = row.get(3)?;
        let status = RequestStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("invalid status for {id}: {status}"))?;

        let track: String = row.get(5)?;
        let track: Track = serde_json::from_str(&track)?;

        out.push(RequestRecord {
            id,
            track,
            requester: row.get(1)?,
            requested_at,
            status,
            priority: row.get(4)?,
        });
    }
    Ok(out)
}

fn db_save_requests(conn: &mut Connection, records: &[RequestRecord]) -> anyhow::Result<()> {
    db_init(conn)?;

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM requests", [])?;

    for (position, rec) in records.iter().enumerate() {
        tx.execute(
            "INSERT INTO requests (id, position, requester, requested_at, status, priority, track)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rec.id.to_string(),
                position as i64,
                rec.requester,
                rec.requested_at.to_rfc3339(),
                rec.status.as_str(),
                rec.priority,
                serde_json::to_string(&rec.track)?,
            ],
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn db_load_document(conn: &Connection, name: &str) -> anyhow::Result<Option<String>> {
    db_init(conn)?;
    let body = conn
        .query_row(
            "SELECT body FROM documents WHERE name = ?1",
            params![name],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(body)
}

fn db_save_document(conn: &mut Connection, name: &str, body: &str) -> anyhow::Result<()> {
    db_init(conn)?;
    conn.execute(
        "INSERT INTO documents (name, body) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET body = excluded.body",
        params![name, body],
    )?;
    Ok(())
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let mut conn = Connection::open(path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!("sqlite task join failed: {e}"))?
    }

    /// Reads the request collection. Never fails; errors yield an empty queue.
    pub async fn load_all(&self) -> Vec<RequestRecord> {
        match self.with_conn(|conn| db_load_requests(conn)).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("failed to load requests, starting with empty queue: {e}");
                Vec::new()
            }
        }
    }

    /// Replaces the stored collection with `records`, in order.
    pub async fn save_all(&self, records: Vec<RequestRecord>) -> anyhow::Result<()> {
        self.with_conn(move |conn| db_save_requests(conn, &records)).await
    }

    /// Drops the record with `id` from `records` and, if one was removed,
    /// rewrites the stored collection. A failed save is logged; the in-memory
    /// removal stands either way.
    pub async fn remove_by_id(&self, records: &mut Vec<RequestRecord>, id: Uuid) -> bool {
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return false;
        }
        if let Err(e) = self.save_all(records.clone()).await {
            tracing::warn!("failed to persist queue after removing {id}: {e}");
        }
        true
    }

    pub async fn load_now_playing(&self) -> Option<NowPlaying> {
        let res = self
            .with_conn(|conn| {
                let Some(body) = db_load_document(conn, DOC_NOW_PLAYING)? else {
                    return Ok(None);
                };
                Ok(serde_json::from_str::<Option<NowPlaying>>(&body)?)
            })
            .await;
        match res {
            Ok(now) => now,
            Err(e) => {
                tracing::warn!("failed to load now-playing record, assuming none: {e}");
                None
            }
        }
    }

    pub async fn save_now_playing(&self, now: Option<NowPlaying>) -> anyhow::Result<()> {
        let body = serde_json::to_string(&now)?;
        self.with_conn(move |conn| db_save_document(conn, DOC_NOW_PLAYING, &body))
            .await
    }

    pub async fn load_stats(&self) -> StatsSnapshot {
        let res = self
            .with_conn(|conn| {
                let Some(body) = db_load_document(conn, DOC_STATS)? else {
                    return Ok(None);
                };
                Ok(Some(serde_json::from_str::<StatsSnapshot>(&body)?))
            })
            .await;
        match res {
            Ok(Some(stats)) => stats,
            Ok(None) => StatsSnapshot::new(),
            Err(e) => {
                tracing::warn!("failed to load stats, starting from zero: {e}");
                StatsSnapshot::new()
            }
        }
    }

    pub async fn save_stats(&self, stats: StatsSnapshot) -> anyhow::Result<()> {
        let body = serde_json::to_string(&stats)?;
        self.with_conn(move |conn| db_save_document(conn, DOC_STATS, &body))
            .await
    }
}
