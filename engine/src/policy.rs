use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};

use crate::model::RequestRecord;

pub const PRIORITY_ELEVATED: i64 = 100;
pub const PRIORITY_BASELINE: i64 = 1;

/// Names treated as "no name given".
const PLACEHOLDER_NAMES: &[&str] = &["익명", "anonymous"];

/// Admission hook consulted on every submit.
pub trait RequestPolicy: Send + Sync {
    /// `Err` carries the message shown to the requester.
    fn check(&self, requester: &str, queue: &[RequestRecord]) -> Result<(), String>;
}

/// Admits everyone.
pub struct OpenPolicy;

impl RequestPolicy for OpenPolicy {
    fn check(&self, _requester: &str, _queue: &[RequestRecord]) -> Result<(), String> {
        Ok(())
    }
}

/// Maps requester names to a priority. Matching is case-insensitive and exact.
#[derive(Debug, Clone)]
pub struct PriorityRules {
    privileged: Vec<String>,
}

impl PriorityRules {
    pub fn new(admin_alias: &str) -> Self {
        let mut privileged = vec!["admin".to_string(), "vip".to_string()];
        let alias = admin_alias.trim().to_lowercase();
        if !alias.is_empty() && !privileged.contains(&alias) {
            privileged.push(alias);
        }
        Self { privileged }
    }

    pub fn priority_for(&self, requester: &str) -> i64 {
        let name = requester.to_lowercase();
        if self.privileged.iter().any(|p| *p == name) {
            PRIORITY_ELEVATED
        } else {
            PRIORITY_BASELINE
        }
    }
}

/// Produces display names for requesters who gave none.
#[derive(Debug, Default)]
pub struct RequesterNames {
    counter: AtomicU64,
}

impl RequesterNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trims `raw`; blank or placeholder input becomes `Anonymous_<hex>`.
    pub fn normalize(&self, raw: Option<&str>, now: DateTime<Local>) -> String {
        let name = raw.map(str::trim).unwrap_or("");
        let is_placeholder = PLACEHOLDER_NAMES
            .iter()
            .any(|p| p.to_lowercase() == name.to_lowercase());
        if !name.is_empty() && !is_placeholder {
            return name.to_string();
        }

        // Timestamp nanos mixed with a per-process sequence: unique within a run.
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = now.timestamp_nanos_opt().unwrap_or_default() as u64;
        let tag = (nanos ^ seq.wrapping_mul(0x9E37_79B9_7F4A_7C15)) as u32;
        format!("Anonymous_{tag:08x}")
    }
}
