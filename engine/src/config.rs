use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Largest accepted `REQUESTBOX_TIME_UNIT_MS` (one hour per unit).
pub const MAX_TIME_UNIT_MS: u64 = 3_600_000;

/// Runtime configuration, read once from `REQUESTBOX_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    /// Extra name that gets admin priority alongside `admin` and `vip`.
    pub admin_alias: String,
    /// Program used to open a track URL; `None` disables the playback trigger.
    pub opener: Option<String>,
    pub ytdlp: String,
    pub ui_dir: Option<PathBuf>,
    pub timings: Timings,
}

/// Scheduler pauses, counted in time-units.
///
/// One unit is a second in production. Tests shrink it to a millisecond so a
/// clamped 180-unit track finishes in 180 ms.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub unit: Duration,
    pub idle_wait: u32,
    pub inter_track_pause: u32,
    pub error_backoff: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            idle_wait: 10,
            inter_track_pause: 5,
            error_backoff: 30,
        }
    }
}

impl Timings {
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    /// Saturates instead of overflowing; tokio treats a huge sleep as "far future".
    pub fn duration(&self, units: u32) -> Duration {
        self.unit.checked_mul(units).unwrap_or(Duration::MAX)
    }
}

fn default_opener() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_time_unit(raw: &str) -> anyhow::Result<Duration> {
    let unit_ms: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid REQUESTBOX_TIME_UNIT_MS: {raw}"))?;
    if unit_ms == 0 || unit_ms > MAX_TIME_UNIT_MS {
        anyhow::bail!("REQUESTBOX_TIME_UNIT_MS must be in 1..={MAX_TIME_UNIT_MS}, got {unit_ms}");
    }
    Ok(Duration::from_millis(unit_ms))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind = env_or("REQUESTBOX_BIND", "127.0.0.1:5000");
        let bind: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid REQUESTBOX_BIND: {bind}"))?;

        let opener = env_or("REQUESTBOX_OPENER", default_opener());
        let opener = if opener.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(opener)
        };

        let unit = parse_time_unit(&env_or("REQUESTBOX_TIME_UNIT_MS", "1000"))?;

        Ok(Self {
            bind,
            db_path: PathBuf::from(env_or("REQUESTBOX_DB_PATH", "requestbox.db")),
            admin_alias: env_or("REQUESTBOX_ADMIN_ALIAS", "관리자"),
            opener,
            ytdlp: env_or("REQUESTBOX_YTDLP", "yt-dlp"),
            ui_dir: std::env::var("REQUESTBOX_UI_DIR").ok().map(PathBuf::from),
            timings: Timings::with_unit(unit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timings_scale_with_unit() {
        let t = Timings::with_unit(Duration::from_millis(2));
        assert_eq!(t.duration(t.idle_wait), Duration::from_millis(20));
        assert_eq!(t.duration(180), Duration::from_millis(360));
        assert_eq!(Timings::default().duration(5), Duration::from_secs(5));
    }

    #[test]
    fn time_unit_is_bounded() {
        assert_eq!(parse_time_unit("1000").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_time_unit(" 1 ").unwrap(), Duration::from_millis(1));
        assert!(parse_time_unit("0").is_err());
        assert!(parse_time_unit("abc").is_err());
        assert!(parse_time_unit("18446744073709551615").is_err());
        assert!(parse_time_unit(&(MAX_TIME_UNIT_MS + 1).to_string()).is_err());
    }

    #[test]
    fn huge_unit_saturates_instead_of_panicking() {
        let t = Timings::with_unit(Duration::from_secs(u64::MAX / 2));
        assert_eq!(t.duration(t.error_backoff), Duration::MAX);
        assert_eq!(t.duration(0), Duration::ZERO);
    }
}
