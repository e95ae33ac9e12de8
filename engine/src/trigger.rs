use async_trait::async_trait;
use tokio::process::Command;

/// Side effect run once when a track starts, e.g. opening it in a browser.
///
/// The scheduler logs failures and carries on; nothing here feeds back into
/// queue state.
#[async_trait]
pub trait PlaybackTrigger: Send + Sync {
    async fn trigger(&self, url: &str) -> anyhow::Result<()>;
}

/// Hands the URL to an external opener program (`xdg-open`, `open`, ...).
///
/// The child is not awaited: openers usually return immediately, and a slow
/// one must not delay the play timer.
pub struct OpenerTrigger {
    program: String,
}

impl OpenerTrigger {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl PlaybackTrigger for OpenerTrigger {
    async fn trigger(&self, url: &str) -> anyhow::Result<()> {
        if url.trim().is_empty() {
            anyhow::bail!("track has no URL");
        }
        let mut cmd = Command::new(&self.program);
        cmd.arg(url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {e}", self.program))?;

        // Reap in the background so the opener never lingers as a zombie.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}

/// Used when no opener is configured (headless installs).
pub struct NoopTrigger;

#[async_trait]
impl PlaybackTrigger for NoopTrigger {
    async fn trigger(&self, url: &str) -> anyhow::Result<()> {
        tracing::debug!("playback trigger disabled, not opening {url}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let t = OpenerTrigger::new("/nonexistent/requestbox-opener");
        assert!(t.trigger("https://example.com").await.is_err());
    }

    #[tokio::test]
    async fn empty_url_is_an_error() {
        let t = OpenerTrigger::new("true");
        assert!(t.trigger("  ").await.is_err());
    }

    #[tokio::test]
    async fn noop_always_succeeds() {
        assert!(NoopTrigger.trigger("https://example.com").await.is_ok());
    }
}
