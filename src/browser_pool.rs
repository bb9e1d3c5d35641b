use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cnfg::AppConfig;
use crate::error::ImgError;

/// A launched browser plus the task draining its CDP event stream.
struct ActiveBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ActiveBrowser {
    async fn launch(config: &AppConfig) -> Result<Self, ImgError> {
        let mut builder = BrowserConfig::builder()
            .viewport(None)
            .args(chrome_args(config.serverless));

        if let Some(path) = &config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| ImgError::Launch(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ImgError::Launch(e.to_string()))?;

        // Drive the CDP event stream for the lifetime of the browser.
        // Individual stream errors are routine and must not stop the loop.
        let handler = tokio::task::spawn(async move {
            while handler.next().await.is_some() {}
        });

        info!("browser launched");
        Ok(Self { browser, handler })
    }

    /// Cheap liveness probe: a finished handler task means the event
    /// stream ended and the process is gone; otherwise ask the browser
    /// for its version.
    async fn is_alive(&self) -> bool {
        !self.handler.is_finished() && self.browser.version().await.is_ok()
    }

    /// Best-effort teardown. Close failures are logged, never surfaced.
    async fn dispose(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            warn!("browser did not exit cleanly: {e}");
        }
        self.handler.abort();
    }
}

/// Owner of the single shared browser process. The browser is launched on
/// first use, probed before reuse, and replaced when the probe or a render
/// reports the session dead.
pub struct BrowserPool {
    slot: Mutex<Option<ActiveBrowser>>,
    config: Arc<AppConfig>,
}

impl BrowserPool {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            slot: Mutex::new(None),
            config,
        }
    }

    /// Open a fresh page on the shared browser, launching or relaunching
    /// it first if needed. The slot lock also serializes concurrent first
    /// requests so only one launch can ever be in flight.
    pub async fn page(&self) -> Result<Page, ImgError> {
        let mut slot = self.slot.lock().await;

        let alive = match slot.as_ref() {
            Some(active) => active.is_alive().await,
            None => false,
        };

        if !alive {
            if let Some(stale) = slot.take() {
                warn!("cached browser failed liveness probe, relaunching");
                stale.dispose().await;
            }
            *slot = Some(ActiveBrowser::launch(&self.config).await?);
        }

        match slot.as_ref() {
            Some(active) => Ok(active.browser.new_page("about:blank").await?),
            None => Err(ImgError::Launch("browser handle unavailable".to_string())),
        }
    }

    /// Discard the cached handle so the next request relaunches.
    pub async fn invalidate(&self) {
        if let Some(active) = self.slot.lock().await.take() {
            warn!("discarding browser after fatal session error");
            active.dispose().await;
        }
    }

    /// Whether a browser process is currently cached.
    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Graceful release of the browser process, used on shutdown signals.
    pub async fn shutdown(&self) {
        if let Some(active) = self.slot.lock().await.take() {
            info!("closing browser");
            active.dispose().await;
        }
    }
}

/// Flags for running Chromium headless inside containers and CI.
fn chrome_args(serverless: bool) -> Vec<String> {
    let mut args: Vec<String> = [
        "--headless",
        "--no-sandbox",
        "--disable-setuid-sandbox",
        "--disable-gpu",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--no-first-run",
        "--no-default-browser-check",
        "--hide-scrollbars",
        "--mute-audio",
        "--ignore-certificate-errors",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    if serverless {
        // Environments without a zygote process need single-process mode.
        args.extend(
            ["--single-process", "--no-zygote", "--disable-software-rasterizer"]
                .into_iter()
                .map(String::from),
        );
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serverless_flags_are_additive() {
        let base = chrome_args(false);
        let serverless = chrome_args(true);

        assert!(base.contains(&"--no-sandbox".to_string()));
        assert!(!base.contains(&"--single-process".to_string()));
        assert!(serverless.contains(&"--single-process".to_string()));
        assert!(serverless.contains(&"--no-zygote".to_string()));
        assert!(serverless.len() > base.len());
    }

    #[tokio::test]
    async fn pool_starts_without_a_browser() {
        let pool = BrowserPool::new(Arc::new(AppConfig::default()));
        assert!(!pool.is_active().await);

        // Both are no-ops on an empty slot.
        pool.invalidate().await;
        pool.shutdown().await;
        assert!(!pool.is_active().await);
    }
}
