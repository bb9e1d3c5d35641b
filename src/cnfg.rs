use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use once_cell::sync::Lazy;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_WIDTH: u32 = 1920;
const DEFAULT_MAX_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,

    /// Overrides the Chromium executable chromiumoxide would auto-detect.
    pub chrome_path: Option<String>,

    /// Constrained serverless environment, selected by the VERCEL variable.
    pub serverless: bool,

    /// Deadline for loading the wrapped document into the page.
    pub load_timeout: Duration,

    pub max_width: u32,
    pub max_height: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            chrome_path: None,
            serverless: false,
            load_timeout: Duration::from_secs(DEFAULT_RENDER_TIMEOUT_SECS),
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }
}

static CONFIG: Lazy<Arc<AppConfig>> = Lazy::new(|| Arc::new(load_config()));

fn load_config() -> AppConfig {
    dotenv().ok();

    let mut config = AppConfig::default();
    config.port = std::env::var("PORT")
        .unwrap_or_else(|_| DEFAULT_PORT.to_string())
        .parse()
        .expect("Invalid PORT value");

    config.chrome_path = std::env::var("CHROME_PATH").ok().filter(|p| !p.is_empty());
    config.serverless = std::env::var("VERCEL").is_ok();

    let timeout_secs: u64 = std::env::var("RENDER_TIMEOUT_SECS")
        .unwrap_or_else(|_| DEFAULT_RENDER_TIMEOUT_SECS.to_string())
        .parse()
        .expect("Invalid RENDER_TIMEOUT_SECS value");
    config.load_timeout = Duration::from_secs(timeout_secs);

    config
}

pub fn get() -> Arc<AppConfig> {
    Arc::clone(&CONFIG)
}
