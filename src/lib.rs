//! HTML-fragment screenshot service.
//!
//! POST an HTML string and get back a rendered PNG or JPEG, captured by a
//! shared headless Chromium process driven through chromiumoxide. The
//! browser is launched lazily, probed before reuse, and replaced when a
//! render reports the session dead.

pub mod browser_pool;
pub mod cnfg;
pub mod error;
pub mod html2img;

pub use browser_pool::BrowserPool;
pub use error::ImgError;
pub use html2img::{AppState, router};
