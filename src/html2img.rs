use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{Engine as _, engine::general_purpose};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::browser_pool::BrowserPool;
use crate::cnfg::AppConfig;
use crate::error::ImgError;

const BODY_LIMIT: usize = 10 * 1024 * 1024;
const JPEG_DEFAULT_QUALITY: u8 = 80;
const MAX_QUALITY: u8 = 100;

/// Viewport defaults differ between the two endpoints; each keeps the
/// values its callers were built against.
const RAW_DEFAULTS: (u32, u32) = (720, 960);
const ENVELOPE_DEFAULTS: (u32, u32) = (800, 600);

#[derive(Clone)]
pub struct AppState {
    pub browser: Arc<BrowserPool>,
    pub config: Arc<AppConfig>,
}

/// Wire shape shared by both endpoints. `html` stays an Option so a
/// missing field reaches validation instead of failing deserialization.
#[derive(Debug, Default, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(rename = "type", default)]
    pub format: ImageFormat,
    #[serde(default)]
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    fn capture_format(self) -> CaptureScreenshotFormat {
        match self {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        }
    }

    fn data_uri_tag(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }
}

/// Validated and clamped parameters for a single render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSpec {
    pub html: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub quality: Option<u8>,
}

impl RenderRequest {
    pub fn validate(
        self,
        defaults: (u32, u32),
        config: &AppConfig,
    ) -> Result<RenderSpec, ImgError> {
        let html = match self.html {
            Some(html) if !html.trim().is_empty() => html,
            _ => return Err(ImgError::Validation),
        };

        let quality = match self.format {
            ImageFormat::Jpeg => {
                Some(self.quality.unwrap_or(JPEG_DEFAULT_QUALITY).min(MAX_QUALITY))
            }
            ImageFormat::Png => None,
        };

        Ok(RenderSpec {
            html,
            width: self.width.unwrap_or(defaults.0).clamp(1, config.max_width),
            height: self.height.unwrap_or(defaults.1).clamp(1, config.max_height),
            format: self.format,
            quality,
        })
    }
}

/// Wrap the caller's fragment in a minimal document so rendering does not
/// depend on whatever structure the caller did or did not send.
pub fn wrap_fragment(fragment: &str) -> String {
    format!(
        "<!DOCTYPE html>\
         <html>\
         <head>\
         <meta charset=\"UTF-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\
         <style>* {{ margin: 0; padding: 0; box-sizing: border-box; }} body {{ background: white; }}</style>\
         </head>\
         <body>{fragment}</body>\
         </html>"
    )
}

/// The per-request page surface the pipeline drives. `release` is a typed
/// best-effort contract: implementations log failures and swallow them so
/// cleanup can never mask the primary error.
#[async_trait]
pub trait RenderPage: Send + Sized {
    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), ImgError>;
    async fn load(&self, document: &str, deadline: Duration) -> Result<(), ImgError>;
    async fn capture(
        &self,
        format: ImageFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>, ImgError>;
    async fn release(self);
}

#[async_trait]
impl RenderPage for Page {
    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), ImgError> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(width)
            .height(height)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| ImgError::Viewport(e.to_string()))?;

        self.execute(params).await?;
        Ok(())
    }

    async fn load(&self, document: &str, deadline: Duration) -> Result<(), ImgError> {
        tokio::time::timeout(deadline, async {
            self.set_content(document).await?;
            self.wait_for_navigation().await?;
            Ok::<_, CdpError>(())
        })
        .await
        .map_err(|_| ImgError::Timeout(deadline))??;

        Ok(())
    }

    async fn capture(
        &self,
        format: ImageFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>, ImgError> {
        let mut params = ScreenshotParams::builder()
            .format(format.capture_format())
            .full_page(true);

        if let Some(quality) = quality {
            params = params.quality(i64::from(quality));
        }

        Ok(self.screenshot(params.build()).await?)
    }

    async fn release(self) {
        if let Err(e) = self.close().await {
            warn!("page close failed: {e}");
        }
    }
}

async fn drive<P: RenderPage>(
    page: &P,
    spec: &RenderSpec,
    deadline: Duration,
) -> Result<Vec<u8>, ImgError> {
    page.set_viewport(spec.width, spec.height).await?;
    page.load(&wrap_fragment(&spec.html), deadline).await?;
    page.capture(spec.format, spec.quality).await
}

/// Run the pipeline, releasing the page on success and failure alike.
pub async fn run<P: RenderPage>(
    page: P,
    spec: &RenderSpec,
    deadline: Duration,
) -> Result<Vec<u8>, ImgError> {
    let outcome = drive(&page, spec, deadline).await;
    page.release().await;
    outcome
}

/// Acquire a page from the shared browser and render the spec. A failure
/// that killed the session also drops the cached browser so the next
/// request starts from a clean launch.
pub async fn render(state: &AppState, spec: &RenderSpec) -> Result<Vec<u8>, ImgError> {
    let page = state.browser.page().await?;
    let outcome = run(page, spec, state.config.load_timeout).await;

    if let Err(err) = &outcome {
        if err.is_fatal_session() {
            state.browser.invalidate().await;
        }
    }

    outcome
}

fn parse_request(
    payload: Result<Json<RenderRequest>, JsonRejection>,
    defaults: (u32, u32),
    config: &AppConfig,
) -> Result<RenderSpec, ImgError> {
    // An undecodable body (malformed JSON, html that is not a string) gets
    // the same fixed 400 as a missing field.
    let Json(request) = payload.map_err(|_| ImgError::Validation)?;
    request.validate(defaults, config)
}

pub async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Response, ImgError> {
    let spec = parse_request(payload, RAW_DEFAULTS, &state.config)?;
    let image = render(&state, &spec).await?;

    Ok(([(header::CONTENT_TYPE, spec.format.mime())], image).into_response())
}

#[derive(Serialize)]
pub struct RenderEnvelope {
    pub status: &'static str,
    pub data: RenderData,
}

#[derive(Serialize)]
pub struct RenderData {
    pub image: String,
    pub width: u32,
    pub height: u32,
}

pub async fn html2img(
    State(state): State<AppState>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Json<RenderEnvelope>, ImgError> {
    let spec = parse_request(payload, ENVELOPE_DEFAULTS, &state.config)?;
    let image = render(&state, &spec).await?;
    let encoded = general_purpose::STANDARD.encode(&image);

    Ok(Json(RenderEnvelope {
        status: "success",
        data: RenderData {
            image: format!("data:image/{};base64,{}", spec.format.data_uri_tag(), encoded),
            width: spec.width,
            height: spec.height,
        },
    }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/generate-image", post(generate_image))
        .route("/api/html2img", post(html2img))
        .route("/health", get(health))
        .layer(cors)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}
