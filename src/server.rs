use crate::config::{ServerConfig, UpstreamConfig};
use crate::io_struct::{ChatRequest, UpstreamRequest};
use crate::relay::{ChannelSink, FrameSink, Relay, RelayError, RelayOutcome};
use crate::upstream::{EVENT_STREAM, UpstreamClient, UpstreamError};
use crate::validator::{ValidationError, validate};
use actix_web::http::StatusCode;
use actix_web::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL};
use actix_web::{
    HttpRequest, HttpResponse, HttpServer, ResponseError, error, get, post, web,
};
use futures::StreamExt;
use log::{error, info, warn};
use serde_json::json;
use std::io::Write;

/// Frames buffered between the relay task and the response body.
const STREAM_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upstream(_) | ApiError::Relay(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(upstream_config: UpstreamConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            upstream: UpstreamClient::new(upstream_config)?,
        })
    }

    pub async fn complete(&self, req: UpstreamRequest) -> Result<HttpResponse, ApiError> {
        let response = self.upstream.request_aggregated(req).await?;
        let content = response
            .first_content()
            .ok_or(UpstreamError::EmptyChoices)?;
        Ok(HttpResponse::Ok().json(json!({ "message": content })))
    }

    pub async fn stream_completion(&self, req: UpstreamRequest) -> Result<HttpResponse, ApiError> {
        let (mut sink, body) = ChannelSink::new(STREAM_CHANNEL_CAPACITY);
        if !sink.supports_flush() {
            return Err(RelayError::StreamingUnsupported.into());
        }

        let upstream = self.upstream.request_streaming(req).await?;
        let relay = Relay::new(self.upstream.config().max_line_bytes);
        actix_web::rt::spawn(async move {
            match relay.run(upstream, &mut sink).await {
                Ok(RelayOutcome::Completed) => info!("Stream completed"),
                Ok(RelayOutcome::UpstreamClosed) => {
                    warn!("Upstream closed the stream before [DONE]")
                }
                Ok(RelayOutcome::UpstreamFailed(e)) => error!("Upstream stream failed: {}", e),
                Ok(RelayOutcome::CallerGone) => info!("Caller disconnected mid-stream"),
                Err(e) => error!("Relay refused to start: {}", e),
            }
        });

        Ok(HttpResponse::Ok()
            .content_type(EVENT_STREAM)
            .insert_header((CACHE_CONTROL, "no-cache"))
            .insert_header((ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
            .streaming(body.map(Ok::<_, actix_web::Error>)))
    }
}

// Malformed bodies answer with the same `{"error": ...}` shape as validation.
fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    warn!("JSON payload error: {}", err);
    match &err {
        error::JsonPayloadError::OverflowKnownLength { length, limit } => ApiError::PayloadTooLarge(
            format!("Payload too large: {} bytes exceeds limit of {} bytes", length, limit),
        )
        .into(),
        error::JsonPayloadError::Overflow { limit } => {
            ApiError::PayloadTooLarge(format!("Payload exceeds limit of {} bytes", limit)).into()
        }
        _ => ApiError::BadRequest(err.to_string()).into(),
    }
}

pub fn json_config(max_payload_size: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(max_payload_size)
        .error_handler(json_error_handler)
}

#[get("/health")]
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[post("/chat/completions")]
pub async fn chat_completions(
    req: web::Json<ChatRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner();
    if let Err(e) = validate(&req) {
        info!("Rejected request for model {:?}: {}", req.model, e);
        return Err(e.into());
    }
    let stream = req.stream;
    let upstream_req = UpstreamRequest::try_from(req)?;
    let result = if stream {
        app_state.stream_completion(upstream_req).await
    } else {
        app_state.complete(upstream_req).await
    };
    if let Err(e) = &result {
        error!("Chat completion failed: {}", e);
    }
    result
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(chat_completions);
}

pub fn init_logging(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .try_init();
}

pub async fn startup(server_config: ServerConfig, app_state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(app_state);
    let max_payload_size = server_config.max_payload_size;

    info!(
        "Starting server at {}:{}, forwarding to {}",
        server_config.host,
        server_config.port,
        app_state.upstream.config().endpoint
    );

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .app_data(json_config(max_payload_size))
            .configure(configure)
    })
    .bind((server_config.host, server_config.port))?
    .run()
    .await
}
