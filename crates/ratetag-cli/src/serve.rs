//! HTTP service over a shared registry.
//!
//! Each request runs the retrying prediction on a blocking task, bounded by
//! the configured request timeout. Interactive callers get errors, never
//! fallback records.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ratetag_ai::{
    ExhaustionPolicy, PredictError, Predictor, Registry, RegistryOptions, RetryExecutor,
    sanitize_inputs,
};
use ratetag_core::{INPUT_FIELD, Record, RetryConfig, Settings};
use ratetag_store::{OutputFormat, SerializeError};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    predictor: Arc<dyn Predictor>,
    retry: RetryConfig,
    timeout: Duration,
}

impl AppState {
    pub fn new(predictor: Arc<dyn Predictor>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            predictor,
            retry,
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub rate_names: Vec<Option<String>>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/predict_csv", post(predict_csv))
        .with_state(state)
}

pub async fn run(settings: Settings, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(settings.port);
    let models_dir = settings.models_dir.clone();
    let categories = settings.categories.clone();
    let options = RegistryOptions {
        max_workers: settings.max_workers,
    };
    let registry = tokio::task::spawn_blocking(move || {
        Registry::load(&models_dir, &categories, options)
    })
    .await
    .context("model loading task panicked")?
    .context("loading models")?;

    let state = AppState::new(
        Arc::new(registry),
        settings.retry.clone(),
        Duration::from_secs(settings.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(
        port,
        project = %settings.project_name,
        version = %settings.version,
        "serving predictions"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}

// ── Handlers ──

async fn health(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "categories": state.predictor.categories()})),
    )
        .into_response()
}

async fn predict(State(state): State<AppState>, Json(req): Json<PredictRequest>) -> Response {
    if req.rate_names.is_empty() {
        return ApiError::Unprocessable("rate_names must not be empty".into()).into_response();
    }
    let inputs = sanitize_inputs(req.rate_names);
    match run_prediction(&state, inputs, req.categories).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// CSV in, CSV out. The first column holds rate names and its header is
/// echoed back; the remaining header cells name the categories to predict.
async fn predict_csv(State(state): State<AppState>, body: String) -> Response {
    let (input_col, categories, inputs) = match parse_csv_request(&body) {
        Ok(parsed) => parsed,
        Err(e) => return e.into_response(),
    };
    let categories = (!categories.is_empty()).then_some(categories);

    let mut records = match run_prediction(&state, inputs, categories).await {
        Ok(records) => records,
        Err(e) => return e.into_response(),
    };
    for record in &mut records {
        record.rename(INPUT_FIELD, input_col.as_str());
    }

    match ratetag_store::to_bytes(&records, OutputFormat::Csv) {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, OutputFormat::Csv.content_type()),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=predictions.csv",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => ApiError::Serialize(e).into_response(),
    }
}

fn parse_csv_request(body: &str) -> Result<(String, Vec<String>, Vec<String>), ApiError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| ApiError::BadRequest(format!("failed to parse CSV: {e}")))?
        .clone();
    let Some(input_col) = headers.get(0).filter(|h| !h.is_empty()) else {
        return Err(ApiError::BadRequest("CSV must start with a header row".into()));
    };

    let mut inputs = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| ApiError::BadRequest(format!("failed to parse CSV: {e}")))?;
        inputs.push(row.get(0).unwrap_or_default().to_string());
    }
    if inputs.is_empty() {
        return Err(ApiError::BadRequest(
            "CSV must contain a header row and at least one data row".into(),
        ));
    }

    let categories = headers.iter().skip(1).map(str::to_string).collect();
    Ok((input_col.to_string(), categories, inputs))
}

async fn run_prediction(
    state: &AppState,
    inputs: Vec<String>,
    categories: Option<Vec<String>>,
) -> Result<Vec<Record>, ApiError> {
    let predictor = state.predictor.clone();
    let retry = state.retry.clone();
    // The blocking task outlives a timed-out request; the deadline keeps it
    // from scheduling further attempts.
    let deadline = Instant::now() + state.timeout;
    let task = tokio::task::spawn_blocking(move || {
        RetryExecutor::predict_until(
            predictor.as_ref(),
            &inputs,
            categories.as_deref(),
            &retry,
            ExhaustionPolicy::Raise,
            Some(deadline),
        )
    });

    match tokio::time::timeout(state.timeout, task).await {
        Err(_) => Err(ApiError::Timeout(state.timeout)),
        Ok(Err(join)) => Err(ApiError::Internal(join.to_string())),
        Ok(Ok(Err(e))) => Err(ApiError::Predict(e)),
        Ok(Ok(Ok(records))) => Ok(records),
    }
}

// ── Errors ──

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Unprocessable(String),
    Predict(PredictError),
    Serialize(SerializeError),
    Timeout(Duration),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, category) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg, None),
            Self::Predict(e) => {
                let category = e.category().map(str::to_string);
                warn!(error = %e, category = category.as_deref().unwrap_or("-"), "prediction request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), category)
            }
            Self::Serialize(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
            Self::Timeout(limit) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("prediction timed out after {}s", limit.as_secs()),
                None,
            ),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };
        (status, Json(json!({"error": error, "category": category}))).into_response()
    }
}
