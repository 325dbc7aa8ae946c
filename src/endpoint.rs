/// HTTP status endpoint
///
/// Read-only view of the measurement log and alert state for dashboards
/// and ad-hoc plotting. Never writes to either file.
///
/// Endpoints:
/// - GET /health              - Service health check
/// - GET /readings?limit=N    - Last N measurements as JSON (default 100)
/// - GET /state               - Alert state record
/// - GET /results.csv         - Raw measurement log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::model::Measurement;
use crate::storage::{read_recent, read_state};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 10_000;

type Response = tiny_http::Response<Cursor<Vec<u8>>>;

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// One measurement for JSON responses
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ReadingData {
    pub time: DateTime<Utc>,
    pub raw_distance_cm: f64,
    pub level_cm: Option<f64>,
}

impl From<&Measurement> for ReadingData {
    fn from(m: &Measurement) -> Self {
        ReadingData {
            time: m.time,
            raw_distance_cm: m.raw_distance_cm,
            level_cm: m.level_cm,
        }
    }
}

/// Response for /readings
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingsResponse {
    pub name: String,
    pub count: usize,
    pub readings: Vec<ReadingData>,
}

/// Files the endpoint serves from.
#[derive(Debug, Clone)]
pub struct EndpointContext {
    pub name: String,
    pub results_path: PathBuf,
    pub state_path: PathBuf,
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

/// Start HTTP endpoint server on the specified port (blocks)
pub fn start_endpoint_server(port: u16, ctx: EndpointContext) -> Result<(), String> {
    let server = tiny_http::Server::http(format!("0.0.0.0:{}", port))
        .map_err(|e| format!("Failed to start HTTP server: {}", e))?;

    tracing::info!(port, "status endpoint listening");

    for request in server.incoming_requests() {
        let response = if *request.method() != tiny_http::Method::Get {
            json_response(405, serde_json::json!({ "error": "Method not allowed" }))
        } else {
            route(&ctx, request.url())
        };

        if let Err(e) = request.respond(response) {
            tracing::warn!(error = %e, "failed to send response");
        }
    }

    Ok(())
}

/// Dispatch a request path to its handler.
fn route(ctx: &EndpointContext, url: &str) -> Response {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));

    match path {
        "/health" => handle_health(),
        "/readings" => handle_readings(ctx, parse_limit(query)),
        "/state" => handle_state(&ctx.state_path),
        "/results.csv" => handle_csv(&ctx.results_path),
        _ => json_response(
            404,
            serde_json::json!({
                "error": "Not found",
                "available_endpoints": ["/health", "/readings?limit=N", "/state", "/results.csv"]
            }),
        ),
    }
}

/// `limit=N` from a query string, clamped to `1..=MAX_LIMIT`.
fn parse_limit(query: &str) -> usize {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "limit")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .map(|n| n.clamp(1, MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT)
}

fn handle_health() -> Response {
    json_response(
        200,
        serde_json::json!({
            "status": "ok",
            "service": "levmon_service",
            "version": env!("CARGO_PKG_VERSION")
        }),
    )
}

fn handle_readings(ctx: &EndpointContext, limit: usize) -> Response {
    match read_recent(&ctx.results_path, limit) {
        Ok(measurements) => {
            let readings: Vec<ReadingData> = measurements.iter().map(ReadingData::from).collect();
            let body = ReadingsResponse {
                name: ctx.name.clone(),
                count: readings.len(),
                readings,
            };
            match serde_json::to_value(&body) {
                Ok(json) => json_response(200, json),
                Err(e) => json_response(500, serde_json::json!({ "error": e.to_string() })),
            }
        }
        Err(e) => json_response(500, serde_json::json!({ "error": e.to_string() })),
    }
}

fn handle_state(state_path: &Path) -> Response {
    match read_state(state_path) {
        Ok(Some(state)) => json_response(
            200,
            serde_json::json!({
                "version": state.version,
                "last_alert_time": state.last_alert_time,
            }),
        ),
        Ok(None) => json_response(404, serde_json::json!({ "error": "No alert state yet" })),
        Err(e) => json_response(500, serde_json::json!({ "error": e.to_string() })),
    }
}

fn handle_csv(results_path: &Path) -> Response {
    match fs::read(results_path) {
        Ok(bytes) => with_content_type(tiny_http::Response::from_data(bytes), "text/csv"),
        Err(e) => json_response(404, serde_json::json!({ "error": e.to_string() })),
    }
}

/// Create HTTP response with JSON body
fn json_response(status_code: u16, json: serde_json::Value) -> Response {
    let body = serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string());

    with_content_type(tiny_http::Response::from_data(body.into_bytes()), "application/json")
        .with_status_code(tiny_http::StatusCode::from(status_code))
}

fn with_content_type(response: Response, content_type: &str) -> Response {
    match tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
