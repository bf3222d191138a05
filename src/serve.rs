//! HTTP server exposing a detection session
//!
//! `dbspy serve [FILE]` → starts a local JSON API that a front end can call
//! instead of linking the library. One server is one session: `retry`,
//! `clear` and `current` act on the most recent detection.

use crate::config::DetectorConfig;
use crate::db::Database;
use crate::detector::Detector;
use crate::pipeline::Classifier;
use crate::probe::{ProbeRequest, ProbeResponse, Prober, SqliteProber, PROBE_COMMAND};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failure(error: impl ToString) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct PathParams {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Serialize)]
struct CacheStats {
    entries: usize,
    ttl_secs: u64,
}

struct ServerState {
    runtime: tokio::runtime::Runtime,
    detector: Arc<Detector<SqliteProber>>,
    default_path: String,
}

/// Start server and answer requests until the process ends
pub fn start(port: u16, default_path: Option<String>, config: DetectorConfig) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&addr).map_err(|e| std::io::Error::other(e.to_string()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let detector = Arc::new(Detector::native(config));
    let _sweeper = {
        let _enter = runtime.enter();
        detector.spawn_sweeper()
    };

    let state = ServerState {
        runtime,
        detector,
        default_path: default_path.unwrap_or_default(),
    };

    eprintln!("\n\x1b[1;32mdbspy\x1b[0m");
    eprintln!("   http://localhost:{}", port);
    if !state.default_path.is_empty() {
        eprintln!("   Default file: {}\n", state.default_path);
        if let Some(result) = state.runtime.block_on(state.detector.detect(&state.default_path)) {
            eprintln!("   [{}] {}", result.status, result.file_name());
        }
    }
    tracing::info!(%addr, "serving detection API");

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(request, &state) {
            tracing::warn!(error = %e, "request failed");
        }
    }

    Ok(())
}

fn json_header() -> Header {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("static header is valid")
}

fn respond_json<T: Serialize>(request: Request, status: u16, body: &T) -> std::io::Result<()> {
    let json = serde_json::to_string(body)?;
    let response = Response::from_string(json)
        .with_status_code(status)
        .with_header(json_header());
    request.respond(response)
}

fn handle_request(mut request: Request, state: &ServerState) -> std::io::Result<()> {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/");
    let method = request.method().clone();
    tracing::debug!(%method, %path, "request");

    match (&method, path) {
        // API: Detect
        (&Method::Get, "/api/detect") | (&Method::Post, "/api/detect") => {
            let params = parse_params(&mut request, &state.default_path)?;
            match state.runtime.block_on(state.detector.detect(&params.path)) {
                Some(result) => respond_json(request, 200, &ApiResponse::success(result)),
                None => respond_json(request, 400, &ApiResponse::failure("no file path given")),
            }
        }

        // API: Open-probe, same request/response shape as the native command
        (&Method::Post, p) if p.strip_prefix("/api/") == Some(PROBE_COMMAND) => {
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body)?;
            let classifier = state.detector.classifier();
            match state.runtime.block_on(answer_probe(classifier, &body)) {
                Ok(response) => respond_json(request, 200, &response),
                Err((status, e)) => respond_json(request, status, &ApiResponse::failure(e)),
            }
        }

        // API: Session
        (&Method::Post, "/api/retry") => {
            let result = state.runtime.block_on(state.detector.retry());
            respond_json(request, 200, &ApiResponse::success(result))
        }

        (&Method::Post, "/api/clear") => {
            state.detector.clear_result();
            respond_json(request, 200, &ApiResponse::success(()))
        }

        (&Method::Get, "/api/current") => {
            let current = state.detector.current();
            respond_json(request, 200, &ApiResponse::success(current))
        }

        (&Method::Get, "/api/cache") => {
            let cache = state.detector.cache();
            let stats = CacheStats {
                entries: cache.len(),
                ttl_secs: cache.ttl().as_secs(),
            };
            respond_json(request, 200, &ApiResponse::success(stats))
        }

        // API: Schema
        (&Method::Get, "/api/tables") => {
            let params = parse_params(&mut request, &state.default_path)?;
            let tables = open_unencrypted(state, &params.path)
                .and_then(|db| db.table_names().map_err(|e| e.to_string()));
            match tables {
                Ok(tables) => respond_json(request, 200, &ApiResponse::success(tables)),
                Err(e) => respond_json(request, 422, &ApiResponse::failure(e)),
            }
        }

        (&Method::Get, "/api/table") => {
            let params = parse_params(&mut request, &state.default_path)?;
            let Some(table) = params.table.clone() else {
                return respond_json(request, 400, &ApiResponse::failure("missing table parameter"));
            };
            let info = open_unencrypted(state, &params.path)
                .and_then(|db| db.table_info(&table).map_err(|e| e.to_string()));
            match info {
                Ok(info) => respond_json(request, 200, &ApiResponse::success(info)),
                Err(e) => respond_json(request, 422, &ApiResponse::failure(e)),
            }
        }

        // 404
        _ => {
            let response = Response::from_string("Not found").with_status_code(404);
            request.respond(response)
        }
    }
}

/// Answer a probe body. The engine call is bounded by the probe timeout;
/// errors carry the HTTP status to reply with.
async fn answer_probe<P: Prober>(
    classifier: &Classifier<P>,
    body: &str,
) -> Result<ProbeResponse, (u16, String)> {
    let probe: ProbeRequest = serde_json::from_str(body).map_err(|e| (400, e.to_string()))?;
    match classifier.bounded_probe(&probe.path).await {
        Ok(can_open) => Ok(ProbeResponse { can_open }),
        Err(e) => {
            tracing::warn!(path = %probe.path, error = %e, "probe request failed");
            Err((503, e.to_string()))
        }
    }
}

/// Detect first; only a file that opens cleanly is handed to the inspector.
fn open_unencrypted(state: &ServerState, path: &str) -> Result<Database, String> {
    let result = state
        .runtime
        .block_on(state.detector.detect(path))
        .ok_or_else(|| "no file path given".to_string())?;
    result.ensure_unencrypted()?;
    Database::open_at(path).map_err(|e| e.to_string())
}

fn parse_params(request: &mut Request, default_path: &str) -> std::io::Result<PathParams> {
    let url = request.url().to_string();

    // Try query string
    if let Some(query) = url.split('?').nth(1) {
        if let Ok(params) = serde_urlencoded::from_str::<PathParams>(query) {
            if !params.path.is_empty() {
                return Ok(params);
            }
        }
    }

    // Try JSON body
    let mut body = String::new();
    request.as_reader().read_to_string(&mut body)?;
    if !body.is_empty() {
        if let Ok(params) = serde_json::from_str::<PathParams>(&body) {
            if !params.path.is_empty() {
                return Ok(params);
            }
        }
    }

    // Fall back to default path
    Ok(PathParams {
        path: default_path.to_string(),
        table: None,
    })
}
