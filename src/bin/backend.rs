#![forbid(unsafe_code)]

//! Axum backend that proxies search and playback to the upstream platform.
//!
//! Search requests shell out to yt-dlp and are normalized into a stable JSON
//! shape; playback is served either as an embedded-player HTML document or,
//! for files already downloaded into the videos directory, as a range-aware
//! stream that disappears after a fixed lifetime.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use vidgate_tools::config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config};
use vidgate_tools::search::{self, SearchResponse};
use vidgate_tools::security::ensure_not_root;
use vidgate_tools::store::ExpiringStore;
use vidgate_tools::streaming::{self, StreamError};

#[derive(Debug, Clone)]
struct BackendArgs {
    config: RuntimeConfig,
    listen_host: IpAddr,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut videos_root_override: Option<PathBuf> = None;
        let mut www_root_override: Option<PathBuf> = None;
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<String> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--videos-root=") {
                videos_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--www-root=") {
                www_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(value.to_string());
                continue;
            }

            match arg.as_str() {
                "--videos-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--videos-root requires a value"))?;
                    videos_root_override = Some(PathBuf::from(value));
                }
                "--www-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--www-root requires a value"))?;
                    www_root_override = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(value);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let config = resolve_runtime_config(RuntimeOverrides {
            videos_root: videos_root_override,
            www_root: www_root_override,
            port: port_override,
            host: host_override,
            ..RuntimeOverrides::default()
        })?;
        let listen_host = parse_host_arg(&config.host)?;

        Ok(Self {
            config,
            listen_host,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/VIDGATE_HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    ytdlp_bin: Arc<str>,
    search_timeout: std::time::Duration,
    store: ExpiringStore,
    www_root: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct SearchRequest {
    query: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    ensure_not_root("backend")?;

    let BackendArgs {
        config,
        listen_host,
    } = BackendArgs::parse()?;

    let store = ExpiringStore::new(config.videos_root.clone(), config.video_lifetime)
        .context("initializing video store")?;

    let state = AppState {
        ytdlp_bin: Arc::from(config.ytdlp_bin.as_str()),
        search_timeout: config.search_timeout,
        store,
        www_root: Arc::new(config.www_root.clone()),
    };

    let app = router(state);

    let addr = SocketAddr::new(listen_host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!("proxy server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running proxy server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    // The frontend may be served from another origin during development, so
    // the API stays wide open.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", post(search))
        .route("/api/video-info/{id}", get(video_info))
        .route("/api/embed/{id}", get(embed_player))
        .route("/api/stream/{id}", get(stream_player))
        .route("/api/videos/{file}", get(stream_stored_video))
        .route("/health", get(health))
        .fallback(static_fallback)
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    // An install failure here only costs graceful shutdown; the process
    // still dies on the signal itself.
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!(%err, "failed to install Ctrl+C handler");
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Text search proxied through yt-dlp. Always responds 200 with a results
/// array; a failed tool invocation degrades to an empty list plus an
/// `error` string. The one caller mistake worth a 400 is a missing query.
async fn search(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let query = payload.query.unwrap_or_default();
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::bad_request("Query required"));
    }

    tracing::info!(%query, "searching");
    let outcome = search::search_videos(&state.ytdlp_bin, query, state.search_timeout).await;
    if let Err(err) = &outcome {
        tracing::warn!(%query, %err, "search degraded to empty results");
    }

    let response = search::degrade_to_response(query, outcome);
    tracing::info!(%query, results = response.results.len(), "search finished");
    Ok(Json(response))
}

/// Placeholder metadata the frontend shows while the player loads; the real
/// details come from the embedded player itself.
async fn video_info(AxumPath(id): AxumPath<String>) -> ApiResult<Json<serde_json::Value>> {
    ensure_valid_video_id(&id)?;
    Ok(Json(serde_json::json!({
        "videoId": id,
        "title": "Video",
        "description": "Loading...",
        "duration": 0,
        "uploader": "Unknown",
        "thumbnail": format!("https://i.ytimg.com/vi/{id}/mqdefault.jpg"),
        "viewCount": 0,
    })))
}

async fn embed_player(AxumPath(id): AxumPath<String>) -> ApiResult<Html<String>> {
    ensure_valid_video_id(&id)?;
    Ok(Html(embed_document(&id, false)))
}

async fn stream_player(AxumPath(id): AxumPath<String>) -> ApiResult<Html<String>> {
    ensure_valid_video_id(&id)?;
    tracing::info!(video_id = %id, "serving embedded player");
    Ok(Html(embed_document(&id, true)))
}

/// Serves a previously downloaded file from the expiring store with full
/// byte-range support, so the browser can scrub. The file may be deleted by
/// its cleanup timer while a stream is mid-read; the client sees a short
/// body and retries, the server keeps running.
async fn stream_stored_video(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = state
        .store
        .path_for(&file)
        .ok_or_else(|| ApiError::not_found("file not found"))?;

    let range = match headers.get(header::RANGE) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| ApiError::bad_request("malformed range header"))?,
        ),
        None => None,
    };

    streaming::stream_video(&path, range)
        .await
        .map_err(|err| match err {
            StreamError::NotFound => ApiError::not_found("file not found"),
            StreamError::MalformedRange(_) => ApiError::bad_request(err.to_string()),
        })
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => serve_static_file(root.join("index.html")).await,
        Ok(_) => serve_static_file(target).await,
        Err(_) => {
            if should_fallback_to_index(request_path) {
                serve_static_file(root.join("index.html")).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// SPA routes have no extension; asset requests do. Only the former fall
/// back to index.html.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return true;
    }
    Path::new(trimmed).extension().is_none()
}

async fn serve_static_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// Upstream video ids are URL-safe tokens. Anything else is rejected before
/// it can reach a path join or an HTML template.
fn ensure_valid_video_id(id: &str) -> ApiResult<()> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::not_found("video not found"))
    }
}

/// Minimal full-viewport page wrapping the platform's own player with
/// autoplay on. The `modest` variant strips upstream branding and widens
/// the feature-policy allow list for the main watch page.
fn embed_document(video_id: &str, modest: bool) -> String {
    let (params, allow, extra) = if modest {
        (
            "autoplay=1&controls=1&rel=0&modestbranding=1",
            "accelerometer; autoplay; clipboard-write; encrypted-media; gyroscope; picture-in-picture; web-share",
            " loading=\"lazy\"",
        )
    } else {
        ("autoplay=1&controls=1&rel=0", "autoplay; fullscreen", "")
    };

    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <style>*{{margin:0;padding:0;overflow:hidden}}html,body{{height:100%}}iframe{{height:100%;width:100%;border:none}}</style>\n\
         </head>\n\
         <body>\n\
         <iframe src=\"https://www.youtube.com/embed/{video_id}?{params}\" frameborder=\"0\" allowfullscreen allow=\"{allow}\"{extra}></iframe>\n\
         </body>\n\
         </html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    struct BackendTestContext {
        _temp: TempDir,
        state: AppState,
    }

    impl BackendTestContext {
        fn new() -> Self {
            let temp = tempdir().unwrap();
            let www_root = temp.path().join("www");
            std::fs::create_dir_all(&www_root).unwrap();
            let store =
                ExpiringStore::new(temp.path().join("videos"), Duration::from_secs(3600)).unwrap();

            Self {
                state: AppState {
                    // A binary that cannot exist, so search exercises the
                    // degraded path without touching the network.
                    ytdlp_bin: Arc::from("vidgate-test-missing-ytdlp"),
                    search_timeout: Duration::from_secs(5),
                    store,
                    www_root: Arc::new(www_root),
                },
                _temp: temp,
            }
        }
    }

    async fn body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn backend_args_apply_cli_overrides() {
        let args = BackendArgs::from_iter(
            [
                "--videos-root",
                "/custom/videos",
                "--www-root=/custom/www",
                "--port",
                "9000",
                "--host=0.0.0.0",
            ]
            .map(str::to_string),
        )
        .unwrap();
        assert_eq!(args.config.videos_root, PathBuf::from("/custom/videos"));
        assert_eq!(args.config.www_root, PathBuf::from("/custom/www"));
        assert_eq!(args.config.port, 9000);
        assert_eq!(args.listen_host, "0.0.0.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn backend_args_reject_unknown_flags() {
        let err = BackendArgs::from_iter(["--frobnicate".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown argument"));
    }

    #[test]
    fn backend_args_reject_bad_port() {
        let err = BackendArgs::from_iter(["--port=seventy".to_string()]).unwrap_err();
        assert!(err.to_string().contains("numeric port"));
    }

    #[tokio::test]
    async fn search_requires_a_query() {
        let ctx = BackendTestContext::new();
        for query in [None, Some(String::new()), Some("   ".to_string())] {
            let err = search(State(ctx.state.clone()), Json(SearchRequest { query }))
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.message, "Query required");
        }
    }

    #[tokio::test]
    async fn search_failure_degrades_to_empty_results() {
        let ctx = BackendTestContext::new();
        let Json(response) = search(
            State(ctx.state.clone()),
            Json(SearchRequest {
                query: Some("cats".into()),
            }),
        )
        .await
        .unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.query, "cats");
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn video_info_returns_placeholder_shape() {
        let Json(info) = video_info(AxumPath("dQw4w9WgXcQ".to_string()))
            .await
            .unwrap();
        assert_eq!(info["videoId"], "dQw4w9WgXcQ");
        assert_eq!(
            info["thumbnail"],
            "https://i.ytimg.com/vi/dQw4w9WgXcQ/mqdefault.jpg"
        );
        assert_eq!(info["viewCount"], 0);
    }

    #[tokio::test]
    async fn embed_document_wraps_the_platform_player() {
        let Html(page) = embed_player(AxumPath("abc-DEF_123".to_string()))
            .await
            .unwrap();
        assert!(page.contains("https://www.youtube.com/embed/abc-DEF_123?autoplay=1"));
        assert!(page.contains("<iframe"));
        assert!(!page.contains("modestbranding"));

        let Html(page) = stream_player(AxumPath("abc-DEF_123".to_string()))
            .await
            .unwrap();
        assert!(page.contains("modestbranding=1"));
        assert!(page.contains("loading=\"lazy\""));
    }

    #[tokio::test]
    async fn player_endpoints_reject_suspicious_ids() {
        for id in ["", "<script>", "id with spaces", "a.b"] {
            let err = stream_player(AxumPath(id.to_string())).await.unwrap_err();
            assert_eq!(err.status, StatusCode::NOT_FOUND, "id {id:?} accepted");
        }
    }

    #[tokio::test]
    async fn stored_video_supports_ranges() {
        let ctx = BackendTestContext::new();
        let path = ctx.state.store.register("clip.mp4").unwrap();
        std::fs::write(&path, (0u8..100).collect::<Vec<_>>()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=10-19".parse().unwrap());
        let response = stream_stored_video(
            State(ctx.state.clone()),
            AxumPath("clip.mp4".to_string()),
            headers,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 10-19/100"
        );

        let response = stream_stored_video(
            State(ctx.state.clone()),
            AxumPath("clip.mp4".to_string()),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp4"
        );
    }

    #[tokio::test]
    async fn stored_video_rejects_malformed_ranges() {
        let ctx = BackendTestContext::new();
        let path = ctx.state.store.register("clip.mp4").unwrap();
        std::fs::write(&path, b"0123456789").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=oops-".parse().unwrap());
        let err = stream_stored_video(
            State(ctx.state.clone()),
            AxumPath("clip.mp4".to_string()),
            headers,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stored_video_missing_or_unsafe_is_not_found() {
        let ctx = BackendTestContext::new();
        for file in ["ghost.mp4", "../escape.mp4"] {
            let err = stream_stored_video(
                State(ctx.state.clone()),
                AxumPath(file.to_string()),
                HeaderMap::new(),
            )
            .await
            .unwrap_err();
            assert_eq!(err.status, StatusCode::NOT_FOUND, "file {file:?}");
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn www_paths_resolve_and_fall_back() {
        let ctx = BackendTestContext::new();
        std::fs::write(ctx.state.www_root.join("index.html"), "<html>home</html>").unwrap();
        std::fs::write(ctx.state.www_root.join("app.js"), "console.log(1)").unwrap();

        // Exact asset hit.
        let response = serve_www_path(&ctx.state.www_root, "/app.js")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // SPA route falls back to index.html.
        let response = serve_www_path(&ctx.state.www_root, "/watch/abc")
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"<html>home</html>");

        // Missing asset with an extension is a plain 404.
        let err = serve_www_path(&ctx.state.www_root, "/missing.css")
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        // Traversal is refused outright.
        let err = serve_www_path(&ctx.state.www_root, "/../secret")
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_error_serializes_json() {
        let response = ApiError::not_found("missing").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let parsed = body_json(response).await;
        assert_eq!(parsed["error"], "missing");
    }
}
