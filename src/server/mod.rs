//! HTTP front end.
//!
//! | Route              | Serves                                  |
//! |--------------------|-----------------------------------------|
//! | `/`                | greeting                                |
//! | `/logo`            | placeholder SVG logo                    |
//! | `/wallpaper`       | generated PNG wallpaper                 |
//! | `/v1/repo`         | mixed single-repo document              |
//! | `/v1/multi_repo`   | mixed multi-repo index                  |
//! | `/v1/spider`       | the configured spider jar               |
//! | `/v1/sources`      | cache status of every source            |

mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use error::ServerError;

use crate::config::Settings;
use crate::mixer;
use crate::source::SourceCache;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub cache: Arc<SourceCache>,
    /// Client used to forward spider downloads.
    pub client: reqwest::Client,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::home))
        .route("/logo", get(routes::logo))
        .route("/wallpaper", get(routes::wallpaper))
        .route("/v1/repo", get(routes::repo))
        .route("/v1/multi_repo", get(routes::multi_repo))
        .route("/v1/spider", get(routes::spider))
        .route("/v1/sources", get(routes::sources))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Warm the cache, then serve until Ctrl-C.  The cache's refresh loop is
/// stopped once the server has drained.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    if let Err(e) = warm_up(&state).await {
        state.cache.shutdown();
        return Err(e);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.server_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, external_url = %state.settings.external_url(), "listening");

    let cache = Arc::clone(&state.cache);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    cache.shutdown();
    Ok(())
}

/// Mix every enabled document once, so that each referenced source is
/// fetched and a broken configuration is caught before the first client asks.
async fn warm_up(state: &AppState) -> anyhow::Result<()> {
    let settings = &state.settings;
    if !settings.single_repo_opt.disable {
        mixer::mix_single_repository(settings, &state.cache)
            .await
            .context("initial single repo mix")?;
    }
    if !settings.multi_repo_opt.disable {
        mixer::mix_multi_repository(settings, &state.cache)
            .await
            .context("initial multi repo mix")?;
    }
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{MixArraySpec, MixFieldSpec};
    use crate::source::testing::StaticLoader;
    use crate::source::{CachePolicy, SourceDescriptor, SourceKind};

    const MAIN: &str = "https://host/dir/main.json";
    const INDEX: &str = "https://host/index.json";

    fn state_with(settings: Settings, loader: StaticLoader) -> AppState {
        let cache = SourceCache::new(
            [
                SourceDescriptor::new("main", MAIN, SourceKind::Single, 0),
                SourceDescriptor::new("index", INDEX, SourceKind::Multi, 0),
            ],
            Arc::new(loader),
            CachePolicy::default(),
        );
        AppState {
            settings: Arc::new(settings),
            cache: Arc::new(cache),
            client: reqwest::Client::new(),
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings {
            external_url: "http://mix.local".into(),
            ..Settings::default()
        };
        settings.single_repo_opt.sites = MixArraySpec::new("main", "sites");
        settings.multi_repo_opt.include_single_repo = true;
        settings.multi_repo_opt.repos = vec![MixArraySpec::new("index", "urls")];
        settings.apply_defaults();
        settings
    }

    fn loader() -> StaticLoader {
        StaticLoader::new()
            .serve(MAIN, r#"{"sites":[{"key":"a","api":"./a.js"}]}"#)
            .serve(INDEX, r#"{"urls":[{"url":"./one.json","name":"one"}]}"#)
    }

    async fn fetch(state: AppState, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, body.to_vec())
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn serves_home_and_logo() {
        let (status, _, body) = fetch(state_with(settings(), loader()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("MixProxy"));

        let (status, content_type, body) = fetch(state_with(settings(), loader()), "/logo").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("image/svg+xml"));
        assert!(body.starts_with(b"<svg"));
    }

    #[tokio::test]
    async fn serves_png_wallpaper() {
        let (status, content_type, body) = fetch(
            state_with(settings(), loader()),
            "/wallpaper?width=16&height=8&bg_color=333333&border_width=1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("image/png"));
        assert_eq!(&body[..4], b"\x89PNG");
    }

    #[tokio::test]
    async fn serves_mixed_repo() {
        let (status, content_type, body) = fetch(state_with(settings(), loader()), "/v1/repo").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));

        let doc = json(&body);
        assert_eq!(doc["spider"], "http://mix.local/v1/spider");
        assert_eq!(doc["sites"][0]["key"], "a");
        assert_eq!(doc["sites"][0]["api"], "https://host/dir/a.js");
        assert_eq!(doc["lives"], json!([]));
    }

    #[tokio::test]
    async fn serves_multi_repo_index() {
        let (status, _, body) = fetch(state_with(settings(), loader()), "/v1/multi_repo").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json(&body),
            json!({"urls": [
                {"url": "http://mix.local/v1/repo", "name": "TvBox MixProxy"},
                {"url": "https://host/one.json", "name": "one"}
            ]})
        );
    }

    #[tokio::test]
    async fn disabled_documents_are_not_implemented() {
        let mut settings = settings();
        settings.single_repo_opt.disable = true;
        settings.multi_repo_opt.disable = true;
        let state = state_with(settings, loader());

        let (status, _, body) = fetch(state.clone(), "/v1/repo").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(json(&body)["error"]["code"], "not_implemented");

        let (status, _, _) = fetch(state, "/v1/multi_repo").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn mix_errors_are_internal_errors_with_text() {
        let (status, _, body) = fetch(state_with(settings(), StaticLoader::new()), "/v1/repo").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let body = json(&body);
        assert_eq!(body["error"]["code"], "internal_error");
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.contains("mixing sites"), "{message}");
    }

    #[tokio::test]
    async fn spider_without_config_is_not_found() {
        let (status, _, _) = fetch(state_with(settings(), loader()), "/v1/spider").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn spider_from_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("spider.jar");
        std::fs::write(&jar, b"PK\x03\x04jar").unwrap();

        let mut settings = settings();
        settings.single_repo_opt.spider =
            MixFieldSpec::new(format!("file://{}", jar.display()), "spider");

        let (status, content_type, body) = fetch(state_with(settings, loader()), "/v1/spider").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/java-archive"));
        assert_eq!(body, b"PK\x03\x04jar");
    }

    #[tokio::test]
    async fn spider_is_forwarded_from_upstream() {
        let upstream = Router::new().route(
            "/spider.jar",
            get(|| async { ([(header::CONTENT_TYPE, "application/octet-stream")], "JAR") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });

        let mut settings = settings();
        settings.single_repo_opt.spider = MixFieldSpec::new("main", "spider");
        let payload = format!(r#"{{"spider":"http://{addr}/spider.jar;md5;0123"}}"#);
        let loader = StaticLoader::new().serve(MAIN, &payload);

        let (status, content_type, body) = fetch(state_with(settings, loader), "/v1/spider").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(body, b"JAR");
    }

    #[tokio::test]
    async fn warm_up_fetches_referenced_sources() {
        let state = state_with(settings(), loader());
        warm_up(&state).await.unwrap();

        let status = state.cache.status().await;
        assert!(status.iter().all(|s| s.last_fetched_at.is_some()));
    }

    #[tokio::test]
    async fn warm_up_fails_on_unreachable_source() {
        let err = warm_up(&state_with(settings(), StaticLoader::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("initial single repo mix"));
    }

    #[tokio::test]
    async fn reports_source_status() {
        let state = state_with(settings(), loader());
        fetch(state.clone(), "/v1/repo").await;

        let (status, _, body) = fetch(state, "/v1/sources").await;
        assert_eq!(status, StatusCode::OK);

        let sources = json(&body);
        assert_eq!(sources[0]["name"], "index");
        assert!(sources[0]["last_fetched_at"].is_null());
        assert_eq!(sources[1]["name"], "main");
        assert_eq!(sources[1]["consecutive_errors"], 0);
        assert!(sources[1]["cached_bytes"].as_u64().unwrap() > 0);
    }
}
