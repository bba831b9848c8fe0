use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use super::{AppState, ServerError};
use crate::manifest::{MultiRepoDocument, RepoDocument};
use crate::mixer::{self, SpiderTarget};
use crate::source::SourceStatus;
use crate::wallpaper::{self, ImageParams, LOGO_SVG};

pub async fn home() -> &'static str {
    "Hello, TVBox MixProxy!"
}

pub async fn logo() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], LOGO_SVG)
}

pub async fn wallpaper(
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ServerError> {
    let params = ImageParams::from_query(&query);
    let png = tokio::task::spawn_blocking(move || wallpaper::encode_png(wallpaper::generate(&params)))
        .await
        .map_err(|e| ServerError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| {
            ServerError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("encoding wallpaper: {e}"),
            )
        })?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

pub async fn repo(State(state): State<AppState>) -> Result<Json<RepoDocument>, ServerError> {
    if state.settings.single_repo_opt.disable {
        return Err(ServerError::new(
            StatusCode::NOT_IMPLEMENTED,
            "single repo is disabled",
        ));
    }
    let doc = mixer::mix_single_repository(&state.settings, &state.cache).await?;
    Ok(Json(doc))
}

pub async fn multi_repo(
    State(state): State<AppState>,
) -> Result<Json<MultiRepoDocument>, ServerError> {
    if state.settings.multi_repo_opt.disable {
        return Err(ServerError::new(
            StatusCode::NOT_IMPLEMENTED,
            "multi repo is disabled",
        ));
    }
    let doc = mixer::mix_multi_repository(&state.settings, &state.cache).await?;
    Ok(Json(doc))
}

pub async fn spider(State(state): State<AppState>) -> Result<Response, ServerError> {
    match mixer::resolve_spider(&state.settings, &state.cache).await? {
        SpiderTarget::None => Err(ServerError::new(
            StatusCode::NOT_FOUND,
            "no spider configured",
        )),
        SpiderTarget::File(path) => {
            let body = tokio::fs::read(&path).await.map_err(|e| {
                ServerError::new(
                    StatusCode::NOT_FOUND,
                    format!("reading spider {}: {e}", path.display()),
                )
            })?;
            Ok(([(header::CONTENT_TYPE, "application/java-archive")], body).into_response())
        }
        SpiderTarget::Remote(url) => forward(&state.client, &url).await,
    }
}

pub async fn sources(State(state): State<AppState>) -> Json<Vec<SourceStatus>> {
    Json(state.cache.status().await)
}

/// Fetch `url` and relay its body and content type.
async fn forward(client: &reqwest::Client, url: &str) -> Result<Response, ServerError> {
    debug!(%url, "forwarding spider request");
    let bad_gateway =
        |e: reqwest::Error| ServerError::new(StatusCode::BAD_GATEWAY, format!("spider {url}: {e}"));

    let upstream = client.get(url).send().await.map_err(bad_gateway)?;
    let status = upstream.status();
    if !status.is_success() {
        return Err(ServerError::new(
            StatusCode::BAD_GATEWAY,
            format!("spider {url} returned {status}"),
        ));
    }
    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    let body = upstream.bytes().await.map_err(bad_gateway)?;

    let mut response = body.into_response();
    if let Some(content_type) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}
