use crate::server::{Result, ServerError, ServerRouter, json::Json, query::Query};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Deserializer, de::Error as _};
use std::sync::Arc;
use umkreis_common::model::{location::Location, post::PostContent};
use umkreis_db::engine::PostEngine;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(search)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/search", rejection(ServerError))]
struct SearchPath();

#[derive(Copy, Clone, PartialEq, Debug, Deserialize)]
struct SearchParams {
    lat: f64,
    lon: f64,
    /// Kilometers. Absent and empty both mean the default radius.
    #[serde(default, deserialize_with = "empty_as_none")]
    range: Option<f64>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(D::Error::custom),
    }
}

/// Posts around `lat`/`lon`, closest first, without their ids.
async fn search(
    SearchPath(): SearchPath,
    State(engine): State<Arc<PostEngine>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<PostContent>>> {
    let center = Location {
        lat: params.lat,
        lon: params.lon,
    };
    let radius_meters = params.range.map(|kilometers| kilometers * 1000.0);

    let posts = engine.search_nearby(center, radius_meters).await?;

    Ok(Json(posts.into_iter().map(|post| post.content).collect()))
}
