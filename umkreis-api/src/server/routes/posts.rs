use crate::server::{Result, ServerError, ServerRouter, json::Json};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use time::{UtcDateTime, macros::utc_datetime};
use umkreis_common::model::post::{Post, PostContent, PostId};
use umkreis_db::engine::PostEngine;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_post)
        .typed_options(post_options)
        .typed_get(get_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/post", rejection(ServerError))]
struct CreatePostPath();

/// Ids leave the API as strings: snowflakes exceed the integers a JSON
/// number can carry exactly in JavaScript.
fn id_as_string<S>(id: &PostId, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(id)
}

#[derive(Copy, Clone, Debug, Serialize)]
struct CreatedPost {
    #[serde(serialize_with = "id_as_string")]
    id: PostId,
}

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(engine): State<Arc<PostEngine>>,
    Json(content): Json<PostContent>,
) -> Result<Json<CreatedPost>> {
    let PostContent {
        user,
        message,
        location,
    } = content;
    let id = engine.create_post(user, message, location).await?;

    Ok(Json(CreatedPost { id }))
}

/// Preflight for cross origin posts. The headers come from the router layers.
async fn post_options(CreatePostPath(): CreatePostPath) {}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct GetPostPath {
    id: PostId,
}

const UNIX_EPOCH: UtcDateTime = utc_datetime!(1970-01-01 00:00);

#[derive(Clone, Debug, Serialize)]
struct PostView {
    #[serde(serialize_with = "id_as_string")]
    id: PostId,
    #[serde(flatten)]
    content: PostContent,
    /// Milliseconds since the Unix epoch.
    created_at: i64,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        let millis = (post.created_at - UNIX_EPOCH).whole_milliseconds();

        Self {
            id: post.id,
            content: post.content,
            created_at: i64::try_from(millis).unwrap_or(i64::MAX),
        }
    }
}

async fn get_post(
    GetPostPath { id }: GetPostPath,
    State(engine): State<Arc<PostEngine>>,
) -> Result<Json<PostView>> {
    let post = engine.get_post(id).await?;

    Ok(Json(post.into()))
}
