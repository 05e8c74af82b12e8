use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use json::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, warn};
use umkreis_db::{
    engine::PostEngine,
    error::{IndexError, QueryError, StoreError, WriteError},
};

mod json;
mod query;
mod routes;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub engine: Arc<PostEngine>,
}

/// Every route plus the fallback, with the CORS headers browsers need to post
/// from another origin.
pub fn routes() -> ServerRouter {
    routes::routes()
        .fallback(fallback)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type,Authorization"),
        ))
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("Query string rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error(transparent)]
    Search(#[from] QueryError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServerError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::JsonRejection(_)
            | ServerError::QueryRejection(_)
            | ServerError::Search(
                QueryError::InvalidLocation(_) | QueryError::Index(IndexError::InvalidRadius(_)),
            )
            | ServerError::Write(WriteError::InvalidLocation(_)) => StatusCode::BAD_REQUEST,
            ServerError::JsonResponse(_)
            | ServerError::Search(_)
            | ServerError::Write(_)
            | ServerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    status: u16,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            warn!(error = %self, %status, "Rejecting request");
        }

        let error_response = ErrorResponse {
            status: status.as_u16(),
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::server::{ServerRouter, ServerState, routes};
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;
    use umkreis_db::{
        engine::{EngineConfig, PostEngine},
        memory::MemoryStore,
    };

    async fn app() -> axum::Router {
        let engine = PostEngine::open(
            Arc::new(MemoryStore::new("post")),
            EngineConfig::default(),
        )
        .await
        .unwrap();

        let router: ServerRouter = routes();
        router.with_state(ServerState {
            engine: Arc::new(engine),
        })
    }

    async fn send(app: &axum::Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_request(body: &Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/post")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn assert_cors(response: &Response) {
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type,Authorization"
        );
    }

    #[tokio::test]
    async fn post_then_search() {
        let app = app().await;
        let shanghai = json!({
            "user": "1111",
            "message": "Shanghai",
            "location": { "lat": 31.23, "lon": 121.47 },
        });
        let beijing = json!({
            "user": "2222",
            "message": "Beijing",
            "location": { "lat": 39.90, "lon": 116.40 },
        });

        let created = send(&app, post_request(&shanghai)).await;
        assert_eq!(created.status(), StatusCode::OK);
        assert_cors(&created);
        let id = body_json(created).await["id"].as_str().unwrap().to_owned();
        assert!(id.parse::<u64>().is_ok());
        send(&app, post_request(&beijing)).await;

        let near = send(&app, get_request("/search?lat=31.23&lon=121.47")).await;
        assert_eq!(near.status(), StatusCode::OK);
        assert_cors(&near);
        assert_eq!(body_json(near).await, json!([shanghai]));

        let far = send(&app, get_request("/search?lat=31.23&lon=121.47&range=1500")).await;
        assert_eq!(body_json(far).await, json!([shanghai, beijing]));

        let empty_range = send(&app, get_request("/search?lat=31.23&lon=121.47&range=")).await;
        assert_eq!(empty_range.status(), StatusCode::OK);
        assert_eq!(body_json(empty_range).await, json!([shanghai]));
    }

    #[tokio::test]
    async fn get_post_by_id() {
        let app = app().await;
        let content = json!({
            "user": "1111",
            "message": "hello",
            "location": { "lat": 52.52, "lon": 13.40 },
        });

        let created = body_json(send(&app, post_request(&content)).await).await;
        let id = created["id"].as_str().unwrap().to_owned();

        let response = send(&app, get_request(&format!("/posts/{id}"))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let post = body_json(response).await;
        assert_eq!(post["id"], id.as_str());
        assert_eq!(post["user"], "1111");
        assert_eq!(post["message"], "hello");
        assert_eq!(post["location"], content["location"]);
        assert!(post["created_at"].is_i64());
    }

    #[tokio::test]
    async fn unknown_post_is_not_found() {
        let app = app().await;

        let response = send(&app, get_request("/posts/12345")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_cors(&response);
        assert_eq!(body_json(response).await, json!({ "status": 404 }));
    }

    #[tokio::test]
    async fn options_preflight() {
        let app = app().await;
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/post")
            .body(Body::empty())
            .unwrap();

        let response = send(&app, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(&response);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn search_needs_a_center() {
        let app = app().await;

        let missing = send(&app, get_request("/search?lat=31.23")).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(missing).await, json!({ "status": 400 }));

        let garbage = send(&app, get_request("/search?lat=north&lon=121.47")).await;
        assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn out_of_range_input_is_rejected() {
        let app = app().await;

        let center = send(&app, get_request("/search?lat=91&lon=0")).await;
        assert_eq!(center.status(), StatusCode::BAD_REQUEST);

        let range = send(&app, get_request("/search?lat=0&lon=0&range=-1")).await;
        assert_eq!(range.status(), StatusCode::BAD_REQUEST);

        let range = send(&app, get_request("/search?lat=0&lon=0&range=far")).await;
        assert_eq!(range.status(), StatusCode::BAD_REQUEST);

        let post = send(
            &app,
            post_request(&json!({
                "user": "1111",
                "message": "off the map",
                "location": { "lat": 0.0, "lon": 200.0 },
            })),
        )
        .await;
        assert_eq!(post.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let app = app().await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/post")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"user\":"))
            .unwrap();

        let response = send(&app, request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({ "status": 400 }));
    }

    #[tokio::test]
    async fn unknown_route() {
        let app = app().await;

        let response = send(&app, get_request("/nowhere")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_cors(&response);
    }
}
