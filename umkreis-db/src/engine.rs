use crate::{
    error::{OpenError, QueryError, StoreError, WriteError},
    lifecycle::{IndexDefinition, ensure_index},
    planner::QueryPlanner,
    store::Backend,
};
use std::sync::Arc;
use tracing::info;
use umkreis_common::model::{
    location::Location,
    post::{Post, PostContent, PostId},
    radius::Radius,
};

#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct EngineConfig {
    pub default_radius: Radius,
}

/// Write and search entry point. Only obtainable through [`PostEngine::open`],
/// so every engine works on an ensured index.
///
/// The engine keeps no post state of its own: engines opened on the same
/// backend, in one process or several, see each other's posts.
pub struct PostEngine {
    backend: Arc<dyn Backend>,
    default_radius: Radius,
}

impl PostEngine {
    /// Ensures the backend's post index exists and registers every stored post
    /// that is missing a spatial entry, e.g. after a crash between the two writes.
    pub async fn open(backend: Arc<dyn Backend>, config: EngineConfig) -> Result<Self, OpenError> {
        let definition = IndexDefinition::posts(backend.index_name());
        ensure_index(backend.as_ref(), &definition).await?;

        let entries = backend.spatial_entries().await?;
        let posts = entries.len();
        backend.restore(entries).await?;

        info!(index = %definition.name, posts, "Post index ready");

        Ok(Self {
            backend,
            default_radius: config.default_radius,
        })
    }

    /// Stores the post, then registers its location. The post is durable before
    /// it becomes searchable.
    pub async fn create_post(
        &self,
        user: String,
        message: String,
        location: Location,
    ) -> Result<PostId, WriteError> {
        let location = location.validate()?;
        let post = self
            .backend
            .put(PostContent {
                user,
                message,
                location,
            })
            .await?;

        self.backend
            .insert(post.id, location)
            .await
            .map_err(|source| WriteError::Index {
                id: post.id,
                source,
            })?;

        info!(post = %post.id, lat = location.lat, lon = location.lon, "Created post");

        Ok(post.id)
    }

    pub async fn search_nearby(
        &self,
        location: Location,
        radius_meters: Option<f64>,
    ) -> Result<Vec<Post>, QueryError> {
        self.planner().search(location, radius_meters).await
    }

    pub async fn get_post(&self, id: PostId) -> Result<Post, StoreError> {
        self.backend.get(id).await
    }

    #[must_use]
    pub fn default_radius(&self) -> Radius {
        self.default_radius
    }

    fn planner(&self) -> QueryPlanner<'_> {
        QueryPlanner {
            spatial: self.backend.as_ref(),
            store: self.backend.as_ref(),
            default_radius: self.default_radius,
        }
    }
}
