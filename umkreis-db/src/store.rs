use crate::{
    error::StoreError,
    lifecycle::IndexCatalog,
    spatial::{SpatialEntry, SpatialIndex},
};
use async_trait::async_trait;
use umkreis_common::model::post::{Post, PostContent, PostId};

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Durable mapping from post id to post, bound to one named index.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Name of the index this store reads from and writes into.
    fn index_name(&self) -> &str;

    /// Assigns a fresh id and persists the post. Once this returns `Ok` the post
    /// can be read back, also after a crash.
    async fn put(&self, content: PostContent) -> Result<Post>;

    async fn get(&self, id: PostId) -> Result<Post>;

    /// Looks up every id, keeping the input order. A missing post is a
    /// [`StoreError::NotFound`] at its position and does not fail the others.
    async fn get_many(&self, ids: &[PostId]) -> Vec<Result<Post>>;

    /// Every stored post's coordinate, used to restore spatial entries a crashed
    /// write never registered.
    async fn spatial_entries(&self) -> Result<Vec<SpatialEntry>>;
}

/// A storage backend serving the index catalog, the posts in it and their
/// spatial entries. Every engine opened on the same backend sees the same data.
pub trait Backend: PostStore + IndexCatalog + SpatialIndex {}

impl<T: PostStore + IndexCatalog + SpatialIndex> Backend for T {}
