use crate::{
    error::{BackendError, IndexError, StoreError},
    lifecycle::{CatalogEntry, IndexCatalog, IndexDefinition, IndexSchema},
    spatial::{GridIndex, SpatialEntry, SpatialIndex},
    store::{PostStore, Result},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    num::NonZeroU16,
    sync::{Mutex, PoisonError, RwLock},
};
use umkreis_common::{
    model::{
        UmkreisSnowflakeGenerator,
        location::Location,
        post::{Post, PostContent, PostId},
    },
    snowflake::{ProcessId, WorkerId},
};

#[derive(Debug)]
struct MemoryIndex {
    schema: IndexSchema,
    posts: HashMap<PostId, Post>,
    spatial: GridIndex,
}

/// Keeps every index, with a [`GridIndex`] per index, in process memory.
/// Nothing survives a restart, so this is meant for tests and local development.
#[derive(Debug)]
pub struct MemoryStore {
    index_name: String,
    cells_per_degree: NonZeroU16,
    indexes: RwLock<HashMap<String, MemoryIndex>>,
    snowflake_generator: Mutex<UmkreisSnowflakeGenerator>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(index_name: impl Into<String>) -> Self {
        Self::with_ids(index_name, WorkerId::default(), ProcessId::default())
    }

    #[must_use]
    pub fn with_ids(index_name: impl Into<String>, worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            index_name: index_name.into(),
            cells_per_degree: GridIndex::DEFAULT_CELLS_PER_DEGREE,
            indexes: RwLock::default(),
            snowflake_generator: Mutex::new(UmkreisSnowflakeGenerator::new(
                worker_id, process_id,
            )),
        }
    }

    /// Grid resolution of the indexes this store creates from now on.
    #[must_use]
    pub fn with_cells_per_degree(mut self, cells_per_degree: NonZeroU16) -> Self {
        self.cells_per_degree = cells_per_degree;
        self
    }

    pub fn index_names(&self) -> Result<Vec<String>> {
        let indexes = self.indexes.read().map_err(|_| BackendError::Poisoned)?;
        let mut names: Vec<_> = indexes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn lookup(&self, id: PostId) -> Result<Post> {
        let indexes = self.indexes.read().map_err(|_| BackendError::Poisoned)?;
        let index = indexes
            .get(&self.index_name)
            .ok_or_else(|| StoreError::NotReady(self.index_name.clone()))?;

        index.posts.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn with_grid<T>(
        &self,
        f: impl FnOnce(&GridIndex) -> Result<T, IndexError>,
    ) -> Result<T, IndexError> {
        let indexes = self.indexes.read().map_err(|_| BackendError::Poisoned)?;
        let index = indexes.get(&self.index_name).ok_or(IndexError::NotReady)?;

        f(&index.spatial)
    }
}

#[async_trait]
impl IndexCatalog for MemoryStore {
    async fn create_index_if_absent(
        &self,
        definition: &IndexDefinition,
    ) -> Result<CatalogEntry, IndexError> {
        let mut indexes = self.indexes.write().map_err(|_| BackendError::Poisoned)?;

        let mut created = false;
        let index = indexes.entry(definition.name.clone()).or_insert_with(|| {
            created = true;
            let spatial = GridIndex::new(self.cells_per_degree);
            spatial.activate();

            MemoryIndex {
                schema: definition.schema.clone(),
                posts: HashMap::new(),
                spatial,
            }
        });

        Ok(CatalogEntry {
            schema: index.schema.clone(),
            created,
        })
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn put(&self, content: PostContent) -> Result<Post> {
        let mut indexes = self.indexes.write().map_err(|_| BackendError::Poisoned)?;
        let index = indexes
            .get_mut(&self.index_name)
            .ok_or_else(|| StoreError::NotReady(self.index_name.clone()))?;

        // A panic while holding the generator cannot leave it half-updated.
        let snowflake = self
            .snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
            .map_err(BackendError::from)?;

        let id = PostId::new(snowflake);
        let post = Post {
            id,
            content,
            created_at: id.created_at(),
        };
        index.posts.insert(id, post.clone());

        Ok(post)
    }

    async fn get(&self, id: PostId) -> Result<Post> {
        self.lookup(id)
    }

    async fn get_many(&self, ids: &[PostId]) -> Vec<Result<Post>> {
        ids.iter().map(|&id| self.lookup(id)).collect()
    }

    async fn spatial_entries(&self) -> Result<Vec<SpatialEntry>> {
        let indexes = self.indexes.read().map_err(|_| BackendError::Poisoned)?;
        let index = indexes
            .get(&self.index_name)
            .ok_or_else(|| StoreError::NotReady(self.index_name.clone()))?;

        Ok(index
            .posts
            .values()
            .map(|post| SpatialEntry {
                id: post.id,
                location: post.location(),
            })
            .collect())
    }
}

#[async_trait]
impl SpatialIndex for MemoryStore {
    async fn insert(&self, id: PostId, location: Location) -> Result<(), IndexError> {
        self.with_grid(|grid| grid.insert(id, location))
    }

    async fn query_radius(
        &self,
        center: Location,
        radius_meters: f64,
    ) -> Result<HashSet<PostId>, IndexError> {
        self.with_grid(|grid| grid.query_radius(center, radius_meters))
    }

    async fn restore(&self, entries: Vec<SpatialEntry>) -> Result<(), IndexError> {
        self.with_grid(|grid| grid.restore(entries))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::{IndexError, StoreError},
        lifecycle::{IndexDefinition, ensure_index},
        memory::MemoryStore,
        spatial::SpatialIndex,
        store::PostStore,
    };
    use std::{collections::HashSet, sync::Arc};
    use umkreis_common::model::{
        location::Location,
        post::{PostContent, PostId},
    };

    fn content(message: &str) -> PostContent {
        PostContent {
            user: "1111".to_owned(),
            message: message.to_owned(),
            location: Location::new(48.14, 11.58).unwrap(),
        }
    }

    async fn ready_store() -> MemoryStore {
        let store = MemoryStore::new("post");
        ensure_index(&store, &IndexDefinition::posts("post"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn put_before_ensure_is_rejected() {
        let store = MemoryStore::new("post");

        let err = store.put(content("too early")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady(name) if name == "post"));
    }

    #[tokio::test]
    async fn spatial_before_ensure_is_rejected() {
        let store = MemoryStore::new("post");
        let location = Location::new(48.14, 11.58).unwrap();

        let err = store.insert(PostId::from(1_u64), location).await.unwrap_err();
        assert!(matches!(err, IndexError::NotReady));

        let err = store.query_radius(location, 10.0).await.unwrap_err();
        assert!(matches!(err, IndexError::NotReady));
    }

    #[tokio::test]
    async fn grid_uses_configured_resolution() {
        let store = MemoryStore::new("post")
            .with_cells_per_degree(std::num::NonZeroU16::new(8).unwrap());
        ensure_index(&store, &IndexDefinition::posts("post"))
            .await
            .unwrap();
        let munich = Location::new(48.14, 11.58).unwrap();
        let augsburg = Location::new(48.37, 10.90).unwrap();
        store.insert(PostId::from(1_u64), munich).await.unwrap();
        store.insert(PostId::from(2_u64), augsburg).await.unwrap();

        assert_eq!(
            store.query_radius(munich, 10_000.0).await.unwrap(),
            HashSet::from([PostId::from(1_u64)])
        );
        assert_eq!(
            store.query_radius(munich, 80_000.0).await.unwrap(),
            HashSet::from([PostId::from(1_u64), PostId::from(2_u64)])
        );
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = ready_store().await;

        let post = store.put(content("servus")).await.unwrap();
        let fetched = store.get(post.id).await.unwrap();

        assert_eq!(fetched, post);
        assert_eq!(fetched.content.message, "servus");
        assert_eq!(fetched.created_at, post.id.created_at());
    }

    #[tokio::test]
    async fn get_many_keeps_order_and_marks_missing() {
        let store = ready_store().await;

        let first = store.put(content("first")).await.unwrap();
        let second = store.put(content("second")).await.unwrap();
        let missing = PostId::from(42_u64);

        let results = store.get_many(&[second.id, missing, first.id]).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().id, second.id);
        assert!(matches!(results[1], Err(StoreError::NotFound(id)) if id == missing));
        assert_eq!(results[2].as_ref().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn spatial_entries_cover_every_post() {
        let store = ready_store().await;
        let post = store.put(content("here")).await.unwrap();

        let entries = store.spatial_entries().await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, post.id);
        assert_eq!(entries[0].location, post.location());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_get_distinct_ids() {
        let store = Arc::new(ready_store().await);

        let tasks: Vec<_> = (0..8)
            .map(|task| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut ids = Vec::new();
                    for i in 0..250 {
                        let post = store.put(content(&format!("{task}-{i}"))).await.unwrap();
                        ids.push(post.id);
                    }
                    ids
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 2000);
    }
}
