//! Creating the named post index before anything reads from or writes into it.

use crate::error::IndexError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display};
use tracing::{debug, info};

pub const DEFAULT_INDEX_NAME: &str = "post";
pub const LOCATION_FIELD: &str = "location";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    GeoPoint,
    Text,
    Timestamp,
}

/// Field name to field type. Two schemas are compatible iff they are equal.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IndexSchema(BTreeMap<String, FieldType>);

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct IndexDefinition {
    pub name: String,
    pub schema: IndexSchema,
}

/// What the backing storage holds for an index after a create-if-absent.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CatalogEntry {
    pub schema: IndexSchema,
    pub created: bool,
}

impl IndexSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.0.insert(name.into(), field_type);
        self
    }

    /// The schema every post index is created with.
    #[must_use]
    pub fn posts() -> Self {
        Self::new()
            .with_field(LOCATION_FIELD, FieldType::GeoPoint)
            .with_field("user", FieldType::Text)
            .with_field("message", FieldType::Text)
            .with_field("created_at", FieldType::Timestamp)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<FieldType> {
        self.0.get(name).copied()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Display for IndexSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        f.write_str("{")?;
        for (name, field_type) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name}: {field_type:?}")?;
        }
        f.write_str("}")
    }
}

impl IndexDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, schema: IndexSchema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    #[must_use]
    pub fn posts(name: impl Into<String>) -> Self {
        Self::new(name, IndexSchema::posts())
    }

    fn schema_conflict(&self, existing: &IndexSchema) -> IndexError {
        IndexError::SchemaConflict {
            name: self.name.clone(),
            existing: existing.to_string(),
            requested: self.schema.to_string(),
        }
    }
}

/// The backing storage side of index creation.
///
/// Implementations must make `create_index_if_absent` atomic across processes:
/// concurrent calls for the same name create the index at most once and all
/// of them report the schema that ended up stored.
#[async_trait]
pub trait IndexCatalog: Send + Sync {
    async fn create_index_if_absent(
        &self,
        definition: &IndexDefinition,
    ) -> Result<CatalogEntry, IndexError>;
}

/// Makes sure `definition` exists in `catalog`. Calling it again is a no-op.
pub async fn ensure_index(
    catalog: &dyn IndexCatalog,
    definition: &IndexDefinition,
) -> Result<(), IndexError> {
    if definition.name.trim().is_empty() {
        return Err(IndexError::InvalidName);
    }
    if definition.schema.field(LOCATION_FIELD) != Some(FieldType::GeoPoint) {
        return Err(definition.schema_conflict(&IndexSchema::posts()));
    }

    let entry = catalog.create_index_if_absent(definition).await?;

    if entry.schema != definition.schema {
        return Err(definition.schema_conflict(&entry.schema));
    }

    if entry.created {
        info!(index = %definition.name, schema = %definition.schema, "Created index");
    } else {
        debug!(index = %definition.name, "Index already exists");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        error::IndexError,
        lifecycle::{FieldType, IndexCatalog, IndexDefinition, IndexSchema, ensure_index},
        memory::MemoryStore,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn ensure_twice_is_a_noop() {
        let store = MemoryStore::new("post");
        let definition = IndexDefinition::posts("post");

        ensure_index(&store, &definition).await.unwrap();
        ensure_index(&store, &definition).await.unwrap();

        assert_eq!(store.index_names().unwrap(), vec!["post".to_owned()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ensures_create_once() {
        let store = Arc::new(MemoryStore::new("post"));
        let definition = Arc::new(IndexDefinition::posts("post"));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let definition = Arc::clone(&definition);
                tokio::spawn(async move {
                    let entry = store.create_index_if_absent(&definition).await.unwrap();
                    ensure_index(store.as_ref(), &definition).await.unwrap();
                    entry
                })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            let entry = task.await.unwrap();
            assert_eq!(entry.schema, definition.schema);
            if entry.created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.index_names().unwrap(), vec!["post".to_owned()]);
    }

    #[tokio::test]
    async fn conflicting_schema_is_rejected() {
        let store = MemoryStore::new("post");
        ensure_index(&store, &IndexDefinition::posts("post"))
            .await
            .unwrap();

        let other = IndexDefinition::new(
            "post",
            IndexSchema::new().with_field("location", FieldType::GeoPoint),
        );
        let err = ensure_index(&store, &other).await.unwrap_err();

        assert!(matches!(err, IndexError::SchemaConflict { name, .. } if name == "post"));
    }

    #[tokio::test]
    async fn invalid_definitions() {
        let store = MemoryStore::new("post");

        let err = ensure_index(&store, &IndexDefinition::posts(""))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidName));

        let without_location =
            IndexDefinition::new("post", IndexSchema::new().with_field("user", FieldType::Text));
        let err = ensure_index(&store, &without_location).await.unwrap_err();
        assert!(matches!(err, IndexError::SchemaConflict { .. }));

        assert!(store.index_names().unwrap().is_empty());
    }

    #[test]
    fn schema_json() {
        let json = IndexSchema::new()
            .with_field("location", FieldType::GeoPoint)
            .with_field("message", FieldType::Text)
            .to_json()
            .unwrap();

        assert_eq!(json, r#"{"location":"geo_point","message":"text"}"#);
    }
}
