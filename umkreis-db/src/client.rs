//! Postgres backed index catalog and post store.

use crate::{
    error::{BackendError, IndexError, StoreError},
    lifecycle::{CatalogEntry, IndexCatalog, IndexDefinition, IndexSchema},
    record::{PostRecord, SpatialEntryRecord},
    spatial::{RadiusQuery, SpatialEntry, SpatialIndex},
    store::{PostStore, Result},
};
use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions, query, query_as, query_scalar};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};
use time::PrimitiveDateTime;
use tracing::{debug, trace, warn};
use umkreis_common::{
    model::{
        UmkreisSnowflakeGenerator,
        location::Location,
        post::{Post, PostContent, PostId},
    },
    snowflake::{ProcessId, WorkerId},
};

/// Serializes catalog bootstrapping across every process sharing the database.
const CATALOG_LOCK_KEY: i64 = 0x756d_6b72_6569_7300;

const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNDEFINED_TABLE: &str = "42P01";

pub struct DbClient {
    pool: PgPool,
    index_name: String,
    snowflake_generator: Mutex<UmkreisSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(
        pool: PgPool,
        index_name: impl Into<String>,
        worker_id: WorkerId,
        process_id: ProcessId,
    ) -> Self {
        let snowflake_generator =
            Mutex::new(UmkreisSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            index_name: index_name.into(),
            snowflake_generator,
        }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        index_name: impl Into<String>,
        worker_id: WorkerId,
        process_id: ProcessId,
    ) -> Result<Self, IndexError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool, index_name, worker_id, process_id))
    }

    /// Maps "the index or its table is missing" to [`StoreError::NotReady`].
    fn store_error(&self, err: sqlx::Error) -> StoreError {
        if is_missing_index(&err) {
            StoreError::NotReady(self.index_name.clone())
        } else {
            err.into()
        }
    }

    fn index_error(err: sqlx::Error) -> IndexError {
        if is_missing_index(&err) {
            IndexError::NotReady
        } else {
            err.into()
        }
    }
}

fn is_missing_index(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| code == FOREIGN_KEY_VIOLATION || code == UNDEFINED_TABLE)
}

#[async_trait]
impl IndexCatalog for DbClient {
    async fn create_index_if_absent(
        &self,
        definition: &IndexDefinition,
    ) -> Result<CatalogEntry, IndexError> {
        let requested_schema = definition.schema.to_json()?;

        let mut transaction = self.pool.begin().await?;

        query("SELECT pg_advisory_xact_lock($1)")
            .bind(CATALOG_LOCK_KEY)
            .execute(&mut *transaction)
            .await?;

        query("CREATE SCHEMA IF NOT EXISTS umkreis")
            .execute(&mut *transaction)
            .await?;
        query(
            "
            CREATE TABLE IF NOT EXISTS umkreis.indexes (
                index_name TEXT PRIMARY KEY,
                schema TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
            )
            ",
        )
        .execute(&mut *transaction)
        .await?;
        query(
            "
            CREATE TABLE IF NOT EXISTS umkreis.posts (
                index_name TEXT NOT NULL REFERENCES umkreis.indexes (index_name),
                post_snowflake BIGINT NOT NULL,
                user_name TEXT NOT NULL,
                message TEXT NOT NULL,
                lat DOUBLE PRECISION NOT NULL,
                lon DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMP NOT NULL,
                PRIMARY KEY (index_name, post_snowflake)
            )
            ",
        )
        .execute(&mut *transaction)
        .await?;
        query(
            "
            CREATE TABLE IF NOT EXISTS umkreis.spatial_entries (
                index_name TEXT NOT NULL REFERENCES umkreis.indexes (index_name),
                post_snowflake BIGINT NOT NULL,
                lat DOUBLE PRECISION NOT NULL,
                lon DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (index_name, post_snowflake)
            )
            ",
        )
        .execute(&mut *transaction)
        .await?;
        query(
            "
            CREATE INDEX IF NOT EXISTS spatial_entries_location
                ON umkreis.spatial_entries (index_name, lat, lon)
            ",
        )
        .execute(&mut *transaction)
        .await?;

        let inserted = query(
            "
            INSERT INTO umkreis.indexes (index_name, schema)
            VALUES ($1, $2)
            ON CONFLICT (index_name) DO NOTHING
            ",
        )
        .bind(&definition.name)
        .bind(&requested_schema)
        .execute(&mut *transaction)
        .await?
        .rows_affected();

        let stored_schema: String = query_scalar(
            "
            SELECT
                indexes.schema
            FROM
                umkreis.indexes
            WHERE
                indexes.index_name = $1
            ",
        )
        .bind(&definition.name)
        .fetch_one(&mut *transaction)
        .await?;

        transaction.commit().await?;

        let schema = serde_json::from_str::<IndexSchema>(&stored_schema).map_err(|err| {
            warn!(index = %definition.name, %err, "Stored index schema is unreadable");
            IndexError::SchemaConflict {
                name: definition.name.clone(),
                existing: stored_schema.clone(),
                requested: definition.schema.to_string(),
            }
        })?;

        Ok(CatalogEntry {
            schema,
            created: inserted > 0,
        })
    }
}

#[async_trait]
impl PostStore for DbClient {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn put(&self, content: PostContent) -> Result<Post> {
        let snowflake = self
            .snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
            .map_err(BackendError::from)?;
        let created_at = snowflake.created_at();

        let record = query_as::<_, PostRecord>(
            "
            INSERT INTO umkreis.posts
                (index_name, post_snowflake, user_name, message, lat, lon, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING
                post_snowflake, user_name, message, lat, lon, created_at
            ",
        )
        .bind(&self.index_name)
        .bind(snowflake.get().cast_signed())
        .bind(&content.user)
        .bind(&content.message)
        .bind(content.location.lat)
        .bind(content.location.lon)
        .bind(PrimitiveDateTime::new(created_at.date(), created_at.time()))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| self.store_error(err))?;

        debug!(post = %snowflake, index = %self.index_name, "Inserted post");

        Ok(Post::try_from(record)?)
    }

    async fn get(&self, id: PostId) -> Result<Post> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.user_name,
                posts.message,
                posts.lat,
                posts.lon,
                posts.created_at
            FROM
                umkreis.posts
            WHERE
                posts.index_name = $1 AND posts.post_snowflake = $2
            ",
        )
        .bind(&self.index_name)
        .bind(id.snowflake().get().cast_signed())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| self.store_error(err))?
        .ok_or(StoreError::NotFound(id))?;

        Ok(Post::try_from(record)?)
    }

    async fn get_many(&self, ids: &[PostId]) -> Vec<Result<Post>> {
        if ids.is_empty() {
            return Vec::new();
        }

        let snowflakes: Vec<i64> = ids
            .iter()
            .map(|id| id.snowflake().get().cast_signed())
            .collect();

        let records = query_as::<_, PostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.user_name,
                posts.message,
                posts.lat,
                posts.lon,
                posts.created_at
            FROM
                umkreis.posts
            WHERE
                posts.index_name = $1 AND posts.post_snowflake = ANY($2)
            ",
        )
        .bind(&self.index_name)
        .bind(&snowflakes)
        .fetch_all(&self.pool)
        .await;

        let records = match records {
            Ok(records) => records,
            Err(err) => {
                let err = Arc::new(err);
                return ids
                    .iter()
                    .map(|_| {
                        Err(StoreError::Unavailable(BackendError::SqlxBatch(
                            Arc::clone(&err),
                        )))
                    })
                    .collect();
            }
        };

        let by_snowflake: HashMap<i64, PostRecord> = records
            .into_iter()
            .map(|record| (record.post_snowflake, record))
            .collect();

        ids.iter()
            .zip(&snowflakes)
            .map(|(&id, snowflake)| -> Result<Post> {
                let record = by_snowflake
                    .get(snowflake)
                    .cloned()
                    .ok_or(StoreError::NotFound(id))?;
                Ok(Post::try_from(record)?)
            })
            .collect()
    }

    async fn spatial_entries(&self) -> Result<Vec<SpatialEntry>> {
        let records = query_as::<_, SpatialEntryRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.lat,
                posts.lon
            FROM
                umkreis.posts
            WHERE
                posts.index_name = $1
            ",
        )
        .bind(&self.index_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| self.store_error(err))?;

        records
            .into_iter()
            .map(|record| SpatialEntry::try_from(record).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl SpatialIndex for DbClient {
    async fn insert(&self, id: PostId, location: Location) -> Result<(), IndexError> {
        query(
            "
            INSERT INTO umkreis.spatial_entries (index_name, post_snowflake, lat, lon)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (index_name, post_snowflake)
                DO UPDATE SET lat = EXCLUDED.lat, lon = EXCLUDED.lon
            ",
        )
        .bind(&self.index_name)
        .bind(id.snowflake().get().cast_signed())
        .bind(location.lat)
        .bind(location.lon)
        .execute(&self.pool)
        .await
        .map_err(Self::index_error)?;

        Ok(())
    }

    async fn query_radius(
        &self,
        center: Location,
        radius_meters: f64,
    ) -> Result<HashSet<PostId>, IndexError> {
        let radius_query = RadiusQuery::new(center, radius_meters)?;
        let bounds = &radius_query.bounds;
        let (lon_starts, lon_ends): (Vec<f64>, Vec<f64>) = bounds
            .lon
            .iter()
            .map(|range| (*range.start(), *range.end()))
            .unzip();

        let records = query_as::<_, SpatialEntryRecord>(
            "
            SELECT
                entries.post_snowflake,
                entries.lat,
                entries.lon
            FROM
                umkreis.spatial_entries AS entries
            WHERE
                entries.index_name = $1
                AND entries.lat BETWEEN $2 AND $3
                AND EXISTS (
                    SELECT 1
                    FROM UNNEST($4::DOUBLE PRECISION[], $5::DOUBLE PRECISION[]) AS ranges (lon_start, lon_end)
                    WHERE entries.lon BETWEEN ranges.lon_start AND ranges.lon_end
                )
            ",
        )
        .bind(&self.index_name)
        .bind(*bounds.lat.start())
        .bind(*bounds.lat.end())
        .bind(&lon_starts)
        .bind(&lon_ends)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::index_error)?;

        let candidates = records.len();
        let mut matches = HashSet::new();
        for record in records {
            let entry = SpatialEntry::try_from(record)?;
            if radius_query.matches(entry.location) {
                matches.insert(entry.id);
            }
        }

        trace!(candidates, matches = matches.len(), "Radius query");

        Ok(matches)
    }

    async fn restore(&self, entries: Vec<SpatialEntry>) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }

        let (snowflakes, (lats, lons)): (Vec<i64>, (Vec<f64>, Vec<f64>)) = entries
            .iter()
            .map(|entry| {
                (
                    entry.id.snowflake().get().cast_signed(),
                    (entry.location.lat, entry.location.lon),
                )
            })
            .unzip();

        let added = query(
            "
            INSERT INTO umkreis.spatial_entries (index_name, post_snowflake, lat, lon)
            SELECT $1, restored.post_snowflake, restored.lat, restored.lon
            FROM UNNEST($2::BIGINT[], $3::DOUBLE PRECISION[], $4::DOUBLE PRECISION[])
                AS restored (post_snowflake, lat, lon)
            ON CONFLICT (index_name, post_snowflake) DO NOTHING
            ",
        )
        .bind(&self.index_name)
        .bind(&snowflakes)
        .bind(&lats)
        .bind(&lons)
        .execute(&self.pool)
        .await
        .map_err(Self::index_error)?
        .rows_affected();

        debug!(index = %self.index_name, added, "Restored spatial entries");

        Ok(())
    }
}
