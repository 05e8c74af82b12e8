use thiserror::Error;
use umkreis_common::{
    model::{
        ModelValidationError, location::InvalidLocationError, post::PostId,
        radius::InvalidRadiusError,
    },
    snowflake::SnowflakeTimestampFromDateTimeError,
};

/// Failure of whatever holds the data, be it a database connection or an in-process lock.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    SqlxBatch(std::sync::Arc<sqlx::Error>),
    #[error("A lock guarding in-process state was poisoned")]
    Poisoned,
    #[error("Could not generate a post id: {0}")]
    IdGeneration(#[from] SnowflakeTimestampFromDateTimeError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("The index backend is unavailable: {0}")]
    Unavailable(#[from] BackendError),
    #[error("Index {name} already exists with schema {existing}, requested {requested}")]
    SchemaConflict {
        name: String,
        existing: String,
        requested: String,
    },
    #[error("The index has not been ensured yet")]
    NotReady,
    #[error(transparent)]
    InvalidRadius(#[from] InvalidRadiusError),
    #[error("Index names must not be empty")]
    InvalidName,
    #[error("The index schema could not be encoded: {0}")]
    SchemaEncoding(#[from] serde_json::Error),
    #[error("A stored spatial entry was invalid: {0}")]
    Corrupt(#[from] ModelValidationError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("The post store is unavailable: {0}")]
    Unavailable(#[from] BackendError),
    #[error("Post with id {0} was not found.")]
    NotFound(PostId),
    #[error("The index {0} the store writes into does not exist")]
    NotReady(String),
    #[error("A stored post was invalid: {0}")]
    Corrupt(#[from] ModelValidationError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid search center: {0}")]
    InvalidLocation(#[from] InvalidLocationError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Invalid post location: {0}")]
    InvalidLocation(#[from] InvalidLocationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Post {id} was stored but could not be indexed: {source}")]
    Index { id: PostId, source: IndexError },
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Could not ensure the post index: {0}")]
    Index(#[from] IndexError),
    #[error("Could not load posts to restore their spatial entries: {0}")]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for IndexError {
    fn from(value: sqlx::Error) -> Self {
        Self::Unavailable(value.into())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        Self::Unavailable(value.into())
    }
}
