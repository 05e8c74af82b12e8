use crate::spatial::SpatialEntry;
use sqlx::FromRow;
use time::PrimitiveDateTime;
use umkreis_common::model::{
    ModelValidationError,
    location::Location,
    post::{Post, PostContent},
};

#[derive(Clone, PartialEq, Debug, FromRow)]
pub(crate) struct PostRecord {
    pub post_snowflake: i64,
    pub user_name: String,
    pub message: String,
    pub lat: f64,
    pub lon: f64,
    pub created_at: PrimitiveDateTime,
}

#[derive(Copy, Clone, PartialEq, Debug, FromRow)]
pub(crate) struct SpatialEntryRecord {
    pub post_snowflake: i64,
    pub lat: f64,
    pub lon: f64,
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.post_snowflake.cast_unsigned().into(),
            content: PostContent {
                user: value.user_name,
                message: value.message,
                location: Location::new(value.lat, value.lon)?,
            },
            created_at: value.created_at.as_utc(),
        })
    }
}

impl TryFrom<SpatialEntryRecord> for SpatialEntry {
    type Error = ModelValidationError;

    fn try_from(value: SpatialEntryRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.post_snowflake.cast_unsigned().into(),
            location: Location::new(value.lat, value.lon)?,
        })
    }
}
