pub mod location;
pub mod post;
pub mod radius;

use crate::{
    model::{location::InvalidLocationError, radius::InvalidRadiusError},
    snowflake::{Epoch, Snowflake, SnowflakeGenerator, SnowflakeTimestampFromDateTimeError},
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Copy, Clone, PartialEq, Debug, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Location(#[from] InvalidLocationError),
    #[error(transparent)]
    Radius(#[from] InvalidRadiusError),
    #[error(transparent)]
    Timestamp(#[from] SnowflakeTimestampFromDateTimeError),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UmkreisEpoch;
impl Epoch for UmkreisEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type UmkreisSnowflake = Snowflake<UmkreisEpoch>;
pub type UmkreisSnowflakeGenerator = SnowflakeGenerator<UmkreisEpoch>;

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(UmkreisSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: UmkreisSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> UmkreisSnowflake {
        self.0
    }

    /// The moment the id was generated.
    #[must_use]
    pub fn created_at(self) -> UtcDateTime {
        self.0.created_at()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<UmkreisSnowflake> for Id<Marker> {
    fn from(value: UmkreisSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for UmkreisSnowflake {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(UmkreisSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}
