use crate::model::radius::EARTH_RADIUS_METERS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// A point on the earth's surface in degrees.
///
/// Deserialization does not range check, so that out-of-range coordinates coming
/// in over the wire surface as [`InvalidLocationError`] from the engine instead
/// of a generic body rejection. Use [`Location::new`] or [`Location::validate`].
#[derive(Copy, Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Copy, Clone, PartialEq, Debug, Error)]
pub enum InvalidLocationError {
    #[error("Latitude {0} is outside of [-90, 90]")]
    Latitude(f64),
    #[error("Longitude {0} is outside of [-180, 180]")]
    Longitude(f64),
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Result<Self, InvalidLocationError> {
        Self { lat, lon }.validate()
    }

    /// Returns the location unchanged if both coordinates are finite and in range.
    pub fn validate(self) -> Result<Self, InvalidLocationError> {
        // Written so that NaN fails both comparisons.
        if !(MIN_LATITUDE..=MAX_LATITUDE).contains(&self.lat) {
            return Err(InvalidLocationError::Latitude(self.lat));
        }
        if !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&self.lon) {
            return Err(InvalidLocationError::Longitude(self.lon));
        }

        Ok(self)
    }

    /// Great-circle distance in meters, using the haversine formula on a sphere
    /// of radius [`EARTH_RADIUS_METERS`].
    #[must_use]
    pub fn distance_meters(self, other: Location) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        // Rounding can push `a` slightly above 1 for antipodal points.
        let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());

        EARTH_RADIUS_METERS * c
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        location::{InvalidLocationError, Location},
        radius::MAX_RADIUS_METERS,
    };

    const SHANGHAI: Location = Location {
        lat: 31.23,
        lon: 121.47,
    };
    const BEIJING: Location = Location {
        lat: 39.90,
        lon: 116.40,
    };
    const HONG_KONG: Location = Location {
        lat: 22.27,
        lon: 114.15,
    };

    #[test]
    fn validation() {
        assert!(Location::new(90.0, 180.0).is_ok());
        assert!(Location::new(-90.0, -180.0).is_ok());
        assert_eq!(
            Location::new(200.0, 0.0),
            Err(InvalidLocationError::Latitude(200.0))
        );
        assert_eq!(
            Location::new(0.0, -180.5),
            Err(InvalidLocationError::Longitude(-180.5))
        );
        assert!(Location::new(f64::NAN, 0.0).is_err());
        assert!(Location::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn haversine_distances() {
        let beijing = SHANGHAI.distance_meters(BEIJING);
        let hong_kong = SHANGHAI.distance_meters(HONG_KONG);

        assert!((beijing - 1_067_000.0).abs() < 15_000.0, "{beijing}");
        assert!((hong_kong - 1_230_000.0).abs() < 40_000.0, "{hong_kong}");
        assert!((BEIJING.distance_meters(SHANGHAI) - beijing).abs() < 1e-6);
        assert!(SHANGHAI.distance_meters(SHANGHAI).abs() < f64::EPSILON);
    }

    #[test]
    fn antipodal_distance_is_half_circumference() {
        let north = Location::new(90.0, 0.0).unwrap();
        let south = Location::new(-90.0, 0.0).unwrap();

        assert!((north.distance_meters(south) - MAX_RADIUS_METERS).abs() < 1e-3);
    }

    #[test]
    fn json_shape() {
        let json = serde_json::to_string(&SHANGHAI).unwrap();
        assert_eq!(json, r#"{"lat":31.23,"lon":121.47}"#);
    }
}
