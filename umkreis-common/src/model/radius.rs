use std::f64::consts::PI;
use thiserror::Error;

/// Mean earth radius used for all distance computations.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Half the earth's circumference. Every point on the sphere lies within this
/// distance of every other point, so larger radii are rejected.
pub const MAX_RADIUS_METERS: f64 = PI * EARTH_RADIUS_METERS;

pub const DEFAULT_RADIUS_METERS: f64 = 200_000.0;

#[derive(Copy, Clone, PartialOrd, PartialEq, Debug)]
pub struct Radius(f64);

#[derive(Copy, Clone, PartialEq, Debug, Error)]
#[error("The radius must be between 0 meters and half the earth's circumference, got {0}")]
pub struct InvalidRadiusError(pub f64);

impl Radius {
    pub const DEFAULT: Radius = Radius(DEFAULT_RADIUS_METERS);

    pub fn from_meters(meters: f64) -> Result<Self, InvalidRadiusError> {
        if (0.0..=MAX_RADIUS_METERS).contains(&meters) {
            Ok(Self(meters))
        } else {
            Err(InvalidRadiusError(meters))
        }
    }

    pub fn from_kilometers(kilometers: f64) -> Result<Self, InvalidRadiusError> {
        Self::from_meters(kilometers * 1000.0)
    }

    #[must_use]
    pub fn meters(self) -> f64 {
        self.0
    }

    /// The radius as an angle at the earth's center, in radians.
    #[must_use]
    pub fn central_angle(self) -> f64 {
        self.0 / EARTH_RADIUS_METERS
    }
}

impl Default for Radius {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f64> for Radius {
    type Error = InvalidRadiusError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_meters(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::radius::{DEFAULT_RADIUS_METERS, MAX_RADIUS_METERS, Radius};

    #[test]
    fn accepted_radii() {
        assert_eq!(Radius::from_meters(0.0).unwrap().meters(), 0.0);
        assert_eq!(
            Radius::from_meters(MAX_RADIUS_METERS).unwrap().meters(),
            MAX_RADIUS_METERS
        );
        assert_eq!(Radius::from_kilometers(200.0).unwrap(), Radius::default());
        assert_eq!(Radius::default().meters(), DEFAULT_RADIUS_METERS);
    }

    #[test]
    fn rejected_radii() {
        assert!(Radius::from_meters(-1.0).is_err());
        assert!(Radius::from_meters(MAX_RADIUS_METERS + 1.0).is_err());
        assert!(Radius::from_meters(f64::NAN).is_err());
        assert!(Radius::from_meters(f64::INFINITY).is_err());
    }
}
