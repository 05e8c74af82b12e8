//! Radius search over post coordinates.
//!
//! A query derives the bounding box that can contain points within the radius,
//! lets the backend collect the entries inside it and keeps those whose
//! haversine distance to the center is within the radius. The box only ever
//! over-approximates, so results are exactly the haversine matches.
//!
//! [`GridIndex`] answers the box lookup from a uniform in-process lat/lon grid.
//! The Postgres backend answers it from a btree over its spatial entries table.

use crate::error::{BackendError, IndexError};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    num::NonZeroU16,
    ops::RangeInclusive,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, trace};
use umkreis_common::model::{
    location::{MAX_LATITUDE, MAX_LONGITUDE, MIN_LATITUDE, MIN_LONGITUDE, Location},
    post::PostId,
    radius::Radius,
};

/// Widens every bounding box so float rounding cannot exclude a boundary point.
const MARGIN_DEGREES: f64 = 1e-6;

/// The coordinate a post is registered under.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct SpatialEntry {
    pub id: PostId,
    pub location: Location,
}

/// Coordinate lookup shared by every engine working on the same backend.
#[async_trait]
pub trait SpatialIndex: Send + Sync {
    /// Registers `location` for `id`, replacing any earlier location of that id.
    async fn insert(&self, id: PostId, location: Location) -> Result<(), IndexError>;

    /// All ids registered within `radius_meters` great-circle distance of `center`.
    async fn query_radius(
        &self,
        center: Location,
        radius_meters: f64,
    ) -> Result<HashSet<PostId>, IndexError>;

    /// Registers the entries whose id is not registered yet. Existing entries stay as they are.
    async fn restore(&self, entries: Vec<SpatialEntry>) -> Result<(), IndexError>;
}

/// Latitude band and one or two longitude ranges, in degrees.
#[derive(Clone, PartialEq, Debug)]
pub struct BoundingBox {
    pub lat: RangeInclusive<f64>,
    pub lon: Vec<RangeInclusive<f64>>,
}

impl BoundingBox {
    /// The smallest box of this shape containing every point within `radius` of `center`,
    /// widened by a small margin.
    #[must_use]
    pub fn around(center: Location, radius: Radius) -> Self {
        let angle = radius.central_angle();
        let angle_degrees = angle.to_degrees() + MARGIN_DEGREES;

        let lat_min = center.lat - angle_degrees;
        let lat_max = center.lat + angle_degrees;
        let lat = lat_min.max(MIN_LATITUDE)..=lat_max.min(MAX_LATITUDE);

        let full_lon = vec![MIN_LONGITUDE..=MAX_LONGITUDE];

        // A circle around a pole spans every longitude.
        if lat_min <= MIN_LATITUDE || lat_max >= MAX_LATITUDE {
            return Self { lat, lon: full_lon };
        }

        // Widest longitude extent of a spherical cap that does not contain a pole.
        let half_width =
            (angle.sin() / center.lat.to_radians().cos()).asin().to_degrees() + MARGIN_DEGREES;
        if !half_width.is_finite() || half_width >= MAX_LONGITUDE {
            return Self { lat, lon: full_lon };
        }

        let lon_min = center.lon - half_width;
        let lon_max = center.lon + half_width;

        let lon = if lon_min <= MIN_LONGITUDE {
            vec![MIN_LONGITUDE..=lon_max, (lon_min + 360.0)..=MAX_LONGITUDE]
        } else if lon_max >= MAX_LONGITUDE {
            vec![lon_min..=MAX_LONGITUDE, MIN_LONGITUDE..=(lon_max - 360.0)]
        } else {
            vec![lon_min..=lon_max]
        };

        Self { lat, lon }
    }

    #[must_use]
    pub fn contains(&self, location: Location) -> bool {
        self.lat.contains(&location.lat) && self.lon.iter().any(|range| range.contains(&location.lon))
    }
}

/// A validated radius search: the exact predicate plus the box prefiltering it.
#[derive(Clone, PartialEq, Debug)]
pub struct RadiusQuery {
    pub center: Location,
    pub radius: Radius,
    pub bounds: BoundingBox,
}

impl RadiusQuery {
    pub fn new(center: Location, radius_meters: f64) -> Result<Self, IndexError> {
        let radius = Radius::from_meters(radius_meters)?;

        Ok(Self {
            center,
            radius,
            bounds: BoundingBox::around(center, radius),
        })
    }

    #[must_use]
    pub fn matches(&self, location: Location) -> bool {
        self.center.distance_meters(location) <= self.radius.meters()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
struct CellKey {
    lat: u32,
    lon: u32,
}

#[derive(Debug, Default)]
struct GridState {
    cells: HashMap<CellKey, HashMap<PostId, Location>>,
    entries: HashMap<PostId, CellKey>,
}

/// Cells overlapping a bounding box.
#[derive(Clone, Eq, PartialEq, Debug)]
struct Covering {
    lat: RangeInclusive<u32>,
    lon: Vec<RangeInclusive<u32>>,
}

/// In-process uniform grid. Shared by reference, so it only serves engines
/// living in the same process as its owner.
#[derive(Debug)]
pub struct GridIndex {
    cells_per_degree: NonZeroU16,
    ready: AtomicBool,
    state: RwLock<GridState>,
}

impl GridIndex {
    pub const DEFAULT_CELLS_PER_DEGREE: NonZeroU16 = NonZeroU16::MIN;

    /// Creates an empty index that rejects reads and writes until [`GridIndex::activate`].
    #[must_use]
    pub fn new(cells_per_degree: NonZeroU16) -> Self {
        Self {
            cells_per_degree,
            ready: AtomicBool::new(false),
            state: RwLock::default(),
        }
    }

    /// Marks the index as backed by an ensured index.
    pub fn activate(&self) {
        self.ready.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Adds the entries whose id is unknown. Allowed before activation, so
    /// that an index can be filled before it is opened for requests.
    pub fn restore(&self, entries: impl IntoIterator<Item = SpatialEntry>) -> Result<(), IndexError> {
        let mut state = self.state.write().map_err(|_| BackendError::Poisoned)?;

        let mut added = 0_usize;
        for entry in entries {
            if !state.entries.contains_key(&entry.id) {
                self.insert_into(&mut state, entry);
                added += 1;
            }
        }
        debug!(added, total = state.entries.len(), "Restored spatial entries");

        Ok(())
    }

    /// Registers `location` for `id`, replacing any earlier location of that id.
    pub fn insert(&self, id: PostId, location: Location) -> Result<(), IndexError> {
        self.check_ready()?;

        let mut state = self.state.write().map_err(|_| BackendError::Poisoned)?;
        self.insert_into(&mut state, SpatialEntry { id, location });

        Ok(())
    }

    /// All ids registered within `radius_meters` great-circle distance of `center`.
    pub fn query_radius(
        &self,
        center: Location,
        radius_meters: f64,
    ) -> Result<HashSet<PostId>, IndexError> {
        self.check_ready()?;
        let query = RadiusQuery::new(center, radius_meters)?;

        let covering = self.covering(&query.bounds);
        let state = self.state.read().map_err(|_| BackendError::Poisoned)?;

        let covered_cells = covering.cell_count();
        let mut candidates = 0_usize;
        let mut matches = HashSet::new();
        let mut visit = |points: &HashMap<PostId, Location>| {
            candidates += points.len();
            matches.extend(
                points
                    .iter()
                    .filter(|&(_, &location)| query.matches(location))
                    .map(|(&id, _)| id),
            );
        };

        if covered_cells > state.cells.len() {
            state
                .cells
                .iter()
                .filter(|&(key, _)| covering.contains(*key))
                .for_each(|(_, points)| visit(points));
        } else {
            for lat in covering.lat.clone() {
                for lon_range in &covering.lon {
                    for lon in lon_range.clone() {
                        if let Some(points) = state.cells.get(&CellKey { lat, lon }) {
                            visit(points);
                        }
                    }
                }
            }
        }

        trace!(
            covered_cells,
            candidates,
            matches = matches.len(),
            "Radius query"
        );

        Ok(matches)
    }

    pub fn len(&self) -> Result<usize, IndexError> {
        let state = self.state.read().map_err(|_| BackendError::Poisoned)?;
        Ok(state.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    fn check_ready(&self) -> Result<(), IndexError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(IndexError::NotReady)
        }
    }

    fn insert_into(&self, state: &mut GridState, SpatialEntry { id, location }: SpatialEntry) {
        let key = self.cell_of(location);

        if let Some(previous) = state.entries.insert(id, key)
            && let Some(points) = state.cells.get_mut(&previous)
        {
            points.remove(&id);
            if points.is_empty() {
                state.cells.remove(&previous);
            }
        }

        state.cells.entry(key).or_default().insert(id, location);
    }

    fn scale(&self) -> f64 {
        f64::from(self.cells_per_degree.get())
    }

    fn lat_cells(&self) -> u32 {
        180 * u32::from(self.cells_per_degree.get())
    }

    fn lon_cells(&self) -> u32 {
        360 * u32::from(self.cells_per_degree.get())
    }

    /// Cell row of a latitude, clamped so that 90° shares the top row.
    fn lat_cell(&self, lat: f64) -> u32 {
        let row = ((lat - MIN_LATITUDE) * self.scale()).floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let row = row.max(0.0) as u32;
        row.min(self.lat_cells() - 1)
    }

    /// Cell column of a longitude, clamped so that 180° shares the last column.
    /// Range ends use this; points use [`GridIndex::cell_of`], which wraps instead.
    fn lon_cell_clamped(&self, lon: f64) -> u32 {
        let column = ((lon - MIN_LONGITUDE) * self.scale()).floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let column = column.max(0.0) as u32;
        column.min(self.lon_cells() - 1)
    }

    fn cell_of(&self, location: Location) -> CellKey {
        let column = ((location.lon - MIN_LONGITUDE) * self.scale()).floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let column = column.max(0.0) as u32;

        CellKey {
            lat: self.lat_cell(location.lat),
            // 180° and -180° are the same meridian.
            lon: column % self.lon_cells(),
        }
    }

    fn covering(&self, bounds: &BoundingBox) -> Covering {
        Covering {
            lat: self.lat_cell(*bounds.lat.start())..=self.lat_cell(*bounds.lat.end()),
            lon: bounds
                .lon
                .iter()
                .map(|range| {
                    self.lon_cell_clamped(*range.start())..=self.lon_cell_clamped(*range.end())
                })
                .collect(),
        }
    }
}

impl Default for GridIndex {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CELLS_PER_DEGREE)
    }
}

impl Covering {
    fn cell_count(&self) -> usize {
        let rows = self.lat.clone().count();
        let columns: usize = self.lon.iter().map(|range| range.clone().count()).sum();
        rows.saturating_mul(columns)
    }

    fn contains(&self, key: CellKey) -> bool {
        self.lat.contains(&key.lat) && self.lon.iter().any(|range| range.contains(&key.lon))
    }
}
