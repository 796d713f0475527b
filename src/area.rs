use std::fmt;

use crate::error::AncillaryError;

const EPS: f64 = 1e-6;

/// A latitude/longitude bounding box in degrees, `[north, west, south, east]`.
///
/// `west` never exceeds `east`. A box crossing the antimeridian carries an
/// east bound above 180, e.g. `west = 170, east = 190`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Area {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl Area {
    pub const GLOBAL: Area = Area {
        north: 90.0,
        west: -180.0,
        south: -90.0,
        east: 180.0,
    };

    pub fn new(north: f64, west: f64, south: f64, east: f64) -> Result<Self, AncillaryError> {
        let area = Area {
            north,
            west,
            south,
            east,
        };
        if ![north, west, south, east].iter().all(|v| v.is_finite()) {
            return Err(AncillaryError::InvalidArea(format!("{area}: non-finite bound")));
        }
        if !(-90.0..=90.0).contains(&north) || !(-90.0..=90.0).contains(&south) {
            return Err(AncillaryError::InvalidArea(format!(
                "{area}: latitudes must lie in [-90, 90]"
            )));
        }
        if south > north {
            return Err(AncillaryError::InvalidArea(format!(
                "{area}: south is above north"
            )));
        }
        if west > east {
            return Err(AncillaryError::InvalidArea(format!(
                "{area}: west is east of east, use an east bound above 180 to cross the antimeridian"
            )));
        }
        if !(-180.0..=360.0).contains(&west) || !(-180.0..=360.0).contains(&east) {
            return Err(AncillaryError::InvalidArea(format!(
                "{area}: longitudes must lie in [-180, 360]"
            )));
        }
        Ok(area)
    }

    /// The smallest box on whole degrees that contains `self`.
    ///
    /// North and east go up, south and west go down; the result is clamped to the globe.
    pub fn rounded(&self) -> Area {
        Area {
            north: self.north.ceil().min(90.0),
            west: self.west.floor().max(-180.0),
            south: self.south.floor().max(-90.0),
            east: self.east.ceil().min(360.0),
        }
    }

    pub fn is_global(&self) -> bool {
        let r = self.rounded();
        r.north >= 90.0 && r.south <= -90.0 && (r.east - r.west) >= 360.0
    }

    pub fn contains(&self, other: &Area) -> bool {
        self.north >= other.north
            && self.south <= other.south
            && self.west <= other.west
            && self.east >= other.east
    }

    pub fn contains_latitude(&self, lat: f64) -> bool {
        (self.south - EPS..=self.north + EPS).contains(&lat)
    }

    /// Whether `lon` falls in the box, whatever the longitude convention of
    /// the grid (`[-180, 180)` or `[0, 360)`).
    pub fn contains_longitude(&self, lon: f64) -> bool {
        (lon - self.west + EPS).rem_euclid(360.0) <= self.east - self.west + 2.0 * EPS
    }

    /// Area part of a cache file name.
    pub fn cache_token(&self) -> String {
        if self.is_global() {
            return "global".to_string();
        }
        let r = self.rounded();
        format!(
            "region_{}-{}-{}-{}",
            r.north as i64, r.west as i64, r.south as i64, r.east as i64
        )
    }

    /// `[north, west, south, east]` of the rounded box, as the data stores expect it.
    pub fn as_request(&self) -> [f64; 4] {
        let r = self.rounded();
        [r.north, r.west, r.south, r.east]
    }
}

impl Default for Area {
    fn default() -> Self {
        Area::GLOBAL
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.north, self.west, self.south, self.east
        )
    }
}
