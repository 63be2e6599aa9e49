//! Bounding-box and great-circle math.
//!
//! Everything here is pure and deterministic. Inputs are degrees; the
//! trigonometry runs in radians.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.01;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = EARTH_RADIUS_KM * 1000.0;

/// Highest zoom level a web map supports.
pub const MAX_ZOOM: u8 = 21;

/// Tile size of the zoom-0 world in pixels.
const WORLD_DIM: f64 = 256.0;

/// Ground resolution at zoom 0 on the equator, meters per pixel.
const EQUATOR_METERS_PER_PIXEL: f64 = 156_543.033_92;

/// Meters per degree of latitude on the sphere.
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * PI / 180.0;

/// Meters per degree at the equator of the Web Mercator world.
const MERCATOR_METERS_PER_DEGREE: f64 = EQUATOR_METERS_PER_PIXEL * WORLD_DIM / 360.0;

/// Latitude beyond which Web Mercator is undefined.
const MERCATOR_MAX_LAT: f64 = 85.051_128_78;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Map viewport in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A north-east / south-west bounding box in degrees.
///
/// `ne_lng < sw_lng` means the box crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BoundingBox {
    pub ne_lat: f64,
    pub ne_lng: f64,
    pub sw_lat: f64,
    pub sw_lng: f64,
}

impl BoundingBox {
    /// Reject boxes that cannot exist.
    ///
    /// Everything else (zero-area boxes, pole-touching boxes) is accepted and
    /// clamped by the math that consumes it.
    pub fn validate(&self) -> Result<(), Error> {
        let corners = [self.ne_lat, self.ne_lng, self.sw_lat, self.sw_lng];
        if corners.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidArgument("bounding box corners must be finite".into()));
        }
        if !(-90.0..=90.0).contains(&self.ne_lat) || !(-90.0..=90.0).contains(&self.sw_lat) {
            return Err(Error::InvalidArgument("bounding box latitude out of range".into()));
        }
        if self.ne_lat < self.sw_lat {
            return Err(Error::InvalidArgument(format!(
                "ne_lat {} is south of sw_lat {}",
                self.ne_lat, self.sw_lat
            )));
        }
        Ok(())
    }

    pub fn north_east(&self) -> Coordinate {
        Coordinate::new(self.ne_lat, self.ne_lng)
    }

    pub fn south_west(&self) -> Coordinate {
        Coordinate::new(self.sw_lat, self.sw_lng)
    }

    /// Great-circle midpoint between the two corners.
    pub fn center(&self) -> Coordinate {
        midpoint(self.south_west(), self.north_east())
    }

    /// Whether the coordinate lies inside the box, honoring antimeridian crossing.
    pub fn contains(&self, c: Coordinate) -> bool {
        if c.latitude < self.sw_lat || c.latitude > self.ne_lat {
            return false;
        }
        if self.sw_lng <= self.ne_lng {
            c.longitude >= self.sw_lng && c.longitude <= self.ne_lng
        } else {
            c.longitude >= self.sw_lng || c.longitude <= self.ne_lng
        }
    }

    /// Corners rounded to two decimals, as integer hundredths.
    ///
    /// This is the box "class" used for snapshot identity and re-sync decisions.
    pub fn rounded_key(&self) -> [i64; 4] {
        [hundredths(self.ne_lat), hundredths(self.ne_lng), hundredths(self.sw_lat), hundredths(self.sw_lng)]
    }
}

fn hundredths(v: f64) -> i64 {
    (v * 100.0).round() as i64
}

fn normalize_longitude(lng: f64) -> f64 {
    let wrapped = (lng + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lng > 0.0 { 180.0 } else { wrapped }
}

/// Great-circle midpoint of two coordinates.
pub fn midpoint(a: Coordinate, b: Coordinate) -> Coordinate {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let lng1 = a.longitude.to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let bx = lat2.cos() * d_lng.cos();
    let by = lat2.cos() * d_lng.sin();

    let lat = (lat1.sin() + lat2.sin()).atan2(((lat1.cos() + bx).powi(2) + by.powi(2)).sqrt());
    let lng = lng1 + by.atan2(lat1.cos() + bx);

    Coordinate::new(lat.to_degrees(), normalize_longitude(lng.to_degrees()))
}

/// Haversine distance in meters.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Half the Mercator y of a latitude, clamped to ±π/2.
fn lat_rad(lat: f64) -> f64 {
    let sin = lat.to_radians().sin();
    let rad_x2 = ((1.0 + sin) / (1.0 - sin)).ln() / 2.0;
    rad_x2.clamp(-PI, PI) / 2.0
}

fn fraction_zoom(map_px: f64, fraction: f64) -> f64 {
    (map_px / WORLD_DIM / fraction).ln() / std::f64::consts::LN_2
}

/// Largest zoom at which the whole box fits inside the viewport.
pub fn zoom_level(bbox: &BoundingBox, viewport: Viewport) -> u8 {
    let lat_fraction = (lat_rad(bbox.ne_lat) - lat_rad(bbox.sw_lat)) / PI;

    // Negative only when the box crosses the antimeridian; a full 360° span stays whole.
    let lng_diff = bbox.ne_lng - bbox.sw_lng;
    let lng_span = if lng_diff < 0.0 { lng_diff + 360.0 } else { lng_diff.min(360.0) };
    let lng_fraction = lng_span / 360.0;

    let lat_zoom = fraction_zoom(f64::from(viewport.height), lat_fraction);
    let lng_zoom = fraction_zoom(f64::from(viewport.width), lng_fraction);

    let zoom = lat_zoom.min(lng_zoom).min(f64::from(MAX_ZOOM));
    if zoom.is_nan() || zoom <= 0.0 { 0 } else { zoom.floor() as u8 }
}

/// Box visible in a `width` x `height` viewport centered on (`lat`, `lng`).
pub fn bounds_from_center(lat: f64, lng: f64, zoom: u8, width: u32, height: u32) -> BoundingBox {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    let cos_lat = lat.to_radians().cos();
    let meters_per_pixel = EQUATOR_METERS_PER_PIXEL * cos_lat / 2f64.powi(i32::from(zoom));

    let half_height_m = f64::from(height) / 2.0 * meters_per_pixel;
    let half_width_m = f64::from(width) / 2.0 * meters_per_pixel;

    let d_lat = half_height_m / MERCATOR_METERS_PER_DEGREE;
    let d_lng = half_width_m / (MERCATOR_METERS_PER_DEGREE * cos_lat);

    BoundingBox {
        ne_lat: (lat + d_lat).min(90.0),
        ne_lng: normalize_longitude(lng + d_lng),
        sw_lat: (lat - d_lat).max(-90.0),
        sw_lng: normalize_longitude(lng - d_lng),
    }
}

/// Whether two boxes are the same at two-decimal precision (~1 km).
pub fn bounding_box_equal(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.rounded_key() == b.rounded_key()
}

/// Degree window that fully contains the circle of `radius_m` around `center`.
///
/// Used as a SQL prefilter before the exact haversine check. Longitude bounds
/// are `None` when the window reaches a pole or wraps the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegreeWindow {
    pub min_lat: f64,
    pub max_lat: f64,
    pub lng: Option<(f64, f64)>,
}

pub fn degree_window(center: Coordinate, radius_m: f64) -> DegreeWindow {
    let d_lat = radius_m / METERS_PER_DEGREE;
    let min_lat = center.latitude - d_lat;
    let max_lat = center.latitude + d_lat;

    let widest = min_lat.abs().max(max_lat.abs());
    let lng = if widest >= 90.0 {
        None
    } else {
        let d_lng = d_lat / widest.to_radians().cos();
        let (lo, hi) = (center.longitude - d_lng, center.longitude + d_lng);
        if d_lng >= 180.0 || lo < -180.0 || hi > 180.0 { None } else { Some((lo, hi)) }
    };

    DegreeWindow { min_lat: min_lat.max(-90.0), max_lat: max_lat.min(90.0), lng }
}

/// Index of the square grid cell of side `cell_m` that contains `c`.
///
/// Longitude cells widen with latitude so they stay roughly square on the
/// ground. Any two points in one cell are within `cell_m * sqrt(2)`.
pub fn grid_cell(c: Coordinate, cell_m: f64) -> (i64, i64) {
    let lat_step = cell_m / METERS_PER_DEGREE;
    let row = (c.latitude / lat_step).floor();
    // Cell rows share one longitude step, taken at the row's equator-side edge.
    let edge_lat = (row.abs().min((row + 1.0).abs()) * lat_step).min(89.0);
    let lng_step = lat_step / edge_lat.to_radians().cos();
    (row as i64, (c.longitude / lng_step).floor() as i64)
}
