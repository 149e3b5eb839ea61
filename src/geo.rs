//! Spherical-earth geodesy and Web-Mercator ("slippy map") projection.
//!
//! Both [`tile_index`] and [`pixel_coordinate`] go through the same projection helper, so a
//! point's pixel coordinate divided by the tile size and floored is always its tile index.

use std::f64::consts::PI;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude limit of the square Web-Mercator world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// A WGS84 position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// `(0, 0)` is what the camera reports when it has no fix.
    pub fn is_null_island(self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// Great-circle distance in meters (Haversine).
pub fn distance(p1: LatLon, p2: LatLon) -> f64 {
    let phi1 = p1.lat.to_radians();
    let phi2 = p2.lat.to_radians();
    let dphi = (p2.lat - p1.lat).to_radians();
    let dlambda = (p2.lon - p1.lon).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from `p1` to `p2`, in degrees `[0, 360)`, 0 = north, 90 = east.
///
/// Meaningless for `p1 == p2`; use [`heading`] when the points may coincide.
pub fn bearing(p1: LatLon, p2: LatLon) -> f64 {
    let phi1 = p1.lat.to_radians();
    let phi2 = p2.lat.to_radians();
    let dlon = (p2.lon - p1.lon).to_radians();

    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();

    let deg = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs.
    if deg >= 360.0 { 0.0 } else { deg }
}

/// Guarded [`bearing`]: `None` when both points are identical.
pub fn heading(p1: LatLon, p2: LatLon) -> Option<f64> {
    if p1 == p2 {
        None
    } else {
        Some(bearing(p1, p2))
    }
}

/// Slippy-map tile containing the point at `zoom`.
pub fn tile_index(lat: f64, lon: f64, zoom: u8) -> (i64, i64) {
    let (fx, fy) = world_position(lat, lon, zoom, 1.0);
    (fx.floor() as i64, fy.floor() as i64)
}

/// Continuous world pixel coordinate of the point at `zoom` for square tiles of `tile_size`.
pub fn pixel_coordinate(lat: f64, lon: f64, zoom: u8, tile_size: u32) -> (f64, f64) {
    world_position(lat, lon, zoom, f64::from(tile_size))
}

fn world_position(lat: f64, lon: f64, zoom: u8, scale: f64) -> (f64, f64) {
    let n = f64::from(1u32 << zoom.min(30));
    let (ux, uy) = mercator_unit(lat, lon);
    (ux * n * scale, uy * n * scale)
}

/// Position in the unit square, `x` east from the antimeridian, `y` south from the top edge.
fn mercator_unit(lat: f64, lon: f64) -> (f64, f64) {
    let lat_rad = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = (lon + 180.0) / 360.0;
    // ln(tan φ + sec φ) == asinh(tan φ)
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
    (x, y)
}
