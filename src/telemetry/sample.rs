use chrono::{DateTime, Datelike as _, NaiveDate, Utc};

use crate::geo::LatLon;

/// Year the camera stamps on records written before it acquired a fix.
pub const NO_FIX_YEAR: i32 = 1900;

/// One per-second GPS record.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GpsSample {
    /// Segment file the record was extracted from.
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub speed_unit: String,
    pub hdop: f64,
    pub geoid_height: f64,
    pub satellites: u32,
    pub accelerometer: [f64; 3],
}

impl GpsSample {
    pub fn position(&self) -> LatLon {
        LatLon::new(self.latitude, self.longitude)
    }

    /// `false` for the camera's "no fix" sentinels: `(0, 0)` or a year-1900 timestamp.
    pub fn has_fix(&self) -> bool {
        !self.position().is_null_island() && self.timestamp.year() != NO_FIX_YEAR
    }
}

/// Timestamp used for points that carry no time at all.
pub fn no_fix_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(NO_FIX_YEAR, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
pub(crate) fn sample_at(source: &str, secs: i64, lat: f64, lon: f64) -> GpsSample {
    GpsSample {
        source: source.to_string(),
        timestamp: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
        latitude: lat,
        longitude: lon,
        speed: 12.5,
        speed_unit: "km/h".to_string(),
        hdop: 0.9,
        geoid_height: 48.0,
        satellites: 9,
        accelerometer: [0.01, -0.02, 0.98],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_island_has_no_fix() {
        let s = sample_at("a", 0, 0.0, 0.0);
        assert!(!s.has_fix());
    }

    #[test]
    fn year_1900_has_no_fix() {
        let mut s = sample_at("a", 0, 45.0, 9.0);
        assert!(s.has_fix());
        s.timestamp = no_fix_timestamp();
        assert!(!s.has_fix());
    }

    #[test]
    fn equator_alone_is_a_fix() {
        assert!(sample_at("a", 0, 0.0, 12.0).has_fix());
    }
}
