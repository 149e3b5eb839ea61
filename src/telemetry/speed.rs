use crate::{geo, telemetry::sample::GpsSample};

const MPS_TO_KMH: f64 = 3.6;
const MPS_TO_MPH: f64 = 2.23694;

/// Unit for speeds derived from consecutive positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    Kmh,
    Mph,
}

impl SpeedUnit {
    pub fn label(self) -> &'static str {
        match self {
            SpeedUnit::Kmh => "km/h",
            SpeedUnit::Mph => "mph",
        }
    }

    fn convert_mps(self, mps: f64) -> f64 {
        match self {
            SpeedUnit::Kmh => mps * MPS_TO_KMH,
            SpeedUnit::Mph => mps * MPS_TO_MPH,
        }
    }
}

/// Replace the device-reported speed of every sample that has a predecessor with the speed
/// derived from the distance travelled since that predecessor.
///
/// `samples` must belong to one source and be sorted by timestamp. The first sample, and any
/// sample whose time delta to its predecessor is not positive, keep their original values.
pub fn recalculate_speed(samples: &mut [GpsSample], unit: SpeedUnit) {
    for i in 1..samples.len() {
        let (head, tail) = samples.split_at_mut(i);
        let prev = &head[i - 1];
        let cur = &mut tail[0];

        let dt = (cur.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        if dt <= 0.0 {
            continue;
        }

        let mps = geo::distance(prev.position(), cur.position()) / dt;
        cur.speed = round1(unit.convert_mps(mps));
        cur.speed_unit = unit.label().to_string();
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::sample::sample_at;

    #[test]
    fn first_sample_is_untouched() {
        let mut s = vec![sample_at("a", 0, 45.0, 9.0), sample_at("a", 1, 45.001, 9.0)];
        recalculate_speed(&mut s, SpeedUnit::Kmh);
        assert_eq!(s[0].speed, 12.5);
        assert_eq!(s[0].speed_unit, "km/h");
    }

    #[test]
    fn derives_kmh_from_positions() {
        // 0.001 degrees of latitude is ~111.19 m; over 10 s that is ~40.0 km/h.
        let mut s = vec![sample_at("a", 0, 45.0, 9.0), sample_at("a", 10, 45.001, 9.0)];
        recalculate_speed(&mut s, SpeedUnit::Kmh);
        assert_eq!(s[1].speed, 40.0);
        assert_eq!(s[1].speed_unit, "km/h");
    }

    #[test]
    fn derives_mph_from_positions() {
        let mut s = vec![sample_at("a", 0, 45.0, 9.0), sample_at("a", 10, 45.001, 9.0)];
        recalculate_speed(&mut s, SpeedUnit::Mph);
        assert_eq!(s[1].speed, 24.9);
        assert_eq!(s[1].speed_unit, "mph");
    }

    #[test]
    fn zero_duration_keeps_original_speed() {
        let mut s = vec![sample_at("a", 5, 45.0, 9.0), sample_at("a", 5, 45.0, 9.0)];
        s[1].speed = 33.3;
        s[1].speed_unit = "mph".to_string();
        recalculate_speed(&mut s, SpeedUnit::Kmh);
        assert_eq!(s[1].speed, 33.3);
        assert_eq!(s[1].speed_unit, "mph");
    }

    #[test]
    fn stationary_point_reads_zero() {
        let mut s = vec![sample_at("a", 0, 45.0, 9.0), sample_at("a", 1, 45.0, 9.0)];
        recalculate_speed(&mut s, SpeedUnit::Kmh);
        assert_eq!(s[1].speed, 0.0);
    }
}
