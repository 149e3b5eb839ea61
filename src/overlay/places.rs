use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use rayon::prelude::*;

use crate::{
    draw::Painter,
    foundation::{
        core::Frame,
        error::{RideviewError, RideviewResult},
    },
    geo,
    map::frames::finalize_frames,
    overlay::gauge::{PanelData, PanelStyle, render_panel},
    telemetry::sample::GpsSample,
};

/// Name shown when a position cannot be resolved.
pub const UNKNOWN_PLACE: &str = "N/A";

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Samples between forced lookups; in between the previous name is reused.
pub const LOOKUP_EVERY: usize = 10;

const ADDRESS_KEYS: [&str; 5] = ["city", "town", "village", "hamlet", "municipality"];

/// Resolves a coordinate to a human-readable place name.
pub trait Geocoder {
    fn place_name(&self, lat: f64, lon: f64) -> RideviewResult<String>;
}

/// At most one call in flight, followed by a fixed pause before the next caller may proceed.
#[derive(Debug)]
pub struct RateGate {
    permit: Mutex<()>,
    post_delay: Duration,
}

impl RateGate {
    pub fn new(post_delay: Duration) -> Self {
        Self {
            permit: Mutex::new(()),
            post_delay,
        }
    }

    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let _permit = self.permit.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f();
        if !self.post_delay.is_zero() {
            std::thread::sleep(self.post_delay);
        }
        out
    }
}

/// Nominatim reverse geocoding over HTTP.
pub struct NominatimGeocoder {
    agent: ureq::Agent,
    endpoint: String,
    user_agent: String,
    gate: RateGate,
}

impl NominatimGeocoder {
    pub fn new(endpoint: impl Into<String>, user_agent: impl Into<String>, gate: RateGate) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            endpoint: endpoint.into(),
            user_agent: user_agent.into(),
            gate,
        }
    }
}

impl Geocoder for NominatimGeocoder {
    fn place_name(&self, lat: f64, lon: f64) -> RideviewResult<String> {
        let body: serde_json::Value = self.gate.run(|| {
            self.agent
                .get(&self.endpoint)
                .set("User-Agent", &self.user_agent)
                .query("format", "jsonv2")
                .query("lat", &lat.to_string())
                .query("lon", &lon.to_string())
                .query("zoom", "10")
                .query("addressdetails", "1")
                .call()
                .map_err(|e| RideviewError::network(format!("reverse geocode: {e}")))?
                .into_json()
                .map_err(|e| RideviewError::network(format!("reverse geocode body: {e}")))
        })?;
        Ok(place_from_response(&body))
    }
}

/// First populated settlement key of the response's `address` object.
pub fn place_from_response(body: &serde_json::Value) -> String {
    let Some(address) = body.get("address") else {
        return UNKNOWN_PLACE.to_string();
    };
    ADDRESS_KEYS
        .iter()
        .filter_map(|k| address.get(*k).and_then(serde_json::Value::as_str))
        .find(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_PLACE)
        .to_string()
}

/// Place-name lookups for one source with hysteresis.
///
/// A fresh lookup happens on every `LOOKUP_EVERY`-th sample (1-based) and whenever the previous
/// name is unknown; otherwise the previous name is reused.
pub struct PlaceNames<'a> {
    geocoder: &'a dyn Geocoder,
    index: usize,
    last: Option<String>,
}

impl<'a> PlaceNames<'a> {
    pub fn new(geocoder: &'a dyn Geocoder) -> Self {
        Self {
            geocoder,
            index: 0,
            last: None,
        }
    }

    pub fn next_name(&mut self, sample: &GpsSample) -> String {
        self.index += 1;
        let reuse = self
            .last
            .as_deref()
            .filter(|last| self.index % LOOKUP_EVERY != 0 && *last != UNKNOWN_PLACE);

        let name = match reuse {
            Some(last) => last.to_string(),
            None => self.lookup(sample),
        };
        self.last = Some(name.clone());
        name
    }

    fn lookup(&self, sample: &GpsSample) -> String {
        if sample.position().is_null_island() {
            return UNKNOWN_PLACE.to_string();
        }
        match self.geocoder.place_name(sample.latitude, sample.longitude) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(
                    lat = sample.latitude,
                    lon = sample.longitude,
                    "place lookup failed: {e}"
                );
                UNKNOWN_PLACE.to_string()
            }
        }
    }
}

/// Info-panel frames for one source, one per sample and then gap-filled like the map layer.
///
/// Names are resolved in order (the hysteresis depends on it); the panels themselves are
/// rendered in parallel.
#[tracing::instrument(skip_all, fields(samples = samples.len()))]
pub fn render_overlay_frames(
    samples: &[GpsSample],
    geocoder: &dyn Geocoder,
    painter: &Painter,
    style: &PanelStyle,
) -> RideviewResult<Vec<Frame>> {
    let mut names = PlaceNames::new(geocoder);
    let panels: Vec<PanelData> = samples
        .iter()
        .enumerate()
        .map(|(i, s)| PanelData {
            speed: s.speed,
            unit: s.speed_unit.clone(),
            lat: s.latitude,
            lon: s.longitude,
            direction: samples
                .get(i + 1)
                .filter(|n| n.has_fix())
                .and_then(|n| geo::heading(s.position(), n.position())),
            place: names.next_name(s),
            timestamp: s.timestamp,
        })
        .collect();

    let frames = panels
        .par_iter()
        .map(|p| render_panel(painter, p, style).map(|img| Frame::new(p.timestamp, img)))
        .collect::<RideviewResult<Vec<_>>>()?;

    let fallback = samples.first().map(|s| s.timestamp);
    Ok(finalize_frames(frames, fallback, || {
        image::RgbaImage::new(style.size.width, style.size.height)
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{foundation::core::Size, telemetry::sample::sample_at};

    struct Counting {
        calls: AtomicUsize,
        reply: Option<&'static str>,
    }

    impl Counting {
        fn new(reply: Option<&'static str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reply,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Geocoder for Counting {
        fn place_name(&self, _lat: f64, _lon: f64) -> RideviewResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(name) => Ok(format!("{name}{n}")),
                None => Err(RideviewError::network("offline")),
            }
        }
    }

    #[test]
    fn address_keys_are_tried_in_order() {
        let body = serde_json::json!({"address": {"village": "Cusago", "town": "Abbiategrasso"}});
        assert_eq!(place_from_response(&body), "Abbiategrasso");

        let body = serde_json::json!({"address": {"municipality": "Sedriano"}});
        assert_eq!(place_from_response(&body), "Sedriano");
    }

    #[test]
    fn missing_address_is_unknown() {
        assert_eq!(place_from_response(&serde_json::json!({})), UNKNOWN_PLACE);
        let body = serde_json::json!({"address": {"country": "Italia"}});
        assert_eq!(place_from_response(&body), UNKNOWN_PLACE);
    }

    #[test]
    fn previous_name_is_reused_between_lookups() {
        let g = Counting::new(Some("p"));
        let mut names = PlaceNames::new(&g);
        let got: Vec<String> = (0..21)
            .map(|i| names.next_name(&sample_at("a", i, 45.0, 9.0)))
            .collect();

        assert_eq!(g.calls(), 3);
        assert_eq!(got[0], "p0");
        assert_eq!(got[8], "p0");
        assert_eq!(got[9], "p1");
        assert_eq!(got[19], "p2");
        assert_eq!(got[20], "p2");
    }

    #[test]
    fn unknown_name_is_retried_every_sample() {
        let g = Counting::new(None);
        let mut names = PlaceNames::new(&g);
        for i in 0..4 {
            assert_eq!(names.next_name(&sample_at("a", i, 45.0, 9.0)), UNKNOWN_PLACE);
        }
        assert_eq!(g.calls(), 4);
    }

    #[test]
    fn null_island_never_calls_the_service() {
        let g = Counting::new(Some("p"));
        let mut names = PlaceNames::new(&g);
        assert_eq!(names.next_name(&sample_at("a", 0, 0.0, 0.0)), UNKNOWN_PLACE);
        assert_eq!(g.calls(), 0);
    }

    #[test]
    fn gate_runs_closure_once() {
        let gate = RateGate::new(Duration::ZERO);
        let mut hits = 0;
        let out = gate.run(|| {
            hits += 1;
            7
        });
        assert_eq!(out, 7);
        assert_eq!(hits, 1);
    }

    #[test]
    fn gate_serializes_callers() {
        let gate = RateGate::new(Duration::from_millis(1));
        let inside = AtomicUsize::new(0);
        let max = AtomicUsize::new(0);
        (0..8).into_par_iter().for_each(|_| {
            gate.run(|| {
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                inside.fetch_sub(1, Ordering::SeqCst);
            });
        });
        assert_eq!(max.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overlay_frames_cover_gaps() {
        let g = Counting::new(Some("p"));
        let painter = Painter::with_fontdb(usvg::fontdb::Database::new());
        let style = PanelStyle {
            size: Size::new(80, 40),
            timezone: chrono_tz::UTC,
        };
        let samples = vec![
            sample_at("a", 0, 45.0, 9.0),
            sample_at("a", 1, 45.001, 9.0),
            sample_at("a", 4, 45.002, 9.0),
        ];
        let frames = render_overlay_frames(&samples, &g, &painter, &style).unwrap();
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|f| f.image.dimensions() == (80, 40)));
        assert_eq!(g.calls(), 1);
    }

    #[test]
    fn empty_source_yields_one_blank_frame() {
        let g = Counting::new(Some("p"));
        let painter = Painter::with_fontdb(usvg::fontdb::Database::new());
        let style = PanelStyle {
            size: Size::new(8, 4),
            timezone: chrono_tz::UTC,
        };
        let frames = render_overlay_frames(&[], &g, &painter, &style).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].image.get_pixel(0, 0).0[3], 0);
    }
}
