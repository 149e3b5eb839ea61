//! GPX 1.1 import/export.
//!
//! Each source becomes one `<trk>` (with `<src>` and an ordinal `<number>`) holding a single
//! `<trkseg>`. Device speed and the raw accelerometer reading travel in `<extensions>`:
//!
//! ```xml
//! <extensions>
//!     <speed>23.4 km/h</speed>
//!     <accelerometer x="0.01" y="-0.02" z="0.98"/>
//! </extensions>
//! ```

use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::{
    foundation::error::{RideviewError, RideviewResult},
    telemetry::sample::{GpsSample, no_fix_timestamp},
    track::store::Track,
};

const GPX_NS: &str = "http://www.topografix.com/GPX/1/1";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str =
    "http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd";
const CREATOR: &str = "rideview";
const TRACK_NAME: &str = "Rideview GPS Track";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DEFAULT_SPEED_UNIT: &str = "km/h";

fn xml_err(e: impl std::fmt::Display) -> RideviewError {
    RideviewError::serde(format!("gpx: {e}"))
}

/// Serialize a track to a GPX document.
pub fn to_gpx(track: &Track) -> RideviewResult<String> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 4);

    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    w.write_event(Event::Start(BytesStart::new("gpx").with_attributes([
        ("version", "1.1"),
        ("creator", CREATOR),
        ("xmlns", GPX_NS),
        ("xmlns:xsi", XSI_NS),
        ("xsi:schemaLocation", SCHEMA_LOCATION),
    ])))
    .map_err(xml_err)?;

    start(&mut w, "metadata")?;
    text_element(&mut w, "name", TRACK_NAME)?;
    end(&mut w, "metadata")?;

    for (idx, (source, samples)) in track.sources().enumerate() {
        start(&mut w, "trk")?;
        text_element(&mut w, "src", source)?;
        text_element(&mut w, "number", &idx.to_string())?;
        start(&mut w, "trkseg")?;
        for s in samples {
            write_point(&mut w, s)?;
        }
        end(&mut w, "trkseg")?;
        end(&mut w, "trk")?;
    }

    end(&mut w, "gpx")?;

    String::from_utf8(w.into_inner()).map_err(xml_err)
}

fn write_point(w: &mut Writer<Vec<u8>>, s: &GpsSample) -> RideviewResult<()> {
    let lat = s.latitude.to_string();
    let lon = s.longitude.to_string();
    w.write_event(Event::Start(
        BytesStart::new("trkpt").with_attributes([("lat", lat.as_str()), ("lon", lon.as_str())]),
    ))
    .map_err(xml_err)?;

    text_element(w, "time", &s.timestamp.format(TIME_FORMAT).to_string())?;
    text_element(w, "geoidheight", &s.geoid_height.to_string())?;
    text_element(w, "sat", &s.satellites.to_string())?;
    text_element(w, "hdop", &s.hdop.to_string())?;

    start(w, "extensions")?;
    text_element(w, "speed", &format!("{} {}", s.speed, s.speed_unit))?;
    let [x, y, z] = s.accelerometer.map(|v| v.to_string());
    w.write_event(Event::Empty(BytesStart::new("accelerometer").with_attributes([
        ("x", x.as_str()),
        ("y", y.as_str()),
        ("z", z.as_str()),
    ])))
    .map_err(xml_err)?;
    end(w, "extensions")?;

    end(w, "trkpt")
}

fn start(w: &mut Writer<Vec<u8>>, name: &str) -> RideviewResult<()> {
    w.write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)
}

fn end(w: &mut Writer<Vec<u8>>, name: &str) -> RideviewResult<()> {
    w.write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)
}

fn text_element(w: &mut Writer<Vec<u8>>, name: &str, text: &str) -> RideviewResult<()> {
    start(w, name)?;
    w.write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    end(w, name)
}

/// Point fields collected while walking a `<trkpt>`.
#[derive(Default)]
struct PointBuilder {
    lat: f64,
    lon: f64,
    time: Option<DateTime<Utc>>,
    geoid_height: f64,
    satellites: u32,
    hdop: f64,
    speed: Option<(f64, String)>,
    accelerometer: [f64; 3],
}

impl PointBuilder {
    fn from_attributes(e: &BytesStart<'_>) -> Self {
        let mut p = Self::default();
        for a in e.attributes().flatten() {
            let value = a.unescape_value().ok().and_then(|v| v.trim().parse().ok());
            match a.key.as_ref() {
                b"lat" => p.lat = value.unwrap_or(0.0),
                b"lon" => p.lon = value.unwrap_or(0.0),
                _ => {}
            }
        }
        p
    }

    fn set_accelerometer(&mut self, e: &BytesStart<'_>) {
        for a in e.attributes().flatten() {
            let value = a
                .unescape_value()
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0.0);
            match a.key.as_ref() {
                b"x" => self.accelerometer[0] = value,
                b"y" => self.accelerometer[1] = value,
                b"z" => self.accelerometer[2] = value,
                _ => {}
            }
        }
    }

    fn set_text(&mut self, element: &[u8], text: &str) {
        let text = text.trim();
        match element {
            b"time" => {
                self.time = DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            b"geoidheight" => self.geoid_height = text.parse().unwrap_or(0.0),
            b"sat" => self.satellites = text.parse().unwrap_or(0),
            b"hdop" => self.hdop = text.parse().unwrap_or(0.0),
            b"speed" => self.speed = parse_speed(text),
            _ => {}
        }
    }

    fn build(self, source: &str) -> GpsSample {
        let (speed, speed_unit) = self
            .speed
            .unwrap_or_else(|| (0.0, DEFAULT_SPEED_UNIT.to_string()));
        GpsSample {
            source: source.to_string(),
            timestamp: self.time.unwrap_or_else(no_fix_timestamp),
            latitude: self.lat,
            longitude: self.lon,
            speed,
            speed_unit,
            hdop: self.hdop,
            geoid_height: self.geoid_height,
            satellites: self.satellites,
            accelerometer: self.accelerometer,
        }
    }
}

fn parse_speed(text: &str) -> Option<(f64, String)> {
    let (value, unit) = text.split_once(' ')?;
    Some((value.parse().ok()?, unit.trim().to_string()))
}

/// Parse a GPX document back into a track, one sample per `<trkpt>`.
///
/// Missing extension data reads as zero instead of failing the document.
pub fn from_gpx(doc: &str) -> RideviewResult<Track> {
    let mut reader = Reader::from_str(doc);
    reader.config_mut().trim_text(true);

    let mut track = Track::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut source = String::new();
    let mut point: Option<PointBuilder> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            RideviewError::track(format!(
                "malformed gpx at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Eof => break,
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"trk" => source.clear(),
                    b"trkpt" => point = Some(PointBuilder::from_attributes(&e)),
                    b"accelerometer" => {
                        if let Some(p) = point.as_mut() {
                            p.set_accelerometer(&e);
                        }
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"trkpt" => track.push(PointBuilder::from_attributes(&e).build(&source)),
                b"accelerometer" => {
                    if let Some(p) = point.as_mut() {
                        p.set_accelerometer(&e);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_err)?;
                let parent = stack.len().checked_sub(2).map(|i| stack[i].as_slice());
                match (stack.last().map(Vec::as_slice), parent) {
                    (Some(b"src"), Some(b"trk")) => source = text.trim().to_string(),
                    (Some(element), _) => {
                        if let Some(p) = point.as_mut() {
                            p.set_text(element, &text);
                        }
                    }
                    (None, _) => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"trkpt"
                    && let Some(p) = point.take()
                {
                    track.push(p.build(&source));
                }
                stack.pop();
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(track)
}

pub fn write_gpx_file(track: &Track, path: &Path) -> RideviewResult<()> {
    let doc = to_gpx(track)?;
    std::fs::write(path, doc).with_context(|| format!("write gpx '{}'", path.display()))?;
    Ok(())
}

pub fn read_gpx_file(path: &Path) -> RideviewResult<Track> {
    let doc = std::fs::read_to_string(path)
        .with_context(|| format!("read gpx '{}'", path.display()))?;
    from_gpx(&doc)
}
