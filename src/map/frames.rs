use chrono::{DateTime, TimeDelta, Utc};
use image::{RgbaImage, imageops};

use crate::{
    draw::{Painter, SvgDoc, TextStyle},
    foundation::{
        core::{BezPath, Frame, Point, Size},
        error::RideviewResult,
    },
    geo,
    map::mosaic::{BACKGROUND, Mosaic},
    telemetry::sample::GpsSample,
};

pub const ATTRIBUTION: &str = "© OpenStreetMap";

const MARKER_RADIUS: f64 = 10.0;
const MARKER_FILL: &str = "blue";
/// Angle between the tip and each back corner of the heading triangle, in radians.
const MARKER_WING: f64 = 2.5;
const CAPTION_SIZE: f64 = 20.0;
const CAPTION_INSET: f64 = 10.0;

/// Renders map frames for one source from a prebuilt mosaic.
pub struct MapFrameSynth<'a> {
    mosaic: &'a Mosaic,
    painter: &'a Painter,
    viewport: Size,
    placeholder: RgbaImage,
}

impl<'a> MapFrameSynth<'a> {
    pub fn new(mosaic: &'a Mosaic, painter: &'a Painter, viewport: Size) -> RideviewResult<Self> {
        viewport.validate("map viewport")?;
        let placeholder = painter.placeholder(viewport)?;
        Ok(Self {
            mosaic,
            painter,
            viewport,
            placeholder,
        })
    }

    /// Frames for `samples` (one source, in track order), gap-filled and sorted.
    #[tracing::instrument(skip_all, fields(samples = samples.len()))]
    pub fn synthesize(&self, samples: &[GpsSample]) -> RideviewResult<Vec<Frame>> {
        let mut frames = Vec::with_capacity(samples.len());
        for (i, sample) in samples.iter().enumerate() {
            frames.push(self.frame_for(sample, samples.get(i + 1))?);
        }

        let fallback = samples.first().map(|s| s.timestamp);
        Ok(finalize_frames(frames, fallback, || self.placeholder.clone()))
    }

    /// Map frame for one sample; `next` orients the heading marker.
    pub fn frame_for(&self, sample: &GpsSample, next: Option<&GpsSample>) -> RideviewResult<Frame> {
        let (x, y) = self.mosaic.project(sample.latitude, sample.longitude);
        if !sample.has_fix() || !self.mosaic.contains(x, y) {
            return Ok(Frame::new(sample.timestamp, self.placeholder.clone()));
        }

        let mut window = self.crop(x, y);

        let heading = next
            .filter(|n| n.has_fix())
            .and_then(|n| geo::heading(sample.position(), n.position()));

        let mut svg = SvgDoc::new(self.viewport);
        draw_marker(&mut svg, self.viewport.center(), heading);
        svg.text(
            f64::from(self.viewport.width) - CAPTION_INSET,
            f64::from(self.viewport.height) - CAPTION_INSET,
            ATTRIBUTION,
            &TextStyle::bold(CAPTION_SIZE).fill("black").anchor("end"),
        );
        self.painter.render_over(&mut window, &svg.finish())?;

        Ok(Frame::new(sample.timestamp, window))
    }

    /// Viewport-sized window centred on mosaic pixel `(x, y)`; parts beyond the mosaic are
    /// background.
    fn crop(&self, x: f64, y: f64) -> RgbaImage {
        let left = x.round() as i64 - i64::from(self.viewport.width / 2);
        let top = y.round() as i64 - i64::from(self.viewport.height / 2);

        let mut window =
            RgbaImage::from_pixel(self.viewport.width, self.viewport.height, BACKGROUND);
        imageops::replace(&mut window, &self.mosaic.raster, -left, -top);
        window
    }
}

/// Circle when the heading is unknown, otherwise a triangle pointing along it.
fn draw_marker(svg: &mut SvgDoc, center: Point, heading_deg: Option<f64>) {
    let Some(heading) = heading_deg else {
        svg.circle(center.x, center.y, MARKER_RADIUS, MARKER_FILL);
        return;
    };

    // Compass bearing (0 = north, clockwise) to screen angle (0 = +x, y down).
    let angle = (heading - 90.0).to_radians();
    let corner = |a: f64| {
        Point::new(
            center.x + MARKER_RADIUS * a.cos(),
            center.y + MARKER_RADIUS * a.sin(),
        )
    };

    let mut path = BezPath::new();
    path.move_to(corner(angle));
    path.line_to(corner(angle + MARKER_WING));
    path.line_to(corner(angle - MARKER_WING));
    path.close_path();
    svg.path_fill(&path, MARKER_FILL);
}

/// Sort, fill gaps and guarantee a non-empty sequence.
///
/// An empty input becomes a single `placeholder` frame stamped with `fallback` (or now).
pub fn finalize_frames(
    frames: Vec<Frame>,
    fallback: Option<DateTime<Utc>>,
    placeholder: impl FnOnce() -> RgbaImage,
) -> Vec<Frame> {
    let frames = fill_gaps(frames);
    if frames.is_empty() {
        return vec![Frame::new(fallback.unwrap_or_else(Utc::now), placeholder())];
    }
    frames
}

/// Insert `floor(gap) - 1` copies of the earlier frame into every gap longer than one second.
///
/// Copies are spaced evenly between the two frames. Only time is interpolated; the copies show
/// the earlier position. Frames repeating an earlier timestamp are dropped.
pub fn fill_gaps(mut frames: Vec<Frame>) -> Vec<Frame> {
    frames.sort_by_key(|f| f.timestamp);
    frames.dedup_by_key(|f| f.timestamp);

    let mut out = Vec::with_capacity(frames.len());
    let mut iter = frames.into_iter().peekable();
    while let Some(frame) = iter.next() {
        let next_ts = iter.peek().map(|n| n.timestamp);
        let copies = next_ts
            .map(|t| gap_copies(frame.timestamp, t))
            .unwrap_or_default();
        out.push(frame);

        let Some((count, step_ms)) = copies else {
            continue;
        };
        let last = out.len() - 1;
        for j in 1..=count {
            let ts = out[last].timestamp + TimeDelta::milliseconds(step_ms * j);
            let image = out[last].image.clone();
            out.push(Frame::new(ts, image));
        }
    }

    out.sort_by_key(|f| f.timestamp);
    out
}

/// Number of copies for the gap `a..b` and their spacing in milliseconds.
fn gap_copies(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<(i64, i64)> {
    let gap_ms = (b - a).num_milliseconds();
    if gap_ms <= 1000 {
        return None;
    }
    let whole = gap_ms / 1000;
    if whole < 2 {
        return None;
    }
    Some((whole - 1, gap_ms / whole))
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::{map::tiles::TileCoordinate, telemetry::sample::sample_at};

    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const LAND: Rgba<u8> = Rgba([240, 240, 240, 255]);

    fn painter() -> Painter {
        Painter::with_fontdb(usvg::fontdb::Database::new())
    }

    fn milan_mosaic() -> Mosaic {
        Mosaic {
            raster: RgbaImage::from_pixel(768, 768, LAND),
            origin: TileCoordinate::new(17219, 11726),
            zoom: 15,
            tile_size: 256,
        }
    }

    fn ts(f: &Frame) -> i64 {
        f.timestamp.timestamp_millis()
    }

    fn blank(secs: i64) -> Frame {
        Frame::new(
            DateTime::from_timestamp(secs, 0).unwrap(),
            RgbaImage::new(1, 1),
        )
    }

    #[test]
    fn three_second_gap_gets_two_copies() {
        let out = fill_gaps(vec![blank(10), blank(13)]);
        let stamps: Vec<i64> = out.iter().map(ts).collect();
        assert_eq!(stamps, vec![10_000, 11_000, 12_000, 13_000]);
    }

    #[test]
    fn uniform_track_covers_every_second() {
        let out = fill_gaps((0..=7).map(blank).collect());
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn repeated_timestamp_keeps_first_frame() {
        let mut first = blank(100);
        first.image.put_pixel(0, 0, Rgba([9, 9, 9, 9]));
        let out = fill_gaps(vec![first, blank(100), blank(103)]);
        let stamps: Vec<i64> = out.iter().map(ts).collect();
        assert_eq!(stamps, vec![100_000, 101_000, 102_000, 103_000]);
        assert_eq!(out[0].image.get_pixel(0, 0).0, [9, 9, 9, 9]);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn gap_of_two_and_a_half_seconds_gets_one_copy() {
        let later = Frame::new(
            DateTime::from_timestamp_millis(2_500).unwrap(),
            RgbaImage::new(1, 1),
        );
        let out = fill_gaps(vec![blank(0), later]);
        let stamps: Vec<i64> = out.iter().map(ts).collect();
        assert_eq!(stamps, vec![0, 1_250, 2_500]);
    }

    #[test]
    fn copies_repeat_the_earlier_image() {
        let mut a = blank(0);
        a.image.put_pixel(0, 0, Rgba([1, 2, 3, 4]));
        let out = fill_gaps(vec![blank(3), a]);
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].image.get_pixel(0, 0).0, [1, 2, 3, 4]);
        assert_eq!(out[3].image.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn empty_sequence_becomes_one_placeholder() {
        let when = DateTime::from_timestamp(42, 0).unwrap();
        let out = finalize_frames(Vec::new(), Some(when), || RgbaImage::new(2, 2));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, when);
    }

    #[test]
    fn sample_without_fix_yields_single_placeholder() {
        let p = painter();
        let m = Mosaic::empty(15, 256);
        let synth = MapFrameSynth::new(&m, &p, Size::new(64, 64)).unwrap();
        let s = sample_at("a", 0, 0.0, 0.0);
        let frames = synth.synthesize(std::slice::from_ref(&s)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp, s.timestamp);
        assert_eq!(frames[0].image.get_pixel(0, 0).0, [45, 45, 45, 255]);
    }

    #[test]
    fn point_outside_mosaic_is_placeholder() {
        let p = painter();
        let m = milan_mosaic();
        let synth = MapFrameSynth::new(&m, &p, Size::new(64, 64)).unwrap();
        let rome = sample_at("a", 0, 41.9, 12.5);
        let f = synth.frame_for(&rome, None).unwrap();
        assert_eq!(f.image.get_pixel(0, 0).0, [45, 45, 45, 255]);
    }

    #[test]
    fn last_sample_gets_circle_marker() {
        let p = painter();
        let m = milan_mosaic();
        let synth = MapFrameSynth::new(&m, &p, Size::new(64, 64)).unwrap();
        let s = sample_at("a", 0, 45.4642, 9.19);
        let f = synth.frame_for(&s, None).unwrap();
        assert_eq!(f.image.get_pixel(32, 32).0, BLUE);
        assert_eq!(f.image.get_pixel(26, 26).0, BLUE);
        assert_eq!(*f.image.get_pixel(2, 2), LAND);
    }

    #[test]
    fn identical_next_sample_gets_circle_marker() {
        let p = painter();
        let m = milan_mosaic();
        let synth = MapFrameSynth::new(&m, &p, Size::new(64, 64)).unwrap();
        let s = sample_at("a", 0, 45.4642, 9.19);
        let n = sample_at("a", 1, 45.4642, 9.19);
        let f = synth.frame_for(&s, Some(&n)).unwrap();
        assert_eq!(f.image.get_pixel(26, 26).0, BLUE);
    }

    #[test]
    fn moving_north_gets_upward_triangle() {
        let p = painter();
        let m = milan_mosaic();
        let synth = MapFrameSynth::new(&m, &p, Size::new(64, 64)).unwrap();
        let s = sample_at("a", 0, 45.4642, 9.19);
        let n = sample_at("a", 1, 45.4652, 9.19);
        let f = synth.frame_for(&s, Some(&n)).unwrap();
        assert_eq!(f.image.get_pixel(32, 37).0, BLUE);
        assert_eq!(*f.image.get_pixel(26, 26), LAND);
    }

    #[test]
    fn window_near_mosaic_edge_is_padded_with_background() {
        let p = painter();
        let m = Mosaic {
            raster: RgbaImage::from_pixel(256, 256, LAND),
            origin: TileCoordinate::new(17220, 11727),
            zoom: 15,
            tile_size: 256,
        };
        let synth = MapFrameSynth::new(&m, &p, Size::new(480, 640)).unwrap();
        let s = sample_at("a", 0, 45.4642, 9.19);
        let f = synth.frame_for(&s, None).unwrap();
        assert_eq!(f.image.dimensions(), (480, 640));
        assert_eq!(*f.image.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*f.image.get_pixel(240, 300), LAND);
    }

    #[test]
    fn gap_between_samples_is_filled() {
        let p = painter();
        let m = milan_mosaic();
        let synth = MapFrameSynth::new(&m, &p, Size::new(64, 64)).unwrap();
        let samples = vec![
            sample_at("a", 0, 45.4642, 9.19),
            sample_at("a", 3, 45.4643, 9.19),
        ];
        let frames = synth.synthesize(&samples).unwrap();
        assert_eq!(frames.len(), 4);
        assert!(frames.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
