use chrono::{DateTime, Utc};
use image::RgbaImage;
use kurbo::{Arc, Shape as _, Vec2};

use crate::{
    draw::{Painter, SvgDoc, TextStyle},
    foundation::{
        core::{Point, Size},
        error::RideviewResult,
    },
};

/// Full-scale value of the gauge.
pub const GAUGE_MAX: f64 = 160.0;

const START_DEG: f64 = 175.0;
const SWEEP_DEG: f64 = 190.0;
const DISK_RGB: [u8; 3] = [30, 30, 30];
const ARC_STROKE: &str = "rgb(0,200,255)";
const ARC_OPACITY: f64 = 180.0 / 255.0;
const TIME_FORMAT: &str = "%d/%m/%Y %H:%M %Z%z";

/// Everything shown on one panel.
#[derive(Clone, Debug, PartialEq)]
pub struct PanelData {
    pub speed: f64,
    pub unit: String,
    pub lat: f64,
    pub lon: f64,
    /// Bearing to the next sample in degrees, if defined.
    pub direction: Option<f64>,
    pub place: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
pub struct PanelStyle {
    pub size: Size,
    pub timezone: chrono_tz::Tz,
}

struct Geometry {
    center: Point,
    radius: f64,
    width: f64,
    height: f64,
}

impl Geometry {
    fn new(size: Size) -> Self {
        let width = f64::from(size.width);
        let height = f64::from(size.height);
        Self {
            center: Point::new((width / 2.0).floor(), height * 0.9),
            radius: width.min(height * 1.8) * 0.45,
            width,
            height,
        }
    }

    fn polar(&self, r: f64, deg: f64) -> Point {
        self.center + Vec2::from_angle(deg.to_radians()) * r
    }
}

/// Render the gauge panel on a transparent canvas.
///
/// Pure: the same input always yields the same image.
pub fn render_panel(
    painter: &Painter,
    data: &PanelData,
    style: &PanelStyle,
) -> RideviewResult<RgbaImage> {
    style.size.validate("info panel")?;
    let g = Geometry::new(style.size);
    let small = (g.width / 40.0).floor();
    let big = (g.width / 14.0).floor();

    let mut svg = SvgDoc::new(style.size);

    // disk
    svg.circle(
        g.center.x,
        g.center.y,
        g.radius,
        &format!("rgb({},{},{})", DISK_RGB[0], DISK_RGB[1], DISK_RGB[2]),
    );

    // speed arc, under the ticks
    let sweep = gauge_angle(data.speed) - START_DEG;
    if sweep > 0.0 {
        let arc = Arc {
            center: g.center,
            radii: Vec2::new(g.radius, g.radius),
            start_angle: START_DEG.to_radians(),
            sweep_angle: sweep.to_radians(),
            x_rotation: 0.0,
        };
        svg.path_stroke(&arc.to_path(0.1), ARC_STROKE, ARC_OPACITY, (g.width * 0.04).floor());
    }

    draw_ticks(&mut svg, &g, small);

    let readout_y = g.center.y - g.radius * 0.4;
    svg.text(
        g.center.x,
        readout_y,
        &format!("{:.0} {}", data.speed, data.unit),
        &TextStyle::bold(big).anchor("middle").baseline("central"),
    );

    let lines = [
        format!("N: {:.5}", data.lat),
        format!("E: {:.5}", data.lon),
        direction_label(data.direction),
        data.place.clone(),
    ];
    let mut y = readout_y + big / 2.0 + 10.0;
    for line in &lines {
        svg.text(
            g.center.x,
            y,
            line,
            &TextStyle::bold(small).anchor("middle").baseline("hanging"),
        );
        y += small + 4.0;
    }

    let local = data.timestamp.with_timezone(&style.timezone);
    svg.text(
        g.center.x,
        g.height - 10.0,
        &local.format(TIME_FORMAT).to_string(),
        &TextStyle::bold(small).anchor("middle"),
    );

    painter.render(&svg.finish(), style.size)
}

/// Minor ticks every 2 units; majors every 10 carry a label.
fn draw_ticks(svg: &mut SvgDoc, g: &Geometry, label_size: f64) {
    for k in (0..=GAUGE_MAX as u32).step_by(2) {
        let deg = gauge_angle(f64::from(k));
        let major = k % 10 == 0;
        let (len, lw) = if major {
            (g.width * 0.04, 3.0)
        } else {
            (g.width * 0.025, 2.0)
        };
        svg.line(g.polar(g.radius - len, deg), g.polar(g.radius, deg), "white", lw);

        if major {
            let at = g.polar(g.radius - g.width * 0.07, deg);
            svg.text(
                at.x,
                at.y,
                &k.to_string(),
                &TextStyle::bold(label_size).anchor("middle").baseline("central"),
            );
        }
    }
}

/// Whole degrees in `[0, 360)`, truncated; no direction reads as 0.
fn direction_label(direction: Option<f64>) -> String {
    let deg = direction.map_or(0, |d| (d.floor() as i64).rem_euclid(360));
    format!("Dir: {deg}°")
}

/// Angle of the needle end for `speed`, in degrees clockwise from +x.
pub fn gauge_angle(speed: f64) -> f64 {
    START_DEG + SWEEP_DEG * speed.clamp(0.0, GAUGE_MAX) / GAUGE_MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    fn painter() -> Painter {
        Painter::with_fontdb(usvg::fontdb::Database::new())
    }

    fn data(speed: f64) -> PanelData {
        PanelData {
            speed,
            unit: "km/h".to_string(),
            lat: 45.4642,
            lon: 9.19,
            direction: Some(12.0),
            place: "Milano".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    fn style() -> PanelStyle {
        PanelStyle {
            size: Size::new(800, 400),
            timezone: chrono_tz::Europe::Rome,
        }
    }

    // Point between the disk edge (r=324) and the outer edge of the arc stroke (r=340),
    // just past the 270 degree mark.
    const ARC_EDGE_PX: (u32, u32) = (406, 28);

    #[test]
    fn panel_has_transparent_background_and_dark_disk() {
        let img = render_panel(&painter(), &data(50.0), &style()).unwrap();
        assert_eq!(img.dimensions(), (800, 400));
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
        assert_eq!(img.get_pixel(400, 350).0, [30, 30, 30, 255]);
    }

    #[test]
    fn full_speed_reaches_the_top_of_the_gauge() {
        let img = render_panel(&painter(), &data(160.0), &style()).unwrap();
        let px = img.get_pixel(ARC_EDGE_PX.0, ARC_EDGE_PX.1).0;
        assert!((170..=190).contains(&px[3]), "alpha {}", px[3]);
        assert!(px[2] > 200);
    }

    #[test]
    fn arc_length_follows_speed() {
        let img = render_panel(&painter(), &data(40.0), &style()).unwrap();
        assert_eq!(img.get_pixel(ARC_EDGE_PX.0, ARC_EDGE_PX.1).0[3], 0);
    }

    #[test]
    fn speed_above_full_scale_is_clamped() {
        assert_eq!(gauge_angle(300.0), gauge_angle(GAUGE_MAX));
        assert_eq!(gauge_angle(-5.0), START_DEG);
        assert_eq!(gauge_angle(80.0), 270.0);
    }

    #[test]
    fn same_input_same_pixels() {
        let a = render_panel(&painter(), &data(33.0), &style()).unwrap();
        let b = render_panel(&painter(), &data(33.0), &style()).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn zero_sized_panel_is_rejected() {
        let s = PanelStyle {
            size: Size::new(0, 400),
            ..style()
        };
        assert!(render_panel(&painter(), &data(0.0), &s).is_err());
    }

    #[test]
    fn direction_is_truncated_into_range() {
        assert_eq!(direction_label(Some(359.6)), "Dir: 359°");
        assert_eq!(direction_label(Some(12.9)), "Dir: 12°");
        assert_eq!(direction_label(Some(360.0)), "Dir: 0°");
        assert_eq!(direction_label(None), "Dir: 0°");
    }

    #[test]
    fn timestamp_is_shown_in_local_time() {
        let local = data(0.0).timestamp.with_timezone(&chrono_tz::Europe::Rome);
        assert_eq!(local.format(TIME_FORMAT).to_string(), "14/11/2023 23:13 CET+0100");
    }
}
