use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::foundation::{
    core::Size,
    error::{RideviewError, RideviewResult},
};

pub const FONT_FAMILY: &str = "DejaVu Sans, Verdana, Arial, sans-serif";

/// Neutral gray of "no data" frames.
pub const PLACEHOLDER_GRAY: [u8; 3] = [45, 45, 45];
pub const PLACEHOLDER_TEXT: &str = "N/A";

/// SVG rasterizer sharing one font database across calls.
pub struct Painter {
    opts: usvg::Options<'static>,
}

impl Painter {
    /// Painter backed by the fonts installed on the system.
    pub fn with_system_fonts() -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(faces = db.len(), "loaded system fonts");
        Self::with_fontdb(db)
    }

    pub fn with_fontdb(db: usvg::fontdb::Database) -> Self {
        let mut opts = usvg::Options::default();
        opts.fontdb = Arc::new(db);
        Self { opts }
    }

    /// Rasterize `svg` into a `size` canvas, returned as straight-alpha RGBA.
    pub fn render(&self, svg: &str, size: Size) -> RideviewResult<RgbaImage> {
        size.validate("svg canvas")?;
        let tree = usvg::Tree::from_str(svg, &self.opts)
            .map_err(|e| RideviewError::render(format!("invalid svg: {e}")))?;

        let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width, size.height)
            .ok_or_else(|| RideviewError::render("failed to allocate svg pixmap"))?;
        resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        let mut out = RgbaImage::new(size.width, size.height);
        for (dst, px) in out.pixels_mut().zip(pixmap.pixels()) {
            let c = px.demultiply();
            *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
        }
        Ok(out)
    }

    /// Rasterize `svg` and alpha-blend it over `base` (same size).
    pub fn render_over(&self, base: &mut RgbaImage, svg: &str) -> RideviewResult<()> {
        let size = Size::new(base.width(), base.height());
        let layer = self.render(svg, size)?;
        image::imageops::overlay(base, &layer, 0, 0);
        Ok(())
    }

    /// Gray "N/A" frame.
    pub fn placeholder(&self, size: Size) -> RideviewResult<RgbaImage> {
        let mut svg = SvgDoc::new(size);
        svg.rect_fill(size, PLACEHOLDER_GRAY);
        svg.text(
            size.center().x,
            size.center().y,
            PLACEHOLDER_TEXT,
            &TextStyle::bold(40.0).anchor("middle").baseline("central"),
        );
        self.render(&svg.finish(), size)
    }
}

/// Text attributes for [`SvgDoc::text`].
#[derive(Clone, Debug)]
pub struct TextStyle {
    pub size: f64,
    pub fill: String,
    pub anchor: &'static str,
    pub baseline: &'static str,
}

impl TextStyle {
    pub fn bold(size: f64) -> Self {
        Self {
            size,
            fill: "white".to_string(),
            anchor: "start",
            baseline: "auto",
        }
    }

    pub fn fill(mut self, fill: impl Into<String>) -> Self {
        self.fill = fill.into();
        self
    }

    pub fn anchor(mut self, anchor: &'static str) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn baseline(mut self, baseline: &'static str) -> Self {
        self.baseline = baseline;
        self
    }
}

/// Minimal SVG builder.
pub struct SvgDoc {
    body: String,
}

impl SvgDoc {
    pub fn new(size: Size) -> Self {
        let body = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = size.width,
            h = size.height
        );
        Self { body }
    }

    pub fn rect_fill(&mut self, size: Size, rgb: [u8; 3]) {
        self.body.push_str(&format!(
            r#"<rect x="0" y="0" width="{}" height="{}" fill="{}"/>"#,
            size.width,
            size.height,
            rgb_hex(rgb)
        ));
    }

    pub fn circle(&mut self, cx: f64, cy: f64, r: f64, fill: &str) {
        self.body.push_str(&format!(
            r#"<circle cx="{cx:.2}" cy="{cy:.2}" r="{r:.2}" fill="{fill}"/>"#
        ));
    }

    /// Filled path from `kurbo` path data.
    pub fn path_fill(&mut self, path: &kurbo::BezPath, fill: &str) {
        self.body.push_str(&format!(r#"<path d="{}" fill="{fill}"/>"#, path.to_svg()));
    }

    pub fn path_stroke(&mut self, path: &kurbo::BezPath, stroke: &str, opacity: f64, width: f64) {
        self.body.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{stroke}" stroke-opacity="{opacity:.3}" stroke-width="{width:.2}"/>"#,
            path.to_svg()
        ));
    }

    pub fn line(&mut self, p0: kurbo::Point, p1: kurbo::Point, stroke: &str, width: f64) {
        self.body.push_str(&format!(
            r#"<line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" stroke="{stroke}" stroke-width="{width:.2}"/>"#,
            p0.x,
            p0.y,
            p1.x,
            p1.y
        ));
    }

    pub fn text(&mut self, x: f64, y: f64, text: &str, style: &TextStyle) {
        self.body.push_str(&format!(
            r#"<text x="{x:.2}" y="{y:.2}" font-family="{FONT_FAMILY}" font-weight="bold" font-size="{:.1}" fill="{}" text-anchor="{}" dominant-baseline="{}">{}</text>"#,
            style.size,
            style.fill,
            style.anchor,
            style.baseline,
            escape_text(text)
        ));
    }

    pub fn finish(mut self) -> String {
        self.body.push_str("</svg>");
        self.body
    }
}

fn rgb_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn painter() -> Painter {
        Painter::with_fontdb(usvg::fontdb::Database::new())
    }

    #[test]
    fn placeholder_is_gray() {
        let img = painter().placeholder(Size::new(64, 48)).unwrap();
        assert_eq!(img.dimensions(), (64, 48));
        assert_eq!(img.get_pixel(1, 1).0, [45, 45, 45, 255]);
    }

    #[test]
    fn circle_is_drawn_at_center() {
        let size = Size::new(32, 32);
        let mut svg = SvgDoc::new(size);
        svg.circle(16.0, 16.0, 6.0, "blue");
        let img = painter().render(&svg.finish(), size).unwrap();
        assert_eq!(img.get_pixel(16, 16).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(1, 1).0[3], 0);
    }

    #[test]
    fn render_over_keeps_uncovered_pixels() {
        let size = Size::new(16, 16);
        let mut base = RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 255]));
        let mut svg = SvgDoc::new(size);
        svg.circle(8.0, 8.0, 3.0, "red");
        painter().render_over(&mut base, &svg.finish()).unwrap();
        assert_eq!(base.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(base.get_pixel(8, 8).0, [255, 0, 0, 255]);
    }

    #[test]
    fn text_is_escaped() {
        assert_eq!(escape_text("a<b & c"), "a&lt;b &amp; c");
    }

    #[test]
    fn invalid_svg_is_an_error() {
        assert!(painter().render("<svg", Size::new(4, 4)).is_err());
    }
}
