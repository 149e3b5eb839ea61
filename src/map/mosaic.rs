use std::{collections::BTreeSet, fs::File, io::BufReader, path::Path};

use anyhow::Context as _;
use image::{Rgba, RgbaImage, imageops};

use crate::{
    foundation::{
        core::Size,
        error::{RideviewError, RideviewResult},
    },
    geo,
    map::tiles::{TileCoordinate, TileSource},
    telemetry::sample::GpsSample,
};

pub const DEFAULT_ZOOM: u8 = 15;
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Fill color of mosaic areas without a tile.
pub const BACKGROUND: Rgba<u8> = Rgba([128, 128, 128, 255]);

/// Stitched tile raster plus the tile-space anchor needed to project onto it.
#[derive(Clone, Debug)]
pub struct Mosaic {
    pub raster: RgbaImage,
    /// Minimum tile coordinate of the requested set; pixel (0, 0) is its top-left corner.
    pub origin: TileCoordinate,
    pub zoom: u8,
    pub tile_size: u32,
}

/// Sidecar record persisted next to the mosaic raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MosaicMeta {
    pub origin_x: i64,
    pub origin_y: i64,
    pub zoom: u8,
    pub tile_size: u32,
}

impl Mosaic {
    /// Mosaic with no pixels; every projection falls outside it.
    pub fn empty(zoom: u8, tile_size: u32) -> Self {
        Self {
            raster: RgbaImage::new(0, 0),
            origin: TileCoordinate::new(0, 0),
            zoom,
            tile_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raster.width() == 0 || self.raster.height() == 0
    }

    pub fn meta(&self) -> MosaicMeta {
        MosaicMeta {
            origin_x: self.origin.x,
            origin_y: self.origin.y,
            zoom: self.zoom,
            tile_size: self.tile_size,
        }
    }

    /// Mosaic-relative pixel position of a coordinate.
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let (x, y) = geo::pixel_coordinate(lat, lon, self.zoom, self.tile_size);
        let ts = f64::from(self.tile_size);
        (
            x - self.origin.x as f64 * ts,
            y - self.origin.y as f64 * ts,
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0
            && y >= 0.0
            && x < f64::from(self.raster.width())
            && y < f64::from(self.raster.height())
    }

    /// Write the raster as PNG and its metadata as JSON.
    pub fn save(&self, raster_path: &Path, meta_path: &Path) -> RideviewResult<()> {
        if self.is_empty() {
            return Err(RideviewError::validation("refusing to save an empty mosaic"));
        }
        self.raster
            .save_with_format(raster_path, image::ImageFormat::Png)
            .with_context(|| format!("write mosaic '{}'", raster_path.display()))?;

        let f = File::create(meta_path)
            .with_context(|| format!("create mosaic meta '{}'", meta_path.display()))?;
        serde_json::to_writer_pretty(f, &self.meta())
            .map_err(|e| RideviewError::serde(format!("mosaic meta: {e}")))?;
        Ok(())
    }

    /// Reload a mosaic written by [`Mosaic::save`].
    pub fn load(raster_path: &Path, meta_path: &Path) -> RideviewResult<Self> {
        let f = File::open(meta_path)
            .with_context(|| format!("open mosaic meta '{}'", meta_path.display()))?;
        let meta: MosaicMeta = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| RideviewError::serde(format!("mosaic meta: {e}")))?;

        let mut reader = image::ImageReader::open(raster_path)
            .with_context(|| format!("open mosaic '{}'", raster_path.display()))?
            .with_guessed_format()
            .with_context(|| format!("detect format of '{}'", raster_path.display()))?;
        // Mosaics of long rides exceed the decoder's default allocation limit.
        reader.no_limits();
        let raster = reader
            .decode()
            .with_context(|| format!("decode mosaic '{}'", raster_path.display()))?
            .to_rgba8();

        Ok(Self {
            raster,
            origin: TileCoordinate::new(meta.origin_x, meta.origin_y),
            zoom: meta.zoom,
            tile_size: meta.tile_size,
        })
    }
}

/// Tiles needed to render a `viewport` window centred on any fixed sample.
///
/// Samples without a fix are ignored. Each sample contributes its own tile plus a margin of
/// `ceil(viewport / (2 * tile_size))` tiles per axis.
pub fn plan_tiles<'a>(
    samples: impl IntoIterator<Item = &'a GpsSample>,
    viewport: Size,
    zoom: u8,
    tile_size: u32,
) -> BTreeSet<TileCoordinate> {
    let margin_x = i64::from(viewport.width.div_ceil(2 * tile_size));
    let margin_y = i64::from(viewport.height.div_ceil(2 * tile_size));

    let mut tiles = BTreeSet::new();
    for s in samples.into_iter().filter(|s| s.has_fix()) {
        let (tx, ty) = geo::tile_index(s.latitude, s.longitude, zoom);
        for dx in -margin_x..=margin_x {
            for dy in -margin_y..=margin_y {
                tiles.insert(TileCoordinate::new(tx + dx, ty + dy));
            }
        }
    }
    tiles
}

/// Fetch every planned tile and stitch them onto a gray canvas.
///
/// The canvas spans the bounding box of `plan`, so tiles that fail to fetch or decode simply
/// leave background behind.
#[tracing::instrument(skip_all, fields(tiles = plan.len(), zoom = zoom))]
pub fn build_mosaic(
    plan: &BTreeSet<TileCoordinate>,
    zoom: u8,
    tile_size: u32,
    source: &mut dyn TileSource,
) -> RideviewResult<Mosaic> {
    if tile_size == 0 {
        return Err(RideviewError::validation("tile size must be non-zero"));
    }
    let (Some(min_x), Some(max_x)) = (
        plan.iter().map(|t| t.x).min(),
        plan.iter().map(|t| t.x).max(),
    ) else {
        tracing::info!("no tiles to fetch; using an empty mosaic");
        return Ok(Mosaic::empty(zoom, tile_size));
    };
    let min_y = plan.iter().map(|t| t.y).min().unwrap_or(0);
    let max_y = plan.iter().map(|t| t.y).max().unwrap_or(0);

    let cols = u32::try_from(max_x - min_x + 1)
        .map_err(|_| RideviewError::validation("tile plan is too wide"))?;
    let rows = u32::try_from(max_y - min_y + 1)
        .map_err(|_| RideviewError::validation("tile plan is too tall"))?;
    let width = cols
        .checked_mul(tile_size)
        .ok_or_else(|| RideviewError::validation("mosaic width overflows"))?;
    let height = rows
        .checked_mul(tile_size)
        .ok_or_else(|| RideviewError::validation("mosaic height overflows"))?;

    tracing::info!(width, height, "building mosaic");
    let mut raster = RgbaImage::from_pixel(width, height, BACKGROUND);

    let mut missing = 0usize;
    for (idx, &tile) in plan.iter().enumerate() {
        let Some(img) = fetch_tile(source, zoom, tile, tile_size) else {
            missing += 1;
            continue;
        };
        let x = (tile.x - min_x) * i64::from(tile_size);
        let y = (tile.y - min_y) * i64::from(tile_size);
        imageops::replace(&mut raster, &img, x, y);

        if (idx + 1) % 100 == 0 {
            tracing::debug!(done = idx + 1, total = plan.len(), "tiles fetched");
        }
    }
    if missing > 0 {
        tracing::warn!(missing, "some tiles were unavailable; left as background");
    }

    Ok(Mosaic {
        raster,
        origin: TileCoordinate::new(min_x, min_y),
        zoom,
        tile_size,
    })
}

fn fetch_tile(
    source: &mut dyn TileSource,
    zoom: u8,
    tile: TileCoordinate,
    tile_size: u32,
) -> Option<RgbaImage> {
    let bytes = match source.fetch(zoom, tile) {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(x = tile.x, y = tile.y, "tile unavailable: {e}");
            return None;
        }
    };
    let img = match image::load_from_memory(&bytes) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            tracing::debug!(x = tile.x, y = tile.y, "tile not decodable: {e}");
            return None;
        }
    };
    if img.dimensions() == (tile_size, tile_size) {
        Some(img)
    } else {
        Some(imageops::resize(
            &img,
            tile_size,
            tile_size,
            imageops::FilterType::Triangle,
        ))
    }
}
