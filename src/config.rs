use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::Context as _;

use crate::{
    encode::compose::Geometry,
    foundation::{
        core::Size,
        error::{RideviewError, RideviewResult},
    },
    map::{
        mosaic::{DEFAULT_TILE_SIZE, DEFAULT_ZOOM},
        tiles::{DEFAULT_TILE_URL, DEFAULT_USER_AGENT},
    },
    overlay::places::DEFAULT_NOMINATIM_URL,
    telemetry::speed::SpeedUnit,
};

/// Highest zoom served by the standard OpenStreetMap tile servers.
pub const MAX_ZOOM: u8 = 19;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Map window size in pixels.
    pub viewport: Size,
    pub zoom: u8,
    pub tile_size: u32,
    pub tile_url: String,
    pub user_agent: String,
    /// Minimum pause between tile requests, in milliseconds.
    pub tile_pacing_ms: u64,

    pub geocoder_url: String,
    /// Pause after every place-name request, in milliseconds.
    pub geocoder_delay_ms: u64,

    /// IANA zone used for the info panel clock.
    pub timezone: String,
    /// Replace device speeds with position-derived ones in this unit.
    pub recalc_speed: Option<SpeedUnit>,

    pub main_size: Size,
    pub rear_scale: f64,
    pub map_scale: f64,
    pub map_margin: u32,
    pub info_size: Size,
    pub info_scale: f64,
    pub info_overlay: bool,
    pub output_fps: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            viewport: Size::new(480, 640),
            zoom: DEFAULT_ZOOM,
            tile_size: DEFAULT_TILE_SIZE,
            tile_url: DEFAULT_TILE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            tile_pacing_ms: 100,
            geocoder_url: DEFAULT_NOMINATIM_URL.to_string(),
            geocoder_delay_ms: 200,
            timezone: "Europe/Rome".to_string(),
            recalc_speed: None,
            main_size: Size::new(1920, 1080),
            rear_scale: 0.25,
            map_scale: 0.8,
            map_margin: 55,
            info_size: Size::new(800, 400),
            info_scale: 0.5,
            info_overlay: true,
            output_fps: 30,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> RideviewResult<Self> {
        let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| RideviewError::serde(format!("config '{}': {e}", path.display())))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> RideviewResult<()> {
        self.viewport.validate_even("map viewport")?;
        self.info_size.validate_even("info panel")?;
        self.main_size.validate("main video")?;
        if self.zoom > MAX_ZOOM {
            return Err(RideviewError::validation(format!(
                "zoom must be at most {MAX_ZOOM}, got {}",
                self.zoom
            )));
        }
        if self.tile_size == 0 {
            return Err(RideviewError::validation("tile_size must be non-zero"));
        }
        if self.output_fps == 0 {
            return Err(RideviewError::validation("output_fps must be non-zero"));
        }
        for (name, v) in [
            ("rear_scale", self.rear_scale),
            ("map_scale", self.map_scale),
            ("info_scale", self.info_scale),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(RideviewError::validation(format!(
                    "{name} must be positive, got {v}"
                )));
            }
        }
        if ["{z}", "{x}", "{y}"]
            .iter()
            .any(|p| !self.tile_url.contains(p))
        {
            return Err(RideviewError::validation(
                "tile_url must contain {z}, {x} and {y}",
            ));
        }
        self.tz()?;
        Ok(())
    }

    pub fn tz(&self) -> RideviewResult<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|_| RideviewError::validation(format!("unknown timezone '{}'", self.timezone)))
    }

    pub fn tile_pacing(&self) -> Duration {
        Duration::from_millis(self.tile_pacing_ms)
    }

    pub fn geocoder_delay(&self) -> Duration {
        Duration::from_millis(self.geocoder_delay_ms)
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            main_size: self.main_size,
            map_size: self.viewport,
            map_margin: self.map_margin,
            output_fps: self.output_fps,
        }
    }
}
