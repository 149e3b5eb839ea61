#![forbid(unsafe_code)]

pub mod config;
pub mod draw;
pub mod encode;
pub mod foundation;
pub mod geo;
pub mod map;
pub mod overlay;
pub mod pipeline;
pub mod telemetry;
pub mod track;

pub use config::PipelineConfig;
pub use draw::Painter;
pub use encode::{
    Capabilities, CompositeCommand, CompositionSpec, Geometry, Layer, OperatorSet, Step,
    build_command, concat_videos, select_operator,
};
pub use foundation::core::{Frame, Size};
pub use foundation::error::{RideviewError, RideviewResult};
pub use geo::LatLon;
pub use map::{Mosaic, MosaicMeta, TileCoordinate, TileSource, build_mosaic, fill_gaps, plan_tiles};
pub use overlay::{Geocoder, PanelData, PanelStyle, render_panel};
pub use pipeline::{Pipeline, Workspace};
pub use telemetry::{GpsSample, SpeedUnit, parse_blob, recalculate_speed};
pub use track::{Track, from_gpx, to_gpx};
