pub mod frames;
pub mod mosaic;
pub mod tiles;

pub use frames::{ATTRIBUTION, MapFrameSynth, fill_gaps, finalize_frames};
pub use mosaic::{Mosaic, MosaicMeta, build_mosaic, plan_tiles};
pub use tiles::{HttpTileSource, Pacer, TileCoordinate, TileSource};
