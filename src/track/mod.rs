pub mod gpx;
pub mod store;

pub use gpx::{from_gpx, read_gpx_file, to_gpx, write_gpx_file};
pub use store::Track;
