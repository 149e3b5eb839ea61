pub mod extract;
pub mod sample;
pub mod speed;

pub use extract::{MAGIC_PREFIX, demux_data_stream, extract_segment, parse_blob, parse_record};
pub use sample::GpsSample;
pub use speed::{SpeedUnit, recalculate_speed};
