pub mod compose;
pub mod concat;
pub mod frames;
pub mod probe;

pub use compose::{
    CompositeCommand, CompositionSpec, Geometry, Layer, OperatorSet, OperatorSpec, Residency, Step,
    build_command, select_operator,
};
pub use concat::{concat_list, concat_videos};
pub use frames::{
    EncodeConfig, FrameEncoder, LayerFormat, ensure_parent_dir, is_ffmpeg_on_path, layer_config,
    write_layer_video,
};
pub use probe::{Capabilities, VideoInfo, parse_listing, probe_video};
