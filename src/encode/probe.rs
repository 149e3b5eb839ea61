use std::{collections::BTreeSet, path::Path, process::Command};

use crate::foundation::{
    core::Size,
    error::{RideviewError, RideviewResult},
};

/// Filters and encoders compiled into the local `ffmpeg`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub filters: BTreeSet<String>,
    pub encoders: BTreeSet<String>,
}

impl Capabilities {
    pub fn new<F, E>(filters: F, encoders: E) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            filters: filters.into_iter().map(Into::into).collect(),
            encoders: encoders.into_iter().map(Into::into).collect(),
        }
    }

    /// Query `ffmpeg -filters` and `ffmpeg -encoders`.
    pub fn probe() -> RideviewResult<Self> {
        let filters = parse_listing(&ffmpeg_listing("-filters")?);
        let encoders = parse_listing(&ffmpeg_listing("-encoders")?);
        tracing::debug!(
            filters = filters.len(),
            encoders = encoders.len(),
            "probed ffmpeg capabilities"
        );
        Ok(Self { filters, encoders })
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains(name)
    }

    pub fn has_encoder(&self, name: &str) -> bool {
        self.encoders.contains(name)
    }
}

fn ffmpeg_listing(flag: &str) -> RideviewResult<String> {
    let out = Command::new("ffmpeg")
        .args(["-hide_banner", flag])
        .output()
        .map_err(|e| RideviewError::engine(format!("failed to run ffmpeg {flag}: {e}")))?;
    if !out.status.success() {
        return Err(RideviewError::engine(format!(
            "ffmpeg {flag} failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Names from an `ffmpeg -filters` / `-encoders` listing.
///
/// Entries are `<flags> <name> ...`; legend rows (`<flags> = <meaning>`), headers and separators
/// are skipped.
pub fn parse_listing(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let _flags = tokens.next()?;
            let name = tokens.next()?;
            (name != "=").then(|| name.to_string())
        })
        .collect()
}

/// Stream geometry and length of a media file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub size: Size,
    pub duration_sec: f64,
}

pub fn probe_video(path: &Path) -> RideviewResult<VideoInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|e| RideviewError::engine(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(RideviewError::engine(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| RideviewError::serde(format!("ffprobe json parse failed: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| RideviewError::engine(format!("no video stream in '{}'", path.display())))?;
    let (Some(width), Some(height)) = (video.width, video.height) else {
        return Err(RideviewError::engine("missing video size from ffprobe"));
    };
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo {
        size: Size::new(width, height),
        duration_sec,
    })
}
