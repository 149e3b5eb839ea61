use std::{
    io::Write as _,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::foundation::{
    core::{Frame, Size},
    error::{RideviewError, RideviewResult},
};

/// Layer frames are one per telemetry second.
pub const LAYER_FPS: u32 = 1;

/// Container/codec family of a layer video.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerFormat {
    /// H.264 `yuv420p` in MP4; transparent pixels are flattened over a background.
    Opaque,
    /// QuickTime RLE with an alpha channel, for layers composited with transparency.
    Alpha,
}

#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub size: Size,
    pub fps: u32,
    pub format: LayerFormat,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl EncodeConfig {
    pub fn validate(&self) -> RideviewResult<()> {
        if self.fps == 0 {
            return Err(RideviewError::validation("encode fps must be non-zero"));
        }
        match self.format {
            LayerFormat::Opaque => self.size.validate_even("encode"),
            LayerFormat::Alpha => self.size.validate("encode"),
        }
    }

    /// Argument list after the input spec, excluding the output path.
    fn codec_args(&self) -> &'static [&'static str] {
        match self.format {
            LayerFormat::Opaque => &[
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ],
            LayerFormat::Alpha => &["-c:v", "qtrle", "-pix_fmt", "argb"],
        }
    }
}

pub fn layer_config(out_path: impl Into<PathBuf>, size: Size, format: LayerFormat) -> EncodeConfig {
    EncodeConfig {
        size,
        fps: LAYER_FPS,
        format,
        out_path: out_path.into(),
        overwrite: true,
    }
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> RideviewResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

pub struct FrameEncoder {
    cfg: EncodeConfig,
    bg_rgba: [u8; 4],
    child: Child,
    stdin: Option<ChildStdin>,
    scratch: Vec<u8>,
}

impl FrameEncoder {
    pub fn new(cfg: EncodeConfig, bg_rgba: [u8; 4]) -> RideviewResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !cfg.overwrite && cfg.out_path.exists() {
            return Err(RideviewError::validation(format!(
                "output file '{}' already exists",
                cfg.out_path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(RideviewError::engine(
                "ffmpeg is required for layer encoding, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.arg(if cfg.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.size.width, cfg.size.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
            "-an",
        ])
        .args(cfg.codec_args())
        .arg(&cfg.out_path);

        tracing::debug!(
            out = %cfg.out_path.display(),
            format = ?cfg.format,
            "spawning layer encoder"
        );
        let mut child = cmd.spawn().map_err(|e| {
            RideviewError::engine(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RideviewError::engine("failed to open ffmpeg stdin"))?;

        Ok(Self {
            scratch: vec![0u8; cfg.size.width as usize * cfg.size.height as usize * 4],
            cfg,
            bg_rgba,
            child,
            stdin: Some(stdin),
        })
    }

    pub fn encode_frame(&mut self, frame: &Frame) -> RideviewResult<()> {
        let (w, h) = frame.image.dimensions();
        if (w, h) != (self.cfg.size.width, self.cfg.size.height) {
            return Err(RideviewError::validation(format!(
                "frame size mismatch: got {w}x{h}, expected {}x{}",
                self.cfg.size.width, self.cfg.size.height
            )));
        }

        let bytes: &[u8] = match self.cfg.format {
            LayerFormat::Alpha => frame.image.as_raw(),
            LayerFormat::Opaque => {
                flatten_to_opaque_rgba8(&mut self.scratch, frame.image.as_raw(), self.bg_rgba)?;
                &self.scratch
            }
        };

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RideviewError::engine("ffmpeg encoder is already finalized"));
        };
        stdin.write_all(bytes).map_err(|e| {
            RideviewError::engine(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;

        Ok(())
    }

    pub fn finish(mut self) -> RideviewResult<()> {
        drop(self.stdin.take());

        let output = self.child.wait_with_output().map_err(|e| {
            RideviewError::engine(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RideviewError::engine(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Encode a whole frame sequence into `cfg.out_path`.
#[tracing::instrument(skip_all, fields(frames = frames.len(), out = %cfg.out_path.display()))]
pub fn write_layer_video(frames: &[Frame], cfg: EncodeConfig) -> RideviewResult<()> {
    if frames.is_empty() {
        return Err(RideviewError::validation("no frames to encode"));
    }
    let mut enc = FrameEncoder::new(cfg, [0, 0, 0, 255])?;
    for f in frames {
        enc.encode_frame(f)?;
    }
    enc.finish()
}

/// Straight-alpha RGBA over an opaque background.
fn flatten_to_opaque_rgba8(dst: &mut [u8], src: &[u8], bg_rgba: [u8; 4]) -> RideviewResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(RideviewError::validation(
            "flatten_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }
        let inv = 255 - a;
        for c in 0..3 {
            let v = mul_div255(u16::from(s[c]), a) + mul_div255(u16::from(bg_rgba[c]), inv);
            d[c] = v.min(255) as u8;
        }
        d[3] = 255;
    }

    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}
