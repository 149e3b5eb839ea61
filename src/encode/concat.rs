use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::Context as _;

use crate::{
    encode::frames::ensure_parent_dir,
    foundation::error::{RideviewError, RideviewResult},
};

const LIST_FILE: &str = "input_videos.txt";

/// Concat-demuxer list for `inputs`, in sorted order with absolute paths.
pub fn concat_list(inputs: &[PathBuf]) -> RideviewResult<String> {
    let mut sorted = inputs.to_vec();
    sorted.sort();

    let mut out = String::new();
    for p in &sorted {
        let abs = std::path::absolute(p)
            .with_context(|| format!("resolve '{}'", p.display()))?;
        let escaped = abs.display().to_string().replace('\'', r"'\''");
        out.push_str(&format!("file '{escaped}'\n"));
    }
    Ok(out)
}

/// Join `inputs` into `output` without re-encoding.
///
/// Returns `false` when `output` already exists and nothing was done.
#[tracing::instrument(skip_all, fields(inputs = inputs.len(), out = %output.display()))]
pub fn concat_videos(inputs: &[PathBuf], output: &Path) -> RideviewResult<bool> {
    if output.exists() {
        tracing::info!("concatenated output already exists; skipping");
        return Ok(false);
    }
    if inputs.is_empty() {
        return Err(RideviewError::validation("no videos to concatenate"));
    }

    ensure_parent_dir(output)?;
    let list_path = output.with_file_name(LIST_FILE);
    std::fs::write(&list_path, concat_list(inputs)?)
        .with_context(|| format!("write concat list '{}'", list_path.display()))?;

    let result = Command::new("ffmpeg")
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ])
        .arg(&list_path)
        .args(["-c", "copy", "-y"])
        .arg(output)
        .stdin(Stdio::null())
        .output();

    if let Err(e) = std::fs::remove_file(&list_path) {
        tracing::debug!("could not remove '{}': {e}", list_path.display());
    }

    let out = result.map_err(|e| RideviewError::engine(format!("failed to spawn ffmpeg: {e}")))?;
    if !out.status.success() {
        return Err(RideviewError::engine(format!(
            "concatenation failed with status {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(true)
}
