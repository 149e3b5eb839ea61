use std::{path::Path, process::Command};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{
    foundation::error::{RideviewError, RideviewResult},
    telemetry::sample::GpsSample,
};

pub const MAGIC_PREFIX: &str = "Viidure";

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
const RECORD_TOKENS: usize = 12;

/// Parse every well-formed record of a raw data-stream blob.
///
/// The stream is a sequence of NUL-delimited text records, one per second:
///
/// ```text
/// Viidure2024/05/17 08:21:03 N:45.464200 E:9.190000 23.4 km/h 0.9 48.0 9 x:0.01 y:-0.02 z:0.98
/// ```
///
/// Records at segment boundaries are often truncated; those are dropped.
pub fn parse_blob(source: &str, blob: &[u8]) -> Vec<GpsSample> {
    let mut out = Vec::new();
    let mut dropped = 0usize;

    for chunk in blob.split(|&b| b == 0) {
        // Invalid bytes are skipped rather than replaced.
        let text: String = String::from_utf8_lossy(chunk)
            .chars()
            .filter(|&c| c != char::REPLACEMENT_CHARACTER)
            .collect();
        let Some(body) = text.strip_prefix(MAGIC_PREFIX) else {
            continue;
        };
        match parse_record(source, body) {
            Some(sample) => out.push(sample),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(source, dropped, kept = out.len(), "dropped malformed gps records");
    }
    out
}

/// Parse one record body (magic prefix already stripped).
pub fn parse_record(source: &str, body: &str) -> Option<GpsSample> {
    let parts: Vec<&str> = body.split_whitespace().collect();
    if parts.len() < RECORD_TOKENS {
        return None;
    }

    let naive =
        NaiveDateTime::parse_from_str(&format!("{} {}", parts[0], parts[1]), TIMESTAMP_FORMAT)
            .ok()?;

    Some(GpsSample {
        source: source.to_string(),
        timestamp: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
        latitude: parse_hemisphere(parts[2], 'N', 'S')?,
        longitude: parse_hemisphere(parts[3], 'E', 'W')?,
        speed: parts[4].parse().ok()?,
        speed_unit: parts[5].to_string(),
        hdop: parts[6].parse().ok()?,
        geoid_height: parts[7].parse().ok()?,
        satellites: parts[8].parse().ok()?,
        accelerometer: [
            parse_axis(parts[9], 'x')?,
            parse_axis(parts[10], 'y')?,
            parse_axis(parts[11], 'z')?,
        ],
    })
}

fn parse_hemisphere(token: &str, positive: char, negative: char) -> Option<f64> {
    if let Some(v) = strip_tag(token, positive) {
        return v.parse().ok();
    }
    if let Some(v) = strip_tag(token, negative) {
        return v.parse::<f64>().ok().map(|v| -v);
    }
    None
}

fn parse_axis(token: &str, axis: char) -> Option<f64> {
    strip_tag(token, axis)?.parse().ok()
}

fn strip_tag(token: &str, tag: char) -> Option<&str> {
    token.strip_prefix(tag)?.strip_prefix(':')
}

/// Dump the raw data stream (third stream of the container) of a segment via `ffmpeg`.
pub fn demux_data_stream(segment: &Path) -> RideviewResult<Vec<u8>> {
    let out = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(segment)
        .args(["-map", "0:2", "-c", "copy", "-f", "data", "-"])
        .output()
        .map_err(|e| RideviewError::engine(format!("failed to run ffmpeg: {e}")))?;

    if !out.status.success() {
        return Err(RideviewError::telemetry(format!(
            "ffmpeg could not demux the data stream of '{}': {}",
            segment.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(out.stdout)
}

/// Extract all samples of one segment, tagged with the segment's file name.
#[tracing::instrument(skip_all, fields(segment = %segment.display()))]
pub fn extract_segment(segment: &Path) -> RideviewResult<Vec<GpsSample>> {
    let source = segment
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let blob = demux_data_stream(segment)?;
    let samples = parse_blob(&source, &blob);
    tracing::debug!(samples = samples.len(), "extracted telemetry");
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike as _, Timelike as _};

    use super::*;

    const GOOD: &str =
        "Viidure2024/05/17 08:21:03 N:45.464200 E:9.190000 23.4 km/h 0.9 48.0 9 x:0.01 y:-0.02 z:0.98";

    #[test]
    fn parses_well_formed_record() {
        let s = parse_record("a_F.ts", GOOD.strip_prefix(MAGIC_PREFIX).unwrap()).unwrap();
        assert_eq!(s.source, "a_F.ts");
        assert_eq!(s.timestamp.year(), 2024);
        assert_eq!(s.timestamp.hour(), 8);
        assert_eq!(s.timestamp.second(), 3);
        assert_eq!(s.latitude, 45.4642);
        assert_eq!(s.longitude, 9.19);
        assert_eq!(s.speed, 23.4);
        assert_eq!(s.speed_unit, "km/h");
        assert_eq!(s.hdop, 0.9);
        assert_eq!(s.geoid_height, 48.0);
        assert_eq!(s.satellites, 9);
        assert_eq!(s.accelerometer, [0.01, -0.02, 0.98]);
    }

    #[test]
    fn short_record_is_dropped() {
        let mut blob = Vec::new();
        blob.extend_from_slice(GOOD.as_bytes());
        blob.push(0);
        blob.extend_from_slice(b"Viidure2024/05/17 08:21:04 N:45.4 E:9.1 12");
        blob.push(0);

        let samples = parse_blob("seg", &blob);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn records_without_magic_are_ignored() {
        let blob = format!("garbage\0{}\0\0", GOOD.replacen(MAGIC_PREFIX, "Other", 1));
        assert!(parse_blob("seg", blob.as_bytes()).is_empty());
    }

    #[test]
    fn bad_numeric_token_drops_record() {
        let bad = GOOD.replace("48.0", "4x8");
        assert!(parse_blob("seg", bad.as_bytes()).is_empty());

        let bad_date = GOOD.replace("2024/05/17", "2024/13/17");
        assert!(parse_blob("seg", bad_date.as_bytes()).is_empty());
    }

    #[test]
    fn invalid_utf8_bytes_are_skipped() {
        let mut blob = GOOD.as_bytes().to_vec();
        blob.insert(GOOD.len() - 4, 0xff);
        let samples = parse_blob("seg", &blob);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].accelerometer[2], 0.98);
    }

    #[test]
    fn southern_and_western_hemispheres_are_negative() {
        let rec = GOOD.replace("N:45.464200", "S:33.86").replace("E:9.190000", "W:70.6");
        let s = parse_blob("seg", rec.as_bytes()).pop().unwrap();
        assert_eq!(s.latitude, -33.86);
        assert_eq!(s.longitude, -70.6);
    }

    #[test]
    fn missing_axis_prefix_drops_record() {
        let rec = GOOD.replace("y:-0.02", "-0.02");
        assert!(parse_blob("seg", rec.as_bytes()).is_empty());
    }
}
