//! End-to-end processing of one recording folder.
//!
//! ```text
//! <folder>/
//!   ts_front/  ts_rear/  jpg/        loose camera files, sorted on first run
//!   track.gpx                        all telemetry
//!   osm_map.png  osm_map.meta.json   cached tile mosaic
//!   map_videos/<segment>.mp4         moving map per front segment
//!   info_videos/<segment>.mov        gauge panel per front segment
//!   mp4_pip/<name>.mp4               composited segments
//!   full_video.mp4                   everything joined
//! ```
//!
//! Every step skips outputs that already exist, so an interrupted run can simply be restarted.

use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::{
    config::PipelineConfig,
    draw::Painter,
    encode::{
        compose::{CompositionSpec, Layer, OperatorSet, build_command},
        concat::concat_videos,
        frames::{LayerFormat, is_ffmpeg_on_path, layer_config, write_layer_video},
        probe::{Capabilities, probe_video},
    },
    foundation::error::{RideviewError, RideviewResult},
    map::{
        frames::MapFrameSynth,
        mosaic::{Mosaic, build_mosaic, plan_tiles},
        tiles::{HttpTileSource, TileSource},
    },
    overlay::{
        gauge::PanelStyle,
        places::{Geocoder, NominatimGeocoder, RateGate, render_overlay_frames},
    },
    telemetry::extract::extract_segment,
    track::{gpx::write_gpx_file, store::Track},
};

const FRONT_SUFFIX: &str = "_F.ts";
const REAR_SUFFIX: &str = "_R.ts";

/// Paths of one recording folder.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ts_front(&self) -> PathBuf {
        self.root.join("ts_front")
    }

    pub fn ts_rear(&self) -> PathBuf {
        self.root.join("ts_rear")
    }

    pub fn jpg(&self) -> PathBuf {
        self.root.join("jpg")
    }

    pub fn track_gpx(&self) -> PathBuf {
        self.root.join("track.gpx")
    }

    pub fn mosaic_png(&self) -> PathBuf {
        self.root.join("osm_map.png")
    }

    pub fn mosaic_meta(&self) -> PathBuf {
        self.root.join("osm_map.meta.json")
    }

    pub fn map_video(&self, front: &Path) -> PathBuf {
        self.root
            .join("map_videos")
            .join(format!("{}.mp4", file_stem(front)))
    }

    pub fn info_video(&self, front: &Path) -> PathBuf {
        self.root
            .join("info_videos")
            .join(format!("{}.mov", file_stem(front)))
    }

    pub fn pip_video(&self, front: &Path) -> PathBuf {
        self.root.join("mp4_pip").join(format!("{}.mp4", pip_name(front)))
    }

    pub fn pip_dir(&self) -> PathBuf {
        self.root.join("mp4_pip")
    }

    pub fn full_video(&self) -> PathBuf {
        self.root.join("full_video.mp4")
    }

    /// Rear segment recorded alongside `front`.
    pub fn rear_partner(&self, front: &Path) -> Option<PathBuf> {
        let name = front.file_name()?.to_str()?;
        let base = name.strip_suffix(FRONT_SUFFIX)?;
        Some(self.ts_rear().join(format!("{base}{REAR_SUFFIX}")))
    }

    /// Move loose `*_F.ts`, `*_R.ts` and `*.jpg` files into their subfolders.
    pub fn split_files(&self) -> RideviewResult<()> {
        for dir in [self.ts_front(), self.ts_rear(), self.jpg()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create '{}'", dir.display()))?;
        }

        let mut moved = 0usize;
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("list '{}'", self.root.display()))?
        {
            let path = entry.with_context(|| format!("list '{}'", self.root.display()))?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let target = if name.ends_with(FRONT_SUFFIX) {
                self.ts_front()
            } else if name.ends_with(REAR_SUFFIX) {
                self.ts_rear()
            } else if name.ends_with(".jpg") {
                self.jpg()
            } else {
                continue;
            };
            let dst = target.join(name);
            std::fs::rename(&path, &dst)
                .with_context(|| format!("move '{}' to '{}'", path.display(), dst.display()))?;
            moved += 1;
        }
        tracing::info!(moved, "sorted camera files");
        Ok(())
    }

    /// Front segments in name (= recording) order.
    pub fn front_segments(&self) -> RideviewResult<Vec<PathBuf>> {
        sorted_files(&self.ts_front(), ".ts")
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Output name of a composited segment: the front stem without its `_F` marker.
pub fn pip_name(front: &Path) -> String {
    file_stem(front).replacen("_F", "", 1)
}

fn sorted_files(dir: &Path, suffix: &str) -> RideviewResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list '{}'", dir.display()))? {
        let path = entry.with_context(|| format!("list '{}'", dir.display()))?.path();
        if path.is_file() && path.to_string_lossy().ends_with(suffix) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn probe_duration(path: &Path) -> Option<f64> {
    match probe_video(path) {
        Ok(info) if info.duration_sec > 0.0 => Some(info.duration_sec),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(path = %path.display(), "no duration: {e}");
            None
        }
    }
}

/// A front segment together with its rear partner.
#[derive(Clone, Debug)]
struct Segment {
    front: PathBuf,
    rear: PathBuf,
}

/// Run `step` on every segment; a failing segment is logged and the rest still run.
///
/// Returns the number of failed segments.
fn for_each_segment(
    segments: &[Segment],
    what: &str,
    mut step: impl FnMut(&Segment) -> RideviewResult<()>,
) -> usize {
    let mut failed = 0usize;
    for seg in segments {
        if let Err(e) = step(seg) {
            tracing::warn!(segment = %seg.front.display(), "{what} failed: {e}");
            failed += 1;
        }
    }
    failed
}

/// The whole post-processing run, with its network services.
pub struct Pipeline {
    cfg: PipelineConfig,
    painter: Painter,
    tiles: Box<dyn TileSource>,
    geocoder: Box<dyn Geocoder>,
}

impl Pipeline {
    /// Pipeline backed by the configured HTTP tile server and geocoder.
    pub fn new(cfg: PipelineConfig) -> RideviewResult<Self> {
        let tiles = HttpTileSource::new(
            cfg.tile_url.clone(),
            cfg.user_agent.clone(),
            cfg.tile_pacing(),
        );
        let geocoder = NominatimGeocoder::new(
            cfg.geocoder_url.clone(),
            cfg.user_agent.clone(),
            RateGate::new(cfg.geocoder_delay()),
        );
        Self::with_services(cfg, Box::new(tiles), Box::new(geocoder))
    }

    pub fn with_services(
        cfg: PipelineConfig,
        tiles: Box<dyn TileSource>,
        geocoder: Box<dyn Geocoder>,
    ) -> RideviewResult<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            painter: Painter::with_system_fonts(),
            tiles,
            geocoder,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    #[tracing::instrument(skip_all, fields(folder = %folder.display()))]
    pub fn run(&mut self, folder: &Path) -> RideviewResult<()> {
        let caps = check_requirements()?;
        let ws = Workspace::new(folder);

        ws.split_files()?;
        let segments = self.pair_segments(&ws)?;

        let track = self.extract_track(&segments)?;
        write_gpx_file(&track, &ws.track_gpx())?;
        tracing::info!(samples = track.len(), path = %ws.track_gpx().display(), "wrote track");

        let mosaic = self.load_or_build_mosaic(&ws, &track)?;

        tracing::info!("rendering map videos");
        for_each_segment(&segments, "map layer", |seg| {
            self.render_map_video(&ws, &mosaic, &track, &seg.front)
        });

        if self.cfg.info_overlay {
            tracing::info!("rendering info videos");
            for_each_segment(&segments, "info layer", |seg| {
                self.render_info_video(&ws, &track, &seg.front)
            });
        }

        tracing::info!("compositing segments");
        let failed = for_each_segment(&segments, "compositing", |seg| {
            self.composite(&ws, &caps, seg)
        });
        if failed > 0 {
            tracing::warn!(failed, total = segments.len(), "some segments were not composited");
        }

        let pips = sorted_files(&ws.pip_dir(), ".mp4")?;
        if pips.is_empty() {
            tracing::warn!("no composited segments; nothing to join");
        } else {
            concat_videos(&pips, &ws.full_video())?;
        }
        tracing::info!("done");
        Ok(())
    }

    fn pair_segments(&self, ws: &Workspace) -> RideviewResult<Vec<Segment>> {
        let fronts = ws.front_segments()?;
        tracing::info!(segments = fronts.len(), "found front segments");

        let mut out = Vec::with_capacity(fronts.len());
        for front in fronts {
            match ws.rear_partner(&front).filter(|r| r.is_file()) {
                Some(rear) => out.push(Segment { front, rear }),
                None => tracing::warn!(
                    segment = %front.display(),
                    "rear segment not found; skipping"
                ),
            }
        }
        Ok(out)
    }

    fn extract_track(&self, segments: &[Segment]) -> RideviewResult<Track> {
        let mut track = Track::new();
        for (idx, seg) in segments.iter().enumerate() {
            match extract_segment(&seg.front) {
                Ok(samples) => track.extend(samples),
                Err(e) => tracing::warn!(segment = %seg.front.display(), "no telemetry: {e}"),
            }
            tracing::debug!(done = idx + 1, total = segments.len(), "telemetry extraction");
        }
        track.sort_by_time();

        if let Some(unit) = self.cfg.recalc_speed {
            tracing::info!(unit = unit.label(), "recalculating speeds from positions");
            track.recalculate_speed(unit);
        }
        Ok(track)
    }

    fn load_or_build_mosaic(&mut self, ws: &Workspace, track: &Track) -> RideviewResult<Mosaic> {
        let (png, meta) = (ws.mosaic_png(), ws.mosaic_meta());
        if png.is_file() && meta.is_file() {
            tracing::info!(path = %png.display(), "reusing cached mosaic");
            return Mosaic::load(&png, &meta);
        }

        let plan = plan_tiles(
            track.samples(),
            self.cfg.viewport,
            self.cfg.zoom,
            self.cfg.tile_size,
        );
        let mosaic = build_mosaic(&plan, self.cfg.zoom, self.cfg.tile_size, self.tiles.as_mut())?;
        if mosaic.is_empty() {
            tracing::warn!("no positioned samples; map layer will show placeholders");
        } else {
            mosaic.save(&png, &meta)?;
        }
        Ok(mosaic)
    }

    fn render_map_video(
        &self,
        ws: &Workspace,
        mosaic: &Mosaic,
        track: &Track,
        front: &Path,
    ) -> RideviewResult<()> {
        let out = ws.map_video(front);
        if out.exists() {
            return Ok(());
        }
        let synth = MapFrameSynth::new(mosaic, &self.painter, self.cfg.viewport)?;
        let frames = synth.synthesize(track.source(&source_name(front)))?;
        write_layer_video(&frames, layer_config(out, self.cfg.viewport, LayerFormat::Opaque))
    }

    fn render_info_video(&self, ws: &Workspace, track: &Track, front: &Path) -> RideviewResult<()> {
        let out = ws.info_video(front);
        if out.exists() {
            return Ok(());
        }
        let style = PanelStyle {
            size: self.cfg.info_size,
            timezone: self.cfg.tz()?,
        };
        let frames = render_overlay_frames(
            track.source(&source_name(front)),
            self.geocoder.as_ref(),
            &self.painter,
            &style,
        )?;
        write_layer_video(&frames, layer_config(out, self.cfg.info_size, LayerFormat::Alpha))
    }

    fn composite(
        &self,
        ws: &Workspace,
        caps: &Capabilities,
        seg: &Segment,
    ) -> RideviewResult<()> {
        let out = ws.pip_video(&seg.front);
        if out.exists() {
            return Ok(());
        }

        let layer = |path: PathBuf, scale: f64| {
            let mut l = Layer::new(path).with_scale(scale);
            l.duration_sec = probe_duration(&l.path);
            l
        };
        let mut main = Layer::new(&seg.front);
        main.duration_sec = probe_duration(&seg.front);

        let spec = CompositionSpec {
            main,
            rear: Some(layer(seg.rear.clone(), self.cfg.rear_scale)),
            map: Some(layer(ws.map_video(&seg.front), self.cfg.map_scale)),
            info: self
                .cfg
                .info_overlay
                .then(|| layer(ws.info_video(&seg.front), self.cfg.info_scale)),
            geometry: self.cfg.geometry(),
            output: out,
        };
        build_command(&spec, caps)?.run()
    }
}

/// `ffmpeg` must be present; missing accelerated operators only cost speed.
pub fn check_requirements() -> RideviewResult<Capabilities> {
    tracing::info!("checking requirements");
    if !is_ffmpeg_on_path() {
        return Err(RideviewError::engine(
            "cannot find ffmpeg on PATH; please install it",
        ));
    }
    let caps = Capabilities::probe()?;
    let host = OperatorSet::select(&caps).host_operators();
    if !host.is_empty() {
        tracing::warn!(
            fallbacks = ?host,
            "ffmpeg lacks CUDA filters or NVENC; falling back to CPU operators"
        );
    }
    Ok(caps)
}
