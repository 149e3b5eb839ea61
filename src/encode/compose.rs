use std::{path::PathBuf, process::{Command, Stdio}};

use crate::{
    encode::probe::Capabilities,
    foundation::{
        core::Size,
        error::{RideviewError, RideviewResult},
    },
};

/// Pad applied to a layer whose length is unknown.
pub const DEFAULT_PAD_SEC: f64 = 60.0;
pub const AUDIO_CODEC: &str = "aac";

const UPLOAD: &str = "hwupload_cuda";

/// Where frames live while a filter runs on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    Host,
    Device,
}

/// One logical compositing step with its own preference table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Denoise,
    Scale,
    Overlay,
    Encoder,
}

/// An entry of a preference table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperatorSpec {
    /// Filter or encoder name as listed by `ffmpeg`.
    pub name: &'static str,
    /// Fixed options; for filters `name=options`, for encoders extra arguments.
    pub options: &'static str,
    pub residency: Residency,
}

impl OperatorSpec {
    const fn new(name: &'static str, options: &'static str, residency: Residency) -> Self {
        Self {
            name,
            options,
            residency,
        }
    }

    fn filter(&self, options: &str) -> String {
        if options.is_empty() {
            self.name.to_string()
        } else {
            format!("{}={options}", self.name)
        }
    }
}

static DENOISE: [OperatorSpec; 2] = [
    OperatorSpec::new("bilateral_cuda", "sigmaS=3:sigmaR=0.5", Residency::Device),
    OperatorSpec::new("hqdn3d", "4:3:6:4", Residency::Host),
];

static SCALE: [OperatorSpec; 3] = [
    OperatorSpec::new("scale_npp", "", Residency::Device),
    OperatorSpec::new("scale_cuda", "", Residency::Device),
    OperatorSpec::new("scale", "", Residency::Host),
];

static OVERLAY: [OperatorSpec; 2] = [
    OperatorSpec::new("overlay_cuda", "", Residency::Device),
    OperatorSpec::new("overlay", "", Residency::Host),
];

static ENCODER: [OperatorSpec; 2] = [
    OperatorSpec::new("hevc_nvenc", "-preset fast -cq 23", Residency::Device),
    OperatorSpec::new("libx265", "-preset medium -crf 23", Residency::Host),
];

impl Step {
    pub const ALL: [Step; 4] = [Step::Denoise, Step::Scale, Step::Overlay, Step::Encoder];

    /// Preference table, most preferred first.
    pub fn candidates(self) -> &'static [OperatorSpec] {
        match self {
            Step::Denoise => &DENOISE,
            Step::Scale => &SCALE,
            Step::Overlay => &OVERLAY,
            Step::Encoder => &ENCODER,
        }
    }

    fn is_available(self, caps: &Capabilities, name: &str) -> bool {
        match self {
            Step::Encoder => caps.has_encoder(name),
            _ => caps.has_filter(name),
        }
    }
}

/// First available entry of `step`'s table, else its final generic entry.
pub fn select_operator(step: Step, caps: &Capabilities) -> &'static OperatorSpec {
    let table = step.candidates();
    table
        .iter()
        .find(|op| step.is_available(caps, op.name))
        .unwrap_or(&table[table.len() - 1])
}

/// Operators chosen for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperatorSet {
    pub denoise: &'static OperatorSpec,
    pub scale: &'static OperatorSpec,
    pub overlay: &'static OperatorSpec,
    pub encoder: &'static OperatorSpec,
}

impl OperatorSet {
    pub fn select(caps: &Capabilities) -> Self {
        Self {
            denoise: select_operator(Step::Denoise, caps),
            scale: select_operator(Step::Scale, caps),
            overlay: select_operator(Step::Overlay, caps),
            encoder: select_operator(Step::Encoder, caps),
        }
    }

    /// Names of the chosen operators that run on the host instead of the GPU.
    pub fn host_operators(&self) -> Vec<&'static str> {
        [self.denoise, self.scale, self.overlay, self.encoder]
            .iter()
            .filter(|op| op.residency == Residency::Host)
            .map(|op| op.name)
            .collect()
    }
}

/// One input video of the composition.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub path: PathBuf,
    /// Length in seconds, when known; used to pad shorter layers.
    pub duration_sec: Option<f64>,
    /// Uniform resize factor applied before overlaying.
    pub scale: Option<f64>,
}

impl Layer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration_sec: None,
            scale: None,
        }
    }

    pub fn with_duration(mut self, duration_sec: f64) -> Self {
        self.duration_sec = Some(duration_sec);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    fn is_on_disk(&self) -> bool {
        self.path.is_file()
    }
}

/// Placement parameters of the secondary layers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    pub main_size: Size,
    /// Unscaled size of the map layer.
    pub map_size: Size,
    /// Gap between the map layer and the bottom edge.
    pub map_margin: u32,
    pub output_fps: u32,
}

/// Everything needed to composite one segment.
#[derive(Clone, Debug)]
pub struct CompositionSpec {
    pub main: Layer,
    /// Top-right picture-in-picture.
    pub rear: Option<Layer>,
    /// Bottom-left moving map.
    pub map: Option<Layer>,
    /// Bottom-right info panel.
    pub info: Option<Layer>,
    pub geometry: Geometry,
    pub output: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Rear,
    Map,
    Info,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::Rear => "rear",
            Role::Map => "map",
            Role::Info => "info",
        }
    }

    fn sw_format(self) -> &'static str {
        match self {
            Role::Info => "yuva420p",
            Role::Rear | Role::Map => "yuv420p",
        }
    }

    /// Layers rendered at one frame per second are resampled to the output rate.
    fn needs_fps(self) -> bool {
        matches!(self, Role::Map | Role::Info)
    }
}

impl CompositionSpec {
    /// Secondary layers that are set and exist, in fixed input order.
    fn secondary_layers(&self) -> Vec<(Role, &Layer)> {
        [
            (Role::Rear, self.rear.as_ref()),
            (Role::Map, self.map.as_ref()),
            (Role::Info, self.info.as_ref()),
        ]
        .into_iter()
        .filter_map(|(role, layer)| {
            let layer = layer?;
            if layer.is_on_disk() {
                Some((role, layer))
            } else {
                tracing::warn!(
                    layer = role.label(),
                    path = %layer.path.display(),
                    "layer missing; omitted"
                );
                None
            }
        })
        .collect()
    }

    fn longest_duration(&self, layers: &[(Role, &Layer)]) -> Option<f64> {
        std::iter::once(&self.main)
            .chain(layers.iter().map(|(_, l)| *l))
            .filter_map(|l| l.duration_sec)
            .reduce(f64::max)
    }
}

/// A linear filter chain `[in...]f1,f2,...[out]` that remembers where its frames end up.
#[derive(Debug)]
struct Chain {
    inputs: Vec<String>,
    filters: Vec<String>,
    output: String,
    residency: Residency,
    sw_format: &'static str,
}

impl Chain {
    fn new(input: String, output: &str, sw_format: &'static str) -> Self {
        Self {
            inputs: vec![input],
            filters: Vec::new(),
            output: output.to_string(),
            residency: Residency::Host,
            sw_format,
        }
    }

    fn move_to(&mut self, residency: Residency) {
        if self.residency == residency {
            return;
        }
        match residency {
            Residency::Device => self.filters.push(UPLOAD.to_string()),
            Residency::Host => self
                .filters
                .push(format!("hwdownload,format={}", self.sw_format)),
        }
        self.residency = residency;
    }

    fn push(&mut self, op: &OperatorSpec, filter: String) {
        self.move_to(op.residency);
        self.filters.push(filter);
    }

    fn render(&self, out: &mut String) {
        for input in &self.inputs {
            out.push_str(&format!("[{input}]"));
        }
        out.push_str(&self.filters.join(","));
        out.push_str(&format!("[{}]", self.output));
    }
}

/// Fully resolved compositing invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeCommand {
    pub inputs: Vec<PathBuf>,
    pub graph: String,
    pub operators: OperatorSet,
    pub output: PathBuf,
}

impl CompositeCommand {
    /// Arguments for `ffmpeg`, in invocation order.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .map(String::from)
            .to_vec();
        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.display().to_string());
        }
        args.extend(
            [
                "-filter_complex",
                self.graph.as_str(),
                "-map",
                "[outv]",
                "-map",
                "0:a?",
                "-c:v",
                self.operators.encoder.name,
            ]
            .map(String::from),
        );
        args.extend(
            self.operators
                .encoder
                .options
                .split_whitespace()
                .map(String::from),
        );
        args.extend(["-c:a", AUDIO_CODEC, "-y"].map(String::from));
        args.push(self.output.display().to_string());
        args
    }

    #[tracing::instrument(skip_all, fields(out = %self.output.display()))]
    pub fn run(&self) -> RideviewResult<()> {
        crate::encode::frames::ensure_parent_dir(&self.output)?;
        tracing::debug!(args = ?self.args(), "running ffmpeg");
        let out = Command::new("ffmpeg")
            .args(self.args())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RideviewError::engine(format!("failed to spawn ffmpeg: {e}")))?;
        if !out.status.success() {
            return Err(RideviewError::engine(format!(
                "compositing '{}' failed with status {}: {}",
                self.output.display(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Build the compositing command for `spec` with operators picked from `caps`.
pub fn build_command(
    spec: &CompositionSpec,
    caps: &Capabilities,
) -> RideviewResult<CompositeCommand> {
    spec.geometry.main_size.validate("main video")?;
    if spec.geometry.output_fps == 0 {
        return Err(RideviewError::validation("output fps must be non-zero"));
    }

    let ops = OperatorSet::select(caps);
    let layers = spec.secondary_layers();
    let longest = spec.longest_duration(&layers);

    let mut inputs = vec![spec.main.path.clone()];
    let mut chains = Vec::new();

    let mut main = Chain::new("0:v".to_string(), "main", "yuv420p");
    main.filters.push("format=yuv420p".to_string());
    main.push(ops.denoise, ops.denoise.filter(ops.denoise.options));
    chains.push(main);
    let mut running = 0usize;

    for (idx, (role, layer)) in layers.iter().enumerate() {
        inputs.push(layer.path.clone());
        let layer_chain = chains.len();
        chains.push(secondary_chain(
            idx + 1,
            *role,
            layer,
            longest,
            spec.geometry,
            &ops,
        ));

        let (x, y) = placement(*role, layer, spec.geometry);
        let mut overlay = Chain::new(
            chains[running].output.clone(),
            &format!("v{}", idx + 1),
            "yuv420p",
        );
        overlay.inputs.push(chains[layer_chain].output.clone());

        chains[running].move_to(ops.overlay.residency);
        chains[layer_chain].move_to(ops.overlay.residency);
        overlay.residency = ops.overlay.residency;
        overlay
            .filters
            .push(ops.overlay.filter(&format!("x={x}:y={y}:shortest=1")));

        running = chains.len();
        chains.push(overlay);
    }

    let last = &mut chains[running];
    if ops.encoder.residency == Residency::Host {
        last.move_to(Residency::Host);
    }
    last.output = "outv".to_string();

    let mut graph = String::new();
    for (i, chain) in chains.iter().enumerate() {
        if i > 0 {
            graph.push_str("; ");
        }
        chain.render(&mut graph);
    }

    Ok(CompositeCommand {
        inputs,
        graph,
        operators: ops,
        output: spec.output.clone(),
    })
}

fn secondary_chain(
    input: usize,
    role: Role,
    layer: &Layer,
    longest: Option<f64>,
    geometry: Geometry,
    ops: &OperatorSet,
) -> Chain {
    let mut chain = Chain::new(format!("{input}:v"), role.label(), role.sw_format());
    chain.filters.push(format!("format={}", role.sw_format()));
    if role.needs_fps() {
        chain.filters.push(format!("fps={}", geometry.output_fps));
    }

    let pad = match (longest, layer.duration_sec) {
        (Some(longest), Some(own)) => (longest - own).max(0.0),
        _ => DEFAULT_PAD_SEC,
    };
    chain
        .filters
        .push(format!("tpad=stop_mode=clone:stop_duration={}", trim_float(pad)));

    if let Some(scale) = layer.scale {
        let s = trim_float(scale);
        chain.push(ops.scale, ops.scale.filter(&format!("iw*{s}:ih*{s}")));
    }
    chain
}

fn placement(role: Role, layer: &Layer, geometry: Geometry) -> (String, String) {
    match role {
        Role::Rear => ("W-w".to_string(), "0".to_string()),
        Role::Map => {
            let h = f64::from(geometry.map_size.height) * layer.scale.unwrap_or(1.0);
            let y = f64::from(geometry.main_size.height) - h - f64::from(geometry.map_margin);
            ("0".to_string(), format!("{}", y.round() as i64))
        }
        Role::Info => ("W-w".to_string(), "H-h".to_string()),
    }
}

/// `0.25` stays `0.25`, `60.0` becomes `60`.
fn trim_float(v: f64) -> String {
    let s = format!("{v:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
