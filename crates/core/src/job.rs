//! Engine-ready job specification and its builder.
//!
//! [`JobSpecBuilder::build`] is infallible: every value has either been
//! validated by [`JobRequest::from_value`] or falls back to a documented
//! default, so the engine never sees an empty or unset field.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::controlnet::{ControlNetArgs, ControlNetCatalog, ControlNetOverrides};
use crate::request::{JobRequest, PromptInput};
use crate::schedule::{normalize, Schedule};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_PROMPT: &str = "a simple colored shape on a plain background";
pub const DEFAULT_MAX_FRAMES: u32 = 8;
pub const DEFAULT_DIMENSION: u32 = 512;
pub const DEFAULT_SEED: i64 = 1;
pub const DEFAULT_STEPS: u32 = 15;
pub const DEFAULT_CFG_SCALE: f64 = 7.0;
pub const DEFAULT_FPS: u32 = 8;
pub const DEFAULT_SAMPLER: &str = "Euler a";
pub const DEFAULT_STRENGTH: &str = "0.65";

/// Sampler literals the engine accepts.
pub const SAMPLERS: &[&str] = &[
    "Euler a",
    "Euler",
    "LMS",
    "Heun",
    "DPM2",
    "DPM2 a",
    "DPM++ 2S a",
    "DPM++ 2M",
    "DPM++ SDE",
    "DPM++ 2M SDE",
    "DPM fast",
    "DPM adaptive",
    "LMS Karras",
    "DPM2 Karras",
    "DPM2 a Karras",
    "DPM++ 2S a Karras",
    "DPM++ 2M Karras",
    "DPM++ SDE Karras",
    "DPM++ 2M SDE Karras",
    "DDIM",
    "PLMS",
    "UniPC",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Animation mode literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AnimationMode {
    #[default]
    #[serde(rename = "2D")]
    TwoD,
    #[serde(rename = "3D")]
    ThreeD,
    None,
    #[serde(rename = "Video Input")]
    VideoInput,
}

impl AnimationMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "2d" => Some(Self::TwoD),
            "3d" => Some(Self::ThreeD),
            "none" => Some(Self::None),
            "video input" | "video_input" | "video" => Some(Self::VideoInput),
            _ => None,
        }
    }
}

/// The job handed to the engine. Created once per request and serialized once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    /// Frame-keyed prompts; a single prompt is keyed at frame `"0"`.
    pub prompt: BTreeMap<String, String>,
    pub negative_prompt: String,
    pub seed: i64,
    pub max_frames: u32,
    #[serde(rename = "W")]
    pub width: u32,
    #[serde(rename = "H")]
    pub height: u32,
    pub sampler: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub animation_mode: AnimationMode,
    pub fps: u32,
    pub angle: Schedule,
    pub zoom: Schedule,
    pub translation_x: Schedule,
    pub translation_y: Schedule,
    pub translation_z: Schedule,
    pub use_init: bool,
    pub init_image: String,
    pub strength_schedule: Schedule,
    pub video_init_path: String,
    pub use_parseq: bool,
    pub make_video: bool,
    pub save_video: bool,
    pub outdir: PathBuf,
    pub outdir_video: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlnet_args: Option<ControlNetArgs>,
}

impl JobSpec {
    /// `true` when the ControlNet block is present.
    pub fn controlnet_enabled(&self) -> bool {
        self.controlnet_args.is_some()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Turns a coerced [`JobRequest`] into a [`JobSpec`].
#[derive(Debug, Clone)]
pub struct JobSpecBuilder {
    outdir: PathBuf,
    overrides: ControlNetOverrides,
    catalog: Option<ControlNetCatalog>,
}

impl JobSpecBuilder {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: outdir.into(),
            overrides: ControlNetOverrides::default(),
            catalog: None,
        }
    }

    /// Deployment-level ControlNet name overrides.
    pub fn with_overrides(mut self, overrides: ControlNetOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Live engine name lists used to resolve ControlNet names.
    pub fn with_catalog(mut self, catalog: Option<ControlNetCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn build(&self, req: &JobRequest) -> JobSpec {
        let fps = req.fps.filter(|f| *f > 0).unwrap_or(DEFAULT_FPS);

        let (use_init, init_image, strength_schedule) = match &req.init_image {
            Some(image) => (
                true,
                image.clone(),
                normalize(req.strength.as_ref(), &Schedule::constant(DEFAULT_STRENGTH)),
            ),
            None => (false, String::new(), Schedule::constant(DEFAULT_STRENGTH)),
        };

        let controlnet_args = req
            .controlnet
            .as_ref()
            .filter(|cn| cn.enabled)
            .map(|cn| ControlNetArgs::resolve(cn, &self.overrides, self.catalog.as_ref()));

        JobSpec {
            prompt: prompts(req.prompt.as_ref()),
            negative_prompt: req.negative_prompt.clone().unwrap_or_default(),
            seed: req.seed.unwrap_or(DEFAULT_SEED),
            max_frames: max_frames(req, fps),
            width: req.width.filter(|w| *w > 0).unwrap_or(DEFAULT_DIMENSION),
            height: req.height.filter(|h| *h > 0).unwrap_or(DEFAULT_DIMENSION),
            sampler: sampler(req.sampler.as_deref()),
            steps: req.steps.filter(|s| *s > 0).unwrap_or(DEFAULT_STEPS),
            cfg_scale: req.cfg_scale.unwrap_or(DEFAULT_CFG_SCALE),
            animation_mode: animation_mode(req.animation_mode.as_deref()),
            fps,
            angle: normalize(req.angle.as_ref(), &Schedule::constant(0)),
            zoom: normalize(req.zoom.as_ref(), &Schedule::constant("1.0")),
            translation_x: normalize(req.translation_x.as_ref(), &Schedule::constant(0)),
            translation_y: normalize(req.translation_y.as_ref(), &Schedule::constant(0)),
            translation_z: normalize(req.translation_z.as_ref(), &Schedule::constant(0)),
            use_init,
            init_image,
            strength_schedule,
            video_init_path: String::new(),
            use_parseq: false,
            make_video: true,
            save_video: true,
            outdir: self.outdir.clone(),
            outdir_video: self.outdir.clone(),
            controlnet_args,
        }
    }
}

fn prompts(input: Option<&PromptInput>) -> BTreeMap<String, String> {
    match input {
        Some(PromptInput::Keyed(map)) => map.clone(),
        Some(PromptInput::Single(text)) => BTreeMap::from([("0".to_string(), text.clone())]),
        None => BTreeMap::from([("0".to_string(), DEFAULT_PROMPT.to_string())]),
    }
}

/// Explicit `max_frames` wins; otherwise `seconds * fps` (at least one frame).
fn max_frames(req: &JobRequest, fps: u32) -> u32 {
    if let Some(frames) = req.max_frames.filter(|f| *f > 0) {
        return frames;
    }
    match req.seconds.filter(|s| *s > 0.0) {
        Some(seconds) => {
            let frames = (seconds * f64::from(fps)).round();
            if frames >= f64::from(u32::MAX) {
                u32::MAX
            } else {
                (frames as u32).max(1)
            }
        }
        None => DEFAULT_MAX_FRAMES,
    }
}

fn sampler(name: Option<&str>) -> String {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return DEFAULT_SAMPLER.to_string();
    };
    match SAMPLERS.iter().find(|s| s.eq_ignore_ascii_case(name)) {
        Some(literal) => (*literal).to_string(),
        None => {
            tracing::warn!(sampler = name, "Unknown sampler, using default");
            DEFAULT_SAMPLER.to_string()
        }
    }
}

fn animation_mode(name: Option<&str>) -> AnimationMode {
    match name {
        None => AnimationMode::default(),
        Some(name) => AnimationMode::from_name(name).unwrap_or_else(|| {
            tracing::warn!(animation_mode = name, "Unknown animation mode, using default");
            AnimationMode::default()
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
