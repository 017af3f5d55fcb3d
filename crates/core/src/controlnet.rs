//! ControlNet (auxiliary guidance) block of a job.
//!
//! The engine parses every key of this block whenever it is present, even
//! with `enabled: false`, and crashes on any missing key. The block is
//! therefore either absent from a job or carries the full key set in
//! [`CONTROLNET_KEYS`]; [`ControlNetArgs`] has no optional fields.

use serde::Serialize;

use crate::request::ControlNetRequest;
use crate::schedule::{normalize, Schedule};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Known-good preprocessor when nothing else resolves.
pub const DEFAULT_MODULE: &str = "openpose_full";

/// Known-good model when nothing else resolves.
pub const DEFAULT_MODEL: &str = "control_sd15_animal_openpose_fp16";

/// Every key of a serialized [`ControlNetArgs`].
pub const CONTROLNET_KEYS: &[&str] = &[
    "enabled",
    "controlnet_module",
    "controlnet_model",
    "controlnet_weight",
    "controlnet_guidance_start",
    "controlnet_guidance_end",
    "controlnet_detect_resolution",
    "threshold_a",
    "threshold_b",
    "guess_mode",
    "softness",
    "controlnet_pixel_perfect",
    "controlnet_resize_mode",
    "controlnet_control_mode",
    "controlnet_vid_path",
];

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How the control image is fitted to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ResizeMode {
    #[serde(rename = "Just Resize")]
    JustResize,
    #[default]
    #[serde(rename = "Inner Fit (Scale to Fit)")]
    InnerFit,
    #[serde(rename = "Outer Fit (Shrink to Fit)")]
    OuterFit,
}

impl ResizeMode {
    /// Accepts the engine literal or a short alias (`resize`, `inner`, `outer`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "just resize" | "resize" | "just_resize" => Some(Self::JustResize),
            "inner fit (scale to fit)" | "inner" | "inner_fit" | "scale to fit" => {
                Some(Self::InnerFit)
            }
            "outer fit (shrink to fit)" | "outer" | "outer_fit" | "shrink to fit" => {
                Some(Self::OuterFit)
            }
            _ => None,
        }
    }
}

/// Balance between prompt and control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ControlMode {
    #[default]
    Balanced,
    #[serde(rename = "My prompt is more important")]
    PromptImportant,
    #[serde(rename = "ControlNet is more important")]
    ControlNetImportant,
}

impl ControlMode {
    /// Accepts the engine literal or a short alias (`prompt`, `controlnet`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "balanced" => Some(Self::Balanced),
            "my prompt is more important" | "prompt" => Some(Self::PromptImportant),
            "controlnet is more important" | "controlnet" => Some(Self::ControlNetImportant),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// Fully-populated ControlNet block, in the engine's key names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlNetArgs {
    pub enabled: bool,
    #[serde(rename = "controlnet_module")]
    pub module: String,
    #[serde(rename = "controlnet_model")]
    pub model: String,
    #[serde(rename = "controlnet_weight")]
    pub weight: Schedule,
    #[serde(rename = "controlnet_guidance_start")]
    pub guidance_start: Schedule,
    #[serde(rename = "controlnet_guidance_end")]
    pub guidance_end: Schedule,
    #[serde(rename = "controlnet_detect_resolution")]
    pub processor_res: Schedule,
    pub threshold_a: Schedule,
    pub threshold_b: Schedule,
    pub guess_mode: Schedule,
    pub softness: Schedule,
    #[serde(rename = "controlnet_pixel_perfect")]
    pub pixel_perfect: bool,
    #[serde(rename = "controlnet_resize_mode")]
    pub resize_mode: ResizeMode,
    #[serde(rename = "controlnet_control_mode")]
    pub control_mode: ControlMode,
    /// Driving video; empty when the control image comes from the frames.
    #[serde(rename = "controlnet_vid_path")]
    pub video_path: String,
}

/// Deployment-level name overrides (`CONTROLNET_MODEL` / `CONTROLNET_MODULE`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlNetOverrides {
    pub model: Option<String>,
    pub module: Option<String>,
}

/// Model and preprocessor names reported by a running engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlNetCatalog {
    pub models: Vec<String>,
    pub modules: Vec<String>,
}

impl ControlNetArgs {
    /// Populate every key from `req`, falling back to documented defaults.
    pub fn resolve(
        req: &ControlNetRequest,
        overrides: &ControlNetOverrides,
        catalog: Option<&ControlNetCatalog>,
    ) -> Self {
        let model = resolve_name(
            "model",
            req.model.as_deref(),
            overrides.model.as_deref(),
            DEFAULT_MODEL,
            catalog.map(|c| c.models.as_slice()),
        );
        let module = resolve_name(
            "module",
            req.module.as_deref(),
            overrides.module.as_deref(),
            DEFAULT_MODULE,
            catalog.map(|c| c.modules.as_slice()),
        );

        let resize_mode =
            enum_or_default("resize_mode", req.resize_mode.as_deref(), ResizeMode::from_name);
        let control_mode =
            enum_or_default("control_mode", req.control_mode.as_deref(), ControlMode::from_name);

        Self {
            enabled: true,
            module,
            model,
            weight: normalize(req.weight.as_ref(), &Schedule::constant("1.0")),
            guidance_start: normalize(req.guidance_start.as_ref(), &Schedule::constant("0.0")),
            guidance_end: normalize(req.guidance_end.as_ref(), &Schedule::constant("1.0")),
            processor_res: normalize(req.processor_res.as_ref(), &Schedule::constant(512)),
            threshold_a: normalize(req.threshold_a.as_ref(), &Schedule::constant(64)),
            threshold_b: normalize(req.threshold_b.as_ref(), &Schedule::constant(64)),
            guess_mode: normalize(req.guess_mode.as_ref(), &Schedule::constant(0)),
            softness: normalize(req.softness.as_ref(), &Schedule::constant("0.0")),
            pixel_perfect: req.pixel_perfect.unwrap_or(true),
            resize_mode,
            control_mode,
            video_path: req.video_path.clone().unwrap_or_default(),
        }
    }
}

fn enum_or_default<T: Default>(field: &str, name: Option<&str>, parse: fn(&str) -> Option<T>) -> T {
    match name {
        None => T::default(),
        Some(name) => parse(name).unwrap_or_else(|| {
            tracing::warn!(field, value = name, "Unknown ControlNet option, using default");
            T::default()
        }),
    }
}

// ---------------------------------------------------------------------------
// Name resolution
// ---------------------------------------------------------------------------

/// Pick the engine literal for a model or preprocessor name.
///
/// Candidates are tried in order: requested, environment override,
/// known-good default. With a live list, the first candidate the engine
/// knows wins and the engine's own spelling is returned (it may carry a
/// ` [hash]` suffix). Without a live list the first candidate is returned
/// unresolved; with one that matches nothing, the default is.
pub fn resolve_name(
    kind: &str,
    requested: Option<&str>,
    env_override: Option<&str>,
    default: &str,
    live: Option<&[String]>,
) -> String {
    let candidates: Vec<&str> = [requested, env_override, Some(default)]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    let first = candidates.first().copied().unwrap_or(default);

    let Some(live) = live.filter(|l| !l.is_empty()) else {
        return first.to_string();
    };

    for candidate in &candidates {
        if let Some(found) = live.iter().find(|name| name_matches(name, candidate)) {
            if *candidate != first {
                tracing::info!(
                    kind,
                    requested = first,
                    resolved = %found,
                    "ControlNet name fell back",
                );
            }
            return found.clone();
        }
    }

    tracing::warn!(
        kind,
        requested = first,
        available = live.len(),
        "No ControlNet candidate found in engine list, using default",
    );
    default.to_string()
}

/// `true` if a live engine name is `candidate`, optionally with a hash suffix.
fn name_matches(live: &str, candidate: &str) -> bool {
    let live = live.trim();
    if live.eq_ignore_ascii_case(candidate) {
        return true;
    }
    match live.split_once(" [") {
        Some((stem, hash)) => hash.ends_with(']') && stem.eq_ignore_ascii_case(candidate),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
