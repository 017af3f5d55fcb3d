//! Inbound job parameters.
//!
//! [`JobRequest::from_value`] coerces a free-form JSON mapping into typed,
//! still-optional fields. Defaults are applied later by the job builder;
//! this module only decides whether each supplied value is usable.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Prompt text, either one prompt for the whole clip or keyed by frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptInput {
    Single(String),
    Keyed(BTreeMap<String, String>),
}

/// Typed view of the inbound parameter mapping. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRequest {
    pub prompt: Option<PromptInput>,
    pub negative_prompt: Option<String>,
    pub max_frames: Option<u32>,
    pub seconds: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<i64>,
    pub steps: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub fps: Option<u32>,
    pub sampler: Option<String>,
    pub animation_mode: Option<String>,
    pub angle: Option<Value>,
    pub zoom: Option<Value>,
    pub translation_x: Option<Value>,
    pub translation_y: Option<Value>,
    pub translation_z: Option<Value>,
    pub init_image: Option<String>,
    pub strength: Option<Value>,
    pub controlnet: Option<ControlNetRequest>,
    pub upload: bool,
    pub debug: bool,
    pub timeout_ms: Option<u64>,
}

/// ControlNet sub-mapping. Each field is independently optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlNetRequest {
    pub enabled: bool,
    pub model: Option<String>,
    pub module: Option<String>,
    pub weight: Option<Value>,
    pub guidance_start: Option<Value>,
    pub guidance_end: Option<Value>,
    pub processor_res: Option<Value>,
    pub threshold_a: Option<Value>,
    pub threshold_b: Option<Value>,
    pub guess_mode: Option<Value>,
    pub softness: Option<Value>,
    pub pixel_perfect: Option<bool>,
    pub resize_mode: Option<String>,
    pub control_mode: Option<String>,
    pub video_path: Option<String>,
}

impl JobRequest {
    /// Coerce an inbound `input` mapping. `null` yields an all-default request.
    pub fn from_value(input: &Value) -> Result<Self, CoreError> {
        let empty = Map::new();
        let obj = match input {
            Value::Null => &empty,
            Value::Object(obj) => obj,
            other => {
                return Err(CoreError::invalid(
                    "input",
                    format!("must be an object, got {}", type_name(other)),
                ))
            }
        };
        let f = Fields::new(obj, "");

        Ok(Self {
            prompt: prompt(obj)?,
            negative_prompt: f.string("negative_prompt")?,
            max_frames: f.uint("max_frames")?,
            seconds: f.float("seconds")?,
            width: f.uint("width")?,
            height: f.uint("height")?,
            seed: f.int("seed")?,
            steps: f.uint("steps")?,
            cfg_scale: f.float("cfg_scale")?,
            fps: f.uint("fps")?,
            sampler: f.string("sampler")?,
            animation_mode: f.string("animation_mode")?,
            angle: f.schedule("angle")?,
            zoom: f.schedule("zoom")?,
            translation_x: f.schedule("translation_x")?,
            translation_y: f.schedule("translation_y")?,
            translation_z: f.schedule("translation_z")?,
            init_image: f.string("init_image")?.filter(|s| !s.trim().is_empty()),
            strength: f.schedule("strength")?,
            controlnet: ControlNetRequest::from_input(obj)?,
            upload: f.boolean("upload")?.unwrap_or(false),
            debug: f.boolean("debug")?.unwrap_or(false),
            timeout_ms: f.timeout_ms("timeout_ms")?,
        })
    }

    /// `true` when the ControlNet block should be emitted.
    pub fn controlnet_enabled(&self) -> bool {
        self.controlnet.as_ref().is_some_and(|cn| cn.enabled)
    }
}

impl ControlNetRequest {
    /// Read the nested `controlnet` mapping, falling back to the flat
    /// `controlnet_*` / `cn_*` keys older callers send.
    fn from_input(obj: &Map<String, Value>) -> Result<Option<Self>, CoreError> {
        let nested = match obj.get("controlnet") {
            None | Some(Value::Null) => None,
            Some(Value::Object(inner)) => Some(inner),
            Some(Value::Bool(enabled)) => {
                return Ok(Some(Self {
                    enabled: *enabled,
                    ..Self::default()
                }))
            }
            Some(other) => {
                return Err(CoreError::invalid(
                    "controlnet",
                    format!("must be an object, got {}", type_name(other)),
                ))
            }
        };

        match nested {
            Some(inner) => Self::from_nested(inner).map(Some),
            None => Self::from_flat(obj),
        }
    }

    fn from_nested(inner: &Map<String, Value>) -> Result<Self, CoreError> {
        let f = Fields::new(inner, "controlnet.");
        Ok(Self {
            enabled: f.boolean("enabled")?.unwrap_or(false),
            model: f.string("model")?,
            module: f.string("module")?,
            weight: f.schedule("weight")?,
            guidance_start: f.schedule("guidance_start")?,
            guidance_end: f.schedule("guidance_end")?,
            processor_res: f.schedule("processor_res")?,
            threshold_a: f.schedule("threshold_a")?,
            threshold_b: f.schedule("threshold_b")?,
            guess_mode: f.schedule("guess_mode")?,
            softness: f.schedule("softness")?,
            pixel_perfect: f.boolean("pixel_perfect")?,
            resize_mode: f.string("resize_mode")?,
            control_mode: f.string("control_mode")?,
            video_path: f.string("video_path")?.filter(|s| !s.trim().is_empty()),
        })
    }

    fn from_flat(obj: &Map<String, Value>) -> Result<Option<Self>, CoreError> {
        let f = Fields::new(obj, "");
        let Some(enabled) = f.boolean("controlnet_enabled")? else {
            return Ok(None);
        };
        Ok(Some(Self {
            enabled,
            model: f.string("controlnet_model")?,
            module: f.string("controlnet_module")?,
            weight: f.schedule("cn_weight")?,
            guidance_start: f.schedule("cn_start")?,
            guidance_end: f.schedule("cn_end")?,
            processor_res: f.schedule("cn_res")?,
            threshold_a: f.schedule("cn_th_a")?,
            threshold_b: f.schedule("cn_th_b")?,
            guess_mode: f.schedule("cn_guess")?,
            softness: f.schedule("cn_soft")?,
            pixel_perfect: None,
            resize_mode: None,
            control_mode: None,
            video_path: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Field coercion
// ---------------------------------------------------------------------------

/// Accessor over one JSON object that reports errors with a field path.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    prefix: &'static str,
}

impl<'a> Fields<'a> {
    fn new(obj: &'a Map<String, Value>, prefix: &'static str) -> Self {
        Self { obj, prefix }
    }

    /// Present, non-null value for `key`.
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.obj.get(key).filter(|v| !v.is_null())
    }

    fn invalid(&self, key: &str, expected: &str, got: &Value) -> CoreError {
        CoreError::invalid(
            format!("{}{key}", self.prefix),
            format!("must be {expected}, got {got}"),
        )
    }

    fn string(&self, key: &str) -> Result<Option<String>, CoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v @ Value::Number(_)) => Ok(Some(v.to_string())),
            Some(v) => Err(self.invalid(key, "a string", v)),
        }
    }

    fn int(&self, key: &str) -> Result<Option<i64>, CoreError> {
        let Some(v) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
            }
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| self.invalid(key, "an integer", v))
    }

    fn uint(&self, key: &str) -> Result<Option<u32>, CoreError> {
        match self.int(key)? {
            None => Ok(None),
            Some(n) => u32::try_from(n).map(Some).map_err(|_| {
                CoreError::invalid(
                    format!("{}{key}", self.prefix),
                    format!("must be a non-negative integer below 2^32, got {n}"),
                )
            }),
        }
    }

    fn float(&self, key: &str) -> Result<Option<f64>, CoreError> {
        let Some(v) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| self.invalid(key, "a number", v))
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>, CoreError> {
        let Some(v) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match v {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" | "" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| self.invalid(key, "a boolean", v))
    }

    /// Schedule inputs stay raw; the builder normalizes them.
    fn schedule(&self, key: &str) -> Result<Option<Value>, CoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => Ok(Some(v.clone())),
            Some(v) => Err(self.invalid(key, "a schedule string or number", v)),
        }
    }

    /// Milliseconds; fractional values are truncated.
    fn timeout_ms(&self, key: &str) -> Result<Option<u64>, CoreError> {
        match self.float(key)? {
            None => Ok(None),
            Some(ms) if ms >= 0.0 => Ok(Some(ms as u64)),
            Some(ms) => Err(CoreError::invalid(
                format!("{}{key}", self.prefix),
                format!("must not be negative, got {ms}"),
            )),
        }
    }
}

/// `Some(i)` when `f` has no fractional part and fits in an i64.
fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn prompt(obj: &Map<String, Value>) -> Result<Option<PromptInput>, CoreError> {
    match obj.get("prompt") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(PromptInput::Single(s.clone()))),
        Some(Value::Object(keyed)) => {
            let mut prompts = BTreeMap::new();
            for (frame, text) in keyed {
                if frame.trim().parse::<u32>().is_err() {
                    return Err(CoreError::invalid(
                        format!("prompt.{frame}"),
                        "key must be a frame number",
                    ));
                }
                let Value::String(text) = text else {
                    return Err(CoreError::invalid(
                        format!("prompt.{frame}"),
                        format!("must be a string, got {text}"),
                    ));
                };
                prompts.insert(frame.trim().to_string(), text.clone());
            }
            if prompts.is_empty() {
                Ok(None)
            } else {
                Ok(Some(PromptInput::Keyed(prompts)))
            }
        }
        Some(other) => Err(CoreError::invalid(
            "prompt",
            format!("must be a string or a frame-keyed object, got {other}"),
        )),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
