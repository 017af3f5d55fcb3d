//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use deforum_cloud::BlobConfig;
use deforum_core::controlnet::ControlNetOverrides;
use deforum_engine::{CliConfig, EngineApi};
use serde::Serialize;

/// Errors from reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// How the engine is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    /// Launch the engine once per job.
    #[default]
    Cli,
    /// Submit jobs to an engine that is already serving.
    Api,
}

/// Worker configuration.
///
/// All fields have defaults matching the standard container layout.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mode: EngineMode,
    /// Engine install directory.
    pub engine_root: PathBuf,
    pub python: PathBuf,
    pub launch: PathBuf,
    /// Port the engine listens on.
    pub engine_port: u16,
    pub engine_base_url: String,
    /// Known job submission path; discovered when unset.
    pub api_path: Option<String>,
    pub job_timeout: Duration,
    pub ckpt_path: Option<PathBuf>,
    /// Where the engine is told to write renders.
    pub outdir: PathBuf,
    /// Directories scanned for the finished render, in order.
    pub search_dirs: Vec<PathBuf>,
    /// Ignore renders older than the current run.
    pub fresh_only: bool,
    pub heartbeat_interval: Duration,
    pub controlnet: ControlNetOverrides,
    pub blob: BlobConfig,
    /// `serve` bind address.
    pub host: String,
    pub port: u16,
}

/// Which settings are present, without their values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnvVisibility {
    pub blob_base_set: bool,
    pub blob_token_set: bool,
    pub blob_proxy_set: bool,
    pub blob_public_base_set: bool,
    pub blob_legacy_set: bool,
    pub ckpt_path_set: bool,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default                                   |
    /// |--------------------------|-------------------------------------------|
    /// | `ENGINE_MODE`            | `cli` (`cli` or `api`)                    |
    /// | `A1111_ROOT`             | `/workspace/stable-diffusion-webui`       |
    /// | `A1111_PYTHON`           | `<root>/venv/bin/python`                  |
    /// | `A1111_LAUNCH`           | `<root>/launch.py`                        |
    /// | `A1111_PORT`             | `3001`                                    |
    /// | `ENGINE_BASE_URL`        | `http://127.0.0.1:<A1111_PORT>`           |
    /// | `DEFORUM_API_PATH`       | unset (discovered)                        |
    /// | `DEFORUM_JOB_TIMEOUT`    | `900` (seconds)                           |
    /// | `CKPT_PATH`              | unset                                     |
    /// | `DEFORUM_OUTDIR`         | `/workspace/outputs/deforum`              |
    /// | `DEFORUM_SEARCH_DIRS`    | outdir, `<root>/outputs/deforum`, `<root>/outputs` |
    /// | `DEFORUM_FRESH_ONLY`     | `true`                                    |
    /// | `HEARTBEAT_SECS`         | `15`                                      |
    /// | `CONTROLNET_MODEL`       | unset                                     |
    /// | `CONTROLNET_MODULE`      | unset                                     |
    /// | `VERCEL_BLOB_BASE`, `BLOB_BASE` | unset                              |
    /// | `VERCEL_BLOB_RW_TOKEN`, `VERCEL_BLOB_READ_WRITE_TOKEN`, `VERCEL_BLOB_TOKEN` | unset |
    /// | `BLOB_PROXY_URL`         | unset                                     |
    /// | `BLOB_PUBLIC_BASE`       | unset                                     |
    /// | `BLOB_LEGACY_URL`        | unset                                     |
    /// | `BLOB_TIMEOUT_SECS`      | `180`                                     |
    /// | `HOST`                   | `0.0.0.0`                                 |
    /// | `PORT`                   | `8000`                                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let first = |keys: &[&str]| keys.iter().find_map(|k| get(k));

        let mode = match get("ENGINE_MODE").map(|m| m.to_ascii_lowercase()) {
            None => EngineMode::Cli,
            Some(m) if m == "cli" || m == "cli-launch" => EngineMode::Cli,
            Some(m) if m == "api" || m == "http" => EngineMode::Api,
            Some(m) => {
                return Err(ConfigError::Invalid {
                    var: "ENGINE_MODE",
                    value: m,
                    expected: "`cli` or `api`",
                })
            }
        };

        let engine_root = PathBuf::from(
            get("A1111_ROOT").unwrap_or_else(|| "/workspace/stable-diffusion-webui".into()),
        );
        let python = get("A1111_PYTHON")
            .map(PathBuf::from)
            .unwrap_or_else(|| engine_root.join("venv/bin/python"));
        let launch = get("A1111_LAUNCH")
            .map(PathBuf::from)
            .unwrap_or_else(|| engine_root.join("launch.py"));
        let engine_port: u16 = parse(&get, "A1111_PORT", 3001, "a port number")?;
        let engine_base_url =
            get("ENGINE_BASE_URL").unwrap_or_else(|| format!("http://127.0.0.1:{engine_port}"));

        let job_timeout_secs: u64 = parse(&get, "DEFORUM_JOB_TIMEOUT", 900, "a number of seconds")?;
        let outdir = PathBuf::from(
            get("DEFORUM_OUTDIR").unwrap_or_else(|| "/workspace/outputs/deforum".into()),
        );
        let search_dirs = match get("DEFORUM_SEARCH_DIRS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            None => vec![
                outdir.clone(),
                engine_root.join("outputs/deforum"),
                engine_root.join("outputs"),
            ],
        };
        let fresh_only = parse_bool(&get, "DEFORUM_FRESH_ONLY", true)?;
        let heartbeat_secs: u64 = parse(&get, "HEARTBEAT_SECS", 15, "a number of seconds")?;
        if heartbeat_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "HEARTBEAT_SECS",
                value: "0".into(),
                expected: "a positive number of seconds",
            });
        }

        let blob_timeout_secs: u64 = parse(&get, "BLOB_TIMEOUT_SECS", 180, "a number of seconds")?;
        let blob = BlobConfig {
            base_url: first(&["VERCEL_BLOB_BASE", "BLOB_BASE"]),
            token: first(&[
                "VERCEL_BLOB_RW_TOKEN",
                "VERCEL_BLOB_READ_WRITE_TOKEN",
                "VERCEL_BLOB_TOKEN",
            ]),
            proxy_url: get("BLOB_PROXY_URL"),
            public_base: get("BLOB_PUBLIC_BASE"),
            legacy_url: get("BLOB_LEGACY_URL"),
            timeout: Duration::from_secs(blob_timeout_secs),
        };

        Ok(Self {
            mode,
            python,
            launch,
            engine_port,
            engine_base_url,
            api_path: get("DEFORUM_API_PATH"),
            job_timeout: Duration::from_secs(job_timeout_secs),
            ckpt_path: get("CKPT_PATH").map(PathBuf::from),
            outdir,
            search_dirs,
            fresh_only,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            controlnet: ControlNetOverrides {
                model: get("CONTROLNET_MODEL"),
                module: get("CONTROLNET_MODULE"),
            },
            blob,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "PORT", 8000, "a port number")?,
            engine_root,
        })
    }

    /// Launcher settings for the subprocess strategy.
    pub fn cli_config(&self) -> CliConfig {
        CliConfig {
            python: self.python.clone(),
            launch: self.launch.clone(),
            root: self.engine_root.clone(),
            port: self.engine_port,
            ckpt: self.ckpt_path.clone(),
        }
    }

    pub fn engine_api(&self) -> EngineApi {
        EngineApi::new(self.engine_base_url.clone())
    }

    /// Mode name reported in run results.
    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            EngineMode::Cli => "cli-launch",
            EngineMode::Api => "api",
        }
    }

    pub fn env_seen(&self) -> EnvVisibility {
        EnvVisibility {
            blob_base_set: self.blob.base_url.is_some(),
            blob_token_set: self.blob.token.is_some(),
            blob_proxy_set: self.blob.proxy_url.is_some(),
            blob_public_base_set: self.blob.public_base.is_some(),
            blob_legacy_set: self.blob.legacy_url.is_some(),
            ckpt_path_set: self.ckpt_path.is_some(),
        }
    }
}

fn parse<T, G>(
    get: &G,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected,
        }),
    }
}

fn parse_bool<G>(get: &G, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value: v,
                expected: "a boolean",
            }),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
