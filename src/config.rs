#![forbid(unsafe_code)]

//! Runtime configuration for the VidGate binaries.
//!
//! Values resolve in precedence order: programmatic overrides, then process
//! environment variables, then a `.env` file, then defaults. The defaults
//! match a bare checkout: videos land in `./videos`, static assets come from
//! `./public`, and yt-dlp is found on PATH.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_VIDEOS_ROOT: &str = "videos";
pub const DEFAULT_WWW_ROOT: &str = "public";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_VIDEO_LIFETIME_SECS: u64 = 3_600;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub videos_root: PathBuf,
    pub www_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub ytdlp_bin: String,
    pub search_timeout: Duration,
    pub video_lifetime: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub videos_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    resolve_runtime_config(RuntimeOverrides::default())
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides)
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let videos_root = overrides
        .videos_root
        .or_else(|| lookup_value("VIDEOS_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEOS_ROOT));
    let www_root = overrides
        .www_root
        .or_else(|| lookup_value("WWW_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WWW_ROOT));
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("VIDGATE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
        .or_else(|| lookup_value("VIDGATE_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let ytdlp_bin = lookup_value("YTDLP_BIN", file_vars, &env_lookup)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_YTDLP_BIN.to_string());
    let search_timeout_ms = lookup_value("VIDGATE_SEARCH_TIMEOUT_MS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_SEARCH_TIMEOUT_MS);
    let video_lifetime_secs = lookup_value("VIDGATE_VIDEO_LIFETIME_SECS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_VIDEO_LIFETIME_SECS);

    Ok(RuntimeConfig {
        videos_root,
        www_root,
        port,
        host,
        ytdlp_bin,
        search_timeout: Duration::from_millis(search_timeout_ms),
        video_lifetime: Duration::from_secs(video_lifetime_secs),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a `.env`-style file: `KEY=value` lines, optional `export ` prefix,
/// single or double quotes stripped, `#` comments and blank lines ignored.
/// A missing file is an empty map, not an error.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
