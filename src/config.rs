#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::pagination::{DEFAULT_PAGE_SIZE, DEFAULT_RETRY_COUNT};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_STATE_DIR: &str = ".newtube";
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct GalleryConfig {
    pub api_url: String,
    pub page_size: u32,
    pub fetch_retries: u32,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub page_size: Option<u32>,
    pub state_dir: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_gallery_config(overrides: ConfigOverrides) -> Result<GalleryConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_gallery_config(&file_vars, env_var_string, overrides))
}

fn build_gallery_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> GalleryConfig {
    let api_url = overrides
        .api_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("NEWTUBE_API_URL", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let page_size = overrides
        .page_size
        .or_else(|| {
            lookup_value("NEWTUBE_PAGE_SIZE", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u32>().ok())
        })
        .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
        .unwrap_or(DEFAULT_PAGE_SIZE);
    let fetch_retries = lookup_value("NEWTUBE_FETCH_RETRIES", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_RETRY_COUNT);
    let state_dir = overrides
        .state_dir
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("NEWTUBE_STATE_DIR", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_STATE_DIR.to_string());
    GalleryConfig {
        api_url,
        page_size,
        fetch_retries,
        state_dir: PathBuf::from(state_dir),
    }
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
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

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
