use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

/// Settings resolved once at startup from the config file and environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub source: Option<String>,
    pub kubectl_bin: Option<String>,
    pub allowed_namespaces: BTreeSet<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PortsideConfigFile {
    #[serde(default)]
    kubectl_bin: Option<String>,
    #[serde(default)]
    allowed_namespaces: Vec<String>,
}

impl Settings {
    /// Loads the discovered config file, if any, then applies environment
    /// overrides. `PORTSIDE_ALLOWED_NAMESPACES` is a comma-separated list
    /// and wins over the file's `allowed_namespaces`.
    pub fn load() -> Result<Self> {
        let mut settings = match discover_config_path() {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                let parsed: PortsideConfigFile = serde_yaml::from_str(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?;
                Settings {
                    source: Some(path.display().to_string()),
                    kubectl_bin: parsed.kubectl_bin,
                    allowed_namespaces: normalize_names(parsed.allowed_namespaces),
                }
            }
            None => Settings::default(),
        };

        if let Ok(list) = std::env::var("PORTSIDE_ALLOWED_NAMESPACES")
            && !list.trim().is_empty()
        {
            settings.allowed_namespaces = parse_allowed_list(&list);
        }

        Ok(settings)
    }
}

pub fn parse_allowed_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_names(names: Vec<String>) -> BTreeSet<String> {
    names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PORTSIDE_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("portside.yaml"),
        PathBuf::from("portside.yml"),
        PathBuf::from(".portside.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/portside/config.yaml"),
            PathBuf::from(&home).join(".config/portside/config.yml"),
            PathBuf::from(&home).join(".portside.yaml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
