use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{Catalog, CoordinatorConfig};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.json` files are JSON, everything else is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CoordinatorConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, ConfigFormat::from_path(path))
}

pub fn load_config_from_str(
    content: &str,
    format: ConfigFormat,
) -> Result<CoordinatorConfig, ConfigError> {
    let config: CoordinatorConfig = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &CoordinatorConfig) -> Result<(), ConfigError> {
    if config.system_name.trim().is_empty() {
        return Err(invalid("system_name must not be empty"));
    }

    let intervals = [
        ("scan_poll_interval_ms", config.scan_poll_interval_ms),
        ("analyzer_poll_interval_ms", config.analyzer_poll_interval_ms),
        ("transformer_poll_interval_ms", config.transformer_poll_interval_ms),
        ("uploader_poll_interval_ms", config.uploader_poll_interval_ms),
        ("upload_wait_interval_ms", config.upload_wait_interval_ms),
        ("download_poll_interval_ms", config.download_poll_interval_ms),
        ("analyze_lock_timeout_ms", config.analyze_lock_timeout_ms),
        ("transform_lock_timeout_ms", config.transform_lock_timeout_ms),
        ("scan_lock_timeout_ms", config.scan_lock_timeout_ms),
        ("scan_expiration_ms", config.scan_expiration_ms),
    ];
    for (name, value) in intervals {
        if value == 0 {
            return Err(invalid(format!("{} must be greater than zero", name)));
        }
    }

    unique_names("operation", config.operations.iter().map(|o| o.name.as_str()))?;
    for op in &config.operations {
        if op.command.trim().is_empty() {
            return Err(invalid(format!("Operation '{}' has no command", op.name)));
        }
        if op.args.is_empty() {
            return Err(invalid(format!("Operation '{}' has no args", op.name)));
        }
    }

    if let Some(catalog) = &config.catalog {
        validate_catalog(catalog)?;
    }

    Ok(())
}

fn unique_names<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<HashSet<&'a str>, ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(invalid(format!("{} with empty name", kind)));
        }
        if !seen.insert(name) {
            return Err(invalid(format!("Duplicate {} '{}'", kind, name)));
        }
    }
    Ok(seen)
}

fn validate_catalog(catalog: &Catalog) -> Result<(), ConfigError> {
    let sources = unique_names("source", catalog.sources.iter().map(|s| s.name.as_str()))?;
    unique_names(
        "destination",
        catalog.destinations.iter().map(|d| d.name.as_str()),
    )?;
    let media = unique_names("media", catalog.media.iter().map(|m| m.name.as_str()))?;
    let profiles = unique_names("profile", catalog.profiles.iter().map(|p| p.name.as_str()))?;
    unique_names("library", catalog.libraries.iter().map(|l| l.name.as_str()))?;

    for m in &catalog.media {
        if let Some(parent) = &m.from {
            if !media.contains(parent.as_str()) {
                return Err(invalid(format!(
                    "Media '{}' extends unknown media '{}'",
                    m.name, parent
                )));
            }
        }
    }

    for profile in &catalog.profiles {
        if let Some(m) = &profile.media {
            if !media.contains(m.as_str()) {
                return Err(invalid(format!(
                    "Profile '{}' references unknown media '{}'",
                    profile.name, m
                )));
            }
        }
        for parent in profile.from.iter().chain(profile.sub_profiles.iter()) {
            if !profiles.contains(parent.as_str()) {
                return Err(invalid(format!(
                    "Profile '{}' references unknown profile '{}'",
                    profile.name, parent
                )));
            }
        }
        for pattern in &profile.additional_assets {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(invalid(format!(
                    "Profile '{}' has invalid additional_assets pattern '{}': {}",
                    profile.name, pattern, e
                )));
            }
        }
    }

    for library in &catalog.libraries {
        if !media.contains(library.media.as_str()) {
            return Err(invalid(format!(
                "Library '{}' references unknown media '{}'",
                library.name, library.media
            )));
        }
        for source in &library.sources {
            if !sources.contains(source.as_str()) {
                return Err(invalid(format!(
                    "Library '{}' references unknown source '{}'",
                    library.name, source
                )));
            }
        }
    }

    Ok(())
}
