//! Service descriptor: the static build and runtime parameters of the
//! managed service.
//!
//! Loaded once per invocation from a JSON file and never mutated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_NAME: &str = "netbuffer";
pub const DEFAULT_IMAGE_BASE: &str = "python:3.11-slim";
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
pub const DEFAULT_WORKING_DIR: &str = "/app";
pub const DEFAULT_DATA_DIR: &str = "/app/data";
pub const DEFAULT_REQUIREMENTS: &str = "requirements.txt";
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// On-disk form. Everything is optional here so that missing required
/// fields surface as a named `ConfigError` instead of a serde message.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    name: Option<String>,
    build_context: Option<PathBuf>,
    port: Option<u32>,
    host_port: Option<u32>,
    image_base: Option<String>,
    timezone: Option<String>,
    working_dir: Option<String>,
    data_dir: Option<String>,
    host_data_dir: Option<PathBuf>,
    requirements: Option<String>,
    command: Option<Vec<String>>,
    shell: Option<Vec<String>>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
}

/// Validated, immutable service descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub build_context: PathBuf,
    pub port: u16,
    pub host_port: u16,
    pub image_base: String,
    pub timezone: String,
    pub working_dir: String,
    pub data_dir: String,
    /// Host directory bind-mounted at `data_dir`. A named volume is used
    /// when absent.
    pub host_data_dir: Option<PathBuf>,
    pub requirements: String,
    pub command: Vec<String>,
    pub shell: Vec<String>,
    /// Effective environment: pass-through defaults overlaid by the
    /// descriptor's own entries.
    pub environment: BTreeMap<String, String>,
}

impl Descriptor {
    /// Load and validate the descriptor at `path`.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawDescriptor =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let descriptor = Self::from_raw(raw, base)?;

        debug!(
            name = %descriptor.name,
            context = %descriptor.build_context.display(),
            port = descriptor.port,
            "Loaded service descriptor"
        );
        Ok(descriptor)
    }

    fn from_raw(raw: RawDescriptor, base: &Path) -> Result<Self, ConfigError> {
        let name = raw.name.unwrap_or_else(|| DEFAULT_NAME.to_string());
        validate_name(&name)?;

        let build_context = raw
            .build_context
            .ok_or(ConfigError::Missing("build_context"))?;
        let build_context = resolve(base, build_context);
        if !build_context.is_dir() {
            return Err(ConfigError::Invalid {
                field: "build_context",
                reason: format!("{} is not a directory", build_context.display()),
            });
        }
        // Compose resolves relative paths against the compose file, which
        // lives inside the context.
        let build_context = build_context
            .canonicalize()
            .map_err(|e| ConfigError::Invalid {
                field: "build_context",
                reason: e.to_string(),
            })?;

        let port = parse_port("port", raw.port.ok_or(ConfigError::Missing("port"))?)?;
        let host_port = match raw.host_port {
            Some(p) => parse_port("host_port", p)?,
            None => port,
        };

        let working_dir = raw
            .working_dir
            .unwrap_or_else(|| DEFAULT_WORKING_DIR.to_string());
        require_absolute("working_dir", &working_dir)?;
        require_word("working_dir", &working_dir)?;
        let data_dir = raw.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        require_absolute("data_dir", &data_dir)?;
        require_printable("data_dir", &data_dir)?;

        let timezone = raw.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        require_word("timezone", &timezone)?;
        let image_base = raw
            .image_base
            .unwrap_or_else(|| DEFAULT_IMAGE_BASE.to_string());
        require_word("image_base", &image_base)?;
        let requirements = raw
            .requirements
            .unwrap_or_else(|| DEFAULT_REQUIREMENTS.to_string());
        require_word("requirements", &requirements)?;

        let command = raw.command.unwrap_or_else(|| default_command(port));
        if command.is_empty() {
            return Err(ConfigError::Invalid {
                field: "command",
                reason: "must not be empty".to_string(),
            });
        }
        for arg in &command {
            require_printable("command", arg)?;
        }
        let shell = raw.shell.unwrap_or_else(|| vec![DEFAULT_SHELL.to_string()]);
        if shell.is_empty() {
            return Err(ConfigError::Invalid {
                field: "shell",
                reason: "must not be empty".to_string(),
            });
        }
        for arg in &shell {
            require_printable("shell", arg)?;
        }

        for (key, value) in &raw.environment {
            if !is_variable_name(key) {
                return Err(ConfigError::Invalid {
                    field: "environment",
                    reason: format!("bad variable name {key:?}"),
                });
            }
            require_printable("environment", value)?;
        }
        let mut environment = default_environment(&timezone, &data_dir);
        environment.extend(raw.environment);

        Ok(Self {
            name,
            build_context,
            port,
            host_port,
            image_base,
            timezone,
            working_dir,
            data_dir,
            host_data_dir: raw
                .host_data_dir
                .map(|p| std::path::absolute(resolve(base, p)))
                .transpose()
                .map_err(|e| ConfigError::Invalid {
                    field: "host_data_dir",
                    reason: e.to_string(),
                })?,
            requirements,
            command,
            shell,
            environment,
        })
    }

    /// Image tag built for this service.
    pub fn image_tag(&self) -> String {
        format!("{}:latest", self.name)
    }

    /// Named volume used when no host data directory is configured.
    pub fn volume_name(&self) -> String {
        format!("{}-data", self.name)
    }
}

fn default_command(port: u16) -> Vec<String> {
    [
        "uvicorn",
        "main:app",
        "--host",
        "0.0.0.0",
        "--port",
        &port.to_string(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_environment(timezone: &str, data_dir: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("TZ".to_string(), timezone.to_string()),
        ("DATA_DIR".to_string(), data_dir.to_string()),
        ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
    ])
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

// Compose project names: lowercase alphanumerics, '-' and '_', starting
// with a letter or digit.
fn validate_name(name: &str) -> Result<(), ConfigError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: "name",
            reason: format!("{name:?} is not a valid project name"),
        })
    }
}

fn parse_port(field: &'static str, value: u32) -> Result<u16, ConfigError> {
    u16::try_from(value)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ConfigError::Invalid {
            field,
            reason: format!("{value} is not a valid port"),
        })
}

// Shell-style variable names: `[A-Za-z_][A-Za-z0-9_]*`.
fn is_variable_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// Values end up in generated build files, one instruction per line.
fn require_printable(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match value.chars().find(|c| c.is_control()) {
        None => Ok(()),
        Some(c) => Err(ConfigError::Invalid {
            field,
            reason: format!("{value:?} contains control character {c:?}"),
        }),
    }
}

fn require_word(field: &'static str, value: &str) -> Result<(), ConfigError> {
    require_printable(field, value)?;
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value:?} must be a single non-empty word"),
        });
    }
    Ok(())
}

fn require_absolute(field: &'static str, path: &str) -> Result<(), ConfigError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{path:?} must be an absolute container path"),
        })
    }
}
