//! Image build recipe and compose project generation.
//!
//! Both files are derived from the descriptor on every invocation and
//! written under `<build_context>/.netbuffer/`. The compose file is emitted
//! as JSON, which compose reads as YAML.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};

/// Directory inside the build context holding generated files.
pub const STATE_DIR: &str = ".netbuffer";
pub const DOCKERFILE: &str = "Dockerfile";
pub const COMPOSE_FILE: &str = "compose.json";
/// Per-Dockerfile ignore file, preferred by BuildKit over the context's.
pub const DOCKERIGNORE: &str = "Dockerfile.dockerignore";

/// Render the image build recipe.
///
/// Descriptor values only appear JSON-quoted or in exec form.
pub fn dockerfile(descriptor: &Descriptor) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "FROM {}", descriptor.image_base);
    let _ = writeln!(out);
    for (key, value) in &descriptor.environment {
        let _ = writeln!(out, "ENV {}={}", key, quote(value));
    }
    let _ = writeln!(
        out,
        "RUN ln -snf /usr/share/zoneinfo/$TZ /etc/localtime && echo $TZ > /etc/timezone"
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "WORKDIR {}", descriptor.working_dir);
    let _ = writeln!(out);
    let _ = writeln!(out, "COPY {}", exec_form(&[descriptor.requirements.as_str(), "./"]));
    let _ = writeln!(
        out,
        "RUN {}",
        exec_form(&[
            "pip",
            "install",
            "--no-cache-dir",
            "-r",
            file_name(&descriptor.requirements),
        ])
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "COPY . .");
    let _ = writeln!(out, "RUN {}", exec_form(&["mkdir", "-p", descriptor.data_dir.as_str()]));
    let _ = writeln!(out);
    let _ = writeln!(out, "EXPOSE {}", descriptor.port);
    let _ = writeln!(out);
    let _ = writeln!(out, "CMD {}", exec_form(&descriptor.command));
    out
}

/// Ignore rules for the generated Dockerfile: the context's own
/// `.dockerignore` plus the generated directory itself.
pub fn dockerignore(existing: &str) -> String {
    let mut out = existing.trim_end().to_string();
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(STATE_DIR);
    out.push('\n');
    out
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

fn exec_form<S: AsRef<str>>(args: &[S]) -> String {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    serde_json::to_string(&args).unwrap_or_else(|_| "[]".to_string())
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Compose project file (subset).
#[derive(Debug, Serialize)]
pub struct ComposeFile {
    pub name: String,
    pub services: BTreeMap<String, ComposeService>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeSpec>,
}

#[derive(Debug, Serialize)]
pub struct ComposeService {
    pub build: BuildSpec,
    pub image: String,
    pub ports: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub restart: String,
}

#[derive(Debug, Serialize)]
pub struct BuildSpec {
    pub context: PathBuf,
    pub dockerfile: String,
}

#[derive(Debug, Serialize)]
pub struct VolumeSpec {}

/// Render the compose project for the single managed service.
pub fn compose_file(descriptor: &Descriptor) -> ComposeFile {
    let mut volumes = BTreeMap::new();
    let mount = match &descriptor.host_data_dir {
        Some(host) => format!("{}:{}", host.display(), descriptor.data_dir),
        None => {
            volumes.insert(descriptor.volume_name(), VolumeSpec {});
            format!("{}:{}", descriptor.volume_name(), descriptor.data_dir)
        }
    };

    let service = ComposeService {
        build: BuildSpec {
            context: descriptor.build_context.clone(),
            dockerfile: format!("{STATE_DIR}/{DOCKERFILE}"),
        },
        image: descriptor.image_tag(),
        ports: vec![format!("{}:{}", descriptor.host_port, descriptor.port)],
        environment: descriptor.environment.clone(),
        volumes: vec![mount],
        restart: "unless-stopped".to_string(),
    };

    ComposeFile {
        name: descriptor.name.clone(),
        services: BTreeMap::from([(descriptor.name.clone(), service)]),
        volumes,
    }
}

/// Handle on the orchestration project for one invocation.
///
/// Re-resolved from the descriptor every time; nothing is cached between
/// invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    pub name: String,
    pub service: String,
    pub compose_file: PathBuf,
}

impl ComposeProject {
    /// Write the build recipe and compose file, returning the project handle.
    pub async fn prepare(descriptor: &Descriptor) -> Result<Self> {
        let dir = descriptor.build_context.join(STATE_DIR);
        let recipe_err = |source| Error::Recipe {
            path: dir.clone(),
            source,
        };

        fs::create_dir_all(&dir).await.map_err(recipe_err)?;

        let dockerfile_path = dir.join(DOCKERFILE);
        fs::write(&dockerfile_path, dockerfile(descriptor))
            .await
            .map_err(recipe_err)?;

        let ignore_path = descriptor.build_context.join(".dockerignore");
        let existing = match fs::read_to_string(&ignore_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(recipe_err(e)),
        };
        fs::write(dir.join(DOCKERIGNORE), dockerignore(&existing))
            .await
            .map_err(recipe_err)?;

        let compose = compose_file(descriptor);
        let json = serde_json::to_string_pretty(&compose)
            .map_err(|e| recipe_err(std::io::Error::other(e)))?;
        let compose_path = dir.join(COMPOSE_FILE);
        fs::write(&compose_path, json).await.map_err(recipe_err)?;

        debug!(
            project = %descriptor.name,
            file = %compose_path.display(),
            "Prepared compose project"
        );

        Ok(Self::at(&descriptor.name, &compose_path))
    }

    /// Handle for an already prepared project.
    pub fn at(name: &str, compose_file: &Path) -> Self {
        Self {
            name: name.to_string(),
            service: name.to_string(),
            compose_file: compose_file.to_path_buf(),
        }
    }
}
