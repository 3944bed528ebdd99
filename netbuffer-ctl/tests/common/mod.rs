//! Test helpers: a scratch project with a fake orchestration CLI.
//!
//! The fake keeps the service state (`absent`, `running`, `exited`) in a
//! file and appends every invocation to `calls.log`.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use netbuffer_ctl::{ComposeBackend, ComposeProject, Descriptor, Runtime};
use tempfile::TempDir;

const FAKE_COMPOSE: &str = r#"#!/bin/sh
DIR="@DIR@"
echo "$*" >> "$DIR/calls.log"
state=$(cat "$DIR/state" 2>/dev/null || echo absent)

[ "$1" = "compose" ] && shift
[ "$1" = "-p" ] && shift 2
[ "$1" = "-f" ] && shift 2

case "$1" in
  probe)
    ;;
  build)
    if [ -f "$DIR/fail-build" ]; then
      echo "#1 [internal] load build definition from Dockerfile" >&2
      echo "#1 transferring dockerfile: 412B done" >&2
      echo "#2 [internal] load metadata for docker.io/library/python:3.11-slim" >&2
      echo "failed to solve: requirements.txt not found" >&2
      exit 17
    fi
    ;;
  up)
    echo running > "$DIR/state"
    ;;
  stop)
    if [ "$state" = running ]; then echo exited > "$DIR/state"; fi
    ;;
  restart)
    echo running > "$DIR/state"
    ;;
  ps)
    if [ "$state" != absent ]; then
      printf '{"Name":"netbuffer-netbuffer-1","Service":"netbuffer","State":"%s","Status":"","Publishers":[{"URL":"0.0.0.0","TargetPort":8000,"PublishedPort":8000,"Protocol":"tcp"}]}\n' "$state"
    fi
    ;;
  logs)
    echo "INFO: Started server process"
    echo "INFO: Waiting for application startup."
    echo "INFO: Uvicorn running on http://0.0.0.0:8000"
    if [ -f "$DIR/follow" ]; then exec sleep 30; fi
    ;;
  exec)
    exit $(cat "$DIR/exec-code" 2>/dev/null || echo 0)
    ;;
  system)
    echo "Total reclaimed space: 0B"
    ;;
esac
exit 0
"#;

/// Scratch project: an app directory, a descriptor and a fake runtime.
pub struct Fixture {
    dir: TempDir,
    pub script: PathBuf,
    pub descriptor_path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_descriptor(r#"{"build_context": "app", "port": 8000}"#)
    }

    pub fn with_descriptor(json: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        let app = root.join("app");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("requirements.txt"), "fastapi\nuvicorn\n").unwrap();
        std::fs::write(app.join("main.py"), "app = None\n").unwrap();

        let descriptor_path = root.join("netbuffer.json");
        std::fs::write(&descriptor_path, json).unwrap();

        let script = root.join("fake-compose");
        std::fs::write(
            &script,
            FAKE_COMPOSE.replace("@DIR@", &root.display().to_string()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        wait_executable(&script);

        Self {
            dir,
            script,
            descriptor_path,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn runtime(&self) -> Runtime {
        let program = self.script.display().to_string();
        Runtime {
            program: program.clone(),
            compose_args: vec!["compose".to_string()],
            engine: program,
        }
    }

    pub async fn backend(&self) -> ComposeBackend {
        let descriptor = Descriptor::load(&self.descriptor_path).expect("descriptor");
        let project = ComposeProject::prepare(&descriptor).await.expect("prepare");
        ComposeBackend::new(self.runtime(), project)
    }

    pub fn set_state(&self, state: &str) {
        std::fs::write(self.path().join("state"), state).unwrap();
    }

    pub fn state(&self) -> String {
        std::fs::read_to_string(self.path().join("state"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "absent".to_string())
    }

    pub fn touch(&self, flag: &str) {
        std::fs::write(self.path().join(flag), "").unwrap();
    }

    pub fn write(&self, name: &str, content: &str) {
        std::fs::write(self.path().join(name), content).unwrap();
    }

    /// Compose verbs invoked so far, with the global flags stripped.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.starts_with("probe"))
            .map(|l| {
                let words: Vec<&str> = l.split_whitespace().collect();
                let mut rest = words.as_slice();
                if rest.first() == Some(&"compose") {
                    rest = &rest[1..];
                }
                for flag in ["-p", "-f"] {
                    if rest.len() >= 2 && rest[0] == flag {
                        rest = &rest[2..];
                    }
                }
                rest.join(" ")
            })
            .collect()
    }

    /// Raw invocation lines.
    pub fn raw_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.starts_with("probe"))
            .map(str::to_string)
            .collect()
    }
}

// A freshly written script can briefly fail with ETXTBSY while another test
// thread forks.
fn wait_executable(script: &Path) {
    for _ in 0..50 {
        match std::process::Command::new(script).arg("probe").status() {
            Err(e) if e.raw_os_error() == Some(26) => {
                std::thread::sleep(Duration::from_millis(20));
            }
            _ => return,
        }
    }
}
