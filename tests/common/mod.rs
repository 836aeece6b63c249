//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A throwaway runs root plus a config path that does not exist.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create workspace"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root().join("runs")
    }

    /// Run the binary with an isolated environment.
    pub fn designrun(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_designrun"))
            .args(args)
            .current_dir(self.root())
            .env("DESIGN_RUNS_DIR", self.runs_dir())
            .env("DESIGNRUN_CONFIG", self.root().join("missing-config.json"))
            .env_remove("DESIGNRUN_DRIVER")
            .env_remove("DESIGNRUN_LOG")
            .output()
            .expect("run designrun")
    }

    /// Run and require exit code 0; returns trimmed stdout.
    pub fn ok(&self, args: &[&str]) -> String {
        let output = self.designrun(args);
        assert_eq!(
            output.status.code(),
            Some(0),
            "designrun {args:?} failed\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        stdout(&output)
    }

    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, contents).expect("write workspace file");
        path
    }

    /// A driver command running `body` as the `case` arms of a shell loop
    /// over request lines. `None` when no POSIX shell is available.
    pub fn driver(&self, body: &str) -> Option<String> {
        let shell = Path::new("/bin/sh");
        if !shell.exists() {
            eprintln!("Skipping: /bin/sh not available");
            return None;
        }
        let script = format!(
            "n=0\nwhile IFS= read -r line; do\n  case \"$line\" in\n{body}\n    *) printf '%s\\n' '{{\"ok\": true, \"value\": null}}' ;;\n  esac\ndone\n"
        );
        let path = self.write("driver.sh", script.as_bytes());
        Some(format!("{} {}", shell.display(), path.display()))
    }

    pub fn read_json(&self, relative: &str) -> Value {
        let path = self.runs_dir().join(relative);
        let bytes = fs::read(&path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()));
        serde_json::from_slice(&bytes).expect("parse JSON")
    }

    pub fn events(&self, run_id: &str) -> Vec<Value> {
        let path = self.runs_dir().join(run_id).join("events.ndjson");
        fs::read_to_string(path)
            .expect("read events")
            .lines()
            .map(|line| serde_json::from_str(line).expect("parse event"))
            .collect()
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
