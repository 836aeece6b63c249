//! Driver backed by an external process speaking line-delimited JSON.
//!
//! Each request is one JSON object on the child's stdin; each reply is one
//! JSON object on its stdout: `{"ok": true, "value": ...}` or
//! `{"ok": false, "kind": "...", "message": "..."}`.
use super::{ConnectOptions, Driver, ItemExport, Session};
use crate::error::{DesignError, IoContext, JsonContext, Result};
use crate::store::System;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ProcessDriver {
    command: Option<String>,
}

impl ProcessDriver {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    fn argv(&self) -> Result<Vec<String>> {
        let Some(raw) = self.command.as_deref() else {
            return Err(DesignError::precondition(
                "no browser driver configured; pass --driver, set DESIGNRUN_DRIVER, or set driver_command in config.json",
            ));
        };
        let argv = shell_words::split(raw)
            .map_err(|err| DesignError::InvalidInput(format!("parse driver command: {err}")))?;
        if argv.is_empty() {
            return Err(DesignError::InvalidInput("driver command is empty".into()));
        }
        Ok(argv)
    }
}

impl Driver for ProcessDriver {
    fn connect(&self, system: System, options: &ConnectOptions) -> Result<Box<dyn Session>> {
        let mut argv = self.argv()?;
        let program = argv.remove(0);
        let resolved = which::which(&program).map_err(|err| {
            DesignError::precondition(format!("driver program {program} not found: {err}"))
        })?;
        let mut child = Command::new(&resolved)
            .args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .io_context(|| format!("spawn driver {}", resolved.display()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DesignError::external("driver stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DesignError::external("driver stdout unavailable"))?;
        let mut session = ProcessSession {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            closed: false,
        };
        session.call(&Request::Connect { system, options })?;
        tracing::info!(system = %system, driver = %resolved.display(), "driver connected");
        Ok(Box::new(session))
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Connect {
        system: System,
        options: &'a ConnectOptions,
    },
    CurrentUrl,
    Goto {
        url: &'a str,
    },
    AuthGate,
    Submit {
        prompt: &'a str,
        images: &'a [PathBuf],
    },
    Busy,
    ListItems,
    ReadResponse,
    ExportItem {
        item_id: &'a str,
    },
    Capture {
        item_id: &'a str,
        dest: &'a Path,
    },
    Close,
}

impl Request<'_> {
    fn op(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "connect",
            Request::CurrentUrl => "current_url",
            Request::Goto { .. } => "goto",
            Request::AuthGate => "auth_gate",
            Request::Submit { .. } => "submit",
            Request::Busy => "busy",
            Request::ListItems => "list_items",
            Request::ReadResponse => "read_response",
            Request::ExportItem { .. } => "export_item",
            Request::Capture { .. } => "capture",
            Request::Close => "close",
        }
    }
}

#[derive(Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Default)]
struct ExportReply {
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

struct ProcessSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    closed: bool,
}

impl ProcessSession {
    fn call(&mut self, request: &Request<'_>) -> Result<Value> {
        let op = request.op();
        let start = Instant::now();
        let mut line = serde_json::to_vec(request).json_context(|| format!("serialize {op}"))?;
        line.push(b'\n');
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DesignError::external(format!("driver closed before {op}")))?;
        stdin
            .write_all(&line)
            .and_then(|_| stdin.flush())
            .io_context(|| format!("send {op} to driver"))?;
        let mut reply = String::new();
        let read = self
            .stdout
            .read_line(&mut reply)
            .io_context(|| format!("read {op} reply from driver"))?;
        if read == 0 {
            return Err(DesignError::external(format!(
                "driver exited before answering {op}"
            )));
        }
        let reply: Reply = serde_json::from_str(reply.trim())
            .json_context(|| format!("parse {op} reply from driver"))?;
        tracing::debug!(op, elapsed_ms = start.elapsed().as_millis(), ok = reply.ok, "driver call");
        if reply.ok {
            return Ok(reply.value);
        }
        let message = reply
            .message
            .unwrap_or_else(|| format!("driver failed {op}"));
        Err(match reply.kind.as_deref() {
            Some("auth_required") => DesignError::AuthRequired(message),
            Some("timeout") => DesignError::Timeout {
                what: format!("driver {op}: {message}"),
                waited_s: start.elapsed().as_secs(),
            },
            _ => DesignError::external(format!("{op}: {message}")),
        })
    }

    fn call_as<T: DeserializeOwned>(&mut self, request: &Request<'_>) -> Result<T> {
        let op = request.op();
        let value = self.call(request)?;
        serde_json::from_value(value).json_context(|| format!("decode {op} value"))
    }
}

impl Session for ProcessSession {
    fn current_url(&mut self) -> Result<String> {
        self.call_as(&Request::CurrentUrl)
    }

    fn goto(&mut self, url: &str) -> Result<()> {
        self.call(&Request::Goto { url }).map(|_| ())
    }

    fn auth_gate(&mut self) -> Result<bool> {
        self.call_as(&Request::AuthGate)
    }

    fn submit(&mut self, prompt: &str, images: &[PathBuf]) -> Result<()> {
        self.call(&Request::Submit { prompt, images }).map(|_| ())
    }

    fn busy(&mut self) -> Result<bool> {
        self.call_as(&Request::Busy)
    }

    fn list_items(&mut self) -> Result<Vec<String>> {
        self.call_as(&Request::ListItems)
    }

    fn read_response(&mut self) -> Result<String> {
        self.call_as(&Request::ReadResponse)
    }

    fn export_item(&mut self, item_id: &str) -> Result<ItemExport> {
        let value = self.call(&Request::ExportItem { item_id })?;
        if value.is_null() {
            return Ok(ItemExport::default());
        }
        let reply: ExportReply =
            serde_json::from_value(value).json_context(|| "decode export_item value")?;
        Ok(ItemExport {
            html: reply.html,
            url: reply.url,
        })
    }

    fn capture(&mut self, item_id: &str, dest: &Path) -> Result<()> {
        self.call(&Request::Capture { item_id, dest }).map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.call(&Request::Close).map(|_| ());
        drop(self.stdin.take());
        self.child
            .wait()
            .io_context(|| "wait for driver exit")?;
        result
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.child.kill() {
            tracing::debug!(error = %err, "driver already exited");
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sh_driver(reply: &str) -> Option<ProcessDriver> {
        which::which("sh").ok()?;
        let script = format!("while read -r line; do echo '{reply}'; done");
        let command = shell_words::join(["sh", "-c", script.as_str()]);
        Some(ProcessDriver::new(Some(command)))
    }

    #[test]
    fn missing_driver_is_a_precondition_failure() {
        let options = ConnectOptions::from_flags(None, None, false);
        let err = ProcessDriver::new(None)
            .connect(System::Chat, &options)
            .err()
            .expect("no driver configured");
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[test]
    fn replies_are_decoded_per_request() {
        let Some(driver) = sh_driver(r#"{"ok": true, "value": "https://chat.example/c/42"}"#) else {
            return;
        };
        let options = ConnectOptions::from_flags(None, None, false);
        let mut session = driver.connect(System::Chat, &options).expect("connect");
        assert_eq!(
            session.current_url().expect("current url"),
            "https://chat.example/c/42"
        );
        session.close().expect("close");
    }

    #[test]
    fn auth_failures_keep_their_kind() {
        let Some(driver) =
            sh_driver(r#"{"ok": false, "kind": "auth_required", "message": "login wall"}"#)
        else {
            return;
        };
        let options = ConnectOptions::from_flags(None, None, false);
        let err = driver
            .connect(System::Aura, &options)
            .err()
            .expect("auth failure");
        assert_eq!(err.kind(), ErrorKind::AuthRequired);
    }
}
