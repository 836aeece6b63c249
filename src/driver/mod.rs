//! Browser capability boundary.
//!
//! Operators never touch a browser directly. They talk to a [`Session`]
//! obtained from a [`Driver`]; the production driver is an external process
//! that owns the browser, page selectors, and screenshot mechanics.
mod process;

#[cfg(test)]
pub mod fake;

pub use process::ProcessDriver;

use crate::error::Result;
use crate::store::System;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// How to obtain a browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConnectMode {
    /// Attach to an already running, already authenticated browser.
    Attach { endpoint: String },
    /// Launch with a persistent profile directory.
    Profile { profile_dir: PathBuf },
    /// Launch a throwaway browser.
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectOptions {
    #[serde(flatten)]
    pub mode: ConnectMode,
    pub headed: bool,
}

impl ConnectOptions {
    /// Build options from CLI flags; an endpoint wins over a profile.
    pub fn from_flags(connect: Option<&str>, profile_dir: Option<&Path>, headed: bool) -> Self {
        let mode = match (connect, profile_dir) {
            (Some(endpoint), _) => ConnectMode::Attach {
                endpoint: normalize_endpoint(endpoint),
            },
            (None, Some(dir)) => ConnectMode::Profile {
                profile_dir: dir.to_path_buf(),
            },
            (None, None) => ConnectMode::Fresh,
        };
        Self { mode, headed }
    }

    /// A person can complete a login in this browser and have it persist.
    pub fn interactive(&self) -> bool {
        self.headed && matches!(self.mode, ConnectMode::Profile { .. })
    }
}

/// Document and share URL produced by exporting one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemExport {
    pub html: Option<String>,
    pub url: Option<String>,
}

/// Opens sessions against one external system.
pub trait Driver {
    fn connect(&self, system: System, options: &ConnectOptions) -> Result<Box<dyn Session>>;
}

/// One live browser page.
pub trait Session {
    fn current_url(&mut self) -> Result<String>;
    fn goto(&mut self, url: &str) -> Result<()>;
    /// The page is showing a login or sign-up gate.
    fn auth_gate(&mut self) -> Result<bool>;
    fn submit(&mut self, prompt: &str, images: &[PathBuf]) -> Result<()>;
    /// The product's "in progress" indicator is visible.
    fn busy(&mut self) -> Result<bool>;
    /// Stable identifiers of the output items currently on the page.
    fn list_items(&mut self) -> Result<Vec<String>>;
    /// Text of the latest assistant response.
    fn read_response(&mut self) -> Result<String>;
    fn export_item(&mut self, item_id: &str) -> Result<ItemExport>;
    /// Write a full-page capture of the item to `dest`.
    fn capture(&mut self, item_id: &str, dest: &Path) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Browsers resolve `localhost` to IPv6 first; debugging endpoints listen on IPv4.
fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().replace("://localhost", "://127.0.0.1")
}
