//! Scripted in-memory driver for tests.
use super::{ConnectOptions, Driver, ItemExport, Session};
use crate::error::{DesignError, Result};
use crate::store::System;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// What the fake page shows. Queues are consumed one entry per poll.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub current_url: String,
    pub url_after_submit: Option<String>,
    pub auth_gates: VecDeque<bool>,
    pub busy: VecDeque<bool>,
    /// Item listings per poll; the last listing repeats.
    pub item_polls: VecDeque<Vec<String>>,
    pub response: String,
    pub failing_exports: HashSet<String>,
    pub failing_captures: HashSet<String>,
    pub connect_error: Option<String>,
}

/// Everything the operators asked the fake to do.
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub connects: Vec<System>,
    pub gotos: Vec<String>,
    pub submits: Vec<(String, Vec<PathBuf>)>,
    pub exports: Vec<String>,
    pub captures: Vec<String>,
    pub closed: usize,
}

#[derive(Debug, Default)]
struct State {
    script: Script,
    calls: Calls,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    state: Rc<RefCell<State>>,
}

impl FakeDriver {
    pub fn new(script: Script) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                script,
                calls: Calls::default(),
            })),
        }
    }

    pub fn calls(&self) -> Calls {
        self.state.borrow().calls.clone()
    }

    pub fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.state.borrow_mut().script);
    }
}

impl Driver for FakeDriver {
    fn connect(&self, system: System, _options: &ConnectOptions) -> Result<Box<dyn Session>> {
        let mut state = self.state.borrow_mut();
        state.calls.connects.push(system);
        if let Some(message) = state.script.connect_error.clone() {
            return Err(DesignError::external(message));
        }
        Ok(Box::new(FakeSession {
            state: Rc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Rc<RefCell<State>>,
}

impl Session for FakeSession {
    fn current_url(&mut self) -> Result<String> {
        Ok(self.state.borrow().script.current_url.clone())
    }

    fn goto(&mut self, url: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.gotos.push(url.to_string());
        state.script.current_url = url.to_string();
        Ok(())
    }

    fn auth_gate(&mut self) -> Result<bool> {
        Ok(self
            .state
            .borrow_mut()
            .script
            .auth_gates
            .pop_front()
            .unwrap_or(false))
    }

    fn submit(&mut self, prompt: &str, images: &[PathBuf]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.submits.push((prompt.to_string(), images.to_vec()));
        if let Some(url) = state.script.url_after_submit.clone() {
            state.script.current_url = url;
        }
        Ok(())
    }

    fn busy(&mut self) -> Result<bool> {
        Ok(self.state.borrow_mut().script.busy.pop_front().unwrap_or(false))
    }

    fn list_items(&mut self) -> Result<Vec<String>> {
        let mut state = self.state.borrow_mut();
        let polls = &mut state.script.item_polls;
        if polls.len() > 1 {
            return Ok(polls.pop_front().unwrap_or_default());
        }
        Ok(polls.front().cloned().unwrap_or_default())
    }

    fn read_response(&mut self) -> Result<String> {
        Ok(self.state.borrow().script.response.clone())
    }

    fn export_item(&mut self, item_id: &str) -> Result<ItemExport> {
        let mut state = self.state.borrow_mut();
        state.calls.exports.push(item_id.to_string());
        if state.script.failing_exports.contains(item_id) {
            return Err(DesignError::external(format!("export of {item_id} failed")));
        }
        Ok(ItemExport {
            html: Some(format!("<html><body>{item_id}</body></html>")),
            url: Some(format!("https://share.example/{item_id}")),
        })
    }

    fn capture(&mut self, item_id: &str, dest: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.captures.push(item_id.to_string());
        if state.script.failing_captures.contains(item_id) {
            return Err(DesignError::external(format!("capture of {item_id} failed")));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).expect("create capture dir");
        }
        fs::write(dest, format!("png:{item_id}")).expect("write capture");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.borrow_mut().calls.closed += 1;
        Ok(())
    }
}
