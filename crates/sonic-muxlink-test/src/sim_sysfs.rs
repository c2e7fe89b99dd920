//! Simulated qmi_wwan sysfs tree
//!
//! [`SimSysfs`] implements the manager's sysfs collaborators in memory. A
//! write to `add_mux` schedules a new `qmimuxN` link carrying the written mux
//! id, a write to `del_mux` schedules the removal of the link carrying it.
//! Scheduled changes become visible after a number of link enumerations,
//! which is how the manager polls.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sonic_muxlinkmgrd::{AttributeIo, LinkBackend, LinkEnumerator, MuxId, SysfsLayout};
use tokio::time::Instant;
use tracing::debug;

/// Root the simulated tree pretends to live at.
pub const SIM_SYSFS_ROOT: &str = "/sim/sys/class/net";

/// How the simulated kernel reacts to a control write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelReaction {
    /// The change is visible right after the write.
    Immediate,
    /// The change becomes visible on the n-th enumeration after the write.
    AfterPolls(usize),
    /// The write is accepted but nothing changes.
    Never,
}

/// Something that happened to the simulated tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysfsEvent {
    Write { path: PathBuf, value: String },
    LinkAdded { name: String, mux_id: u32 },
    LinkRemoved { name: String },
}

/// An event with the (tokio) time it happened at.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub at: Instant,
    pub event: SysfsEvent,
}

#[derive(Debug, Clone)]
struct SimLink {
    name: String,
    mux_id: u32,
}

#[derive(Debug)]
enum Change {
    Add(SimLink),
    Remove(String),
}

#[derive(Debug)]
struct Scheduled {
    remaining: usize,
    change: Change,
}

#[derive(Debug, Default)]
struct State {
    links: Vec<SimLink>,
    scheduled: Vec<Scheduled>,
    events: Vec<RecordedEvent>,
    attributes: HashMap<PathBuf, String>,
    list_calls: usize,
    failing_calls: HashSet<usize>,
}

impl State {
    fn record(&mut self, event: SysfsEvent) {
        self.events.push(RecordedEvent {
            at: Instant::now(),
            event,
        });
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Add(link) => {
                debug!(link = %link.name, mux_id = link.mux_id, "Simulated link added");
                self.record(SysfsEvent::LinkAdded {
                    name: link.name.clone(),
                    mux_id: link.mux_id,
                });
                self.links.push(link);
            }
            Change::Remove(name) => {
                debug!(link = %name, "Simulated link removed");
                self.links.retain(|l| l.name != name);
                self.record(SysfsEvent::LinkRemoved { name });
            }
        }
    }

    fn schedule(&mut self, reaction: KernelReaction, change: Change) {
        match reaction {
            KernelReaction::Immediate | KernelReaction::AfterPolls(0) => self.apply(change),
            KernelReaction::AfterPolls(n) => self.scheduled.push(Scheduled {
                remaining: n,
                change,
            }),
            KernelReaction::Never => {}
        }
    }

    fn id_in_use(&self, mux_id: u32) -> bool {
        self.links.iter().any(|l| l.mux_id == mux_id)
            || self
                .scheduled
                .iter()
                .any(|s| matches!(&s.change, Change::Add(l) if l.mux_id == mux_id))
    }

    /// Lowest free `qmimuxN`, the way the kernel names new links.
    fn next_link_name(&self) -> String {
        (0..)
            .map(|index| format!("qmimux{}", index))
            .find(|name| {
                !self.links.iter().any(|l| &l.name == name)
                    && !self
                        .scheduled
                        .iter()
                        .any(|s| matches!(&s.change, Change::Add(l) if &l.name == name))
            })
            .unwrap_or_default()
    }
}

/// In-memory stand-in for `/sys/class/net` around one base interface.
#[derive(Debug)]
pub struct SimSysfs {
    layout: SysfsLayout,
    base_iface: String,
    mux_support: bool,
    expose_mux_id: bool,
    add_reaction: KernelReaction,
    del_reaction: KernelReaction,
    state: Mutex<State>,
}

impl SimSysfs {
    /// A kernel with mux support that exposes `qmap/mux_id` and applies
    /// changes immediately.
    pub fn new(base_iface: &str) -> Self {
        Self {
            layout: SysfsLayout::new(SIM_SYSFS_ROOT),
            base_iface: base_iface.to_string(),
            mux_support: true,
            expose_mux_id: true,
            add_reaction: KernelReaction::Immediate,
            del_reaction: KernelReaction::Immediate,
            state: Mutex::new(State::default()),
        }
    }

    /// Drops the `add_mux`/`del_mux` attributes.
    pub fn without_mux_support(mut self) -> Self {
        self.mux_support = false;
        self
    }

    /// Hides the per-link `qmap/mux_id` attribute, like older kernels.
    pub fn hide_mux_ids(mut self) -> Self {
        self.expose_mux_id = false;
        self
    }

    pub fn with_add_reaction(mut self, reaction: KernelReaction) -> Self {
        self.add_reaction = reaction;
        self
    }

    pub fn with_del_reaction(mut self, reaction: KernelReaction) -> Self {
        self.del_reaction = reaction;
        self
    }

    /// Adds a link that exists before the manager starts.
    pub fn with_link(mut self, name: &str, mux_id: u32) -> Self {
        self.state.get_mut().links.push(SimLink {
            name: name.to_string(),
            mux_id,
        });
        self
    }

    /// Makes the `call`-th link enumeration (counting from 1) fail.
    ///
    /// Scheduled changes still progress on that call.
    pub fn fail_enumeration_on(mut self, call: usize) -> Self {
        self.state.get_mut().failing_calls.insert(call);
        self
    }

    /// Sets a raw attribute, overriding what the simulation would report.
    pub fn with_attribute(self, path: impl Into<PathBuf>, value: &str) -> Self {
        self.set_attribute(path, value);
        self
    }

    pub fn set_attribute(&self, path: impl Into<PathBuf>, value: &str) {
        self.state.lock().attributes.insert(path.into(), value.to_string());
    }

    /// Creates a link right now, bypassing the control attributes.
    pub fn insert_link(&self, name: &str, mux_id: u32) {
        self.state.lock().apply(Change::Add(SimLink {
            name: name.to_string(),
            mux_id,
        }));
    }

    /// Removes a link right now, bypassing the control attributes.
    pub fn remove_link(&self, name: &str) {
        self.state.lock().apply(Change::Remove(name.to_string()));
    }

    /// Builds a backend that reads and writes this tree.
    pub fn backend(self: &Arc<Self>) -> LinkBackend {
        LinkBackend::new(self.layout.clone(), self.clone(), self.clone())
    }

    pub fn layout(&self) -> &SysfsLayout {
        &self.layout
    }

    pub fn base_iface(&self) -> &str {
        &self.base_iface
    }

    pub fn add_mux_path(&self) -> PathBuf {
        self.layout.add_mux_path(&self.base_iface)
    }

    pub fn del_mux_path(&self) -> PathBuf {
        self.layout.del_mux_path(&self.base_iface)
    }

    /// Current link names, sorted.
    pub fn links(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .links
            .iter()
            .map(|l| l.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of link enumerations so far.
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Everything that happened, in order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().events.clone()
    }

    /// Values written to `path`, in order.
    pub fn writes_to(&self, path: &Path) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match &e.event {
                SysfsEvent::Write { path: p, value } if p == path => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    fn parse_control_value(value: &str) -> io::Result<u32> {
        MuxId::parse_hex(value)
            .map(|id| id.value())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    }

    fn is_link_mux_id_path(&self, state: &State, path: &Path) -> Option<u32> {
        state
            .links
            .iter()
            .find(|l| self.layout.link_mux_id_path(&l.name) == path)
            .map(|l| l.mux_id)
    }
}

#[async_trait]
impl AttributeIo for SimSysfs {
    async fn read_attribute(&self, path: &Path) -> io::Result<String> {
        let state = self.state.lock();

        if let Some(value) = state.attributes.get(path) {
            let value = value.trim();
            if value.is_empty() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "empty attribute"));
            }
            return Ok(value.to_string());
        }

        if self.expose_mux_id {
            if let Some(mux_id) = self.is_link_mux_id_path(&state, path) {
                return Ok(format!("0x{:02x}", mux_id));
            }
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no attribute {}", path.display()),
        ))
    }

    async fn write_attribute(&self, path: &Path, value: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        state.record(SysfsEvent::Write {
            path: path.to_path_buf(),
            value: value.to_string(),
        });

        if !self.mux_support {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such attribute"));
        }

        if path == self.add_mux_path() {
            let mux_id = Self::parse_control_value(value)?;
            if state.id_in_use(mux_id) {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "mux id in use"));
            }
            let name = state.next_link_name();
            state.schedule(self.add_reaction, Change::Add(SimLink { name, mux_id }));
            Ok(())
        } else if path == self.del_mux_path() {
            let mux_id = Self::parse_control_value(value)?;
            let name = state
                .links
                .iter()
                .find(|l| l.mux_id == mux_id)
                .map(|l| l.name.clone())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unknown mux id"))?;
            state.schedule(self.del_reaction, Change::Remove(name));
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("read-only attribute {}", path.display()),
            ))
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        if path == self.add_mux_path() || path == self.del_mux_path() {
            return self.mux_support;
        }

        let state = self.state.lock();
        state.attributes.contains_key(path)
            || (self.expose_mux_id && self.is_link_mux_id_path(&state, path).is_some())
    }
}

#[async_trait]
impl LinkEnumerator for SimSysfs {
    async fn list_links(
        &self,
        tree: &Path,
        _previous: Option<&[String]>,
    ) -> io::Result<Vec<String>> {
        if tree != self.layout.iface_dir(&self.base_iface) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no directory {}", tree.display()),
            ));
        }

        let mut state = self.state.lock();
        state.list_calls += 1;

        for s in &mut state.scheduled {
            s.remaining -= 1;
        }
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|s| s.remaining == 0);
        state.scheduled = waiting;
        for s in due {
            state.apply(s.change);
        }

        if state.failing_calls.contains(&state.list_calls) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("enumeration {} failed", state.list_calls),
            ));
        }

        let mut names: Vec<String> = state.links.iter().map(|l| l.name.clone()).collect();
        names.sort();
        Ok(names)
    }
}
