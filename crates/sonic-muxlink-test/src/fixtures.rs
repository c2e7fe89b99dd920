//! Test fixtures for mux link manager tests

use std::sync::Arc;
use std::time::Duration;

use sonic_muxlinkmgrd::{MuxLinkManager, MuxLinkResult};

use crate::sim_sysfs::{KernelReaction, SimSysfs};

/// Base interface used by the fixtures.
pub const BASE_IFACE: &str = "wwan0";

/// Polling step used by the fixtures.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Budget long enough for every fixture kernel to react.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Kernel that exposes `qmap/mux_id` on each link.
pub fn current_kernel() -> SimSysfs {
    SimSysfs::new(BASE_IFACE)
}

/// Kernel without the per-link `qmap/mux_id` attribute.
pub fn legacy_kernel() -> SimSysfs {
    SimSysfs::new(BASE_IFACE).hide_mux_ids()
}

/// Kernel whose links appear and disappear `polls` enumerations after the
/// control write.
pub fn slow_kernel(polls: usize) -> SimSysfs {
    SimSysfs::new(BASE_IFACE)
        .with_add_reaction(KernelReaction::AfterPolls(polls))
        .with_del_reaction(KernelReaction::AfterPolls(polls))
}

/// A manager running on a simulated sysfs tree.
pub struct ManagerFixture {
    pub sysfs: Arc<SimSysfs>,
    pub manager: MuxLinkManager,
}

impl ManagerFixture {
    /// Starts a manager on `sysfs` with [`POLL_INTERVAL`].
    pub async fn start(sysfs: SimSysfs) -> MuxLinkResult<Self> {
        let sysfs = Arc::new(sysfs);
        let manager =
            MuxLinkManager::with_backend(sysfs.base_iface(), sysfs.backend(), POLL_INTERVAL)
                .await?;
        Ok(Self { sysfs, manager })
    }

    /// Control writes made to `add_mux`.
    pub fn add_writes(&self) -> Vec<String> {
        self.sysfs.writes_to(&self.sysfs.add_mux_path())
    }

    /// Control writes made to `del_mux`.
    pub fn del_writes(&self) -> Vec<String> {
        self.sysfs.writes_to(&self.sysfs.del_mux_path())
    }
}

/// Link enumerations an operation makes before timing out: one snapshot
/// plus `ceil(timeout / step)` polls, at least one.
pub fn enumerations_until_timeout(timeout: Duration) -> usize {
    let step = POLL_INTERVAL.as_millis();
    let polls = timeout.as_millis().div_ceil(step).max(1);
    1 + polls as usize
}
