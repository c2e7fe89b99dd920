//! Integration test infrastructure for the mux link manager
//!
//! Provides:
//! - A simulated qmi_wwan sysfs tree that reacts to `add_mux`/`del_mux`
//!   writes like the kernel does, with configurable delays
//! - Fixtures for building managers on top of it
//! - Verification helpers over the recorded writes and kernel changes

pub mod fixtures;
mod sim_sysfs;
mod verification;

pub use fixtures::*;
pub use sim_sysfs::{KernelReaction, RecordedEvent, SimSysfs, SysfsEvent, SIM_SYSFS_ROOT};
pub use verification::*;
