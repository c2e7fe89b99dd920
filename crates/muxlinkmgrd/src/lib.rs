//! Mux link manager for qmi_wwan based network interfaces
//!
//! Creates and removes multiplexed (QMAP) links on top of a base interface
//! by writing its `qmi/add_mux` and `qmi/del_mux` sysfs attributes, then
//! polling sysfs until the link shows up or goes away.
//!
//! - [`MuxLinkManager`]: per-interface handle; operations run one at a time
//!   in submission order
//! - [`mux_id`]: mux id allocation and the fallback tracking table
//! - [`sysfs`]: the sysfs collaborators and their real implementation
//! - [`config`]: TOML configuration
//!
//! # Example
//!
//! ```ignore
//! use sonic_muxlinkmgrd::{MuxLinkConfig, MuxLinkManager, MuxIdRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = MuxLinkConfig::load()?;
//! let mgr = MuxLinkManager::new("wwan0", &config).await?;
//! let link = mgr
//!     .add_link(MuxIdRequest::Automatic, "wwan0", config.default_timeout(), CancellationToken::new())
//!     .await?;
//! println!("{} uses mux id {}", link.iface, link.mux_id);
//! ```

mod add_link;
pub mod config;
mod del_link;
pub mod error;
mod link_mgr;
pub mod mux_id;
mod operation;
pub mod queue;
pub mod sysfs;
pub mod types;

pub use config::MuxLinkConfig;
pub use error::{ErrorKind, MuxLinkError, MuxLinkResult};
pub use link_mgr::{LinkHandle, MuxLinkManager};
pub use mux_id::{first_free_mux_id, MuxIdAllocator, MuxIdTracker, TrackerError};
pub use queue::OperationQueue;
pub use sysfs::{AttributeIo, LinkBackend, LinkEnumerator, SysfsBackend, SysfsLayout};
pub use types::*;
