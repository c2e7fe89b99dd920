//! Sysfs access for mux link management.
//!
//! The link manager only ever touches sysfs through two narrow traits:
//! [`AttributeIo`] for single attribute reads/writes and [`LinkEnumerator`]
//! for listing the links stacked on top of a base interface. The
//! [`SysfsBackend`] implements both against the real filesystem; tests
//! substitute a simulated one.
//!
//! # Layout
//!
//! For base interface `wwan0` under `/sys/class/net`:
//!
//! | Path | Meaning |
//! |------|---------|
//! | `/sys/class/net/wwan0` | interface tree, holds one `upper_<link>` entry per link |
//! | `/sys/class/net/wwan0/qmi/add_mux` | write a mux id to create a link |
//! | `/sys/class/net/wwan0/qmi/del_mux` | write a mux id to remove a link |
//! | `/sys/class/net/<link>/qmap/mux_id` | mux id of a link (newer kernels only) |

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MuxLinkError, MuxLinkResult};
use crate::types::{LinkInfo, MuxId};

/// Default root of the network interface tree.
pub const SYSFS_CLASS_NET: &str = "/sys/class/net";

/// Prefix of the entries linking a base interface to its upper devices.
pub const UPPER_LINK_PREFIX: &str = "upper_";

/// Builds the sysfs paths used by the link manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsLayout {
    root: PathBuf,
}

impl SysfsLayout {
    /// Creates a layout rooted at `root` (normally `/sys/class/net`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root of the interface tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a network interface.
    pub fn iface_dir(&self, iface: &str) -> PathBuf {
        self.root.join(iface)
    }

    /// Control attribute creating a link on `iface`.
    pub fn add_mux_path(&self, iface: &str) -> PathBuf {
        self.iface_dir(iface).join("qmi").join("add_mux")
    }

    /// Control attribute removing a link from `iface`.
    pub fn del_mux_path(&self, iface: &str) -> PathBuf {
        self.iface_dir(iface).join("qmi").join("del_mux")
    }

    /// Per-link mux id attribute.
    pub fn link_mux_id_path(&self, link: &str) -> PathBuf {
        self.iface_dir(link).join("qmap").join("mux_id")
    }
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self::new(SYSFS_CLASS_NET)
    }
}

/// Reads and writes single sysfs attributes.
#[async_trait]
pub trait AttributeIo: Send + Sync {
    /// Reads the whole attribute, trimmed. Missing or empty attributes fail.
    async fn read_attribute(&self, path: &Path) -> io::Result<String>;

    /// Writes `value` to the attribute.
    async fn write_attribute(&self, path: &Path, value: &str) -> io::Result<()>;

    /// Returns true if the attribute exists.
    async fn exists(&self, path: &Path) -> bool;
}

/// Lists the links stacked on top of a base interface.
#[async_trait]
pub trait LinkEnumerator: Send + Sync {
    /// Returns the current link names under `tree`, in enumeration order.
    ///
    /// `previous` is the last snapshot taken by the caller. Implementations
    /// may use it as a hint but must always report the current state.
    async fn list_links(&self, tree: &Path, previous: Option<&[String]>)
        -> io::Result<Vec<String>>;
}

/// Real sysfs access through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysfsBackend;

#[async_trait]
impl AttributeIo for SysfsBackend {
    async fn read_attribute(&self, path: &Path) -> io::Result<String> {
        let content = tokio::fs::read_to_string(path).await?;
        let value = content.trim();
        if value.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("empty attribute {}", path.display()),
            ));
        }
        Ok(value.to_string())
    }

    async fn write_attribute(&self, path: &Path, value: &str) -> io::Result<()> {
        tokio::fs::write(path, value.as_bytes()).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

#[async_trait]
impl LinkEnumerator for SysfsBackend {
    async fn list_links(
        &self,
        tree: &Path,
        previous: Option<&[String]>,
    ) -> io::Result<Vec<String>> {
        let mut links = Vec::with_capacity(previous.map_or(0, |p| p.len() + 1));
        let mut entries = tokio::fs::read_dir(tree).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(link) = name.to_str().and_then(|n| n.strip_prefix(UPPER_LINK_PREFIX)) {
                links.push(link.to_string());
            }
        }

        // read_dir order is unspecified
        links.sort();
        Ok(links)
    }
}

/// The sysfs collaborators of one link manager, bundled with the layout.
#[derive(Clone)]
pub struct LinkBackend {
    layout: SysfsLayout,
    attrs: Arc<dyn AttributeIo>,
    links: Arc<dyn LinkEnumerator>,
}

impl LinkBackend {
    /// Creates a backend from explicit collaborators.
    pub fn new(
        layout: SysfsLayout,
        attrs: Arc<dyn AttributeIo>,
        links: Arc<dyn LinkEnumerator>,
    ) -> Self {
        Self {
            layout,
            attrs,
            links,
        }
    }

    /// Creates a backend on the real sysfs rooted at `root`.
    pub fn sysfs(root: impl Into<PathBuf>) -> Self {
        let backend = Arc::new(SysfsBackend);
        Self::new(SysfsLayout::new(root), backend.clone(), backend)
    }

    /// Returns the path layout.
    pub fn layout(&self) -> &SysfsLayout {
        &self.layout
    }

    /// Returns true if the attribute exists.
    pub async fn exists(&self, path: &Path) -> bool {
        self.attrs.exists(path).await
    }

    /// Snapshots the links under `tree`.
    pub async fn list_links(
        &self,
        tree: &Path,
        previous: Option<&[String]>,
    ) -> MuxLinkResult<Vec<String>> {
        self.links.list_links(tree, previous).await.map_err(|e| {
            MuxLinkError::io(
                format!("Couldn't enumerate files in the sysfs directory {}", tree.display()),
                e,
            )
        })
    }

    /// Reads the raw mux id text the kernel exposes for `link`.
    pub async fn read_link_mux_id(&self, link: &str) -> io::Result<String> {
        self.attrs
            .read_attribute(&self.layout.link_mux_id_path(link))
            .await
    }

    /// Writes `mux_id` to a control attribute.
    pub async fn write_control(&self, path: &Path, mux_id: MuxId) -> MuxLinkResult<()> {
        debug!(path = %path.display(), %mux_id, "Writing control attribute");
        self.attrs
            .write_attribute(path, &mux_id.to_sysfs())
            .await
            .map_err(|e| MuxLinkError::io(format!("Couldn't write {} to {}", mux_id, path.display()), e))
    }

    /// Lists the links of `iface` with the mux id the kernel reports.
    pub async fn link_info(&self, iface: &str) -> MuxLinkResult<Vec<LinkInfo>> {
        let names = self.list_links(&self.layout.iface_dir(iface), None).await?;
        let mut infos = Vec::with_capacity(names.len());

        for name in names {
            let mux_id = self
                .read_link_mux_id(&name)
                .await
                .ok()
                .and_then(|text| MuxId::parse_hex(&text).ok());
            infos.push(LinkInfo { name, mux_id });
        }

        Ok(infos)
    }
}

impl std::fmt::Debug for LinkBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkBackend")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
