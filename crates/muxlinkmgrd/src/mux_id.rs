//! Mux id tracking and allocation.
//!
//! Older kernels don't expose `qmap/mux_id` for the links they create, so the
//! manager keeps its own record of which link got which id. The record only
//! lives as long as the manager does and is never the source of truth: the
//! kernel attribute always wins when it can be read.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::error::{MuxLinkError, MuxLinkResult};
use crate::sysfs::LinkBackend;
use crate::types::{MuxId, MUX_ID_MAX, MUX_ID_MIN};

/// Errors from the tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The link already has a tracked mux id.
    #[error("Mux id for link '{0}' already exists")]
    AlreadyExists(String),

    /// The link has no tracked mux id.
    #[error("Mux id for link '{0}' not found")]
    NotFound(String),
}

impl From<TrackerError> for MuxLinkError {
    fn from(err: TrackerError) -> Self {
        MuxLinkError::failed(err.to_string())
    }
}

/// Fallback link name -> mux id table.
#[derive(Debug, Default)]
pub struct MuxIdTracker {
    links: HashMap<String, String>,
}

impl MuxIdTracker {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the mux id of `link`. Existing entries are never overwritten.
    pub fn track(&mut self, link: &str, mux_id: &str) -> Result<(), TrackerError> {
        if self.links.contains_key(link) {
            return Err(TrackerError::AlreadyExists(link.to_string()));
        }
        self.links.insert(link.to_string(), mux_id.to_string());
        Ok(())
    }

    /// Forgets the mux id of `link`.
    pub fn untrack(&mut self, link: &str) -> Result<(), TrackerError> {
        self.links
            .remove(link)
            .map(|_| ())
            .ok_or_else(|| TrackerError::NotFound(link.to_string()))
    }

    /// Returns the tracked mux id of `link`.
    pub fn lookup(&self, link: &str) -> Result<&str, TrackerError> {
        self.links
            .get(link)
            .map(String::as_str)
            .ok_or_else(|| TrackerError::NotFound(link.to_string()))
    }

    /// Number of tracked links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Returns the lowest mux id not present in `existing`.
///
/// Deterministic: the same set always yields the same id.
pub fn first_free_mux_id(existing: impl IntoIterator<Item = u32>) -> MuxLinkResult<MuxId> {
    let mut ids: Vec<u32> = existing.into_iter().collect();
    // upper threshold: running past it means every id is taken
    ids.push(MUX_ID_MAX + 1);
    ids.sort_unstable();
    ids.dedup();

    for (next, existing) in (MUX_ID_MIN..).zip(ids) {
        if next < existing {
            return MuxId::new(next);
        }
    }

    Err(MuxLinkError::failed("No mux ids left"))
}

/// Resolves mux ids of existing links and picks a free one.
pub struct MuxIdAllocator<'a> {
    backend: &'a LinkBackend,
    tracker: &'a MuxIdTracker,
}

impl<'a> MuxIdAllocator<'a> {
    /// Creates an allocator over the given backend and tracking table.
    pub fn new(backend: &'a LinkBackend, tracker: &'a MuxIdTracker) -> Self {
        Self { backend, tracker }
    }

    /// Returns the mux id text of `link`: the kernel attribute if readable,
    /// else the tracked value.
    pub async fn resolve(&self, link: &str) -> Option<String> {
        match self.backend.read_link_mux_id(link).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(link, error = %e, "Couldn't read mux id from sysfs, trying tracking table");
                self.tracker.lookup(link).ok().map(str::to_string)
            }
        }
    }

    /// Picks the lowest mux id not used by any of `links`.
    pub async fn allocate(&self, links: &[String]) -> MuxLinkResult<MuxId> {
        if links.is_empty() {
            return Ok(MuxId::MIN);
        }

        let mut existing = Vec::with_capacity(links.len());
        for link in links {
            let text = self.resolve(link).await.ok_or_else(|| {
                MuxLinkError::unsupported(format!("Couldn't get tracked mux id for link '{}'", link))
            })?;
            existing.push(MuxId::parse_hex(&text)?.value());
        }

        first_free_mux_id(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use tempfile::TempDir;

    fn links(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// Creates `<root>/<link>/qmap/mux_id` for each link with an id.
    fn sysfs_with(ids: &[(&str, &str)]) -> (TempDir, LinkBackend) {
        let dir = TempDir::new().unwrap();
        for (link, id) in ids {
            let qmap = dir.path().join(link).join("qmap");
            fs::create_dir_all(&qmap).unwrap();
            fs::write(qmap.join("mux_id"), id).unwrap();
        }
        let backend = LinkBackend::sysfs(dir.path());
        (dir, backend)
    }

    #[test]
    fn test_track_duplicate() {
        let mut tracker = MuxIdTracker::new();
        tracker.track("qmimux0", "0x02").unwrap();
        assert_eq!(
            tracker.track("qmimux0", "0x03"),
            Err(TrackerError::AlreadyExists("qmimux0".to_string()))
        );
        assert_eq!(tracker.lookup("qmimux0"), Ok("0x02"));
    }

    #[test]
    fn test_untrack_missing() {
        let mut tracker = MuxIdTracker::new();
        assert_eq!(
            tracker.untrack("qmimux1"),
            Err(TrackerError::NotFound("qmimux1".to_string()))
        );

        tracker.track("qmimux1", "0x01").unwrap();
        tracker.untrack("qmimux1").unwrap();
        assert!(tracker.is_empty());
        assert!(tracker.lookup("qmimux1").is_err());
    }

    #[test]
    fn test_tracker_error_is_failed() {
        let err: MuxLinkError = TrackerError::NotFound("qmimux0".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Failed);
    }

    #[test]
    fn test_first_free_fills_gap() {
        assert_eq!(first_free_mux_id([1, 3, 4]).unwrap().value(), 2);
        assert_eq!(first_free_mux_id([4, 1, 3]).unwrap().value(), 2);
        assert_eq!(first_free_mux_id([2, 3]).unwrap().value(), 1);
        assert_eq!(first_free_mux_id([1, 2, 3]).unwrap().value(), 4);
    }

    #[test]
    fn test_first_free_empty() {
        assert_eq!(first_free_mux_id(Vec::<u32>::new()).unwrap(), MuxId::MIN);
    }

    #[test]
    fn test_first_free_duplicates() {
        assert_eq!(first_free_mux_id([1, 1, 2]).unwrap().value(), 3);
    }

    #[test]
    fn test_first_free_exhausted() {
        let err = first_free_mux_id(MUX_ID_MIN..=MUX_ID_MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert!(err.to_string().contains("No mux ids left"));
    }

    #[test]
    fn test_first_free_last_slot() {
        let ids = (MUX_ID_MIN..MUX_ID_MAX).collect::<Vec<_>>();
        assert_eq!(first_free_mux_id(ids).unwrap(), MuxId::MAX);
    }

    #[tokio::test]
    async fn test_allocate_no_links() {
        let (_dir, backend) = sysfs_with(&[]);
        let tracker = MuxIdTracker::new();
        let id = MuxIdAllocator::new(&backend, &tracker)
            .allocate(&[])
            .await
            .unwrap();
        assert_eq!(id, MuxId::MIN);
    }

    #[tokio::test]
    async fn test_allocate_from_kernel_ids() {
        let (_dir, backend) =
            sysfs_with(&[("qmimux0", "0x01\n"), ("qmimux1", "0x03\n"), ("qmimux2", "0x04\n")]);
        let tracker = MuxIdTracker::new();
        let id = MuxIdAllocator::new(&backend, &tracker)
            .allocate(&links(&["qmimux0", "qmimux1", "qmimux2"]))
            .await
            .unwrap();
        assert_eq!(id.value(), 2);
    }

    #[tokio::test]
    async fn test_allocate_falls_back_to_tracker() {
        let (_dir, backend) = sysfs_with(&[("qmimux0", "0x01")]);
        let mut tracker = MuxIdTracker::new();
        tracker.track("qmimux1", "0x02").unwrap();

        let id = MuxIdAllocator::new(&backend, &tracker)
            .allocate(&links(&["qmimux0", "qmimux1"]))
            .await
            .unwrap();
        assert_eq!(id.value(), 3);
    }

    #[tokio::test]
    async fn test_allocate_unknown_link_unsupported() {
        let (_dir, backend) = sysfs_with(&[("qmimux0", "0x01")]);
        let tracker = MuxIdTracker::new();

        let err = MuxIdAllocator::new(&backend, &tracker)
            .allocate(&links(&["qmimux0", "qmimux1"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_allocate_unparsable_id_failed() {
        let (_dir, backend) = sysfs_with(&[("qmimux0", "garbage")]);
        let tracker = MuxIdTracker::new();

        let err = MuxIdAllocator::new(&backend, &tracker)
            .allocate(&links(&["qmimux0"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
    }
}
