//! Add link state machine.
//!
//! Snapshot the links, pick a mux id, write it to `add_mux` and poll until
//! the kernel shows the new link.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MuxLinkError, MuxLinkResult};
use crate::link_mgr::LinkWorker;
use crate::mux_id::MuxIdAllocator;
use crate::operation::{LinkOpState, OperationContext, OperationKind};
use crate::sysfs::LinkBackend;
use crate::types::{AddedLink, MuxId, MuxIdRequest};

pub(crate) struct AddLinkMachine {
    ctx: OperationContext,
    requested: MuxIdRequest,
}

impl AddLinkMachine {
    pub fn new(requested: MuxIdRequest, timeout: Duration, step: Duration) -> Self {
        Self {
            ctx: OperationContext::new(OperationKind::Add, timeout, step),
            requested,
        }
    }

    pub async fn run(
        mut self,
        worker: &mut LinkWorker,
        cancel: &CancellationToken,
    ) -> MuxLinkResult<AddedLink> {
        debug!("Running add link operation");
        if cancel.is_cancelled() {
            return Err(MuxLinkError::Cancelled);
        }

        let tree = worker.paths.tree.clone();

        self.ctx.enter(LinkOpState::Snapshot);
        self.ctx.links_before = worker.backend.list_links(&tree, None).await?;

        let mux_id = match self.requested {
            MuxIdRequest::Fixed(id) => id,
            MuxIdRequest::Automatic => {
                self.ctx.enter(LinkOpState::ResolveMuxId);
                let id = MuxIdAllocator::new(&worker.backend, &worker.tracker)
                    .allocate(&self.ctx.links_before)
                    .await?;
                debug!(%id, "Using mux id");
                id
            }
        };
        self.ctx.mux_id = Some(mux_id);

        self.ctx.enter(LinkOpState::WriteControl);
        worker
            .backend
            .write_control(&worker.paths.add_mux, mux_id)
            .await?;

        self.ctx.enter(LinkOpState::Polling);
        debug!(max_polls = self.ctx.max_polls(), "Waiting for new link");

        loop {
            worker.wait_tick(cancel).await?;

            let links_after = worker
                .backend
                .list_links(&tree, Some(&self.ctx.links_before))
                .await?;

            if let Some(link) =
                find_added_link(&worker.backend, &self.ctx.links_before, &links_after, mux_id).await
            {
                if let Err(e) = worker.tracker.track(&link, &mux_id.to_sysfs()) {
                    warn!(error = %e, "Couldn't track mux id");
                }
                info!(link = %link, %mux_id, "Created mux link");
                return Ok(AddedLink {
                    iface: link,
                    mux_id,
                });
            }

            debug!(elapsed_ms = self.ctx.elapsed_ms, "Link not yet found, rescheduling");
            if self.ctx.tick() {
                return Err(MuxLinkError::timeout(format!(
                    "No new link detected for mux id {}",
                    mux_id
                )));
            }
        }
    }
}

/// Finds the link created for `mux_id`.
///
/// Links are matched by their `qmap/mux_id`. When the kernel doesn't expose
/// that attribute, the first link absent from the snapshot is taken instead;
/// this guess is wrong if something else creates a link in the meantime.
async fn find_added_link(
    backend: &LinkBackend,
    links_before: &[String],
    links_after: &[String],
    mux_id: MuxId,
) -> Option<String> {
    for link in links_after {
        match backend.read_link_mux_id(link).await {
            Ok(text) => {
                if MuxId::parse_hex(&text).ok() == Some(mux_id) {
                    debug!(link = %link, %mux_id, "Found link associated to mux id");
                    return Some(link.clone());
                }
            }
            Err(e) => {
                debug!(link = %link, error = %e, "Couldn't find mux id in network link");
                let link = first_new_link(links_before, links_after)?;
                debug!(link = %link, "Found first new link (unknown mux id)");
                return Some(link.to_string());
            }
        }
    }
    None
}

/// Returns the first link in `after` that is not in `before`.
pub(crate) fn first_new_link<'a>(before: &[String], after: &'a [String]) -> Option<&'a str> {
    after
        .iter()
        .find(|link| !before.contains(*link))
        .map(String::as_str)
}
