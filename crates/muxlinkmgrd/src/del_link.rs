//! Del link state machine.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MuxLinkError, MuxLinkResult};
use crate::link_mgr::LinkWorker;
use crate::mux_id::MuxIdAllocator;
use crate::operation::{LinkOpState, OperationContext, OperationKind};
use crate::types::MuxId;

pub(crate) struct DelLinkMachine {
    ctx: OperationContext,
    link: String,
}

impl DelLinkMachine {
    pub fn new(link: String, mux_id: Option<MuxId>, timeout: Duration, step: Duration) -> Self {
        let mut ctx = OperationContext::new(OperationKind::Del, timeout, step);
        ctx.mux_id = mux_id;
        Self { ctx, link }
    }

    pub async fn run(
        mut self,
        worker: &mut LinkWorker,
        cancel: &CancellationToken,
    ) -> MuxLinkResult<()> {
        debug!("Running del link operation");
        if cancel.is_cancelled() {
            return Err(MuxLinkError::Cancelled);
        }

        let link = self.link.clone();
        let tree = worker.paths.tree.clone();

        self.ctx.enter(LinkOpState::Snapshot);
        self.ctx.links_before = worker.backend.list_links(&tree, None).await?;

        self.ctx.enter(LinkOpState::Validate);
        if !self.ctx.links_before.contains(&link) {
            return Err(MuxLinkError::invalid_args(format!(
                "Cannot delete link '{}': interface not found",
                link
            )));
        }

        let mux_id = match self.ctx.mux_id {
            Some(id) => id,
            None => {
                self.ctx.enter(LinkOpState::ResolveMuxId);
                let text = MuxIdAllocator::new(&worker.backend, &worker.tracker)
                    .resolve(&link)
                    .await
                    .ok_or_else(|| {
                        MuxLinkError::invalid_args(format!(
                            "Cannot delete link '{}': unknown mux id",
                            link
                        ))
                    })?;
                MuxId::parse_hex(&text)?
            }
        };
        self.ctx.mux_id = Some(mux_id);

        self.ctx.enter(LinkOpState::WriteControl);
        worker
            .backend
            .write_control(&worker.paths.del_mux, mux_id)
            .await?;

        self.ctx.enter(LinkOpState::Polling);
        debug!(max_polls = self.ctx.max_polls(), "Waiting for link removal");

        loop {
            worker.wait_tick(cancel).await?;

            let links_after = worker
                .backend
                .list_links(&tree, Some(&self.ctx.links_before))
                .await?;

            if !links_after.contains(&link) {
                if let Err(e) = worker.tracker.untrack(&link) {
                    debug!(error = %e, "Couldn't untrack mux id");
                }
                info!(link = %link, %mux_id, "Removed mux link");
                return Ok(());
            }

            debug!(elapsed_ms = self.ctx.elapsed_ms, "Link still present, rescheduling");
            if self.ctx.tick() {
                return Err(MuxLinkError::timeout(format!(
                    "Link '{}' still detected",
                    link
                )));
            }
        }
    }
}
