//! Mux link manager - serialized add/del of qmi_wwan mux links
//!
//! [`MuxLinkManager`] is a cheap, cloneable handle. All state (the tracking
//! table, the operation queue, the snapshots) lives in a single
//! [`LinkWorker`] task that pulls one operation at a time off the queue and
//! drives it to a terminal state before starting the next one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, info_span, instrument, warn, Instrument};

use crate::add_link::AddLinkMachine;
use crate::config::MuxLinkConfig;
use crate::del_link::DelLinkMachine;
use crate::error::{MuxLinkError, MuxLinkResult};
use crate::mux_id::MuxIdTracker;
use crate::operation::{LinkOperation, LinkRequest};
use crate::queue::OperationQueue;
use crate::sysfs::LinkBackend;
use crate::types::{AddedLink, MuxId, MuxIdRequest};

/// Sysfs locations of one base interface.
#[derive(Debug, Clone)]
pub(crate) struct ManagerPaths {
    pub tree: PathBuf,
    pub add_mux: PathBuf,
    pub del_mux: PathBuf,
}

/// Handle to the link manager of one base interface.
///
/// Dropping the last handle lets the worker finish the operations already
/// submitted and exit; the tracking table goes away with it.
#[derive(Debug, Clone)]
pub struct MuxLinkManager {
    base_iface: Arc<str>,
    tx: mpsc::UnboundedSender<LinkOperation>,
    next_seq: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl MuxLinkManager {
    /// Creates a manager for `iface` on the real sysfs.
    pub async fn new(iface: &str, config: &MuxLinkConfig) -> MuxLinkResult<Self> {
        Self::with_backend(
            iface,
            LinkBackend::sysfs(&config.sysfs.class_net_path),
            config.poll_interval(),
        )
        .await
    }

    /// Creates a manager for `iface` on the given backend.
    ///
    /// Fails if the interface has no `add_mux`/`del_mux` control attributes.
    /// Must be called within a tokio runtime.
    pub async fn with_backend(
        iface: &str,
        backend: LinkBackend,
        poll_interval: Duration,
    ) -> MuxLinkResult<Self> {
        let layout = backend.layout();
        let paths = ManagerPaths {
            tree: layout.iface_dir(iface),
            add_mux: layout.add_mux_path(iface),
            del_mux: layout.del_mux_path(iface),
        };

        if !backend.exists(&paths.add_mux).await || !backend.exists(&paths.del_mux).await {
            return Err(MuxLinkError::failed(format!(
                "No support for multiplexing in the interface '{}'",
                iface
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = LinkWorker {
            paths,
            backend,
            tracker: MuxIdTracker::new(),
            queue: OperationQueue::new(),
            rx,
            active: None,
            poll_interval,
            pending: pending.clone(),
        };
        tokio::spawn(worker.run().instrument(info_span!("muxlink_worker", iface = %iface)));

        info!(iface, ?poll_interval, "Mux link manager started");

        Ok(Self {
            base_iface: Arc::from(iface),
            tx,
            next_seq: Arc::new(AtomicU64::new(1)),
            pending,
        })
    }

    /// Returns the base interface this manager handles.
    pub fn base_iface(&self) -> &str {
        &self.base_iface
    }

    /// Number of submitted operations that have not started yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Creates a new mux link on top of `base_iface`.
    ///
    /// Waits for the kernel to show the link for at most `timeout`, polling
    /// at the configured interval. Returns the new interface name and the
    /// mux id it was created with.
    #[instrument(skip(self, cancel), fields(iface = %self.base_iface))]
    pub async fn add_link(
        &self,
        mux_id: MuxIdRequest,
        base_iface: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> MuxLinkResult<AddedLink> {
        self.submit_add(mux_id, base_iface, timeout, cancel)?
            .wait()
            .await
    }

    /// Removes the mux link `link`.
    ///
    /// With `mux_id` unset, the id is read from the kernel or, failing that,
    /// from the ids this manager recorded when creating links.
    #[instrument(skip(self, cancel), fields(iface = %self.base_iface))]
    pub async fn del_link(
        &self,
        link: &str,
        mux_id: Option<MuxId>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> MuxLinkResult<()> {
        self.submit_del(link, mux_id, timeout, cancel)?.wait().await
    }

    /// Queues an add operation without waiting for it.
    ///
    /// A wrong `base_iface` is rejected here and never reaches the queue.
    pub fn submit_add(
        &self,
        mux_id: MuxIdRequest,
        base_iface: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> MuxLinkResult<LinkHandle<AddedLink>> {
        if base_iface != &*self.base_iface {
            return Err(MuxLinkError::invalid_args(format!(
                "Invalid base interface given: '{}' (must be '{}')",
                base_iface, self.base_iface
            )));
        }

        let (reply, rx) = oneshot::channel();
        let seq = self.submit(LinkRequest::Add { mux_id, reply }, timeout, cancel)?;
        Ok(LinkHandle { seq, rx })
    }

    /// Queues a del operation without waiting for it.
    pub fn submit_del(
        &self,
        link: &str,
        mux_id: Option<MuxId>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> MuxLinkResult<LinkHandle<()>> {
        let (reply, rx) = oneshot::channel();
        let request = LinkRequest::Del {
            link: link.to_string(),
            mux_id,
            reply,
        };
        let seq = self.submit(request, timeout, cancel)?;
        Ok(LinkHandle { seq, rx })
    }

    fn submit(
        &self,
        request: LinkRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> MuxLinkResult<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let op = LinkOperation {
            seq,
            timeout,
            cancel,
            request,
        };

        self.pending.fetch_add(1, Ordering::Relaxed);
        self.tx.send(op).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            manager_stopped()
        })?;
        Ok(seq)
    }
}

/// Pending result of a submitted link operation.
///
/// Dropping the handle does not stop the operation; it still runs to
/// completion so the operations queued behind it can start.
#[derive(Debug)]
pub struct LinkHandle<T> {
    seq: u64,
    rx: oneshot::Receiver<MuxLinkResult<T>>,
}

impl<T> LinkHandle<T> {
    /// Submission sequence number, increasing per manager.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Waits for the operation to reach a terminal state.
    pub async fn wait(self) -> MuxLinkResult<T> {
        self.rx.await.map_err(|_| manager_stopped())?
    }
}

fn manager_stopped() -> MuxLinkError {
    MuxLinkError::failed("Link manager stopped")
}

/// Owner of all per-interface state; runs on its own task.
pub(crate) struct LinkWorker {
    pub(crate) paths: ManagerPaths,
    pub(crate) backend: LinkBackend,
    pub(crate) tracker: MuxIdTracker,
    queue: OperationQueue<LinkOperation>,
    rx: mpsc::UnboundedReceiver<LinkOperation>,
    active: Option<LinkOperation>,
    poll_interval: Duration,
    pending: Arc<AtomicUsize>,
}

impl LinkWorker {
    async fn run(mut self) {
        loop {
            let op = match self.active.take() {
                Some(op) => op,
                None => match self.rx.recv().await {
                    Some(op) => {
                        self.admit(op);
                        continue;
                    }
                    None => break,
                },
            };

            self.execute(op).await;
            self.absorb_submissions();
            self.active = self.queue.on_completed();
        }

        debug!(tracked = self.tracker.len(), "All manager handles dropped, stopping");
    }

    /// Hands `op` to the queue; if nothing is running it becomes active.
    fn admit(&mut self, op: LinkOperation) {
        match self.queue.submit(op) {
            Some(op) => self.active = Some(op),
            None => debug!(
                pending = self.queue.pending_len(),
                "Queueing link operation"
            ),
        }
    }

    /// Moves newly submitted operations into the queue and completes the
    /// queued ones whose caller cancelled them.
    fn absorb_submissions(&mut self) {
        while let Ok(op) = self.rx.try_recv() {
            self.admit(op);
        }

        for op in self.queue.remove_pending_where(LinkOperation::is_cancelled) {
            debug!(seq = op.seq, kind = %op.kind(), "Pending link operation cancelled");
            self.pending.fetch_sub(1, Ordering::Relaxed);
            op.abort(MuxLinkError::Cancelled);
        }
    }

    /// Waits one polling step, then checks for cancellation.
    pub(crate) async fn wait_tick(&mut self, cancel: &CancellationToken) -> MuxLinkResult<()> {
        tokio::time::sleep(self.poll_interval).await;
        self.absorb_submissions();

        if cancel.is_cancelled() {
            return Err(MuxLinkError::Cancelled);
        }
        Ok(())
    }

    async fn execute(&mut self, op: LinkOperation) {
        self.pending.fetch_sub(1, Ordering::Relaxed);

        let kind = op.kind();
        let LinkOperation {
            seq,
            timeout,
            cancel,
            request,
        } = op;
        let span = debug_span!("link_op", seq, %kind);
        let step = self.poll_interval;

        match request {
            LinkRequest::Add { mux_id, reply } => {
                let result = AddLinkMachine::new(mux_id, timeout, step)
                    .run(self, &cancel)
                    .instrument(span)
                    .await;
                log_outcome(seq, &result);
                if reply.send(result).is_err() {
                    debug!(seq, "Caller went away before the result was delivered");
                }
            }
            LinkRequest::Del {
                link,
                mux_id,
                reply,
            } => {
                let result = DelLinkMachine::new(link, mux_id, timeout, step)
                    .run(self, &cancel)
                    .instrument(span)
                    .await;
                log_outcome(seq, &result);
                if reply.send(result).is_err() {
                    debug!(seq, "Caller went away before the result was delivered");
                }
            }
        }
    }
}

fn log_outcome<T>(seq: u64, result: &MuxLinkResult<T>) {
    match result {
        Ok(_) => {}
        Err(MuxLinkError::Cancelled) => info!(seq, "Link operation cancelled"),
        Err(e) => warn!(seq, error = %e, "Link operation failed"),
    }
}
