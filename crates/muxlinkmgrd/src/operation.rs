//! Link operation records and their bookkeeping.

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{MuxLinkError, MuxLinkResult};
use crate::types::{AddedLink, MuxId, MuxIdRequest};

/// Kind of link operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationKind {
    /// Create a link.
    Add,
    /// Remove a link.
    Del,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Add => f.write_str("add"),
            OperationKind::Del => f.write_str("del"),
        }
    }
}

/// Steps an add/del operation goes through before reaching a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOpState {
    /// Admitted, nothing done yet.
    Start,
    /// Enumerating the links present before the write.
    Snapshot,
    /// Checking the del target exists.
    Validate,
    /// Allocating or looking up the mux id.
    ResolveMuxId,
    /// Writing `add_mux` or `del_mux`.
    WriteControl,
    /// Waiting for the link to appear or go away.
    Polling,
}

/// What the caller asked for, plus where to deliver the result.
pub(crate) enum LinkRequest {
    Add {
        mux_id: MuxIdRequest,
        reply: oneshot::Sender<MuxLinkResult<AddedLink>>,
    },
    Del {
        link: String,
        mux_id: Option<MuxId>,
        reply: oneshot::Sender<MuxLinkResult<()>>,
    },
}

/// A submitted operation waiting in, or taken from, the queue.
pub(crate) struct LinkOperation {
    pub seq: u64,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    pub request: LinkRequest,
}

impl LinkOperation {
    pub fn kind(&self) -> OperationKind {
        match self.request {
            LinkRequest::Add { .. } => OperationKind::Add,
            LinkRequest::Del { .. } => OperationKind::Del,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes the operation without running it.
    pub fn abort(self, err: MuxLinkError) {
        let delivered = match self.request {
            LinkRequest::Add { reply, .. } => reply.send(Err(err)).is_ok(),
            LinkRequest::Del { reply, .. } => reply.send(Err(err)).is_ok(),
        };
        if !delivered {
            debug!(seq = self.seq, "Caller went away before the result was delivered");
        }
    }
}

/// Per-operation state shared by the add and del machines.
#[derive(Debug)]
pub(crate) struct OperationContext {
    pub kind: OperationKind,
    pub timeout_ms: u64,
    pub elapsed_ms: u64,
    pub step_ms: u64,
    pub links_before: Vec<String>,
    pub mux_id: Option<MuxId>,
    state: LinkOpState,
}

impl OperationContext {
    pub fn new(kind: OperationKind, timeout: Duration, step: Duration) -> Self {
        Self {
            kind,
            timeout_ms: duration_ms(timeout),
            elapsed_ms: 0,
            step_ms: duration_ms(step).max(1),
            links_before: Vec::new(),
            mux_id: None,
            state: LinkOpState::Start,
        }
    }

    pub fn enter(&mut self, state: LinkOpState) {
        debug!(kind = %self.kind, from = ?self.state, to = ?state, "Link operation state change");
        self.state = state;
    }

    /// Accounts for one unsuccessful poll. Returns true once the budget is
    /// used up.
    pub fn tick(&mut self) -> bool {
        self.elapsed_ms = self.elapsed_ms.saturating_add(self.step_ms);
        self.elapsed_ms >= self.timeout_ms
    }

    /// Number of polls the budget allows: `ceil(timeout / step)`, at least
    /// one.
    pub fn max_polls(&self) -> u64 {
        self.timeout_ms.div_ceil(self.step_ms).max(1)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(timeout_ms: u64, step_ms: u64) -> OperationContext {
        OperationContext::new(
            OperationKind::Add,
            Duration::from_millis(timeout_ms),
            Duration::from_millis(step_ms),
        )
    }

    fn polls_until_timeout(mut ctx: OperationContext) -> u64 {
        let mut polls = 1;
        while !ctx.tick() {
            polls += 1;
        }
        polls
    }

    #[test]
    fn test_poll_budget_exact_multiple() {
        let c = ctx(1000, 250);
        assert_eq!(c.max_polls(), 4);
        assert_eq!(polls_until_timeout(c), 4);
    }

    #[test]
    fn test_poll_budget_rounds_up() {
        let c = ctx(1100, 250);
        assert_eq!(c.max_polls(), 5);
        assert_eq!(polls_until_timeout(c), 5);
    }

    #[test]
    fn test_zero_budget_polls_once() {
        let c = ctx(0, 250);
        assert_eq!(c.max_polls(), 1);
        assert_eq!(polls_until_timeout(c), 1);
    }

    #[test]
    fn test_huge_budget_saturates() {
        let mut c = OperationContext::new(
            OperationKind::Add,
            Duration::MAX,
            Duration::from_millis(250),
        );
        assert_eq!(c.timeout_ms, u64::MAX);
        assert_eq!(c.max_polls(), u64::MAX.div_ceil(250));
        assert!(!c.tick());

        c.elapsed_ms = u64::MAX - 1;
        assert!(c.tick());
        assert_eq!(c.elapsed_ms, u64::MAX);
    }

    #[test]
    fn test_huge_step_saturates() {
        let c = OperationContext::new(OperationKind::Del, Duration::from_secs(1), Duration::MAX);
        assert_eq!(c.step_ms, u64::MAX);
        assert_eq!(c.max_polls(), 1);
    }

    #[test]
    fn test_state_transitions() {
        let mut c = ctx(1000, 250);
        assert_eq!(c.state, LinkOpState::Start);
        c.enter(LinkOpState::Snapshot);
        c.enter(LinkOpState::Polling);
        assert_eq!(c.state, LinkOpState::Polling);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(OperationKind::Add.to_string(), "add");
        assert_eq!(OperationKind::Del.to_string(), "del");
    }

    #[tokio::test]
    async fn test_abort_delivers_error() {
        let (reply, rx) = oneshot::channel();
        let op = LinkOperation {
            seq: 7,
            timeout: Duration::from_secs(1),
            cancel: CancellationToken::new(),
            request: LinkRequest::Del {
                link: "qmimux0".to_string(),
                mux_id: None,
                reply,
            },
        };
        assert_eq!(op.kind(), OperationKind::Del);
        op.abort(MuxLinkError::Cancelled);
        assert!(matches!(rx.await.unwrap(), Err(MuxLinkError::Cancelled)));
    }
}
