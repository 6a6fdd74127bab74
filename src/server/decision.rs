//! Decision hooks consulted during the handshake.
//!
//! Auth handlers and ruleset validators return a [`Decision`]. A hook that
//! needs to decide later returns [`Decision::Deferred`] and calls
//! [`Decider::accept`] or [`Decider::deny`] from wherever it finishes its
//! work. Only the first decision counts, whether it arrives through the
//! returned value or the decider, and the handshake waits until one is made.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::connection::Connection;

/// Final outcome of a decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Deny,
}

/// Value returned by a decision hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Deny,
    /// The hook will decide later through its [`Decider`]
    Deferred,
}

impl From<bool> for Decision {
    fn from(accept: bool) -> Self {
        if accept {
            Decision::Accept
        } else {
            Decision::Deny
        }
    }
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accept => Decision::Accept,
            Verdict::Deny => Decision::Deny,
        }
    }
}

/// One-shot decision setter handed to a hook.
///
/// Clones share the same slot; the first `accept`/`deny` across all clones
/// wins and every later call is a no-op.
#[derive(Clone)]
pub struct Decider {
    slot: Arc<Mutex<Option<oneshot::Sender<Verdict>>>>,
}

impl Decider {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Verdict>) {
        let (tx, rx) = oneshot::channel();
        let decider = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (decider, rx)
    }

    pub fn accept(&self) -> bool {
        self.decide(Verdict::Accept)
    }

    pub fn deny(&self) -> bool {
        self.decide(Verdict::Deny)
    }

    /// Record a verdict. Returns `false` if a decision was already made.
    pub fn decide(&self, verdict: Verdict) -> bool {
        match self.slot.lock().take() {
            Some(tx) => {
                // Receiver gone means the connection already ended
                let _ = tx.send(verdict);
                true
            }
            None => false,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl std::fmt::Debug for Decider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decider")
            .field("decided", &self.is_decided())
            .finish()
    }
}

/// Apply the hook's returned decision and wait for the effective verdict.
///
/// The caller keeps `decider` alive for the duration, so a hook that defers
/// and never decides leaves the connection waiting.
pub(crate) async fn resolve(
    decision: Decision,
    decider: &Decider,
    rx: oneshot::Receiver<Verdict>,
) -> Verdict {
    match decision {
        Decision::Accept => {
            decider.accept();
        }
        Decision::Deny => {
            decider.deny();
        }
        Decision::Deferred => {}
    }
    rx.await.unwrap_or(Verdict::Deny)
}

/// Decides whether the user/password credentials on a connection are valid.
///
/// Its presence on the server switches the greeting to require method 0x02.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    async fn authenticate(&self, connection: &mut Connection, decider: Decider) -> Decision;
}

/// Decides whether a parsed request may proceed to the relay stage.
#[async_trait]
pub trait RulesetValidator: Send + Sync {
    async fn validate(&self, connection: &mut Connection, decider: Decider) -> Decision;
}

#[async_trait]
impl<F> AuthHandler for F
where
    F: Fn(&mut Connection, Decider) -> Decision + Send + Sync,
{
    async fn authenticate(&self, connection: &mut Connection, decider: Decider) -> Decision {
        self(connection, decider)
    }
}

#[async_trait]
impl<F> RulesetValidator for F
where
    F: Fn(&mut Connection, Decider) -> Decision + Send + Sync,
{
    async fn validate(&self, connection: &mut Connection, decider: Decider) -> Decision {
        self(connection, decider)
    }
}
