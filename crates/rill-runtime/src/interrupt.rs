use std::sync::Arc;

use futures_util::future::select_all;
use parking_lot::Mutex;
use rill_base::{StreamError, Token};
use tokio::sync::watch;

use crate::outcome::{Interruption, Outcome};

/// How an interrupted scope should stop.
#[derive(Clone, Debug)]
pub enum InterruptCause {
    /// Stop producing output and resume after the scope boundary.
    Stop,
    /// Fail the whole stream with this error.
    Fail(StreamError),
}

/// Interruption state as observed by the interpreter.
#[derive(Clone, Debug)]
pub(crate) enum Interrupt {
    Failed(StreamError),
    /// Carries the token of the scope that owns the interrupted context.
    Stopped(Token),
}

impl Interrupt {
    pub(crate) fn into_outcome<R>(self) -> Outcome<R> {
        match self {
            Interrupt::Failed(err) => Outcome::Fail(err),
            Interrupt::Stopped(root) => Outcome::Interrupted(Interruption::new(root)),
        }
    }
}

/// Interrupt signal shared by an interruptible scope and its
/// non-interruptible descendants. A child context reads every ancestor
/// signal on lookup, so a parent interrupt is visible to it at once.
#[derive(Debug)]
pub(crate) struct InterruptContext {
    root: Token,
    signal: watch::Sender<Option<Interrupt>>,
    parent: Mutex<Option<Arc<InterruptContext>>>,
}

impl InterruptContext {
    pub(crate) fn root(root: Token) -> Arc<Self> {
        Arc::new(InterruptContext {
            root,
            signal: watch::Sender::new(None),
            parent: Mutex::new(None),
        })
    }

    pub(crate) fn child(parent: &Arc<Self>, root: Token) -> Arc<Self> {
        Arc::new(InterruptContext {
            root,
            signal: watch::Sender::new(None),
            parent: Mutex::new(Some(Arc::clone(parent))),
        })
    }

    pub(crate) fn root_token(&self) -> Token {
        self.root
    }

    fn parent(&self) -> Option<Arc<Self>> {
        self.parent.lock().clone()
    }

    /// Detaches from the parent context; later parent interrupts are no
    /// longer seen here.
    pub(crate) fn cancel_parent(&self) {
        self.parent.lock().take();
    }

    /// Completes the signal. Only the first cause is kept.
    pub(crate) fn interrupt(&self, cause: InterruptCause) -> bool {
        let interrupt = match cause {
            InterruptCause::Stop => Interrupt::Stopped(self.root),
            InterruptCause::Fail(err) => Interrupt::Failed(err),
        };
        self.signal.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(interrupt);
            true
        })
    }

    /// Own state first, then the nearest interrupted ancestor.
    pub(crate) fn current(&self) -> Option<Interrupt> {
        if let Some(interrupt) = self.signal.borrow().clone() {
            return Some(interrupt);
        }
        let mut ctx = self.parent();
        while let Some(current) = ctx {
            if let Some(interrupt) = current.signal.borrow().clone() {
                return Some(interrupt);
            }
            ctx = current.parent();
        }
        None
    }

    /// Resolves once this context or any ancestor is interrupted.
    pub(crate) async fn interrupted(&self) -> Interrupt {
        if let Some(interrupt) = self.current() {
            return interrupt;
        }
        let mut receivers = vec![self.signal.subscribe()];
        let mut ctx = self.parent();
        while let Some(current) = ctx {
            receivers.push(current.signal.subscribe());
            ctx = current.parent();
        }
        let waits = receivers
            .into_iter()
            .map(|mut rx| {
                Box::pin(async move {
                    let seen = match rx.wait_for(Option::is_some).await {
                        Ok(slot) => slot.clone(),
                        Err(_) => None,
                    };
                    match seen {
                        Some(interrupt) => interrupt,
                        None => std::future::pending().await,
                    }
                })
            })
            .collect::<Vec<_>>();
        let (interrupt, _, _) = select_all(waits).await;
        interrupt
    }
}
