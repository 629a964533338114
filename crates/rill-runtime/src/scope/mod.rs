use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rill_base::{ExitCase, StreamError, Token, compose_all};

use crate::interrupt::{Interrupt, InterruptCause, InterruptContext};
use crate::outcome::{Outcome, Value};
use crate::resource::{AcquireFn, ResourceLease, ScopedResource, erase_acquire};


/// A node in the tree of resource lifetimes.
///
/// Cloning yields another handle to the same node. A closed scope is
/// detached from its parent and drops its children, so the parent links
/// held by children never keep a closed subtree alive.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
}

struct Inner {
    id: Token,
    parent: Option<Scope>,
    interrupt: Option<Arc<InterruptContext>>,
    state: Mutex<State>,
}

struct State {
    open: bool,
    /// Acquisition order; released back to front.
    resources: Vec<Arc<ScopedResource>>,
    children: Vec<Scope>,
}

impl State {
    fn closed() -> Self {
        State {
            open: false,
            resources: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl Scope {
    pub fn new_root() -> Scope {
        Self::with_parent(Token::new(), None, None)
    }

    fn with_parent(
        id: Token,
        parent: Option<Scope>,
        interrupt: Option<Arc<InterruptContext>>,
    ) -> Scope {
        Scope {
            inner: Arc::new(Inner {
                id,
                parent,
                interrupt,
                state: Mutex::new(State {
                    open: true,
                    resources: Vec::new(),
                    children: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> Token {
        self.inner.id
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    pub fn is_interruptible(&self) -> bool {
        self.inner.interrupt.is_some()
    }

    pub fn children(&self) -> Vec<Scope> {
        self.inner.state.lock().children.clone()
    }

    pub fn resource_count(&self) -> usize {
        self.inner.state.lock().resources.len()
    }

    pub fn root(&self) -> Scope {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.clone()
    }

    /// Opens a child scope. A closed scope delegates to its nearest open
    /// ancestor; a closed root is an error.
    pub fn open(&self, interruptible: bool) -> Result<Scope, StreamError> {
        let mut current = self;
        loop {
            let mut state = current.inner.state.lock();
            if state.open {
                let child = current.new_child(interruptible);
                state.children.push(child.clone());
                drop(state);
                tracing::trace!(scope = %child.id(), parent = %current.id(), interruptible, "opened scope");
                return Ok(child);
            }
            drop(state);
            match current.parent() {
                Some(parent) => current = parent,
                None => return Err(StreamError::RootClosed),
            }
        }
    }

    fn new_child(&self, interruptible: bool) -> Scope {
        let id = Token::new();
        let interrupt = match (&self.inner.interrupt, interruptible) {
            (None, false) => None,
            (None, true) => Some(InterruptContext::root(id)),
            (Some(parent), false) => Some(Arc::clone(parent)),
            (Some(parent), true) => Some(InterruptContext::child(parent, id)),
        };
        Self::with_parent(id, Some(self.clone()), interrupt)
    }

    fn register(&self, resource: &Arc<ScopedResource>) -> bool {
        let mut state = self.inner.state.lock();
        if state.open {
            state.resources.push(Arc::clone(resource));
        }
        state.open
    }

    fn unregister(&self, resource: Token) {
        self.inner
            .state
            .lock()
            .resources
            .retain(|r| r.id() != resource);
    }

    fn release_child(&self, child: Token) {
        self.inner
            .state
            .lock()
            .children
            .retain(|c| c.id() != child);
    }

    /// Acquires a resource owned by this scope.
    ///
    /// `release` runs exactly once: when the scope closes, when the last
    /// lease on the resource is cancelled, or right away if the scope was
    /// interrupted or closed while `acquire` was running.
    pub async fn acquire_resource<R, A, AF, Rel, RF>(&self, acquire: A, release: Rel) -> Outcome<R>
    where
        R: Clone + Send + 'static,
        A: FnOnce() -> AF + Send + 'static,
        AF: Future<Output = Result<R, StreamError>> + Send + 'static,
        Rel: FnOnce(R, ExitCase) -> RF + Send + 'static,
        RF: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        self.acquire_erased(erase_acquire(acquire, release))
            .await
            .downcast()
    }

    pub(crate) async fn acquire_erased(&self, acquire: AcquireFn) -> Outcome<Value> {
        // Register first so a concurrent close sees the resource.
        let resource = Arc::new(ScopedResource::new());
        if !self.register(&resource) {
            return Outcome::Fail(StreamError::ScopeClosed(self.id()));
        }
        let (value, finalizer) = match acquire().await {
            Ok(acquired) => acquired,
            Err(err) => {
                self.unregister(resource.id());
                return Outcome::Fail(err);
            }
        };
        let interrupted = self.interruption();
        match resource.acquired(finalizer, interrupted.is_some()).await {
            Ok(true) => {
                tracing::trace!(scope = %self.id(), resource = %resource.id(), "acquired resource");
                Outcome::Pure(value)
            }
            Ok(false) => {
                self.unregister(resource.id());
                match interrupted {
                    Some(interrupt) => interrupt.into_outcome(),
                    None => Outcome::Fail(StreamError::ScopeClosed(self.id())),
                }
            }
            Err(err) => {
                self.unregister(resource.id());
                Outcome::Fail(err)
            }
        }
    }

    /// Closes children first, then releases this scope's resources newest
    /// first, then detaches from the parent. Every failure is kept.
    pub fn close(&self, exit: ExitCase) -> BoxFuture<'_, Result<(), StreamError>> {
        Box::pin(async move {
            let previous = mem::replace(&mut *self.inner.state.lock(), State::closed());
            let mut errors = Vec::new();
            for child in previous.children.iter().rev() {
                if let Err(err) = child.close(exit.clone()).await {
                    errors.push(err);
                }
            }
            for resource in previous.resources.iter().rev() {
                if let Err(err) = resource.release(exit.clone()).await {
                    errors.push(err);
                }
            }
            if let Some(parent) = self.parent() {
                parent.release_child(self.id());
            }
            // Non-interruptible scopes share an ancestor's context; only the owner detaches it.
            if let Some(ctx) = self.inner.interrupt.as_ref().filter(|ctx| ctx.root_token() == self.id()) {
                ctx.cancel_parent();
            }
            if previous.open {
                tracing::trace!(scope = %self.id(), ?exit, failures = errors.len(), "closed scope");
            }
            match compose_all(errors) {
                None => Ok(()),
                Some(err) => Err(err),
            }
        })
    }

    /// Nearest open ancestor, or the root when every ancestor is closed.
    pub fn open_ancestor(&self) -> Scope {
        let mut current = self;
        while let Some(parent) = current.parent() {
            if parent.is_open() {
                return parent.clone();
            }
            current = parent;
        }
        current.clone()
    }

    pub fn find_self_or_ancestor(&self, id: Token) -> Option<Scope> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if scope.id() == id {
                return Some(scope.clone());
            }
            current = scope.parent();
        }
        None
    }

    /// Depth-first search of this scope and its descendants.
    pub fn find_self_or_child(&self, id: Token) -> Option<Scope> {
        let mut stack = vec![self.clone()];
        while let Some(scope) = stack.pop() {
            if scope.id() == id {
                return Some(scope);
            }
            stack.extend(scope.children().into_iter().rev());
        }
        None
    }

    /// Locates the scope a step should run in: self, then the parent's
    /// subtree, then the whole tree.
    pub fn find_step_scope(&self, id: Token) -> Option<Scope> {
        if self.id() == id {
            return Some(self.clone());
        }
        match self.parent() {
            None => self.find_self_or_child(id),
            Some(parent) => parent
                .find_self_or_child(id)
                .or_else(|| self.root().find_self_or_child(id)),
        }
    }

    /// Leases every resource reachable from this scope: ancestors, self and
    /// descendants. `None` when the scope is already closed.
    pub fn lease(&self) -> Option<ScopeLease> {
        if !self.is_open() {
            return None;
        }
        let mut scopes = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(scope) = stack.pop() {
            stack.extend(scope.children());
            scopes.push(scope);
        }
        let mut ancestor = self.parent();
        while let Some(scope) = ancestor {
            scopes.push(scope.clone());
            ancestor = scope.parent();
        }
        let leases = scopes
            .iter()
            .flat_map(|scope| scope.inner.state.lock().resources.clone())
            .filter_map(|resource| resource.lease())
            .collect();
        Some(ScopeLease { leases })
    }

    /// Signals interruption to every evaluation running in this scope or
    /// in scopes sharing its interrupt context.
    pub fn interrupt(&self, cause: InterruptCause) -> Result<(), StreamError> {
        let Some(ctx) = &self.inner.interrupt else {
            return Err(StreamError::NotInterruptible(self.id()));
        };
        if ctx.interrupt(cause) {
            tracing::debug!(scope = %self.id(), root = %ctx.root_token(), "scope interrupted");
        }
        Ok(())
    }

    pub fn is_interrupted(&self) -> bool {
        self.interruption().is_some()
    }

    pub(crate) fn interruption(&self) -> Option<Interrupt> {
        self.inner.interrupt.as_ref().and_then(|ctx| ctx.current())
    }

    /// Runs `effect`, racing it against this scope's interrupt signal when
    /// the scope is interruptible. A losing effect is dropped.
    pub(crate) async fn interruptible_eval<T>(
        &self,
        effect: impl Future<Output = Result<T, StreamError>>,
    ) -> Outcome<T> {
        let Some(ctx) = &self.inner.interrupt else {
            return effect.await.into();
        };
        tokio::select! {
            biased;
            interrupt = ctx.interrupted() => interrupt.into_outcome(),
            result = effect => result.into(),
        }
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("parent", &self.parent().map(Scope::id))
            .field("open", &self.is_open())
            .finish()
    }
}

/// Leases taken by [`Scope::lease`].
#[must_use = "a lease must be cancelled for deferred finalizers to run"]
pub struct ScopeLease {
    leases: Vec<ResourceLease>,
}

impl ScopeLease {
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Cancels every lease, running finalizers whose resources were waiting
    /// on them. All failures are composed.
    pub async fn cancel(self) -> Result<(), StreamError> {
        let mut errors = Vec::new();
        for lease in self.leases {
            if let Err(err) = lease.cancel().await {
                errors.push(err);
            }
        }
        match compose_all(errors) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
