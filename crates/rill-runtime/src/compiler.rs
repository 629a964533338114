use futures_util::future::BoxFuture;
use rill_base::{Chunk, ExitCase, StreamError, compose};

use crate::config::CompileConfig;
use crate::outcome::{Interruption, Outcome, Value, unit};
use crate::pull::program::{Instr, Program, View};
use crate::pull::{Pull, StepLeg};
use crate::scope::Scope;

/// A program of some other output type, run by a `Step` instruction.
pub(crate) trait Leg: Send {
    fn run<'a>(
        self: Box<Self>,
        interpreter: &'a mut Interpreter,
        scope: Scope,
    ) -> BoxFuture<'a, Result<LegYield, StreamError>>;
}

pub(crate) struct LegProgram<X>(pub(crate) Program<X>);

/// Result of running a leg; values are `Option<StepLeg<X>>`.
pub(crate) enum LegYield {
    Done(Scope, Value),
    Out(Scope, Value),
    Interrupted(Interruption),
}

impl<X> Leg for LegProgram<X>
where
    X: Send + Sync + 'static,
{
    fn run<'a>(
        self: Box<Self>,
        interpreter: &'a mut Interpreter,
        scope: Scope,
    ) -> BoxFuture<'a, Result<LegYield, StreamError>> {
        let LegProgram(program) = *self;
        Box::pin(async move {
            Ok(match interpreter.go(scope, program).await? {
                Yield::Done(scope) => LegYield::Done(scope, Box::new(None::<StepLeg<X>>)),
                Yield::Out { head, scope, tail } => {
                    let leg = StepLeg::new(head, scope.id(), Pull::from_program(tail));
                    LegYield::Out(scope, Box::new(Some(leg)))
                }
                Yield::Interrupted(interruption) => LegYield::Interrupted(interruption),
            })
        })
    }
}

pub(crate) enum Yield<O> {
    Done(Scope),
    Out {
        head: Chunk<O>,
        scope: Scope,
        tail: Program<O>,
    },
    Interrupted(Interruption),
}

/// Interpreter state for one compile run.
pub(crate) struct Interpreter {
    extend_last_top_level_scope: bool,
    extended: Option<Scope>,
    fuel: Option<u64>,
    dispatched: u64,
}

impl Interpreter {
    pub(crate) fn new(config: &CompileConfig) -> Self {
        Interpreter {
            extend_last_top_level_scope: config.extend_last_top_level_scope,
            extended: None,
            fuel: config.fuel,
            dispatched: 0,
        }
    }

    fn burn_fuel(&mut self) -> Result<(), StreamError> {
        self.dispatched += 1;
        match self.fuel.as_mut() {
            Some(0) => Err(StreamError::FuelExhausted(self.dispatched - 1)),
            Some(fuel) => {
                *fuel -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Steps `program` in `scope` until it emits a chunk, finishes, or is
    /// interrupted. A failure outcome surfaces as `Err`.
    pub(crate) fn go<'a, O>(
        &'a mut self,
        scope: Scope,
        program: Program<O>,
    ) -> BoxFuture<'a, Result<Yield<O>, StreamError>>
    where
        O: Send + Sync + 'static,
    {
        Box::pin(async move {
            let mut scope = scope;
            let mut program = program;
            loop {
                let (instr, rest) = match program.view() {
                    View::Done(Outcome::Pure(_)) => return Ok(Yield::Done(scope)),
                    View::Done(Outcome::Fail(err)) => return Err(err),
                    View::Done(Outcome::Interrupted(interruption)) => {
                        return Ok(Yield::Interrupted(interruption));
                    }
                    View::Instr(instr, rest) => (instr, rest),
                };
                self.burn_fuel()?;
                program = match instr {
                    Instr::Output(head) => match interrupt_guard(&scope) {
                        Some(outcome) => rest.next(outcome),
                        None => {
                            return Ok(Yield::Out {
                                head,
                                scope,
                                tail: rest.next(Outcome::Pure(unit())),
                            });
                        }
                    },
                    Instr::Step { leg, scope: target } => {
                        let step_scope = match target {
                            None => scope.clone(),
                            Some(id) => scope.find_step_scope(id).ok_or_else(|| {
                                StreamError::ScopeLookup {
                                    scope: scope.id(),
                                    target: id,
                                }
                            })?,
                        };
                        let (next_scope, outcome) = match leg.run(self, step_scope).await {
                            Ok(LegYield::Done(done_scope, value)) => {
                                let outcome =
                                    interrupt_guard(&done_scope).unwrap_or(Outcome::Pure(value));
                                (done_scope, outcome)
                            }
                            Ok(LegYield::Out(out_scope, value)) => {
                                match interrupt_guard(&out_scope) {
                                    Some(outcome) => (out_scope, outcome),
                                    // A leg stepped in its own scope hands control back
                                    // to the scope the caller was in.
                                    None if target.is_some() => (scope.clone(), Outcome::Pure(value)),
                                    None => (out_scope, Outcome::Pure(value)),
                                }
                            }
                            Ok(LegYield::Interrupted(interruption)) => {
                                (scope.clone(), Outcome::Interrupted(interruption))
                            }
                            Err(err) if err.is_fatal() => return Err(err),
                            Err(err) => (scope.clone(), Outcome::Fail(err)),
                        };
                        scope = next_scope;
                        rest.next(outcome)
                    }
                    Instr::Eval(effect) => {
                        let outcome = scope.interruptible_eval(effect()).await;
                        rest.next(outcome)
                    }
                    Instr::Acquire(acquire) => match interrupt_guard(&scope) {
                        Some(outcome) => rest.next(outcome),
                        None => {
                            let outcome = scope.acquire_erased(acquire).await;
                            rest.next(outcome)
                        }
                    },
                    Instr::GetScope => rest.next(Outcome::Pure(Box::new(scope.clone()))),
                    Instr::OpenScope { interruptible } => match interrupt_guard(&scope) {
                        Some(outcome) => rest.next(outcome),
                        None => {
                            if scope.is_root() {
                                if let Some(extended) = self.extended.take() {
                                    extended.close(ExitCase::Completed).await?;
                                }
                            }
                            match scope.open(interruptible) {
                                Ok(child) => {
                                    let id = child.id();
                                    scope = child;
                                    rest.next(Outcome::Pure(Box::new(id)))
                                }
                                Err(err) => rest.next(Outcome::Fail(err)),
                            }
                        }
                    },
                    Instr::CloseScope {
                        scope: target,
                        interruption,
                        exit,
                    } => {
                        let to_close = scope
                            .find_self_or_ancestor(target)
                            .or_else(|| scope.find_self_or_child(target));
                        let outcome = match to_close {
                            // Already closed by someone else.
                            None => match interruption {
                                None => Outcome::Pure(unit()),
                                Some(interruption) => Outcome::Interrupted(interruption),
                            },
                            Some(to_close) if to_close.is_root() => Outcome::Pure(unit()),
                            Some(to_close)
                                if self.extend_last_top_level_scope
                                    && to_close.parent().is_some_and(Scope::is_root) =>
                            {
                                if let Some(previous) = self.extended.take() {
                                    previous.close(ExitCase::Completed).await?;
                                }
                                scope = to_close.open_ancestor();
                                tracing::trace!(scope = %to_close.id(), "extending top-level scope");
                                self.extended = Some(to_close);
                                Outcome::Pure(unit())
                            }
                            Some(to_close) => {
                                let closed = to_close.close(exit).await;
                                let ancestor = to_close.open_ancestor();
                                let outcome = match interruption {
                                    None => closed.map(|()| unit()).into(),
                                    Some(Interruption {
                                        scope: interrupted,
                                        deferred,
                                    }) => {
                                        let err = match (deferred, closed.err()) {
                                            (Some(deferred), close_err) => {
                                                Some(compose(deferred, close_err))
                                            }
                                            (None, close_err) => close_err,
                                        };
                                        if ancestor.find_self_or_ancestor(interrupted).is_some() {
                                            Outcome::Interrupted(Interruption {
                                                scope: interrupted,
                                                deferred: err,
                                            })
                                        } else {
                                            match err {
                                                None => Outcome::Pure(unit()),
                                                Some(err) => Outcome::Fail(err),
                                            }
                                        }
                                    }
                                };
                                scope = ancestor;
                                outcome
                            }
                        };
                        rest.next(outcome)
                    }
                };
            }
        })
    }

    /// Runs until the next chunk. An interruption without a deferred error
    /// ends the stream cleanly.
    pub(crate) async fn compile_loop<O>(
        &mut self,
        scope: Scope,
        program: Program<O>,
    ) -> Result<Option<(Chunk<O>, Scope, Program<O>)>, StreamError>
    where
        O: Send + Sync + 'static,
    {
        match self.go(scope, program).await? {
            Yield::Done(_) => Ok(None),
            Yield::Out { head, scope, tail } => Ok(Some((head, scope, tail))),
            Yield::Interrupted(Interruption { deferred: None, .. }) => Ok(None),
            Yield::Interrupted(Interruption {
                deferred: Some(err),
                ..
            }) => Err(err),
        }
    }

    /// Folds every emitted chunk. A fold error is raised inside the rest of
    /// the program so pending finalizers still run.
    pub(crate) async fn compile<O, B, F>(
        &mut self,
        program: Program<O>,
        scope: Scope,
        init: B,
        mut fold: F,
    ) -> Result<B, StreamError>
    where
        O: Send + Sync + 'static,
        F: FnMut(&mut B, Chunk<O>) -> Result<(), StreamError>,
    {
        let mut acc = init;
        let mut scope = scope;
        let mut program = program;
        while let Some((chunk, next_scope, tail)) = self.compile_loop(scope, program).await? {
            program = match fold(&mut acc, chunk) {
                Ok(()) => tail,
                Err(err) => tail.as_handler(err),
            };
            scope = next_scope;
        }
        Ok(acc)
    }
}

fn interrupt_guard(scope: &Scope) -> Option<Outcome<Value>> {
    scope.interruption().map(|interrupt| interrupt.into_outcome())
}

/// Closes the root with `Cancelled` if a compile future is dropped midway.
struct RootGuard {
    root: Option<Scope>,
}

impl RootGuard {
    fn disarm(&mut self) {
        self.root = None;
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        let Some(root) = self.root.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(scope = %root.id(), "compile dropped, closing root scope");
                handle.spawn(async move {
                    if let Err(err) = root.close(ExitCase::Cancelled).await {
                        tracing::warn!(%err, "finalizer failed while closing a dropped compile");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(scope = %root.id(), "compile dropped outside a tokio runtime, resources left open");
            }
        }
    }
}

impl<O> Pull<O, ()>
where
    O: Send + Sync + 'static,
{
    /// Runs the pull in a fresh root scope, folding every chunk into `init`.
    ///
    /// The root scope is closed before returning, so every resource acquired
    /// along the way has been released by then.
    pub async fn compile<B, F>(self, init: B, fold: F) -> Result<B, StreamError>
    where
        B: Send,
        F: FnMut(&mut B, Chunk<O>) -> Result<(), StreamError> + Send,
    {
        self.compile_with(&CompileConfig::default(), init, fold).await
    }

    pub async fn compile_with<B, F>(
        self,
        config: &CompileConfig,
        init: B,
        fold: F,
    ) -> Result<B, StreamError>
    where
        B: Send,
        F: FnMut(&mut B, Chunk<O>) -> Result<(), StreamError> + Send,
    {
        let root = Scope::new_root();
        let mut guard = RootGuard {
            root: Some(root.clone()),
        };
        tracing::debug!(scope = %root.id(), ?config, "compile started");
        let mut interpreter = Interpreter::new(config);
        let result = interpreter
            .compile(self.into_program(), root.clone(), init, fold)
            .await;
        guard.disarm();
        let closed = root.close(ExitCase::from_result(&result)).await;
        tracing::debug!(scope = %root.id(), ok = result.is_ok() && closed.is_ok(), "compile finished");
        match (result, closed) {
            (Ok(acc), Ok(())) => Ok(acc),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), closed) => Err(compose(err, closed.err())),
        }
    }

    /// Collects every emitted element.
    pub async fn to_vec(self) -> Result<Vec<O>, StreamError>
    where
        O: Clone,
    {
        self.compile(Vec::new(), |acc, chunk| {
            acc.extend_from_slice(chunk.as_slice());
            Ok(())
        })
        .await
    }

    /// Runs the pull for its effects, discarding output.
    pub async fn drain(self) -> Result<(), StreamError> {
        self.compile((), |_, _| Ok(())).await
    }
}
