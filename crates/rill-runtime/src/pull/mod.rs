use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use rill_base::{Chunk, ExitCase, StreamError, Token, compose};

use crate::compiler::LegProgram;
use crate::outcome::{Interruption, Outcome, Value};
use crate::resource::erase_acquire;
use crate::scope::Scope;

pub(crate) mod program;
mod step_leg;
mod stream;

pub use step_leg::StepLeg;
pub use stream::Uncons;

use self::program::{Instr, Program};

/// A program that may emit chunks of `O`, run effects, acquire resources,
/// and finishes with an `R`, a failure, or an interruption.
///
/// Pulls are descriptions; nothing runs until one is compiled. Each value
/// is consumed by the combinator it is passed to.
pub struct Pull<O, R> {
    program: Program<O>,
    result: PhantomData<fn() -> R>,
}

impl<O, R> Pull<O, R>
where
    O: Send + Sync + 'static,
    R: Send + 'static,
{
    pub(crate) fn from_program(program: Program<O>) -> Self {
        Pull {
            program,
            result: PhantomData,
        }
    }

    pub(crate) fn into_program(self) -> Program<O> {
        self.program
    }

    pub(crate) fn from_outcome(outcome: Outcome<R>) -> Self {
        Self::from_program(Program::done(outcome.erase()))
    }

    pub fn pure(value: R) -> Self {
        Self::from_outcome(Outcome::Pure(value))
    }

    pub fn fail(err: StreamError) -> Self {
        Self::from_program(Program::fail(err))
    }

    pub(crate) fn interrupted(interruption: Interruption) -> Self {
        Self::from_program(Program::interrupted(interruption))
    }

    /// Runs `effect` when evaluation reaches this point. In an interruptible
    /// scope the effect races the interrupt signal and is dropped if it loses.
    pub fn eval<F, Fut>(effect: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, StreamError>> + Send + 'static,
    {
        Self::from_program(Program::instr(Instr::Eval(Box::new(move || {
            Box::pin(async move { effect().await.map(|value| Box::new(value) as Value) })
        }))))
    }

    /// Acquires a resource in the current scope; `release` runs exactly once
    /// when that scope closes.
    pub fn acquire<A, AF, Rel, RF>(acquire: A, release: Rel) -> Self
    where
        R: Clone,
        A: FnOnce() -> AF + Send + 'static,
        AF: Future<Output = Result<R, StreamError>> + Send + 'static,
        Rel: FnOnce(R, ExitCase) -> RF + Send + 'static,
        RF: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        Self::from_program(Program::instr(Instr::Acquire(erase_acquire(
            acquire, release,
        ))))
    }

    pub fn defer(f: impl FnOnce() -> Pull<O, R> + Send + 'static) -> Self {
        Pull::<O, ()>::done().flat_map(move |()| f())
    }

    fn bind<R2: Send + 'static>(
        self,
        k: impl FnOnce(Outcome<Value>) -> Program<O> + Send + 'static,
    ) -> Pull<O, R2> {
        Pull::from_program(self.program.bind(Box::new(k)))
    }

    pub fn flat_map<R2, F>(self, f: F) -> Pull<O, R2>
    where
        R2: Send + 'static,
        F: FnOnce(R) -> Pull<O, R2> + Send + 'static,
    {
        self.bind(move |outcome| match outcome.downcast::<R>() {
            Outcome::Pure(value) => f(value).program,
            Outcome::Fail(err) => Program::fail(err),
            Outcome::Interrupted(interruption) => Program::interrupted(interruption),
        })
    }

    /// Continues with whatever the pull ended in, including failures and
    /// interruptions.
    pub fn transform_with<R2, F>(self, f: F) -> Pull<O, R2>
    where
        R2: Send + 'static,
        F: FnOnce(Outcome<R>) -> Pull<O, R2> + Send + 'static,
    {
        self.bind(move |outcome| f(outcome.downcast::<R>()).program)
    }

    pub fn map<R2, F>(self, f: F) -> Pull<O, R2>
    where
        R2: Send + 'static,
        F: FnOnce(R) -> R2 + Send + 'static,
    {
        self.flat_map(move |value| Pull::pure(f(value)))
    }

    pub fn void(self) -> Pull<O, ()> {
        self.map(|_| ())
    }

    pub fn append<R2, F>(self, post: F) -> Pull<O, R2>
    where
        R2: Send + 'static,
        F: FnOnce() -> Pull<O, R2> + Send + 'static,
    {
        self.flat_map(move |_| post())
    }

    pub fn handle_error_with<F>(self, handler: F) -> Self
    where
        F: FnOnce(StreamError) -> Pull<O, R> + Send + 'static,
    {
        self.transform_with(move |outcome| match outcome {
            Outcome::Fail(err) => handler(err),
            other => Pull::from_outcome(other),
        })
    }

    pub fn attempt(self) -> Pull<O, Result<R, StreamError>> {
        self.map(Ok).handle_error_with(|err| Pull::pure(Err(err)))
    }

    /// The pull as if `err` had been raised at its current position.
    pub fn as_handler(self, err: StreamError) -> Self {
        Self::from_program(self.program.as_handler(err))
    }

    pub fn map_output<P, F>(self, f: F) -> Pull<P, R>
    where
        P: Send + Sync + 'static,
        F: Fn(&O) -> P + Send + Sync + 'static,
    {
        Pull::from_program(self.program.map_output(Arc::new(f)))
    }

    /// Runs `body` on the acquired value and then `release` with the exit
    /// case of `body`. A release failure is composed with a body failure.
    pub fn bracket_case<A, U, Rel>(acquire: Pull<O, A>, body: U, release: Rel) -> Self
    where
        A: Clone + Send + 'static,
        U: FnOnce(A) -> Pull<O, R> + Send + 'static,
        Rel: FnOnce(A, ExitCase) -> Pull<O, ()> + Send + 'static,
    {
        acquire.flat_map(move |resource: A| {
            body(resource.clone()).transform_with(move |result: Outcome<R>| {
                release(resource, result.exit_case()).transform_with(move |released| {
                    match (result, released) {
                        (Outcome::Fail(err), Outcome::Fail(release_err)) => {
                            Pull::fail(compose(err, Some(release_err)))
                        }
                        (_, Outcome::Fail(release_err)) => Pull::fail(release_err),
                        (result, _) => Pull::from_outcome(result),
                    }
                })
            })
        })
    }

    /// Repeats `f` while it yields a next state.
    pub fn loop_with<F>(init: R, f: F) -> Pull<O, ()>
    where
        F: Fn(R) -> Pull<O, Option<R>> + Send + Sync + 'static,
    {
        loop_step(Arc::new(f), init)
    }
}

fn loop_step<O, R, F>(f: Arc<F>, state: R) -> Pull<O, ()>
where
    O: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(R) -> Pull<O, Option<R>> + Send + Sync + 'static,
{
    f(state).flat_map(move |next| match next {
        Some(state) => loop_step(f, state),
        None => Pull::done(),
    })
}

impl<O> Pull<O, ()>
where
    O: Send + Sync + 'static,
{
    pub fn done() -> Self {
        Self::pure(())
    }

    pub fn output(chunk: Chunk<O>) -> Self {
        if chunk.is_empty() {
            return Self::done();
        }
        Self::from_program(Program::instr(Instr::Output(chunk)))
    }

    pub fn output1(value: O) -> Self {
        Self::output(Chunk::singleton(value))
    }

    /// Runs this pull in a fresh child scope.
    pub fn scope(self) -> Self {
        self.scoped(false)
    }

    /// Runs this pull in a fresh child scope that can be interrupted.
    pub fn interrupt_scope(self) -> Self {
        self.scoped(true)
    }

    fn scoped(self, interruptible: bool) -> Self {
        Pull::<O, Token>::open_scope(interruptible).flat_map(move |scope| {
            self.transform_with(move |outcome| match outcome {
                Outcome::Pure(()) => Pull::close_scope(scope, None, ExitCase::Completed),
                Outcome::Interrupted(interruption) => {
                    Pull::close_scope(scope, Some(interruption), ExitCase::Cancelled)
                }
                Outcome::Fail(err) => {
                    Pull::close_scope(scope, None, ExitCase::Failure(err.clone()))
                        .transform_with(move |closed| match closed {
                            Outcome::Fail(close_err) => Pull::fail(compose(err, Some(close_err))),
                            _ => Pull::fail(err),
                        })
                }
            })
        })
    }

    pub(crate) fn close_scope(
        scope: Token,
        interruption: Option<Interruption>,
        exit: ExitCase,
    ) -> Self {
        Self::from_program(Program::instr(Instr::CloseScope {
            scope,
            interruption,
            exit,
        }))
    }

    pub(crate) fn interrupt_boundary(self, interruption: Interruption) -> Self {
        Self::from_program(self.program.interrupt_boundary(interruption))
    }
}

impl<O, X> Pull<O, Option<StepLeg<X>>>
where
    O: Send + Sync + 'static,
    X: Send + Sync + 'static,
{
    /// Runs `leg` until it emits a chunk, in the scope named by `scope` or
    /// the current one.
    pub(crate) fn step(leg: Pull<X, ()>, scope: Option<Token>) -> Self {
        Self::from_program(Program::instr(Instr::Step {
            leg: Box::new(LegProgram(leg.program)),
            scope,
        }))
    }
}

impl<O> Pull<O, Token>
where
    O: Send + Sync + 'static,
{
    pub(crate) fn open_scope(interruptible: bool) -> Self {
        Self::from_program(Program::instr(Instr::OpenScope { interruptible }))
    }
}

impl<O> Pull<O, Scope>
where
    O: Send + Sync + 'static,
{
    /// The scope the pull is running in.
    pub fn get_scope() -> Self {
        Self::from_program(Program::instr(Instr::GetScope))
    }
}
