use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rill_base::{Chunk, ExitCase, StreamError, Token, compose};

use crate::compiler::Leg;
use crate::outcome::{Interruption, Outcome, Value};
use crate::resource::AcquireFn;

pub(crate) type Cont<O> = Box<dyn FnOnce(Outcome<Value>) -> Program<O> + Send>;

pub(crate) type EvalFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value, StreamError>> + Send>;

/// The closed set of primitive instructions.
pub(crate) enum Instr<O> {
    Output(Chunk<O>),
    /// Runs another program until it emits one chunk, inside the scope
    /// named by the token or the current one.
    Step {
        leg: Box<dyn Leg>,
        scope: Option<Token>,
    },
    Eval(EvalFn),
    Acquire(AcquireFn),
    OpenScope {
        interruptible: bool,
    },
    CloseScope {
        scope: Token,
        interruption: Option<Interruption>,
        exit: ExitCase,
    },
    GetScope,
}

impl<O> Instr<O> {
    fn map_output<P>(self, f: &Arc<dyn Fn(&O) -> P + Send + Sync>) -> Instr<P> {
        match self {
            Instr::Output(chunk) => Instr::Output(chunk.map(|value| (**f)(value))),
            Instr::Step { leg, scope } => Instr::Step { leg, scope },
            Instr::Eval(effect) => Instr::Eval(effect),
            Instr::Acquire(acquire) => Instr::Acquire(acquire),
            Instr::OpenScope { interruptible } => Instr::OpenScope { interruptible },
            Instr::CloseScope {
                scope,
                interruption,
                exit,
            } => Instr::CloseScope {
                scope,
                interruption,
                exit,
            },
            Instr::GetScope => Instr::GetScope,
        }
    }
}

enum Head<O> {
    Done(Outcome<Value>),
    Instr(Instr<O>),
}

/// An instruction or a finished outcome, followed by the continuations
/// waiting on it, front first.
///
/// Binding pushes onto the back, so a left-nested chain of binds is already
/// stored in the order it will run.
pub(crate) struct Program<O> {
    head: Head<O>,
    conts: VecDeque<Cont<O>>,
}

/// Normalized view: either a finished outcome or exactly one pending
/// instruction together with everything that follows it.
pub(crate) enum View<O> {
    Done(Outcome<Value>),
    Instr(Instr<O>, Rest<O>),
}

pub(crate) struct Rest<O> {
    conts: VecDeque<Cont<O>>,
}

impl<O> Rest<O> {
    /// Feeds the instruction's outcome to the continuations.
    pub(crate) fn next(self, outcome: Outcome<Value>) -> Program<O> {
        Program {
            head: Head::Done(outcome),
            conts: self.conts,
        }
    }

    /// Replaces the instruction with another one.
    pub(crate) fn resume_with(self, instr: Instr<O>) -> Program<O> {
        Program {
            head: Head::Instr(instr),
            conts: self.conts,
        }
    }
}

impl<O: Send + Sync + 'static> Program<O> {
    pub(crate) fn done(outcome: Outcome<Value>) -> Self {
        Program {
            head: Head::Done(outcome),
            conts: VecDeque::new(),
        }
    }

    pub(crate) fn fail(err: StreamError) -> Self {
        Self::done(Outcome::Fail(err))
    }

    pub(crate) fn interrupted(interruption: Interruption) -> Self {
        Self::done(Outcome::Interrupted(interruption))
    }

    pub(crate) fn instr(instr: Instr<O>) -> Self {
        Program {
            head: Head::Instr(instr),
            conts: VecDeque::new(),
        }
    }

    pub(crate) fn bind(mut self, k: Cont<O>) -> Self {
        self.conts.push_back(k);
        self
    }

    pub(crate) fn view(self) -> View<O> {
        let Program {
            mut head,
            mut conts,
        } = self;
        loop {
            match head {
                Head::Instr(instr) => return View::Instr(instr, Rest { conts }),
                Head::Done(outcome) => {
                    let Some(k) = conts.pop_front() else {
                        return View::Done(outcome);
                    };
                    let next = k(outcome);
                    head = next.head;
                    conts = splice(next.conts, conts);
                }
            }
        }
    }

    /// Rewrites the program as if `err` had just been raised in it.
    pub(crate) fn as_handler(self, err: StreamError) -> Self {
        match self.view() {
            View::Done(Outcome::Pure(_)) => Self::fail(err),
            View::Done(Outcome::Fail(cause)) => Self::fail(compose(err, Some(cause))),
            View::Done(Outcome::Interrupted(interruption)) => Self::interrupted(Interruption {
                scope: interruption.scope,
                deferred: Some(compose(err, interruption.deferred)),
            }),
            View::Instr(_, rest) => rest.next(Outcome::Fail(err)),
        }
    }

    /// Delivers an interruption that happened while this program was
    /// suspended at an output boundary.
    pub(crate) fn interrupt_boundary(self, interruption: Interruption) -> Self {
        match self.view() {
            View::Done(Outcome::Pure(_)) => Self::interrupted(interruption),
            View::Done(Outcome::Fail(err)) => Self::fail(compose(err, interruption.deferred)),
            View::Done(Outcome::Interrupted(pending)) => Self::interrupted(pending),
            View::Instr(Instr::CloseScope { scope, .. }, rest) => {
                rest.resume_with(Instr::CloseScope {
                    scope,
                    interruption: Some(interruption),
                    exit: ExitCase::Cancelled,
                })
            }
            View::Instr(_, rest) => rest.next(Outcome::Interrupted(interruption)),
        }
    }

    pub(crate) fn map_output<P: Send + Sync + 'static>(
        self,
        f: Arc<dyn Fn(&O) -> P + Send + Sync>,
    ) -> Program<P> {
        let head = match self.head {
            Head::Done(outcome) => Head::Done(outcome),
            Head::Instr(instr) => Head::Instr(instr.map_output(&f)),
        };
        let conts = self
            .conts
            .into_iter()
            .map(|k| {
                let f = Arc::clone(&f);
                Box::new(move |outcome| k(outcome).map_output(f)) as Cont<P>
            })
            .collect();
        Program { head, conts }
    }
}

/// Joins two continuation queues, moving the shorter one.
fn splice<O>(mut front: VecDeque<Cont<O>>, mut back: VecDeque<Cont<O>>) -> VecDeque<Cont<O>> {
    if front.len() >= back.len() {
        front.append(&mut back);
        front
    } else {
        while let Some(k) = front.pop_back() {
            back.push_front(k);
        }
        back
    }
}
