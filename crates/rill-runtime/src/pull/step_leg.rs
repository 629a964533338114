use rill_base::{Chunk, Token};

use super::Pull;

/// One chunk pulled out of a stream, with the scope the stream runs in and
/// the rest of it.
///
/// Stepping a leg resumes the rest inside that scope, so several legs can
/// be advanced alternately from one pull without mixing their resources.
pub struct StepLeg<O> {
    pub head: Chunk<O>,
    pub scope_id: Token,
    pub next: Pull<O, ()>,
}

impl<O> StepLeg<O>
where
    O: Send + Sync + 'static,
{
    pub(crate) fn new(head: Chunk<O>, scope_id: Token, next: Pull<O, ()>) -> Self {
        StepLeg {
            head,
            scope_id,
            next,
        }
    }

    pub fn set_head(self, head: Chunk<O>) -> Self {
        StepLeg { head, ..self }
    }

    /// Pulls the next chunk of this leg.
    pub fn step_leg<P>(self) -> Pull<P, Option<StepLeg<O>>>
    where
        P: Send + Sync + 'static,
    {
        Pull::step(self.next, Some(self.scope_id))
    }

    /// Turns the remainder back into a pull running in this leg's scope.
    /// The current head is not emitted. Each step resumes in the leg's
    /// existing scope; no new scope is opened around the remainder.
    pub fn stream(self) -> Pull<O, ()> {
        Pull::loop_with(self.set_head(Chunk::empty()), |leg: StepLeg<O>| {
            Pull::output(leg.head.clone()).flat_map(move |()| leg.step_leg())
        })
    }
}
