use std::sync::Arc;

use rill_base::{Chunk, ChunkQueue};

use super::{Pull, StepLeg};
use crate::outcome::Outcome;
use crate::scope::Scope;

/// A chunk and the pull that produces the rest of the stream.
pub type Uncons<O> = Option<(Chunk<O>, Pull<O, ()>)>;

impl<O> Pull<O, ()>
where
    O: Send + Sync + 'static,
{
    /// Pulls the next chunk, running the stream in the current scope.
    pub fn uncons<P>(self) -> Pull<P, Uncons<O>>
    where
        P: Send + Sync + 'static,
    {
        Pull::step(self, None).map(|leg: Option<StepLeg<O>>| leg.map(|leg| (leg.head, leg.next)))
    }

    /// Like `uncons`, but pulls in the scope the caller is running in and
    /// keeps that scope for the remainder.
    pub fn step_leg<P>(self) -> Pull<P, Option<StepLeg<O>>>
    where
        P: Send + Sync + 'static,
    {
        Pull::<P, Scope>::get_scope().flat_map(move |scope| Pull::step(self, Some(scope.id())))
    }

    /// Pulls at most `n` elements as a single chunk, without splitting more
    /// than the first chunk.
    pub fn uncons_limit<P>(self, n: usize) -> Pull<P, Uncons<O>>
    where
        P: Send + Sync + 'static,
    {
        if n == 0 {
            return Pull::pure(Some((Chunk::empty(), self)));
        }
        self.uncons().map(move |step: Uncons<O>| {
            step.map(|(head, tail)| {
                if head.len() <= n {
                    (head, tail)
                } else {
                    let (prefix, suffix) = head.split_at(n);
                    (prefix, tail.cons(suffix))
                }
            })
        })
    }

    /// Prepends `chunk` to the stream.
    pub fn cons(self, chunk: Chunk<O>) -> Pull<O, ()> {
        if chunk.is_empty() {
            return self;
        }
        Pull::output(chunk).append(move || self)
    }

    /// Emits the first chunk and returns the rest.
    pub fn echo_chunk(self) -> Pull<O, Option<Pull<O, ()>>> {
        self.uncons().flat_map(|step: Uncons<O>| match step {
            None => Pull::pure(None),
            Some((head, tail)) => Pull::output(head).map(move |()| Some(tail)),
        })
    }

    /// Emits the first `n` elements and returns the rest, if any.
    pub fn take(self, n: usize) -> Pull<O, Option<Pull<O, ()>>> {
        if n == 0 {
            return Pull::pure(Some(self));
        }
        self.uncons().flat_map(move |step: Uncons<O>| match step {
            None => Pull::pure(None),
            Some((head, tail)) => {
                let m = head.len();
                if m < n {
                    Pull::output(head).flat_map(move |()| tail.take(n - m))
                } else if m == n {
                    Pull::output(head).map(move |()| Some(tail))
                } else {
                    let (prefix, suffix) = head.split_at(n);
                    Pull::output(prefix).map(move |()| Some(tail.cons(suffix)))
                }
            }
        })
    }

    /// Discards the first `n` elements and returns the rest, if any.
    pub fn drop<P>(self, n: usize) -> Pull<P, Option<Pull<O, ()>>>
    where
        P: Send + Sync + 'static,
    {
        if n == 0 {
            return Pull::pure(Some(self));
        }
        self.uncons().flat_map(move |step: Uncons<O>| match step {
            None => Pull::pure(None),
            Some((head, tail)) => {
                let m = head.len();
                if m < n {
                    tail.drop(n - m)
                } else if m == n {
                    Pull::pure(Some(tail))
                } else {
                    Pull::pure(Some(tail.cons(head.drop(n))))
                }
            }
        })
    }

    /// Folds every element without emitting anything.
    pub fn fold<P, B, F>(self, init: B, f: F) -> Pull<P, B>
    where
        P: Send + Sync + 'static,
        B: Send + 'static,
        F: FnMut(B, &O) -> B + Send + 'static,
    {
        fold_chunks(self, init, f)
    }

    /// Transforms the stream chunk by chunk while threading a state, and
    /// returns the final state.
    pub fn scan_chunks<S, P, F>(self, init: S, f: F) -> Pull<P, S>
    where
        S: Send + 'static,
        P: Send + Sync + 'static,
        F: FnMut(S, Chunk<O>) -> (S, Chunk<P>) + Send + 'static,
    {
        scan_step(self, init, f)
    }
}

impl<O> Pull<O, ()>
where
    O: Clone + Send + Sync + 'static,
{
    /// Pulls the first element.
    pub fn uncons1<P>(self) -> Pull<P, Option<(O, Pull<O, ()>)>>
    where
        P: Send + Sync + 'static,
    {
        self.uncons().flat_map(|step: Uncons<O>| match step {
            None => Pull::pure(None),
            Some((head, tail)) => match head.first() {
                None => tail.uncons1(),
                Some(first) => {
                    let first = first.clone();
                    Pull::pure(Some((first, tail.cons(head.drop(1)))))
                }
            },
        })
    }

    /// Pulls exactly `n` elements as one chunk. With `allow_fewer`, a
    /// shorter final chunk is returned instead of `None`.
    pub fn uncons_n<P>(self, n: usize, allow_fewer: bool) -> Pull<P, Uncons<O>>
    where
        P: Send + Sync + 'static,
    {
        if n == 0 {
            return Pull::pure(Some((Chunk::empty(), self)));
        }
        gather(self, ChunkQueue::new(), n, allow_fewer)
    }

    /// Replaces every element with the output of `f`, running each inner
    /// pull to completion before the next element.
    pub fn flat_map_output<P, F>(self, f: F) -> Pull<P, ()>
    where
        P: Send + Sync + 'static,
        F: Fn(O) -> Pull<P, ()> + Send + Sync + 'static,
    {
        flat_map_output_with(self, Arc::new(f))
    }
}

fn fold_chunks<O, P, B, F>(pull: Pull<O, ()>, acc: B, mut f: F) -> Pull<P, B>
where
    O: Send + Sync + 'static,
    P: Send + Sync + 'static,
    B: Send + 'static,
    F: FnMut(B, &O) -> B + Send + 'static,
{
    pull.uncons().flat_map(move |step: Uncons<O>| match step {
        None => Pull::pure(acc),
        Some((head, tail)) => {
            let acc = head.fold(acc, &mut f);
            fold_chunks(tail, acc, f)
        }
    })
}

fn scan_step<O, S, P, F>(pull: Pull<O, ()>, state: S, mut f: F) -> Pull<P, S>
where
    O: Send + Sync + 'static,
    S: Send + 'static,
    P: Send + Sync + 'static,
    F: FnMut(S, Chunk<O>) -> (S, Chunk<P>) + Send + 'static,
{
    pull.uncons().flat_map(move |step: Uncons<O>| match step {
        None => Pull::pure(state),
        Some((head, tail)) => {
            let (state, out) = f(state, head);
            Pull::output(out).flat_map(move |()| scan_step(tail, state, f))
        }
    })
}

fn gather<O, P>(pull: Pull<O, ()>, mut acc: ChunkQueue<O>, n: usize, allow_fewer: bool) -> Pull<P, Uncons<O>>
where
    O: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pull.uncons().flat_map(move |step: Uncons<O>| match step {
        None if allow_fewer && !acc.is_empty() => Pull::pure(Some((acc.to_chunk(), Pull::done()))),
        None => Pull::pure(None),
        Some((head, tail)) => {
            let m = head.len();
            if m < n {
                acc.enqueue(head);
                gather(tail, acc, n - m, allow_fewer)
            } else if m == n {
                acc.enqueue(head);
                Pull::pure(Some((acc.to_chunk(), tail)))
            } else {
                let (prefix, suffix) = head.split_at(n);
                acc.enqueue(prefix);
                Pull::pure(Some((acc.to_chunk(), tail.cons(suffix))))
            }
        }
    })
}

fn flat_map_output_with<O, P, F>(pull: Pull<O, ()>, f: Arc<F>) -> Pull<P, ()>
where
    O: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
    F: Fn(O) -> Pull<P, ()> + Send + Sync + 'static,
{
    pull.uncons().flat_map(move |step: Uncons<O>| match step {
        None => Pull::done(),
        Some((head, tail)) => emit_each(head, 0, tail, f),
    })
}

fn emit_each<O, P, F>(head: Chunk<O>, idx: usize, tail: Pull<O, ()>, f: Arc<F>) -> Pull<P, ()>
where
    O: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
    F: Fn(O) -> Pull<P, ()> + Send + Sync + 'static,
{
    let Some(value) = head.get(idx).cloned() else {
        return flat_map_output_with(tail, f);
    };
    f(value).transform_with(move |outcome| match outcome {
        Outcome::Pure(()) => emit_each(head, idx + 1, tail, f),
        Outcome::Fail(err) => Pull::fail(err),
        Outcome::Interrupted(interruption) => {
            flat_map_output_with(tail.interrupt_boundary(interruption), f)
        }
    })
}
