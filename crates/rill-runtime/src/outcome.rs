use std::any::{Any, type_name};

use rill_base::{ExitCase, StreamError, Token};

/// Type-erased result carried between instructions and their continuations.
pub(crate) type Value = Box<dyn Any + Send>;

pub(crate) fn unit() -> Value {
    Box::new(())
}

/// An interruption in flight: the scope it targets and an error to surface
/// once that scope has been left.
#[derive(Clone, Debug)]
pub struct Interruption {
    pub scope: Token,
    pub deferred: Option<StreamError>,
}

impl Interruption {
    pub fn new(scope: Token) -> Self {
        Interruption {
            scope,
            deferred: None,
        }
    }
}

/// Terminal state of a pull: a value, a failure, or an interruption.
#[derive(Debug)]
pub enum Outcome<R> {
    Pure(R),
    Fail(StreamError),
    Interrupted(Interruption),
}

impl<R> Outcome<R> {
    pub fn map<S>(self, f: impl FnOnce(R) -> S) -> Outcome<S> {
        match self {
            Outcome::Pure(value) => Outcome::Pure(f(value)),
            Outcome::Fail(err) => Outcome::Fail(err),
            Outcome::Interrupted(interruption) => Outcome::Interrupted(interruption),
        }
    }

    pub fn is_pure(&self) -> bool {
        matches!(self, Outcome::Pure(_))
    }

    pub fn exit_case(&self) -> ExitCase {
        match self {
            Outcome::Pure(_) => ExitCase::Completed,
            Outcome::Fail(err) => ExitCase::Failure(err.clone()),
            Outcome::Interrupted(_) => ExitCase::Cancelled,
        }
    }
}

impl<R> From<Result<R, StreamError>> for Outcome<R> {
    fn from(result: Result<R, StreamError>) -> Self {
        match result {
            Ok(value) => Outcome::Pure(value),
            Err(err) => Outcome::Fail(err),
        }
    }
}

impl<R: Send + 'static> Outcome<R> {
    pub(crate) fn erase(self) -> Outcome<Value> {
        self.map(|value| Box::new(value) as Value)
    }
}

impl Outcome<Value> {
    pub(crate) fn downcast<R: 'static>(self) -> Outcome<R> {
        match self {
            Outcome::Pure(value) => match value.downcast::<R>() {
                Ok(value) => Outcome::Pure(*value),
                Err(_) => Outcome::Fail(StreamError::TypeMismatch {
                    expected: type_name::<R>(),
                }),
            },
            Outcome::Fail(err) => Outcome::Fail(err),
            Outcome::Interrupted(interruption) => Outcome::Interrupted(interruption),
        }
    }
}
