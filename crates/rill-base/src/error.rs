use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::Token;

/// Failure raised by an effect, a finalizer, a fold, or the interpreter itself.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StreamError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    External(Arc<dyn Error + Send + Sync>),
    #[error("{primary} {}", Suppressed(.suppressed))]
    Composite {
        primary: Box<StreamError>,
        suppressed: Vec<StreamError>,
    },
    #[error("scope lookup failure: scope {target} not reachable from {scope}")]
    ScopeLookup { scope: Token, target: Token },
    #[error("cannot re-open root scope")]
    RootClosed,
    #[error("scope {0} is not interruptible")]
    NotInterruptible(Token),
    #[error("scope {0} is closed")]
    ScopeClosed(Token),
    #[error("fuel exhausted after {0} instructions")]
    FuelExhausted(u64),
    #[error("internal value did not have the expected type {expected}")]
    TypeMismatch { expected: &'static str },
}

struct Suppressed<'a>(&'a [StreamError]);

impl fmt::Display for Suppressed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(suppressed: ")?;
        for (idx, err) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        f.write_str(")")
    }
}

impl StreamError {
    pub fn msg(message: impl Into<String>) -> Self {
        StreamError::Message(message.into())
    }

    pub fn external<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        StreamError::External(Arc::new(err))
    }

    /// The first error of a composite, or `self`.
    pub fn primary(&self) -> &StreamError {
        match self {
            StreamError::Composite { primary, .. } => primary,
            other => other,
        }
    }

    pub fn suppressed(&self) -> &[StreamError] {
        match self {
            StreamError::Composite { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Every leaf error, primary first.
    pub fn flatten(&self) -> Vec<&StreamError> {
        let mut out = vec![self.primary()];
        out.extend(self.suppressed());
        out
    }

    /// Errors that end the whole run and must not reach error handlers.
    pub fn is_fatal(&self) -> bool {
        matches!(self.primary(), StreamError::FuelExhausted(_))
    }

    /// True if `self` or one of its suppressed errors renders as `message`.
    pub fn mentions(&self, message: &str) -> bool {
        self.flatten().iter().any(|err| err.to_string() == message)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::external(err)
    }
}

/// Merges two independent failures, keeping `primary` first.
pub fn compose(primary: StreamError, secondary: Option<StreamError>) -> StreamError {
    let Some(secondary) = secondary else {
        return primary;
    };
    let (head, mut suppressed) = match primary {
        StreamError::Composite {
            primary,
            suppressed,
        } => (*primary, suppressed),
        other => (other, Vec::new()),
    };
    match secondary {
        StreamError::Composite {
            primary,
            suppressed: rest,
        } => {
            suppressed.push(*primary);
            suppressed.extend(rest);
        }
        other => suppressed.push(other),
    }
    StreamError::Composite {
        primary: Box::new(head),
        suppressed,
    }
}

pub fn compose_all(errors: impl IntoIterator<Item = StreamError>) -> Option<StreamError> {
    errors
        .into_iter()
        .fold(None, |acc, err| match acc {
            None => Some(err),
            Some(prev) => Some(compose(prev, Some(err))),
        })
}
