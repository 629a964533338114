use crate::StreamError;

/// Why an acquired resource is being released.
#[derive(Clone, Debug)]
pub enum ExitCase {
    Completed,
    Failure(StreamError),
    Cancelled,
}

impl ExitCase {
    pub fn from_result<T>(result: &Result<T, StreamError>) -> Self {
        match result {
            Ok(_) => ExitCase::Completed,
            Err(err) => ExitCase::Failure(err.clone()),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ExitCase::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExitCase::Cancelled)
    }

    pub fn error(&self) -> Option<&StreamError> {
        match self {
            ExitCase::Failure(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_result_keeps_the_error() {
        let ok: Result<(), StreamError> = Ok(());
        assert!(ExitCase::from_result(&ok).is_completed());

        let failed: Result<(), StreamError> = Err(StreamError::msg("boom"));
        let exit = ExitCase::from_result(&failed);
        assert!(!exit.is_completed() && !exit.is_cancelled());
        assert_eq!(exit.error().map(ToString::to_string).as_deref(), Some("boom"));
    }
}
