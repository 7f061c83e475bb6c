//! Network fetch outcome

use crate::SyncError;

/// Outcome of one conditional fetch
///
/// 304 and recoverable failures are ordinary variants, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    /// Server returned a new payload
    Success(T),
    /// Server confirmed the cached copy is still valid
    NotModified,
    /// The fetch failed
    Failure(SyncError),
}

/// Payload-free label of a [`FetchOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    NotModified,
    Failure,
    Offline,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::NotModified => "not_modified",
            OutcomeKind::Failure => "failure",
            OutcomeKind::Offline => "offline",
        }
    }
}

impl<T> FetchOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            FetchOutcome::Success(_) => OutcomeKind::Success,
            FetchOutcome::NotModified => OutcomeKind::NotModified,
            FetchOutcome::Failure(SyncError::Offline) => OutcomeKind::Offline,
            FetchOutcome::Failure(_) => OutcomeKind::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn is_not_modified(&self) -> bool {
        matches!(self, FetchOutcome::NotModified)
    }

    /// The failure, if any
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            FetchOutcome::Failure(err) => Some(err),
            _ => None,
        }
    }

    /// Map the success payload
    pub fn map<U, F>(self, f: F) -> FetchOutcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            FetchOutcome::Success(value) => FetchOutcome::Success(f(value)),
            FetchOutcome::NotModified => FetchOutcome::NotModified,
            FetchOutcome::Failure(err) => FetchOutcome::Failure(err),
        }
    }
}

impl<T> From<crate::Result<T>> for FetchOutcome<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => FetchOutcome::Success(value),
            Err(err) => FetchOutcome::Failure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(FetchOutcome::Success(1).kind(), OutcomeKind::Success);
        assert_eq!(FetchOutcome::<i32>::NotModified.kind().as_str(), "not_modified");
        assert_eq!(
            FetchOutcome::<i32>::Failure(SyncError::Offline).kind(),
            OutcomeKind::Offline
        );
        assert_eq!(
            FetchOutcome::<i32>::Failure(SyncError::Timeout).kind(),
            OutcomeKind::Failure
        );
    }

    #[test]
    fn test_map_and_from_result() {
        let outcome: FetchOutcome<i32> = Ok(21).into();
        assert_eq!(outcome.map(|v| v * 2), FetchOutcome::Success(42));

        let outcome: FetchOutcome<i32> = Err(SyncError::Cancelled).into();
        assert_eq!(outcome.error(), Some(&SyncError::Cancelled));
    }
}
