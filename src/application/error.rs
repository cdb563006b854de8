use thiserror::Error;

use crate::{
    application::repos::RepoError,
    cache::{CacheError, LockError},
    domain::error::DomainError,
    infra::error::InfraError,
    resilience::BreakerError,
};

/// Coarse classification of [`AppError`] for outer layers mapping to
/// transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Forbidden,
    Degraded,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Degraded => "degraded",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("service degraded: {breaker} breaker rejected the call")]
    Degraded { breaker: &'static str },
    #[error("lock `{key}` still contended after {attempts} attempts")]
    LockContention { key: String, attempts: u32 },
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Repo(RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("job queue failure: {0}")]
    Queue(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::Degraded { .. } => ErrorKind::Degraded,
            AppError::LockContention { .. } => ErrorKind::Conflict,
            AppError::Repo(RepoError::Duplicate { .. }) => ErrorKind::Conflict,
            AppError::Repo(RepoError::InvalidInput { .. }) => ErrorKind::Validation,
            AppError::Repo(RepoError::Timeout) => ErrorKind::Degraded,
            AppError::Invariant(_)
            | AppError::Repo(_)
            | AppError::Cache(_)
            | AppError::Queue(_)
            | AppError::Unexpected(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same request may succeed if the caller tries again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Degraded { .. }
                | AppError::LockContention { .. }
                | AppError::Repo(RepoError::Timeout)
        )
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, AppError::Degraded { .. })
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { entity } => AppError::NotFound { entity },
            DomainError::Validation { message } => AppError::Validation(message),
            DomainError::Invariant { message } => AppError::Invariant(message),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => AppError::NotFound { entity: "post" },
            other => AppError::Repo(other),
        }
    }
}

impl<E> From<BreakerError<E>> for AppError
where
    AppError: From<E>,
{
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open(breaker) | BreakerError::TooManyRequests(breaker) => {
                AppError::Degraded { breaker }
            }
            BreakerError::Inner(inner) => AppError::from(inner),
        }
    }
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Contention { key, attempts } => AppError::LockContention { key, attempts },
            LockError::Cache(err) => AppError::Cache(err),
        }
    }
}

impl From<InfraError> for AppError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Database { message } => AppError::Repo(RepoError::Persistence(message)),
            InfraError::Cache { message } => AppError::Cache(CacheError::Unavailable(message)),
            InfraError::Queue { message } => AppError::Queue(message),
            other => AppError::Unexpected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_rejections_surface_as_degraded() {
        let err: AppError = BreakerError::<RepoError>::Open("source").into();
        assert!(matches!(err, AppError::Degraded { breaker: "source" }));
        assert_eq!(err.kind(), ErrorKind::Degraded);
        assert!(err.is_retryable());
    }

    #[test]
    fn repo_not_found_maps_to_not_found() {
        let err: AppError = BreakerError::Inner(RepoError::NotFound).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_retryable());
    }

    #[test]
    fn lock_contention_is_a_retryable_conflict() {
        let err: AppError = LockError::Contention {
            key: "post:post_lock:1".into(),
            attempts: 10,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn infra_failures_keep_their_layer() {
        let err: AppError = InfraError::database("connection refused").into();
        assert!(matches!(err, AppError::Repo(RepoError::Persistence(_))));
        let err: AppError = InfraError::configuration("database url is not configured").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn domain_validation_is_not_retryable() {
        let err: AppError = DomainError::validation("title must not be blank").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
    }
}
