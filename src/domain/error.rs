use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("domain invariant violated: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}

pub const MAX_PAGE_SIZE: i64 = 100;

/// Validated `(page, page_size)` pair for preview listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    page: i64,
    page_size: i64,
}

impl Paging {
    pub fn new(page: i64, page_size: i64) -> Result<Self, DomainError> {
        if page < 0 {
            return Err(DomainError::validation("page must not be negative"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(DomainError::validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        self.page.saturating_mul(self.page_size)
    }

    /// Inclusive stop rank for sorted-set range reads.
    pub fn stop(&self) -> i64 {
        self.offset().saturating_add(self.page_size - 1)
    }
}

/// Title must be present and bounded.
pub fn validate_title(title: &str) -> Result<(), DomainError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("title must not be empty"));
    }
    if trimmed.chars().count() > 200 {
        return Err(DomainError::validation(
            "title must be at most 200 characters",
        ));
    }
    Ok(())
}
