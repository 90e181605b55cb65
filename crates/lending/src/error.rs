//! Lending error types.

use std::time::Duration;

use common::{BookId, InvalidId, StudentId};
use library_store::StoreError;
use thiserror::Error;

/// Errors that can occur during lending operations.
#[derive(Debug, Error)]
pub enum LendingError {
    /// Input was rejected before touching the store.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Student not found.
    #[error("Student not found: {0}")]
    StudentNotFound(StudentId),

    /// Book not found.
    #[error("Book not found: {0}")]
    BookNotFound(BookId),

    /// No open loan exists for the pair.
    #[error("No active loan of book {book_id} for student {stu_id}")]
    LoanNotFound { stu_id: StudentId, book_id: BookId },

    /// The student's borrowing privilege is disabled.
    #[error("Borrowing is disabled for student {0}")]
    IneligibleDisabled(StudentId),

    /// The student must pay an outstanding fine first.
    #[error("Student {0} has an unpaid fine, pay it first")]
    UnpaidFine(StudentId),

    /// The book is not lendable or has no copy on the shelf.
    #[error("Book {0} is not available")]
    BookUnavailable(BookId),

    /// The student already holds an open loan of this book.
    #[error("Student {stu_id} has already borrowed book {book_id}")]
    AlreadyBorrowed { stu_id: StudentId, book_id: BookId },

    /// A return was requested for a pair without an open loan.
    #[error("Student {stu_id} has no active loan of book {book_id}")]
    NoActiveLoan { stu_id: StudentId, book_id: BookId },

    /// A fine payment was requested but nothing is owed.
    #[error("Student {0} has no unpaid fine")]
    NothingToPay(StudentId),

    /// Unknown student or wrong password.
    #[error("Invalid student id or password")]
    InvalidCredentials,

    /// The configured loan period yields no representable due date.
    #[error("Loan period is out of range")]
    InvalidLoanPeriod,

    /// The unit of work did not finish in time and was rolled back.
    #[error("Unit of work timed out after {0:?}")]
    Timeout(Duration),

    /// Library store error.
    #[error("Library store error: {0}")]
    Store(#[from] StoreError),
}

impl From<InvalidId> for LendingError {
    fn from(e: InvalidId) -> Self {
        LendingError::Validation(e.to_string())
    }
}

impl LendingError {
    /// Returns a stable snake_case code for the outcome.
    pub fn reason(&self) -> &'static str {
        match self {
            LendingError::Validation(_) => "validation",
            LendingError::StudentNotFound(_)
            | LendingError::BookNotFound(_)
            | LendingError::LoanNotFound { .. } => "not_found",
            LendingError::IneligibleDisabled(_) => "ineligible_disabled",
            LendingError::UnpaidFine(_) => "unpaid_fine",
            LendingError::BookUnavailable(_) => "book_unavailable",
            LendingError::AlreadyBorrowed { .. } => "already_borrowed",
            LendingError::NoActiveLoan { .. } => "no_active_loan",
            LendingError::NothingToPay(_) => "nothing_to_pay",
            LendingError::InvalidCredentials => "invalid_credentials",
            LendingError::Timeout(_) => "timeout",
            LendingError::InvalidLoanPeriod | LendingError::Store(_) => "internal",
        }
    }

    /// Returns true for failures of the system rather than of the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            LendingError::Timeout(_) | LendingError::InvalidLoanPeriod | LendingError::Store(_)
        )
    }
}

/// Convenience type alias for lending results.
pub type Result<T> = std::result::Result<T, LendingError>;
