use thiserror::Error;

use crate::{BookId, LoanId, StudentId};

/// Errors that can occur when interacting with the library store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The book row does not exist.
    #[error("Book not found: {0}")]
    BookNotFound(BookId),

    /// The student row does not exist.
    #[error("Student not found: {0}")]
    StudentNotFound(StudentId),

    /// The ledger entry does not exist or has already been closed.
    #[error("Loan {0} is not open")]
    LoanNotOpen(LoanId),

    /// The guarded copy adjustment would leave `0..=total_copies`.
    #[error("Adjusting available copies of book {book_id} by {delta} leaves the valid range")]
    CopyCountOutOfRange { book_id: BookId, delta: i32 },

    /// A second open ledger entry for the same (student, book) pair was rejected.
    #[error("Student {student_id} already has an open loan for book {book_id}")]
    DuplicateOpenLoan {
        student_id: StudentId,
        book_id: BookId,
    },

    /// The backend refused the operation (used by the in-memory fail points).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
