//! Rows held by the catalog, member registry and lending ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BookId, LoanId, Money, StudentId};

/// A catalog entry together with its copy counters.
///
/// `available_copies` always stays within `0..=total_copies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    pub description: String,
    pub total_copies: i32,
    pub available_copies: i32,
    /// Whether the title may be lent at all.
    pub can_borrow: bool,
    pub created_at: DateTime<Utc>,
}

impl Book {
    /// Creates a lendable book with every copy on the shelf.
    pub fn new(
        book_id: BookId,
        title: impl Into<String>,
        author: impl Into<String>,
        total_copies: i32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            book_id,
            title: title.into(),
            author: author.into(),
            description: String::new(),
            total_copies,
            available_copies: total_copies,
            can_borrow: true,
            created_at,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns true if a copy can be handed out right now.
    pub fn is_available(&self) -> bool {
        self.can_borrow && self.available_copies > 0
    }

    /// Returns true if `keyword` occurs in the title or the author, ignoring case.
    pub fn matches(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.title.to_lowercase().contains(&keyword)
            || self.author.to_lowercase().contains(&keyword)
    }

    /// Returns the copy count after applying `delta`, if it stays in range.
    pub fn adjusted_copies(&self, delta: i32) -> Option<i32> {
        self.available_copies
            .checked_add(delta)
            .filter(|copies| (0..=self.total_copies).contains(copies))
    }
}

/// A member of the library.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub stu_id: StudentId,
    pub name: String,
    /// Plain credential compared at login.
    #[serde(skip_serializing)]
    pub password: String,
    pub trust: f64,
    /// Borrowing privilege, the only gate the lending engine flips.
    pub can_borrow: bool,
    /// Number of fined returns recorded for this student.
    pub fined_returns: i64,
    /// Value of `fined_returns` at the last fine payment.
    pub fines_cleared_through: i64,
    /// When the student last settled their fines.
    pub fines_cleared_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Student {
    /// Creates an enabled student with full trust.
    pub fn new(
        stu_id: StudentId,
        name: impl Into<String>,
        password: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stu_id,
            name: name.into(),
            password: password.into(),
            trust: 100.0,
            can_borrow: true,
            fined_returns: 0,
            fines_cleared_through: 0,
            fines_cleared_at: None,
            created_at,
        }
    }

    /// Returns true if the given ledger entry still counts as an unpaid fine.
    ///
    /// An entry qualifies when it is overdue with a positive fine and its
    /// fined-return number is past the one the student last paid through.
    /// Clock readings play no part, so two operations at the same instant
    /// cannot hide a fine.
    pub fn owes_fine_for(&self, record: &BorrowRecord) -> bool {
        record.stu_id == self.stu_id
            && record.is_overdue
            && record.fine.is_positive()
            && record
                .fine_seq
                .is_some_and(|seq| seq > self.fines_cleared_through)
    }
}

/// One ledger entry: a single borrow-to-return lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRecord {
    pub id: LoanId,
    pub stu_id: StudentId,
    pub book_id: BookId,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    /// Absent while the loan is open.
    pub returned_at: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    pub fine: Money,
    /// The student's fined-return number, set when a positive fine is frozen.
    #[serde(default)]
    pub fine_seq: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl BorrowRecord {
    /// Returns true while no return has been recorded.
    pub fn is_open(&self) -> bool {
        self.returned_at.is_none()
    }
}

/// Values for a new open ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoan {
    pub stu_id: StudentId,
    pub book_id: BookId,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

/// The fields frozen onto a ledger entry when it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanClosure {
    pub returned_at: DateTime<Utc>,
    pub is_overdue: bool,
    pub fine: Money,
}

/// An open loan joined with the title and author of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLoan {
    #[serde(flatten)]
    pub record: BorrowRecord,
    pub book_title: String,
    pub book_author: String,
}
