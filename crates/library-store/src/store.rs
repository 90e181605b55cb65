use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    ActiveLoan, Book, BookId, BorrowRecord, LoanClosure, LoanId, NewLoan, Result, Student,
    StudentId,
};

/// Read access to the book catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Retrieves a book by id.
    async fn get_book(&self, book_id: &BookId) -> Result<Option<Book>>;

    /// Finds lendable books whose title or author contains `keyword`.
    ///
    /// Matching ignores case.
    async fn search_books(&self, keyword: &str) -> Result<Vec<Book>>;

    /// Lists every book, newest first.
    async fn list_books(&self) -> Result<Vec<Book>>;
}

/// Read access to the member registry.
#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Retrieves a student by id.
    async fn get_student(&self, stu_id: &StudentId) -> Result<Option<Student>>;

    /// Returns true if the student has an unpaid fine.
    ///
    /// See [`Student::owes_fine_for`] for the predicate.
    async fn has_unpaid_fine(&self, stu_id: &StudentId) -> Result<bool>;
}

/// Read access to the lending ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Retrieves the open ledger entry for a (student, book) pair.
    async fn get_active_loan(
        &self,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<Option<BorrowRecord>>;

    /// Lists a student's open loans with book details, most recent borrow first.
    async fn list_active_loans(&self, stu_id: &StudentId) -> Result<Vec<ActiveLoan>>;
}

/// A store that can open atomic units of work over all three record sets.
#[async_trait]
pub trait LibraryStore: CatalogStore + MemberStore + LedgerStore {
    /// The unit of work type for this backend.
    type Work: UnitOfWork;

    /// Opens a new unit of work.
    ///
    /// Nothing written through the unit is visible to others until
    /// [`UnitOfWork::commit`]. Dropping the unit without committing rolls back.
    async fn begin(&self) -> Result<Self::Work>;
}

/// An atomic group of reads and writes against the library store.
///
/// `lock_*` reads hold their row until the unit ends. Callers acquire locks
/// in the order student, book, ledger entry so that concurrent units never
/// wait on each other in a cycle.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Reads and locks a student row.
    async fn lock_student(&mut self, stu_id: &StudentId) -> Result<Option<Student>>;

    /// Reads and locks a book row.
    async fn lock_book(&mut self, book_id: &BookId) -> Result<Option<Book>>;

    /// Reads and locks the open ledger entry for a pair, if there is one.
    async fn lock_open_loan(
        &mut self,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<Option<BorrowRecord>>;

    /// Evaluates the unpaid-fine predicate inside this unit.
    async fn has_unpaid_fine(&mut self, stu_id: &StudentId) -> Result<bool>;

    /// Appends an open ledger entry.
    ///
    /// Fails with `DuplicateOpenLoan` if the pair already has one.
    async fn open_loan(&mut self, loan: NewLoan) -> Result<BorrowRecord>;

    /// Closes an open ledger entry, freezing its overdue flag and fine.
    ///
    /// A positive fine bumps the student's `fined_returns` and is stamped
    /// with the new value as its `fine_seq`. Fails with `LoanNotOpen` if the
    /// entry is missing or already closed.
    async fn close_loan(&mut self, loan_id: LoanId, closure: LoanClosure) -> Result<BorrowRecord>;

    /// Adds `delta` to a book's available copies as one guarded update.
    ///
    /// Fails with `CopyCountOutOfRange` instead of leaving `0..=total_copies`.
    async fn adjust_available_copies(&mut self, book_id: &BookId, delta: i32) -> Result<Book>;

    /// Writes a student's borrowing privilege.
    async fn set_can_borrow(&mut self, stu_id: &StudentId, can_borrow: bool) -> Result<()>;

    /// Records that the student settled every fine recorded so far.
    ///
    /// Copies `fined_returns` into `fines_cleared_through`; `cleared_at` is
    /// kept for display only.
    async fn clear_fines(&mut self, stu_id: &StudentId, cleared_at: DateTime<Utc>) -> Result<()>;

    /// Publishes every write made through this unit.
    async fn commit(self) -> Result<()>;

    /// Discards every write made through this unit.
    async fn rollback(self) -> Result<()>;
}

/// Builds a `LIKE` pattern matching `keyword` anywhere, escaping wildcards.
pub fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
