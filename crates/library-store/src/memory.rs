use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    ActiveLoan, Book, BookId, BorrowRecord, LoanClosure, LoanId, Money, NewLoan, Result, Student,
    StoreError, StudentId,
    store::{CatalogStore, LedgerStore, LibraryStore, MemberStore, UnitOfWork},
};

/// Operations of an [`InMemoryUnitOfWork`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    OpenLoan,
    CloseLoan,
    AdjustCopies,
    SetCanBorrow,
    ClearFines,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct LibraryState {
    students: BTreeMap<StudentId, Student>,
    books: BTreeMap<BookId, Book>,
    loans: BTreeMap<LoanId, BorrowRecord>,
    last_loan_id: LoanId,
}

impl LibraryState {
    fn open_loan_for(&self, stu_id: &StudentId, book_id: &BookId) -> Option<&BorrowRecord> {
        self.loans
            .values()
            .find(|r| r.is_open() && &r.stu_id == stu_id && &r.book_id == book_id)
    }

    fn has_unpaid_fine(&self, stu_id: &StudentId) -> bool {
        let Some(student) = self.students.get(stu_id) else {
            return false;
        };
        self.loans.values().any(|r| student.owes_fine_for(r))
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_point: Option<FailPoint>,
    commit_delay: Option<Duration>,
}

/// In-memory library store for testing and local runs.
///
/// A unit of work holds an exclusive lock over the whole store and works on a
/// staged copy, so units are fully serialized and a dropped unit leaves no
/// trace.
#[derive(Clone, Default)]
pub struct InMemoryLibraryStore {
    state: Arc<Mutex<LibraryState>>,
    faults: Arc<RwLock<Faults>>,
}

impl InMemoryLibraryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a student row.
    pub async fn insert_student(&self, student: Student) {
        let mut state = self.state.lock().await;
        state.students.insert(student.stu_id.clone(), student);
    }

    /// Adds or replaces a book row.
    pub async fn insert_book(&self, book: Book) {
        let mut state = self.state.lock().await;
        state.books.insert(book.book_id.clone(), book);
    }

    /// Makes the given unit-of-work operation fail until cleared.
    pub fn set_fail_point(&self, fail_point: Option<FailPoint>) {
        self.faults.write().unwrap().fail_point = fail_point;
    }

    /// Delays every commit by `delay`.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        self.faults.write().unwrap().commit_delay = delay;
    }

    /// Returns every ledger entry, oldest first.
    pub async fn all_loans(&self) -> Vec<BorrowRecord> {
        self.state.lock().await.loans.values().cloned().collect()
    }
}

#[async_trait]
impl CatalogStore for InMemoryLibraryStore {
    async fn get_book(&self, book_id: &BookId) -> Result<Option<Book>> {
        Ok(self.state.lock().await.books.get(book_id).cloned())
    }

    async fn search_books(&self, keyword: &str) -> Result<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<_> = state
            .books
            .values()
            .filter(|b| b.can_borrow && b.matches(keyword))
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(books)
    }

    async fn list_books(&self) -> Result<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<_> = state.books.values().cloned().collect();
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(books)
    }
}

#[async_trait]
impl MemberStore for InMemoryLibraryStore {
    async fn get_student(&self, stu_id: &StudentId) -> Result<Option<Student>> {
        Ok(self.state.lock().await.students.get(stu_id).cloned())
    }

    async fn has_unpaid_fine(&self, stu_id: &StudentId) -> Result<bool> {
        Ok(self.state.lock().await.has_unpaid_fine(stu_id))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLibraryStore {
    async fn get_active_loan(
        &self,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<Option<BorrowRecord>> {
        let state = self.state.lock().await;
        Ok(state.open_loan_for(stu_id, book_id).cloned())
    }

    async fn list_active_loans(&self, stu_id: &StudentId) -> Result<Vec<ActiveLoan>> {
        let state = self.state.lock().await;
        let mut loans: Vec<ActiveLoan> = state
            .loans
            .values()
            .filter(|r| r.is_open() && &r.stu_id == stu_id)
            .map(|r| {
                let book = state.books.get(&r.book_id);
                ActiveLoan {
                    record: r.clone(),
                    book_title: book.map(|b| b.title.clone()).unwrap_or_default(),
                    book_author: book.map(|b| b.author.clone()).unwrap_or_default(),
                }
            })
            .collect();
        loans.sort_by(|a, b| {
            b.record
                .borrowed_at
                .cmp(&a.record.borrowed_at)
                .then(b.record.id.cmp(&a.record.id))
        });
        Ok(loans)
    }
}

#[async_trait]
impl LibraryStore for InMemoryLibraryStore {
    type Work = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryUnitOfWork {
            guard,
            staged,
            faults: self.faults.clone(),
        })
    }
}

/// Unit of work over an [`InMemoryLibraryStore`].
pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<LibraryState>,
    staged: LibraryState,
    faults: Arc<RwLock<Faults>>,
}

impl InMemoryUnitOfWork {
    fn check(&self, point: FailPoint) -> Result<()> {
        if self.faults.read().unwrap().fail_point == Some(point) {
            return Err(StoreError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn lock_student(&mut self, stu_id: &StudentId) -> Result<Option<Student>> {
        Ok(self.staged.students.get(stu_id).cloned())
    }

    async fn lock_book(&mut self, book_id: &BookId) -> Result<Option<Book>> {
        Ok(self.staged.books.get(book_id).cloned())
    }

    async fn lock_open_loan(
        &mut self,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<Option<BorrowRecord>> {
        Ok(self.staged.open_loan_for(stu_id, book_id).cloned())
    }

    async fn has_unpaid_fine(&mut self, stu_id: &StudentId) -> Result<bool> {
        Ok(self.staged.has_unpaid_fine(stu_id))
    }

    async fn open_loan(&mut self, loan: NewLoan) -> Result<BorrowRecord> {
        self.check(FailPoint::OpenLoan)?;

        if self.staged.open_loan_for(&loan.stu_id, &loan.book_id).is_some() {
            return Err(StoreError::DuplicateOpenLoan {
                student_id: loan.stu_id,
                book_id: loan.book_id,
            });
        }

        self.staged.last_loan_id = self.staged.last_loan_id.next();
        let record = BorrowRecord {
            id: self.staged.last_loan_id,
            stu_id: loan.stu_id,
            book_id: loan.book_id,
            borrowed_at: loan.borrowed_at,
            due_at: loan.due_at,
            returned_at: None,
            is_overdue: false,
            fine: Money::zero(),
            fine_seq: None,
            created_at: loan.borrowed_at,
        };
        self.staged.loans.insert(record.id, record.clone());
        Ok(record)
    }

    async fn close_loan(&mut self, loan_id: LoanId, closure: LoanClosure) -> Result<BorrowRecord> {
        self.check(FailPoint::CloseLoan)?;

        let staged = &mut self.staged;
        let record = staged
            .loans
            .get_mut(&loan_id)
            .filter(|r| r.is_open())
            .ok_or(StoreError::LoanNotOpen(loan_id))?;
        let fine_seq = if closure.fine.is_positive() {
            let student = staged
                .students
                .get_mut(&record.stu_id)
                .ok_or_else(|| StoreError::StudentNotFound(record.stu_id.clone()))?;
            student.fined_returns += 1;
            Some(student.fined_returns)
        } else {
            None
        };
        record.returned_at = Some(closure.returned_at);
        record.is_overdue = closure.is_overdue;
        record.fine = closure.fine;
        record.fine_seq = fine_seq;
        Ok(record.clone())
    }

    async fn adjust_available_copies(&mut self, book_id: &BookId, delta: i32) -> Result<Book> {
        self.check(FailPoint::AdjustCopies)?;

        let book = self
            .staged
            .books
            .get_mut(book_id)
            .ok_or_else(|| StoreError::BookNotFound(book_id.clone()))?;
        book.available_copies =
            book.adjusted_copies(delta)
                .ok_or_else(|| StoreError::CopyCountOutOfRange {
                    book_id: book_id.clone(),
                    delta,
                })?;
        Ok(book.clone())
    }

    async fn set_can_borrow(&mut self, stu_id: &StudentId, can_borrow: bool) -> Result<()> {
        self.check(FailPoint::SetCanBorrow)?;

        let student = self
            .staged
            .students
            .get_mut(stu_id)
            .ok_or_else(|| StoreError::StudentNotFound(stu_id.clone()))?;
        student.can_borrow = can_borrow;
        Ok(())
    }

    async fn clear_fines(&mut self, stu_id: &StudentId, cleared_at: DateTime<Utc>) -> Result<()> {
        self.check(FailPoint::ClearFines)?;

        let student = self
            .staged
            .students
            .get_mut(stu_id)
            .ok_or_else(|| StoreError::StudentNotFound(stu_id.clone()))?;
        student.fines_cleared_through = student.fined_returns;
        student.fines_cleared_at = Some(cleared_at);
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let delay = self.faults.read().unwrap().commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(FailPoint::Commit)?;

        *self.guard = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
