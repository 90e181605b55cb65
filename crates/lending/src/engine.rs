//! The lending engine: borrow, return and fine-payment workflows.

use std::future::Future;
use std::time::Instant;

use common::{BookId, Money, StudentId};
use library_store::{
    ActiveLoan, Book, BorrowRecord, LibraryStore, NewLoan, StoreError, Student, UnitOfWork,
};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::LendingConfig;
use crate::error::{LendingError, Result};
use crate::fine;
use crate::state::{EligibilityState, LoanState};

/// Outcome of a successful return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnReceipt {
    /// The closed ledger entry.
    pub record: BorrowRecord,
    /// Fine assessed at return, zero if none.
    pub fine: Money,
}

/// Whether a student may borrow right now, and why not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub can_borrow: bool,
    /// Reason code of the first failed check, if any.
    pub reason: Option<&'static str>,
}

impl Eligibility {
    fn allowed() -> Self {
        Self {
            can_borrow: true,
            reason: None,
        }
    }

    fn denied(reason: &'static str) -> Self {
        Self {
            can_borrow: false,
            reason: Some(reason),
        }
    }
}

/// Runs the lending workflows against a [`LibraryStore`].
///
/// Every workflow is one unit of work: all of its writes commit together or
/// none do. Row locks are taken in the order student, book, ledger entry.
pub struct LendingEngine<S, C> {
    store: S,
    config: LendingConfig,
    clock: C,
}

impl<S, C> LendingEngine<S, C>
where
    S: LibraryStore,
    C: Clock,
{
    /// Creates a new lending engine.
    pub fn new(store: S, config: LendingConfig, clock: C) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Lends one copy of a book to a student.
    ///
    /// Checks, in order: the student is enabled, owes no fine, the book is
    /// available, and the student does not already hold it. A student holding
    /// the last copy who asks again therefore gets `book_unavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn borrow(&self, stu_id: &StudentId, book_id: &BookId) -> Result<BorrowRecord> {
        let record = self
            .run("borrow", async {
                let mut work = self.store.begin().await?;
                let outcome = self.borrow_in(&mut work, stu_id, book_id).await;
                finish(work, outcome).await
            })
            .await?;

        metrics::counter!("lending_borrows_total").increment(1);
        tracing::info!(loan_id = %record.id, due_at = %record.due_at, "book borrowed");
        Ok(record)
    }

    async fn borrow_in(
        &self,
        work: &mut S::Work,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<BorrowRecord> {
        let student = work
            .lock_student(stu_id)
            .await?
            .ok_or_else(|| LendingError::StudentNotFound(stu_id.clone()))?;
        if EligibilityState::of(&student) == EligibilityState::Disabled {
            return Err(LendingError::IneligibleDisabled(stu_id.clone()));
        }
        if work.has_unpaid_fine(stu_id).await? {
            return Err(LendingError::UnpaidFine(stu_id.clone()));
        }

        let book = work
            .lock_book(book_id)
            .await?
            .ok_or_else(|| LendingError::BookNotFound(book_id.clone()))?;
        if !book.is_available() {
            return Err(LendingError::BookUnavailable(book_id.clone()));
        }

        if work.lock_open_loan(stu_id, book_id).await?.is_some() {
            return Err(already_borrowed(stu_id, book_id));
        }

        let borrowed_at = self.clock.now();
        let due_at = self
            .config
            .loan_period
            .due_from(borrowed_at)
            .ok_or(LendingError::InvalidLoanPeriod)?;

        let record = work
            .open_loan(NewLoan {
                stu_id: stu_id.clone(),
                book_id: book_id.clone(),
                borrowed_at,
                due_at,
            })
            .await
            .map_err(|e| match e {
                StoreError::DuplicateOpenLoan { .. } => already_borrowed(stu_id, book_id),
                e => e.into(),
            })?;

        work.adjust_available_copies(book_id, -1)
            .await
            .map_err(|e| match e {
                StoreError::CopyCountOutOfRange { .. } => {
                    LendingError::BookUnavailable(book_id.clone())
                }
                e => e.into(),
            })?;

        Ok(record)
    }

    /// Takes back a borrowed copy, assessing any overdue fine.
    ///
    /// A positive fine disables the student until it is paid.
    #[tracing::instrument(skip(self))]
    pub async fn return_book(&self, stu_id: &StudentId, book_id: &BookId) -> Result<ReturnReceipt> {
        let receipt = self
            .run("return", async {
                let mut work = self.store.begin().await?;
                let outcome = self.return_in(&mut work, stu_id, book_id).await;
                finish(work, outcome).await
            })
            .await?;

        metrics::counter!("lending_returns_total").increment(1);
        if receipt.fine.is_positive() {
            metrics::counter!("lending_fines_assessed_cents")
                .increment(receipt.fine.cents().unsigned_abs());
        }
        tracing::info!(
            loan_id = %receipt.record.id,
            overdue = receipt.record.is_overdue,
            fine = %receipt.fine,
            "book returned"
        );
        Ok(receipt)
    }

    async fn return_in(
        &self,
        work: &mut S::Work,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<ReturnReceipt> {
        let student = work
            .lock_student(stu_id)
            .await?
            .ok_or_else(|| LendingError::StudentNotFound(stu_id.clone()))?;
        work.lock_book(book_id)
            .await?
            .ok_or_else(|| LendingError::BookNotFound(book_id.clone()))?;
        let loan = work
            .lock_open_loan(stu_id, book_id)
            .await?
            .filter(|loan| LoanState::of(loan).can_close())
            .ok_or_else(|| no_active_loan(stu_id, book_id))?;

        let closure = fine::assess(loan.due_at, self.clock.now(), self.config.fine_per_day);
        let record = work
            .close_loan(loan.id, closure)
            .await
            .map_err(|e| match e {
                StoreError::LoanNotOpen(_) => no_active_loan(stu_id, book_id),
                e => e.into(),
            })?;
        work.adjust_available_copies(book_id, 1).await?;

        if closure.fine.is_positive() && EligibilityState::of(&student).can_disable() {
            work.set_can_borrow(stu_id, false).await?;
        }

        Ok(ReturnReceipt {
            record,
            fine: closure.fine,
        })
    }

    /// Settles a student's outstanding fines and restores borrowing.
    ///
    /// Ledger entries are left untouched; the payment is recorded on the
    /// student row.
    #[tracing::instrument(skip(self))]
    pub async fn pay_fine(&self, stu_id: &StudentId) -> Result<()> {
        self.run("pay_fine", async {
            let mut work = self.store.begin().await?;
            let outcome = self.pay_fine_in(&mut work, stu_id).await;
            finish(work, outcome).await
        })
        .await?;

        metrics::counter!("lending_fine_payments_total").increment(1);
        tracing::info!("fine paid");
        Ok(())
    }

    async fn pay_fine_in(&self, work: &mut S::Work, stu_id: &StudentId) -> Result<()> {
        let student = work
            .lock_student(stu_id)
            .await?
            .ok_or_else(|| LendingError::StudentNotFound(stu_id.clone()))?;
        if !work.has_unpaid_fine(stu_id).await? {
            return Err(LendingError::NothingToPay(stu_id.clone()));
        }

        if EligibilityState::of(&student).can_enable() {
            work.set_can_borrow(stu_id, true).await?;
        }
        work.clear_fines(stu_id, self.clock.now()).await?;
        Ok(())
    }

    /// Returns the open loan of a book by a student.
    #[tracing::instrument(skip(self))]
    pub async fn get_active_loan(
        &self,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<BorrowRecord> {
        self.store
            .get_active_loan(stu_id, book_id)
            .await?
            .ok_or_else(|| LendingError::LoanNotFound {
                stu_id: stu_id.clone(),
                book_id: book_id.clone(),
            })
    }

    /// Lists a student's open loans with book details, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_active_loans(&self, stu_id: &StudentId) -> Result<Vec<ActiveLoan>> {
        self.get_student(stu_id).await?;
        Ok(self.store.list_active_loans(stu_id).await?)
    }

    /// Reports whether the student would pass the borrower checks.
    #[tracing::instrument(skip(self))]
    pub async fn eligibility(&self, stu_id: &StudentId) -> Result<Eligibility> {
        let student = self.get_student(stu_id).await?;
        self.eligibility_of(&student).await
    }

    async fn eligibility_of(&self, student: &Student) -> Result<Eligibility> {
        if EligibilityState::of(student) == EligibilityState::Disabled {
            return Ok(Eligibility::denied("ineligible_disabled"));
        }
        if self.store.has_unpaid_fine(&student.stu_id).await? {
            return Ok(Eligibility::denied("unpaid_fine"));
        }
        Ok(Eligibility::allowed())
    }

    /// Checks a student's credentials.
    ///
    /// Unknown students and wrong passwords fail the same way.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        stu_id: &StudentId,
        password: &str,
    ) -> Result<(Student, Eligibility)> {
        let student = self
            .store
            .get_student(stu_id)
            .await?
            .filter(|s| s.password == password)
            .ok_or(LendingError::InvalidCredentials)?;
        let eligibility = self.eligibility_of(&student).await?;
        Ok((student, eligibility))
    }

    /// Retrieves a student profile.
    pub async fn get_student(&self, stu_id: &StudentId) -> Result<Student> {
        self.store
            .get_student(stu_id)
            .await?
            .ok_or_else(|| LendingError::StudentNotFound(stu_id.clone()))
    }

    /// Retrieves a book.
    pub async fn get_book(&self, book_id: &BookId) -> Result<Book> {
        self.store
            .get_book(book_id)
            .await?
            .ok_or_else(|| LendingError::BookNotFound(book_id.clone()))
    }

    /// Finds lendable books whose title or author contains `keyword`.
    #[tracing::instrument(skip(self))]
    pub async fn search_books(&self, keyword: &str) -> Result<Vec<Book>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(LendingError::Validation(
                "keyword must not be empty".to_string(),
            ));
        }
        Ok(self.store.search_books(keyword).await?)
    }

    /// Lists the whole catalog, newest first.
    pub async fn list_books(&self) -> Result<Vec<Book>> {
        Ok(self.store.list_books().await?)
    }

    /// Runs one workflow under the configured timeout, recording its outcome.
    ///
    /// On timeout the future is dropped, which rolls back its unit of work.
    async fn run<T, F>(&self, workflow: &'static str, unit: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let timeout = self.config.work_timeout;
        let outcome = match tokio::time::timeout(timeout, unit).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LendingError::Timeout(timeout)),
        };

        metrics::histogram!("lending_workflow_duration_seconds", "workflow" => workflow)
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &outcome {
            if e.is_internal() {
                tracing::error!(workflow, error = %e, "workflow failed");
            } else {
                metrics::counter!("lending_rejections_total", "reason" => e.reason()).increment(1);
                tracing::warn!(workflow, reason = e.reason(), "workflow rejected");
            }
        }
        outcome
    }
}

/// Commits on success, otherwise rolls back and keeps the original error.
async fn finish<W: UnitOfWork, T>(work: W, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            work.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = work.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

fn already_borrowed(stu_id: &StudentId, book_id: &BookId) -> LendingError {
    LendingError::AlreadyBorrowed {
        stu_id: stu_id.clone(),
        book_id: book_id.clone(),
    }
}

fn no_active_loan(stu_id: &StudentId, book_id: &BookId) -> LendingError {
    LendingError::NoActiveLoan {
        stu_id: stu_id.clone(),
        book_id: book_id.clone(),
    }
}
