//! Overdue fine assessment.

use chrono::{DateTime, Utc};
use common::Money;
use library_store::LoanClosure;

/// Computes the fields frozen onto a loan returned at `returned_at`.
///
/// A loan is overdue when returned strictly after `due_at`. The fine is
/// `fine_per_day` for every whole day past due; a partial day is not charged.
/// A negative rate charges nothing.
pub fn assess(due_at: DateTime<Utc>, returned_at: DateTime<Utc>, fine_per_day: Money) -> LoanClosure {
    let is_overdue = returned_at > due_at;
    let fine = if is_overdue && fine_per_day.is_positive() {
        fine_per_day.multiply(days_overdue(due_at, returned_at))
    } else {
        Money::zero()
    };
    LoanClosure {
        returned_at,
        is_overdue,
        fine,
    }
}

/// Whole days between `due_at` and `returned_at`, never negative.
pub fn days_overdue(due_at: DateTime<Utc>, returned_at: DateTime<Utc>) -> i64 {
    (returned_at - due_at).num_days().max(0)
}
