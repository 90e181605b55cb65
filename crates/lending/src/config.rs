//! Lending rules that vary by deployment.

use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use common::Money;

/// How long a loan runs before it is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanPeriod {
    /// A number of calendar months; the day of month is clamped to the
    /// length of the target month.
    Months(u32),
    /// A fixed length of time.
    Fixed(Duration),
}

impl LoanPeriod {
    /// Returns the due date for a loan starting at `borrowed_at`.
    ///
    /// Returns `None` if the result is out of range.
    pub fn due_from(&self, borrowed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            LoanPeriod::Months(months) => borrowed_at.checked_add_months(Months::new(months)),
            LoanPeriod::Fixed(period) => {
                let period = chrono::Duration::from_std(period).ok()?;
                borrowed_at.checked_add_signed(period)
            }
        }
    }
}

impl Default for LoanPeriod {
    fn default() -> Self {
        LoanPeriod::Months(2)
    }
}

/// Configuration for a [`LendingEngine`](crate::LendingEngine).
#[derive(Debug, Clone)]
pub struct LendingConfig {
    pub loan_period: LoanPeriod,
    /// Fine charged per whole day overdue.
    pub fine_per_day: Money,
    /// Upper bound on one unit of work, lock waits included.
    pub work_timeout: Duration,
}

impl Default for LendingConfig {
    fn default() -> Self {
        Self {
            loan_period: LoanPeriod::default(),
            fine_per_day: Money::from_cents(50),
            work_timeout: Duration::from_secs(5),
        }
    }
}
