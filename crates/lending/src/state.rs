//! Loan and eligibility state machines.

use library_store::{BorrowRecord, Student};
use serde::{Deserialize, Serialize};

/// The lifecycle of a ledger entry.
///
/// State transitions:
/// ```text
/// Open ──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LoanState {
    /// The copy is out with the student.
    #[default]
    Open,

    /// The copy came back; overdue flag and fine are frozen.
    Closed,
}

impl LoanState {
    /// Returns the state of a ledger entry.
    pub fn of(record: &BorrowRecord) -> Self {
        if record.is_open() {
            LoanState::Open
        } else {
            LoanState::Closed
        }
    }

    /// Returns true if the loan can be closed by a return.
    pub fn can_close(&self) -> bool {
        matches!(self, LoanState::Open)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanState::Open => "Open",
            LoanState::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for LoanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A student's borrowing privilege.
///
/// State transitions:
/// ```text
/// Enabled ──► Disabled   (return with a fine)
/// Disabled ──► Enabled   (fine paid)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EligibilityState {
    #[default]
    Enabled,
    Disabled,
}

impl EligibilityState {
    /// Returns the privilege recorded on a student row.
    pub fn of(student: &Student) -> Self {
        if student.can_borrow {
            EligibilityState::Enabled
        } else {
            EligibilityState::Disabled
        }
    }

    /// Returns true if a fined return may disable the student.
    pub fn can_disable(&self) -> bool {
        matches!(self, EligibilityState::Enabled)
    }

    /// Returns true if a fine payment may re-enable the student.
    pub fn can_enable(&self) -> bool {
        matches!(self, EligibilityState::Disabled)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityState::Enabled => "Enabled",
            EligibilityState::Disabled => "Disabled",
        }
    }
}

impl std::fmt::Display for EligibilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{BookId, LoanId, Money, StudentId};

    fn record(returned: bool) -> BorrowRecord {
        let now = Utc::now();
        BorrowRecord {
            id: LoanId::new(7),
            stu_id: StudentId::new("S1").unwrap(),
            book_id: BookId::new("B1").unwrap(),
            borrowed_at: now,
            due_at: now,
            returned_at: returned.then_some(now),
            is_overdue: false,
            fine: Money::zero(),
            fine_seq: None,
            created_at: now,
        }
    }

    #[test]
    fn test_loan_state_of_record() {
        assert_eq!(LoanState::of(&record(false)), LoanState::Open);
        assert_eq!(LoanState::of(&record(true)), LoanState::Closed);
    }

    #[test]
    fn test_only_open_loans_close() {
        assert!(LoanState::Open.can_close());
        assert!(!LoanState::Closed.can_close());
    }

    #[test]
    fn test_eligibility_transitions() {
        assert!(EligibilityState::Enabled.can_disable());
        assert!(!EligibilityState::Enabled.can_enable());
        assert!(EligibilityState::Disabled.can_enable());
        assert!(!EligibilityState::Disabled.can_disable());
    }

    #[test]
    fn test_eligibility_of_student() {
        let mut student = Student::new(StudentId::new("S1").unwrap(), "Ada", "pw", Utc::now());
        assert_eq!(EligibilityState::of(&student), EligibilityState::Enabled);
        student.can_borrow = false;
        assert_eq!(EligibilityState::of(&student), EligibilityState::Disabled);
    }

    #[test]
    fn test_display() {
        assert_eq!(LoanState::Open.to_string(), "Open");
        assert_eq!(EligibilityState::Disabled.to_string(), "Disabled");
    }
}
