//! Lending engine for the student library.
//!
//! This crate runs the three workflows that move a (student, book) pair
//! through its lifecycle:
//! 1. Borrow a copy
//! 2. Return it, assessing any overdue fine
//! 3. Pay the fine to restore borrowing
//!
//! Each workflow is a single unit of work over a [`library_store::LibraryStore`].

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fine;
pub mod state;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{LendingConfig, LoanPeriod};
pub use engine::{Eligibility, LendingEngine, ReturnReceipt};
pub use error::{LendingError, Result};
pub use state::{EligibilityState, LoanState};
