//! Shared types for the library lending system.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{BookId, InvalidId, LoanId, StudentId};
