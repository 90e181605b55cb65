//! Storage layer for the library lending system.
//!
//! Read access to the catalog, the member registry and the lending ledger
//! goes through [`CatalogStore`], [`MemberStore`] and [`LedgerStore`].
//! Every mutation goes through a [`UnitOfWork`] obtained from
//! [`LibraryStore::begin`], which commits or rolls back as one.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{BookId, LoanId, Money, StudentId};
pub use error::{Result, StoreError};
pub use memory::{FailPoint, InMemoryLibraryStore, InMemoryUnitOfWork};
pub use postgres::{PostgresLibraryStore, PostgresUnitOfWork};
pub use record::{ActiveLoan, Book, BorrowRecord, LoanClosure, NewLoan, Student};
pub use store::{CatalogStore, LedgerStore, LibraryStore, MemberStore, UnitOfWork, like_pattern};
