//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency and run
//! serially because each one truncates the tables.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use library_store::{
    Book, BookId, CatalogStore, LedgerStore, LibraryStore, LoanClosure, MemberStore, Money,
    NewLoan, PostgresLibraryStore, StoreError, Student, StudentId, UnitOfWork,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_library_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool, cleared tables and a small catalog
async fn get_test_store() -> PostgresLibraryStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE borrow_records, books, students RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    let store = PostgresLibraryStore::new(pool, Duration::from_secs(2));
    store
        .insert_student(&Student::new(sid("S1"), "Ada", "pw", Utc::now()))
        .await
        .unwrap();
    store
        .insert_book(
            &Book::new(bid("B1"), "Dune", "Frank Herbert", 1, Utc::now())
                .with_description("Desert planet"),
        )
        .await
        .unwrap();
    store
        .insert_book(&Book::new(bid("B2"), "100% Rust", "Jane_Doe", 3, Utc::now()))
        .await
        .unwrap();
    store
}

fn sid(id: &str) -> StudentId {
    StudentId::new(id).unwrap()
}

fn bid(id: &str) -> BookId {
    BookId::new(id).unwrap()
}

fn new_loan(stu: &str, book: &str) -> NewLoan {
    let now = Utc::now();
    NewLoan {
        stu_id: sid(stu),
        book_id: bid(book),
        borrowed_at: now,
        due_at: now + chrono::Duration::days(60),
    }
}

#[tokio::test]
#[serial]
async fn read_seeded_rows() {
    let store = get_test_store().await;

    let student = store.get_student(&sid("S1")).await.unwrap().unwrap();
    assert_eq!(student.name, "Ada");
    assert!(student.can_borrow);
    assert!(student.fines_cleared_at.is_none());
    assert_eq!(student.fined_returns, 0);
    assert_eq!(student.fines_cleared_through, 0);

    let book = store.get_book(&bid("B1")).await.unwrap().unwrap();
    assert_eq!(book.description, "Desert planet");
    assert_eq!(book.available_copies, 1);

    assert!(store.get_book(&bid("missing")).await.unwrap().is_none());
    assert_eq!(store.list_books().await.unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn search_escapes_like_wildcards() {
    let store = get_test_store().await;

    let found = store.search_books("herbert").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].book_id, bid("B1"));

    let found = store.search_books("100%").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].book_id, bid("B2"));

    // `_` must not match an arbitrary character
    assert!(store.search_books("Jane Doe").await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn commit_publishes_loan_and_decrement() {
    let store = get_test_store().await;

    let mut work = store.begin().await.unwrap();
    let record = work.open_loan(new_loan("S1", "B1")).await.unwrap();
    let book = work.adjust_available_copies(&bid("B1"), -1).await.unwrap();
    work.commit().await.unwrap();

    assert!(record.is_open());
    assert_eq!(book.available_copies, 0);

    let active = store
        .get_active_loan(&sid("S1"), &bid("B1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, record.id);

    let loans = store.list_active_loans(&sid("S1")).await.unwrap();
    assert_eq!(loans.len(), 1);
    assert_eq!(loans[0].book_title, "Dune");
    assert_eq!(loans[0].book_author, "Frank Herbert");
}

#[tokio::test]
#[serial]
async fn rollback_discards_everything() {
    let store = get_test_store().await;

    let mut work = store.begin().await.unwrap();
    work.open_loan(new_loan("S1", "B1")).await.unwrap();
    work.adjust_available_copies(&bid("B1"), -1).await.unwrap();
    work.set_can_borrow(&sid("S1"), false).await.unwrap();
    work.rollback().await.unwrap();

    assert_eq!(
        store.get_book(&bid("B1")).await.unwrap().unwrap().available_copies,
        1
    );
    assert!(store.get_student(&sid("S1")).await.unwrap().unwrap().can_borrow);
    assert!(
        store
            .get_active_loan(&sid("S1"), &bid("B1"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn dropped_unit_rolls_back() {
    let store = get_test_store().await;

    {
        let mut work = store.begin().await.unwrap();
        work.adjust_available_copies(&bid("B1"), -1).await.unwrap();
    }

    assert_eq!(
        store.get_book(&bid("B1")).await.unwrap().unwrap().available_copies,
        1
    );
}

#[tokio::test]
#[serial]
async fn guarded_adjustment_refuses_out_of_range() {
    let store = get_test_store().await;

    let mut work = store.begin().await.unwrap();
    let err = work
        .adjust_available_copies(&bid("B1"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::CopyCountOutOfRange { delta: 1, .. }));

    let err = work
        .adjust_available_copies(&bid("missing"), -1)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::BookNotFound(_)));
}

#[tokio::test]
#[serial]
async fn partial_index_rejects_second_open_loan() {
    let store = get_test_store().await;

    let mut work = store.begin().await.unwrap();
    work.open_loan(new_loan("S1", "B2")).await.unwrap();
    work.commit().await.unwrap();

    let mut work = store.begin().await.unwrap();
    let err = work.open_loan(new_loan("S1", "B2")).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateOpenLoan { .. }));
}

#[tokio::test]
#[serial]
async fn close_loan_once() {
    let store = get_test_store().await;
    let closure = LoanClosure {
        returned_at: Utc::now(),
        is_overdue: true,
        fine: Money::from_cents(150),
    };

    let mut work = store.begin().await.unwrap();
    let record = work.open_loan(new_loan("S1", "B2")).await.unwrap();
    let closed = work.close_loan(record.id, closure).await.unwrap();
    assert_eq!(closed.fine, Money::from_cents(150));
    assert!(closed.is_overdue);

    let err = work.close_loan(record.id, closure).await.unwrap_err();
    assert!(matches!(err, StoreError::LoanNotOpen(_)));
    work.commit().await.unwrap();

    assert!(store.has_unpaid_fine(&sid("S1")).await.unwrap());
}

fn fined(returned_at: chrono::DateTime<Utc>) -> LoanClosure {
    LoanClosure {
        returned_at,
        is_overdue: true,
        fine: Money::from_cents(50),
    }
}

#[tokio::test]
#[serial]
async fn clearing_fines_covers_only_fines_recorded_so_far() {
    let store = get_test_store().await;
    let now = Utc::now();

    let mut work = store.begin().await.unwrap();
    let record = work.open_loan(new_loan("S1", "B2")).await.unwrap();
    let closed = work.close_loan(record.id, fined(now)).await.unwrap();
    work.commit().await.unwrap();
    assert_eq!(closed.fine_seq, Some(1));

    let mut work = store.begin().await.unwrap();
    assert!(work.has_unpaid_fine(&sid("S1")).await.unwrap());
    work.clear_fines(&sid("S1"), now).await.unwrap();
    work.set_can_borrow(&sid("S1"), true).await.unwrap();
    work.commit().await.unwrap();

    assert!(!store.has_unpaid_fine(&sid("S1")).await.unwrap());
    let student = store.get_student(&sid("S1")).await.unwrap().unwrap();
    assert_eq!(student.fines_cleared_through, 1);
    assert_eq!(student.fines_cleared_at, Some(closed.returned_at.unwrap()));

    // Same timestamp as the clearing: still a new, unpaid fine.
    let mut work = store.begin().await.unwrap();
    let record = work.open_loan(new_loan("S1", "B2")).await.unwrap();
    let closed = work.close_loan(record.id, fined(now)).await.unwrap();
    work.commit().await.unwrap();

    assert_eq!(closed.fine_seq, Some(2));
    assert!(store.has_unpaid_fine(&sid("S1")).await.unwrap());
}

#[tokio::test]
#[serial]
async fn unfined_closure_takes_no_fine_number() {
    let store = get_test_store().await;

    let mut work = store.begin().await.unwrap();
    let record = work.open_loan(new_loan("S1", "B2")).await.unwrap();
    let closure = LoanClosure {
        returned_at: Utc::now(),
        is_overdue: true,
        fine: Money::zero(),
    };
    let closed = work.close_loan(record.id, closure).await.unwrap();
    work.commit().await.unwrap();

    assert_eq!(closed.fine_seq, None);
    assert_eq!(
        store.get_student(&sid("S1")).await.unwrap().unwrap().fined_returns,
        0
    );
    assert!(!store.has_unpaid_fine(&sid("S1")).await.unwrap());
}

#[tokio::test]
#[serial]
async fn row_lock_times_out_instead_of_waiting_forever() {
    let store = get_test_store().await;

    let mut holder = store.begin().await.unwrap();
    holder.lock_book(&bid("B1")).await.unwrap();

    let mut waiter = store.begin().await.unwrap();
    let err = waiter.lock_book(&bid("B1")).await.unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));

    holder.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn concurrent_units_serialize_on_book_row() {
    let store = get_test_store().await;

    let attempts = (0..5).map(|_| {
        let store = store.clone();
        async move {
            let mut work = store.begin().await.unwrap();
            let book = work.lock_book(&bid("B1")).await.unwrap().unwrap();
            if !book.is_available() {
                return false;
            }
            work.adjust_available_copies(&bid("B1"), -1).await.unwrap();
            work.commit().await.unwrap();
            true
        }
    });

    let results = futures_util::future::join_all(attempts).await;
    assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(
        store.get_book(&bid("B1")).await.unwrap().unwrap().available_copies,
        0
    );
}
