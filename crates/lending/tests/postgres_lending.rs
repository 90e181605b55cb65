//! Lending workflows over PostgreSQL
//!
//! Drives the engine against a real database, where concurrent units contend
//! on row locks and the partial unique index rather than one process-wide
//! mutex. Tests share one container and run serially because each one
//! truncates the tables.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::{BookId, Money, StudentId};
use lending::{FixedClock, LendingConfig, LendingEngine};
use library_store::{
    Book, CatalogStore, LedgerStore, LibraryStore, MemberStore, PostgresLibraryStore, Student,
    UnitOfWork,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

type Engine = LendingEngine<PostgresLibraryStore, FixedClock>;

const STUDENTS: usize = 6;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let store = PostgresLibraryStore::connect(&connection_string, 2, Duration::from_secs(5))
                .await
                .unwrap();
            store.run_migrations().await.unwrap();

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

struct TestDb {
    engine: Arc<Engine>,
    store: PostgresLibraryStore,
    clock: FixedClock,
    pool: PgPool,
}

/// Fresh tables with students `S0..S5`, a single-copy `B1` and a three-copy `B2`
async fn setup() -> TestDb {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(STUDENTS as u32 + 4)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::raw_sql(
        "DROP TRIGGER IF EXISTS refuse_disable ON students;
         TRUNCATE TABLE borrow_records, books, students RESTART IDENTITY;",
    )
    .execute(&pool)
    .await
    .unwrap();

    let start = Utc.with_ymd_and_hms(2024, 9, 2, 8, 0, 0).unwrap();
    let store = PostgresLibraryStore::new(pool.clone(), Duration::from_secs(5));
    for i in 0..STUDENTS {
        store
            .insert_student(&Student::new(
                sid(&format!("S{i}")),
                format!("Student {i}"),
                "pw",
                start,
            ))
            .await
            .unwrap();
    }
    store
        .insert_book(&Book::new(bid("B1"), "SICP", "Abelson", 1, start))
        .await
        .unwrap();
    store
        .insert_book(&Book::new(bid("B2"), "TAPL", "Pierce", 3, start))
        .await
        .unwrap();

    let clock = FixedClock::new(start);
    let engine = LendingEngine::new(store.clone(), LendingConfig::default(), clock.clone());
    TestDb {
        engine: Arc::new(engine),
        store,
        clock,
        pool,
    }
}

fn sid(id: &str) -> StudentId {
    StudentId::new(id).unwrap()
}

fn bid(id: &str) -> BookId {
    BookId::new(id).unwrap()
}

async fn available(store: &PostgresLibraryStore, book: &str) -> i32 {
    store.get_book(&bid(book)).await.unwrap().unwrap().available_copies
}

async fn open_rows(pool: &PgPool, stu: &str, book: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM borrow_records \
         WHERE stu_id = $1 AND book_id = $2 AND returned_at IS NULL",
    )
    .bind(stu)
    .bind(book)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_borrows_of_last_copy() {
    let db = setup().await;

    let attempts = (0..STUDENTS).map(|i| {
        let engine = db.engine.clone();
        tokio::spawn(async move { engine.borrow(&sid(&format!("S{i}")), &bid("B1")).await })
    });
    let results = futures_util::future::join_all(attempts).await;

    let mut won = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert_eq!(e.reason(), "book_unavailable"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(available(&db.store, "B1").await, 0);

    let loans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM borrow_records WHERE book_id = 'B1'")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(loans, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_borrows_by_one_student_open_one_loan() {
    let db = setup().await;

    let attempts = (0..5).map(|_| {
        let engine = db.engine.clone();
        tokio::spawn(async move { engine.borrow(&sid("S0"), &bid("B2")).await })
    });
    let results = futures_util::future::join_all(attempts).await;

    let mut won = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert_eq!(e.reason(), "already_borrowed"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(open_rows(&db.pool, "S0", "B2").await, 1);
    assert_eq!(available(&db.store, "B2").await, 2);
}

#[tokio::test]
#[serial]
async fn failed_late_return_leaves_no_partial_commit() {
    let db = setup().await;
    let record = db.engine.borrow(&sid("S0"), &bid("B2")).await.unwrap();

    // Refuse the final write of the return: disabling the student.
    sqlx::raw_sql(
        r#"
        CREATE OR REPLACE FUNCTION refuse_disable() RETURNS trigger AS $$
        BEGIN
            RAISE EXCEPTION 'can_borrow is frozen';
        END;
        $$ LANGUAGE plpgsql;

        CREATE TRIGGER refuse_disable
            BEFORE UPDATE OF can_borrow ON students
            FOR EACH ROW WHEN (NEW.can_borrow IS DISTINCT FROM OLD.can_borrow)
            EXECUTE FUNCTION refuse_disable();
        "#,
    )
    .execute(&db.pool)
    .await
    .unwrap();

    db.clock.set(record.due_at + chrono::Duration::days(3));
    let err = db.engine.return_book(&sid("S0"), &bid("B2")).await.unwrap_err();
    assert!(err.is_internal());

    let loan = db
        .store
        .get_active_loan(&sid("S0"), &bid("B2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loan.id, record.id);
    assert!(loan.fine.is_zero());
    assert_eq!(available(&db.store, "B2").await, 2);

    let student = db.store.get_student(&sid("S0")).await.unwrap().unwrap();
    assert!(student.can_borrow);
    assert_eq!(student.fined_returns, 0);
    assert!(!db.store.has_unpaid_fine(&sid("S0")).await.unwrap());
}

#[tokio::test]
#[serial]
async fn borrow_blocked_on_a_locked_book_writes_nothing() {
    let db = setup().await;
    let store = PostgresLibraryStore::new(db.pool.clone(), Duration::from_millis(200));
    let engine = LendingEngine::new(store, LendingConfig::default(), db.clock.clone());

    let mut holder = db.store.begin().await.unwrap();
    holder.lock_book(&bid("B1")).await.unwrap();

    let err = engine.borrow(&sid("S0"), &bid("B1")).await.unwrap_err();
    assert!(err.is_internal());
    holder.rollback().await.unwrap();

    assert_eq!(available(&db.store, "B1").await, 1);
    assert_eq!(open_rows(&db.pool, "S0", "B1").await, 0);
}

#[tokio::test]
#[serial]
async fn fine_assessed_at_payment_instant_stays_payable() {
    let db = setup().await;
    let first = db.engine.borrow(&sid("S0"), &bid("B1")).await.unwrap();
    db.engine.borrow(&sid("S0"), &bid("B2")).await.unwrap();
    db.clock.set(first.due_at + chrono::Duration::days(3));

    let receipt = db.engine.return_book(&sid("S0"), &bid("B1")).await.unwrap();
    assert_eq!(receipt.fine, Money::from_cents(150));
    db.engine.pay_fine(&sid("S0")).await.unwrap();

    let receipt = db.engine.return_book(&sid("S0"), &bid("B2")).await.unwrap();
    assert_eq!(receipt.fine, Money::from_cents(150));
    assert_eq!(receipt.record.fine_seq, Some(2));

    let student = db.store.get_student(&sid("S0")).await.unwrap().unwrap();
    assert!(!student.can_borrow);
    assert!(db.store.has_unpaid_fine(&sid("S0")).await.unwrap());

    db.engine.pay_fine(&sid("S0")).await.unwrap();
    db.engine.borrow(&sid("S0"), &bid("B1")).await.unwrap();

    let err = db.engine.pay_fine(&sid("S0")).await.unwrap_err();
    assert_eq!(err.reason(), "nothing_to_pay");
}
