use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};

use crate::{
    ActiveLoan, Book, BookId, BorrowRecord, LoanClosure, LoanId, Money, NewLoan, Result, Student,
    StoreError, StudentId,
    store::{CatalogStore, LedgerStore, LibraryStore, MemberStore, UnitOfWork, like_pattern},
};

const BOOK_COLUMNS: &str =
    "book_id, title, author, description, total_copies, available_copies, can_borrow, created_at";

const STUDENT_COLUMNS: &str = "stu_id, name, password, trust, can_borrow, \
     fined_returns, fines_cleared_through, fines_cleared_at, created_at";

const LOAN_COLUMNS: &str = "id, stu_id, book_id, borrowed_at, due_at, returned_at, \
     is_overdue, fine_cents, fine_seq, created_at";

const UNPAID_FINE_QUERY: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM borrow_records br
        JOIN students s ON s.stu_id = br.stu_id
        WHERE br.stu_id = $1
          AND br.is_overdue
          AND br.fine_cents > 0
          AND br.fine_seq > s.fines_cleared_through
    )
"#;

const OPEN_LOAN_CONSTRAINT: &str = "one_open_loan_per_pair";

/// PostgreSQL-backed library store.
#[derive(Clone)]
pub struct PostgresLibraryStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresLibraryStore {
    /// Creates a new PostgreSQL store.
    ///
    /// `lock_timeout` bounds how long a unit of work waits for a row lock.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Connects a pool of up to `max_connections` to `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("library migrations applied");
        Ok(())
    }

    /// Adds a student row.
    pub async fn insert_student(&self, student: &Student) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO students (stu_id, name, password, trust, can_borrow,
                                  fined_returns, fines_cleared_through, fines_cleared_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(student.stu_id.as_str())
        .bind(&student.name)
        .bind(&student.password)
        .bind(student.trust)
        .bind(student.can_borrow)
        .bind(student.fined_returns)
        .bind(student.fines_cleared_through)
        .bind(student.fines_cleared_at)
        .bind(student.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Adds a book row.
    pub async fn insert_book(&self, book: &Book) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO books (book_id, title, author, description, total_copies, available_copies, can_borrow, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(book.book_id.as_str())
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.description)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.can_borrow)
        .bind(book.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode_id<T>(
    raw: String,
    column: &str,
    parse: impl FnOnce(String) -> std::result::Result<T, common::InvalidId>,
) -> Result<T> {
    parse(raw).map_err(|e| {
        StoreError::Database(sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
}

fn row_to_book(row: &PgRow) -> Result<Book> {
    Ok(Book {
        book_id: decode_id(row.try_get("book_id")?, "book_id", BookId::new)?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        description: row.try_get("description")?,
        total_copies: row.try_get("total_copies")?,
        available_copies: row.try_get("available_copies")?,
        can_borrow: row.try_get("can_borrow")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_student(row: &PgRow) -> Result<Student> {
    Ok(Student {
        stu_id: decode_id(row.try_get("stu_id")?, "stu_id", StudentId::new)?,
        name: row.try_get("name")?,
        password: row.try_get("password")?,
        trust: row.try_get("trust")?,
        can_borrow: row.try_get("can_borrow")?,
        fined_returns: row.try_get("fined_returns")?,
        fines_cleared_through: row.try_get("fines_cleared_through")?,
        fines_cleared_at: row.try_get("fines_cleared_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_loan(row: &PgRow) -> Result<BorrowRecord> {
    Ok(BorrowRecord {
        id: LoanId::new(row.try_get("id")?),
        stu_id: decode_id(row.try_get("stu_id")?, "stu_id", StudentId::new)?,
        book_id: decode_id(row.try_get("book_id")?, "book_id", BookId::new)?,
        borrowed_at: row.try_get("borrowed_at")?,
        due_at: row.try_get("due_at")?,
        returned_at: row.try_get("returned_at")?,
        is_overdue: row.try_get("is_overdue")?,
        fine: Money::from_cents(row.try_get("fine_cents")?),
        fine_seq: row.try_get("fine_seq")?,
        created_at: row.try_get("created_at")?,
    })
}

fn lock_clause(lock: bool) -> &'static str {
    if lock { " FOR UPDATE" } else { "" }
}

async fn fetch_student<'e>(
    executor: impl PgExecutor<'e>,
    stu_id: &StudentId,
    lock: bool,
) -> Result<Option<Student>> {
    let sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students WHERE stu_id = $1{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(stu_id.as_str())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_student).transpose()
}

async fn fetch_book<'e>(
    executor: impl PgExecutor<'e>,
    book_id: &BookId,
    lock: bool,
) -> Result<Option<Book>> {
    let sql = format!(
        "SELECT {BOOK_COLUMNS} FROM books WHERE book_id = $1{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(book_id.as_str())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_book).transpose()
}

async fn fetch_open_loan<'e>(
    executor: impl PgExecutor<'e>,
    stu_id: &StudentId,
    book_id: &BookId,
    lock: bool,
) -> Result<Option<BorrowRecord>> {
    let sql = format!(
        "SELECT {LOAN_COLUMNS} FROM borrow_records \
         WHERE stu_id = $1 AND book_id = $2 AND returned_at IS NULL{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(stu_id.as_str())
        .bind(book_id.as_str())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_loan).transpose()
}

async fn query_unpaid_fine<'e>(executor: impl PgExecutor<'e>, stu_id: &StudentId) -> Result<bool> {
    let owes: bool = sqlx::query_scalar(UNPAID_FINE_QUERY)
        .bind(stu_id.as_str())
        .fetch_one(executor)
        .await?;
    Ok(owes)
}

#[async_trait]
impl CatalogStore for PostgresLibraryStore {
    async fn get_book(&self, book_id: &BookId) -> Result<Option<Book>> {
        fetch_book(&self.pool, book_id, false).await
    }

    async fn search_books(&self, keyword: &str) -> Result<Vec<Book>> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books \
             WHERE (title ILIKE $1 OR author ILIKE $1) AND can_borrow \
             ORDER BY title ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(keyword))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_book).collect()
    }

    async fn list_books(&self) -> Result<Vec<Book>> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY created_at DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_book).collect()
    }
}

#[async_trait]
impl MemberStore for PostgresLibraryStore {
    async fn get_student(&self, stu_id: &StudentId) -> Result<Option<Student>> {
        fetch_student(&self.pool, stu_id, false).await
    }

    async fn has_unpaid_fine(&self, stu_id: &StudentId) -> Result<bool> {
        query_unpaid_fine(&self.pool, stu_id).await
    }
}

#[async_trait]
impl LedgerStore for PostgresLibraryStore {
    async fn get_active_loan(
        &self,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<Option<BorrowRecord>> {
        fetch_open_loan(&self.pool, stu_id, book_id, false).await
    }

    async fn list_active_loans(&self, stu_id: &StudentId) -> Result<Vec<ActiveLoan>> {
        let rows = sqlx::query(
            r#"
            SELECT br.id, br.stu_id, br.book_id, br.borrowed_at, br.due_at, br.returned_at,
                   br.is_overdue, br.fine_cents, br.fine_seq, br.created_at,
                   COALESCE(b.title, '') AS book_title, COALESCE(b.author, '') AS book_author
            FROM borrow_records br
            LEFT JOIN books b ON br.book_id = b.book_id
            WHERE br.stu_id = $1 AND br.returned_at IS NULL
            ORDER BY br.borrowed_at DESC, br.id DESC
            "#,
        )
        .bind(stu_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ActiveLoan {
                    record: row_to_loan(row)?,
                    book_title: row.try_get("book_title")?,
                    book_author: row.try_get("book_author")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LibraryStore for PostgresLibraryStore {
    type Work = PostgresUnitOfWork;

    async fn begin(&self) -> Result<PostgresUnitOfWork> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(PostgresUnitOfWork { tx })
    }
}

/// Unit of work backed by a PostgreSQL transaction.
///
/// Dropping it without committing rolls the transaction back.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn lock_student(&mut self, stu_id: &StudentId) -> Result<Option<Student>> {
        fetch_student(&mut *self.tx, stu_id, true).await
    }

    async fn lock_book(&mut self, book_id: &BookId) -> Result<Option<Book>> {
        fetch_book(&mut *self.tx, book_id, true).await
    }

    async fn lock_open_loan(
        &mut self,
        stu_id: &StudentId,
        book_id: &BookId,
    ) -> Result<Option<BorrowRecord>> {
        fetch_open_loan(&mut *self.tx, stu_id, book_id, true).await
    }

    async fn has_unpaid_fine(&mut self, stu_id: &StudentId) -> Result<bool> {
        query_unpaid_fine(&mut *self.tx, stu_id).await
    }

    async fn open_loan(&mut self, loan: NewLoan) -> Result<BorrowRecord> {
        let sql = format!(
            "INSERT INTO borrow_records (stu_id, book_id, borrowed_at, due_at, created_at) \
             VALUES ($1, $2, $3, $4, $3) RETURNING {LOAN_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(loan.stu_id.as_str())
            .bind(loan.book_id.as_str())
            .bind(loan.borrowed_at)
            .bind(loan.due_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some(OPEN_LOAN_CONSTRAINT)
                {
                    tracing::debug!(
                        stu_id = %loan.stu_id,
                        book_id = %loan.book_id,
                        "open loan already exists"
                    );
                    return StoreError::DuplicateOpenLoan {
                        student_id: loan.stu_id.clone(),
                        book_id: loan.book_id.clone(),
                    };
                }
                StoreError::Database(e)
            })?;
        row_to_loan(&row)
    }

    async fn close_loan(&mut self, loan_id: LoanId, closure: LoanClosure) -> Result<BorrowRecord> {
        let sql = format!(
            "UPDATE borrow_records SET returned_at = $2, is_overdue = $3, fine_cents = $4 \
             WHERE id = $1 AND returned_at IS NULL RETURNING {LOAN_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(loan_id.as_i64())
            .bind(closure.returned_at)
            .bind(closure.is_overdue)
            .bind(closure.fine.cents())
            .fetch_optional(&mut *self.tx)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::LoanNotOpen(loan_id));
        };
        let record = row_to_loan(&row)?;
        if !closure.fine.is_positive() {
            return Ok(record);
        }

        let fine_seq: i64 = sqlx::query_scalar(
            "UPDATE students SET fined_returns = fined_returns + 1 \
             WHERE stu_id = $1 RETURNING fined_returns",
        )
        .bind(record.stu_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::StudentNotFound(record.stu_id.clone()))?;

        let sql = format!(
            "UPDATE borrow_records SET fine_seq = $2 WHERE id = $1 RETURNING {LOAN_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(loan_id.as_i64())
            .bind(fine_seq)
            .fetch_one(&mut *self.tx)
            .await?;
        row_to_loan(&row)
    }

    async fn adjust_available_copies(&mut self, book_id: &BookId, delta: i32) -> Result<Book> {
        let sql = format!(
            "UPDATE books SET available_copies = available_copies + $2 \
             WHERE book_id = $1 \
               AND available_copies + $2 >= 0 \
               AND available_copies + $2 <= total_copies \
             RETURNING {BOOK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(book_id.as_str())
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await?;
        if let Some(row) = row {
            return row_to_book(&row);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM books WHERE book_id = $1)")
                .bind(book_id.as_str())
                .fetch_one(&mut *self.tx)
                .await?;
        if exists {
            Err(StoreError::CopyCountOutOfRange {
                book_id: book_id.clone(),
                delta,
            })
        } else {
            Err(StoreError::BookNotFound(book_id.clone()))
        }
    }

    async fn set_can_borrow(&mut self, stu_id: &StudentId, can_borrow: bool) -> Result<()> {
        let result = sqlx::query("UPDATE students SET can_borrow = $2 WHERE stu_id = $1")
            .bind(stu_id.as_str())
            .bind(can_borrow)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::StudentNotFound(stu_id.clone()));
        }
        Ok(())
    }

    async fn clear_fines(&mut self, stu_id: &StudentId, cleared_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE students SET fines_cleared_through = fined_returns, fines_cleared_at = $2 \
             WHERE stu_id = $1",
        )
            .bind(stu_id.as_str())
            .bind(cleared_at)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::StudentNotFound(stu_id.clone()));
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
