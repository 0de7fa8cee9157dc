use axum::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use rust_decimal::Decimal;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Account, AccountProfile, AttendanceSession, Department, JournalEntry, NewAccount,
    NewAttendanceSession, NewJournalEntry, Owned, Position, Product, Role, SessionState,
    TransactionKind, STATUS_FINISHED, STATUS_RESTRICTED,
};
use crate::service::{CARD_EXISTS, EMPLOYEE_EXISTS, OPEN_SESSION_EXISTS};

use super::migration;
use super::{Store, UnitOfWork};

const ACCOUNT_COLUMNS: &str = "a.id, a.card_id, a.employee_id, a.name, a.date_of_birth, \
    a.department_id, a.position_id, a.role, a.balance, a.public_key, a.is_active, a.pin_hash, \
    a.is_default_pin";

const JOURNAL_COLUMNS: &str = "j.id, j.account_id, j.kind, j.amount, j.balance_before, \
    j.balance_after, j.description, j.signature, j.created_at";

const SESSION_COLUMNS: &str = "s.id, s.account_id, s.work_date, s.check_in_time, \
    s.check_out_time, s.status, s.notes, s.created_at";

/// Postgres implementation of the store
#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> ServiceResult<PgStore> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> ServiceResult<PgStore> {
        let migrator = Migrator::new(migration::postgresql_migrations()).await?;
        migrator.run(&pool).await?;
        info!("Database schema is up to date");

        Ok(PgStore { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> ServiceResult<Box<dyn UnitOfWork>> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *transaction)
            .await?;

        Ok(Box::new(PgUnitOfWork { transaction }))
    }
}

pub struct PgUnitOfWork {
    transaction: Transaction<'static, Postgres>,
}

/// Unique constraint on `accounts.employee_id`, named in the migration script.
const EMPLOYEE_ID_CONSTRAINT: &str = "accounts_employee_id_key";

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

fn violated_constraint(error: &sqlx::Error) -> Option<&str> {
    error.as_database_error().and_then(|e| e.constraint())
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    card_id: String,
    employee_id: String,
    name: String,
    date_of_birth: Option<NaiveDate>,
    department_id: i64,
    position_id: i64,
    role: String,
    balance: Decimal,
    public_key: Option<Vec<u8>>,
    is_active: bool,
    pin_hash: Option<String>,
    is_default_pin: bool,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            card_id: row.card_id,
            employee_id: row.employee_id,
            name: row.name,
            role: Role::parse(&row.role),
            active: row.is_active,
            balance: row.balance,
            default_pin: row.is_default_pin,
            pin_hash: row.pin_hash,
            public_key: row.public_key,
            date_of_birth: row.date_of_birth,
            department_id: row.department_id,
            position_id: row.position_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AccountProfileRow {
    #[sqlx(flatten)]
    account: AccountRow,
    department_name: Option<String>,
    position_name: Option<String>,
}

#[derive(sqlx::FromRow)]
struct JournalRow {
    id: i64,
    account_id: i64,
    kind: String,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    description: Option<String>,
    signature: Option<Vec<u8>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JournalRow> for JournalEntry {
    type Error = ServiceError;

    fn try_from(row: JournalRow) -> Result<Self, Self::Error> {
        let kind = TransactionKind::parse(&row.kind).ok_or_else(|| {
            ServiceError::store(format!(
                "journal entry {} has unknown kind '{}'",
                row.id, row.kind
            ))
        })?;

        Ok(JournalEntry {
            id: row.id,
            account_id: row.account_id,
            kind,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            description: row.description,
            signature: row.signature,
            timestamp: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OwnedJournalRow {
    #[sqlx(flatten)]
    entry: JournalRow,
    owner_name: String,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    account_id: i64,
    work_date: NaiveDate,
    check_in_time: Option<DateTime<Utc>>,
    check_out_time: Option<DateTime<Utc>>,
    status: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for AttendanceSession {
    fn from(row: SessionRow) -> Self {
        AttendanceSession {
            id: row.id,
            account_id: row.account_id,
            work_date: row.work_date,
            check_in: row.check_in_time,
            state: SessionState::from_columns(row.status.as_deref(), row.check_out_time),
            note: row.notes,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OwnedSessionRow {
    #[sqlx(flatten)]
    session: SessionRow,
    owner_name: String,
}

#[derive(sqlx::FromRow)]
struct NamedRow {
    id: i64,
    name: String,
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    price: Decimal,
    category: String,
    is_available: bool,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> ServiceResult<()> {
        self.transaction.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ServiceResult<()> {
        self.transaction.rollback().await?;
        Ok(())
    }

    async fn find_account_by_card_id(&mut self, card_id: &str) -> ServiceResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts a WHERE a.card_id = $1"
        ))
        .bind(card_id)
        .fetch_optional(&mut *self.transaction)
        .await?;

        Ok(row.map(Account::from))
    }

    async fn find_account_by_employee_id(
        &mut self,
        employee_id: &str,
    ) -> ServiceResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts a WHERE a.employee_id = $1"
        ))
        .bind(employee_id)
        .fetch_optional(&mut *self.transaction)
        .await?;

        Ok(row.map(Account::from))
    }

    async fn lock_account(&mut self, id: i64) -> ServiceResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts a WHERE a.id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.transaction)
        .await?;

        Ok(row.map(Account::from))
    }

    async fn insert_account(&mut self, account: NewAccount) -> ServiceResult<Account> {
        let result = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            INSERT INTO accounts AS a (card_id, employee_id, name, role, public_key, pin_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&account.card_id)
        .bind(&account.employee_id)
        .bind(&account.name)
        .bind(account.role.as_str())
        .bind(&account.public_key)
        .bind(&account.pin_hash)
        .fetch_one(&mut *self.transaction)
        .await;

        match result {
            Ok(row) => Ok(row.into()),
            Err(error) if is_unique_violation(&error) => {
                let reason = match violated_constraint(&error) {
                    Some(EMPLOYEE_ID_CONSTRAINT) => EMPLOYEE_EXISTS,
                    _ => CARD_EXISTS,
                };
                Err(ServiceError::Conflict(reason.to_owned()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn update_account(&mut self, account: &Account) -> ServiceResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET
                name = $2,
                date_of_birth = $3,
                department_id = $4,
                position_id = $5,
                role = $6,
                public_key = $7,
                is_active = $8,
                pin_hash = $9,
                is_default_pin = $10
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(account.date_of_birth)
        .bind(account.department_id)
        .bind(account.position_id)
        .bind(account.role.as_str())
        .bind(&account.public_key)
        .bind(account.active)
        .bind(&account.pin_hash)
        .bind(account.default_pin)
        .execute(&mut *self.transaction)
        .await?;

        Ok(())
    }

    async fn delete_account(&mut self, id: i64) -> ServiceResult<()> {
        // journal and sessions follow through ON DELETE CASCADE
        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.transaction)
            .await?;

        Ok(())
    }

    async fn get_account_profiles(&mut self) -> ServiceResult<Vec<AccountProfile>> {
        let rows = sqlx::query_as::<_, AccountProfileRow>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}, d.name AS department_name, p.name AS position_name
            FROM accounts a
            LEFT JOIN departments d ON d.id = a.department_id
            LEFT JOIN positions p ON p.id = a.position_id
            ORDER BY a.id
            "#
        ))
        .fetch_all(&mut *self.transaction)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AccountProfile {
                account: row.account.into(),
                department: row.department_name,
                position: row.position_name,
            })
            .collect())
    }

    async fn count_employee_ids_with_prefix(&mut self, prefix: &str) -> ServiceResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM accounts WHERE left(employee_id, length($1)) = $1",
        )
        .bind(prefix)
        .fetch_one(&mut *self.transaction)
        .await?;

        Ok(count)
    }

    async fn append_journal_entry(&mut self, entry: NewJournalEntry) -> ServiceResult<JournalEntry> {
        let row = sqlx::query_as::<_, JournalRow>(&format!(
            r#"
            INSERT INTO journal_entries AS j
                (account_id, kind, amount, balance_before, balance_after, description, signature, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {JOURNAL_COLUMNS}
            "#
        ))
        .bind(entry.account_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(&entry.description)
        .bind(&entry.signature)
        .bind(entry.timestamp)
        .fetch_one(&mut *self.transaction)
        .await?;

        sqlx::query("UPDATE accounts SET balance = $2 WHERE id = $1")
            .bind(entry.account_id)
            .bind(entry.balance_after)
            .execute(&mut *self.transaction)
            .await?;

        row.try_into()
    }

    async fn get_journal_by_account(&mut self, account_id: i64) -> ServiceResult<Vec<JournalEntry>> {
        let rows = sqlx::query_as::<_, JournalRow>(&format!(
            "SELECT {JOURNAL_COLUMNS} FROM journal_entries j WHERE j.account_id = $1 ORDER BY j.id"
        ))
        .bind(account_id)
        .fetch_all(&mut *self.transaction)
        .await?;

        rows.into_iter().map(JournalEntry::try_from).collect()
    }

    async fn get_journal_history(
        &mut self,
        employee_id: Option<&str>,
    ) -> ServiceResult<Vec<Owned<JournalEntry>>> {
        let rows = sqlx::query_as::<_, OwnedJournalRow>(&format!(
            r#"
            SELECT {JOURNAL_COLUMNS}, a.name AS owner_name
            FROM journal_entries j
            JOIN accounts a ON a.id = j.account_id
            WHERE $1::TEXT IS NULL OR a.employee_id = $1
            ORDER BY j.created_at DESC, j.id DESC
            "#
        ))
        .bind(employee_id)
        .fetch_all(&mut *self.transaction)
        .await?;

        rows.into_iter()
            .map(|row| -> ServiceResult<Owned<JournalEntry>> {
                Ok(Owned {
                    owner_name: row.owner_name,
                    record: row.entry.try_into()?,
                })
            })
            .collect()
    }

    async fn restore_balance(&mut self, account_id: i64, balance: Decimal) -> ServiceResult<()> {
        sqlx::query("UPDATE accounts SET balance = $2 WHERE id = $1")
            .bind(account_id)
            .bind(balance)
            .execute(&mut *self.transaction)
            .await?;

        Ok(())
    }

    async fn get_open_sessions(
        &mut self,
        account_id: i64,
    ) -> ServiceResult<Vec<AttendanceSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM attendance_sessions s
            WHERE s.account_id = $1
                AND s.check_out_time IS NULL
                AND s.status IS DISTINCT FROM $2
            ORDER BY s.check_in_time DESC NULLS LAST, s.id DESC
            "#
        ))
        .bind(account_id)
        .bind(STATUS_RESTRICTED)
        .fetch_all(&mut *self.transaction)
        .await?;

        Ok(rows.into_iter().map(AttendanceSession::from).collect())
    }

    async fn insert_session(
        &mut self,
        session: NewAttendanceSession,
    ) -> ServiceResult<AttendanceSession> {
        let result = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            INSERT INTO attendance_sessions AS s
                (account_id, work_date, check_in_time, check_out_time, status, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session.account_id)
        .bind(session.work_date)
        .bind(session.check_in)
        .bind(session.state.check_out())
        .bind(session.state.status())
        .bind(&session.note)
        .bind(session.check_in)
        .fetch_one(&mut *self.transaction)
        .await;

        match result {
            Ok(row) => Ok(row.into()),
            Err(error) if is_unique_violation(&error) => {
                Err(ServiceError::Conflict(OPEN_SESSION_EXISTS.to_owned()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn close_session(
        &mut self,
        session_id: i64,
        check_out: DateTime<Utc>,
        note: Option<String>,
    ) -> ServiceResult<()> {
        sqlx::query(
            "UPDATE attendance_sessions SET check_out_time = $2, status = $3, notes = $4 WHERE id = $1",
        )
        .bind(session_id)
        .bind(check_out)
        .bind(STATUS_FINISHED)
        .bind(note)
        .execute(&mut *self.transaction)
        .await?;

        Ok(())
    }

    async fn get_sessions_by_account(
        &mut self,
        account_id: i64,
    ) -> ServiceResult<Vec<AttendanceSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM attendance_sessions s WHERE s.account_id = $1 ORDER BY s.id"
        ))
        .bind(account_id)
        .fetch_all(&mut *self.transaction)
        .await?;

        Ok(rows.into_iter().map(AttendanceSession::from).collect())
    }

    async fn get_session_history(
        &mut self,
        employee_id: Option<&str>,
    ) -> ServiceResult<Vec<Owned<AttendanceSession>>> {
        let rows = sqlx::query_as::<_, OwnedSessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}, a.name AS owner_name
            FROM attendance_sessions s
            JOIN accounts a ON a.id = s.account_id
            WHERE $1::TEXT IS NULL OR a.employee_id = $1
            ORDER BY s.check_in_time DESC NULLS LAST, s.id DESC
            "#
        ))
        .bind(employee_id)
        .fetch_all(&mut *self.transaction)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Owned {
                owner_name: row.owner_name,
                record: row.session.into(),
            })
            .collect())
    }

    async fn get_departments(&mut self) -> ServiceResult<Vec<Department>> {
        let rows = sqlx::query_as::<_, NamedRow>("SELECT id, name FROM departments ORDER BY id")
            .fetch_all(&mut *self.transaction)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Department {
                id: row.id,
                name: row.name,
            })
            .collect())
    }

    async fn get_positions(&mut self) -> ServiceResult<Vec<Position>> {
        let rows = sqlx::query_as::<_, NamedRow>("SELECT id, name FROM positions ORDER BY id")
            .fetch_all(&mut *self.transaction)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Position {
                id: row.id,
                name: row.name,
            })
            .collect())
    }

    async fn get_available_products(&mut self) -> ServiceResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, price, category, is_available FROM products WHERE is_available ORDER BY id",
        )
        .fetch_all(&mut *self.transaction)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Product {
                id: row.id,
                name: row.name,
                price: row.price,
                category: row.category,
                available: row.is_available,
            })
            .collect())
    }
}
