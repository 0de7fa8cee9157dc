use axum::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::ServiceResult;
use crate::models::{
    Account, AccountProfile, AttendanceSession, Department, JournalEntry, NewAccount,
    NewAttendanceSession, NewJournalEntry, Owned, Position, Product,
};

#[cfg(test)]
pub mod memory;
mod migration;
pub mod postgres;
#[cfg(test)]
mod tests;

pub use postgres::PgStore;

/// Entry point of the persistence layer
#[async_trait]
pub trait Store: Send + Sync {
    /// Start an isolated unit of work, at least at repeatable read.
    async fn begin(&self) -> ServiceResult<Box<dyn UnitOfWork>>;
}

/// Reads and writes that either all become visible on `commit` or not at all.
///
/// Dropping a unit of work without committing discards its writes.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn commit(self: Box<Self>) -> ServiceResult<()>;
    async fn rollback(self: Box<Self>) -> ServiceResult<()>;

    // accounts
    async fn find_account_by_card_id(&mut self, card_id: &str) -> ServiceResult<Option<Account>>;
    async fn find_account_by_employee_id(
        &mut self,
        employee_id: &str,
    ) -> ServiceResult<Option<Account>>;
    /// Re-read the account and hold it exclusively until the unit of work ends.
    async fn lock_account(&mut self, id: i64) -> ServiceResult<Option<Account>>;
    /// Fails with `Conflict` if the card id or the employee id is already taken.
    async fn insert_account(&mut self, account: NewAccount) -> ServiceResult<Account>;
    /// Store the editable fields of an account. Never touches the balance.
    async fn update_account(&mut self, account: &Account) -> ServiceResult<()>;
    /// Remove the account together with its journal and sessions.
    async fn delete_account(&mut self, id: i64) -> ServiceResult<()>;
    async fn get_account_profiles(&mut self) -> ServiceResult<Vec<AccountProfile>>;
    async fn count_employee_ids_with_prefix(&mut self, prefix: &str) -> ServiceResult<i64>;

    // journal
    /// Append the entry and move the cached balance of its account to `balance_after`.
    async fn append_journal_entry(&mut self, entry: NewJournalEntry) -> ServiceResult<JournalEntry>;
    /// All entries of the account, oldest first.
    async fn get_journal_by_account(&mut self, account_id: i64) -> ServiceResult<Vec<JournalEntry>>;
    /// Entries for the history view, newest first.
    async fn get_journal_history(
        &mut self,
        employee_id: Option<&str>,
    ) -> ServiceResult<Vec<Owned<JournalEntry>>>;
    /// Overwrite the cached balance, only used to repair it from the journal.
    async fn restore_balance(&mut self, account_id: i64, balance: Decimal) -> ServiceResult<()>;

    // attendance
    /// Sessions in the open state, most recent check in first.
    async fn get_open_sessions(&mut self, account_id: i64)
        -> ServiceResult<Vec<AttendanceSession>>;
    /// Fails with `Conflict` if an open session would be inserted next to another one.
    async fn insert_session(
        &mut self,
        session: NewAttendanceSession,
    ) -> ServiceResult<AttendanceSession>;
    async fn close_session(
        &mut self,
        session_id: i64,
        check_out: DateTime<Utc>,
        note: Option<String>,
    ) -> ServiceResult<()>;
    async fn get_sessions_by_account(
        &mut self,
        account_id: i64,
    ) -> ServiceResult<Vec<AttendanceSession>>;
    /// Sessions for the history view, most recent check in first.
    async fn get_session_history(
        &mut self,
        employee_id: Option<&str>,
    ) -> ServiceResult<Vec<Owned<AttendanceSession>>>;

    // lookups
    async fn get_departments(&mut self) -> ServiceResult<Vec<Department>>;
    async fn get_positions(&mut self) -> ServiceResult<Vec<Position>>;
    async fn get_available_products(&mut self) -> ServiceResult<Vec<Product>>;
}
