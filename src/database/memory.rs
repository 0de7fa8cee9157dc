//! In-memory store for the test suite
//!
//! A unit of work holds the whole table set exclusively, so units of work are serialized. Writes
//! go straight to the tables and are undone from a snapshot unless the unit commits.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Account, AccountProfile, AttendanceSession, Department, JournalEntry, NewAccount,
    NewAttendanceSession, NewJournalEntry, Owned, Position, Product, SessionState,
};
use crate::service::{CARD_EXISTS, EMPLOYEE_EXISTS, OPEN_SESSION_EXISTS};

use super::{Store, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Tables {
    accounts: Vec<Account>,
    journal: Vec<JournalEntry>,
    sessions: Vec<AttendanceSession>,
    departments: Vec<Department>,
    positions: Vec<Position>,
    products: Vec<Product>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn account_name(&self, account_id: i64) -> String {
        self.accounts
            .iter()
            .find(|a| a.id == account_id)
            .map(|a| a.name.clone())
            .unwrap_or_default()
    }

    fn employee_matches(&self, account_id: i64, employee_id: Option<&str>) -> bool {
        match employee_id {
            None => true,
            Some(employee_id) => self
                .accounts
                .iter()
                .any(|a| a.id == account_id && a.employee_id == employee_id),
        }
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let tables = Tables {
            departments: vec![
                Department {
                    id: 1,
                    name: "General".to_owned(),
                },
                Department {
                    id: 2,
                    name: "Engineering".to_owned(),
                },
            ],
            positions: vec![
                Position {
                    id: 1,
                    name: "Staff".to_owned(),
                },
                Position {
                    id: 2,
                    name: "Manager".to_owned(),
                },
            ],
            products: vec![
                Product {
                    id: 1,
                    name: "Coffee".to_owned(),
                    price: Decimal::new(1500, 2),
                    category: "drink".to_owned(),
                    available: true,
                },
                Product {
                    id: 2,
                    name: "Sandwich".to_owned(),
                    price: Decimal::new(3500, 2),
                    category: "food".to_owned(),
                    available: false,
                },
            ],
            last_id: 100,
            ..Default::default()
        };

        Self {
            tables: Arc::new(Mutex::new(tables)),
            failing_commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let the next `count` commits fail with a retryable store failure.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Overwrite a cached balance behind the service's back.
    pub async fn tamper_balance(&self, account_id: i64, balance: Decimal) {
        let mut tables = self.tables.lock().await;
        if let Some(account) = tables.accounts.iter_mut().find(|a| a.id == account_id) {
            account.balance = balance;
        }
    }

    pub async fn account_count(&self) -> usize {
        self.tables.lock().await.accounts.len()
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.tables.lock().await.journal.clone()
    }

    pub async fn sessions(&self) -> Vec<AttendanceSession> {
        self.tables.lock().await.sessions.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> ServiceResult<Box<dyn UnitOfWork>> {
        let guard = self.tables.clone().lock_owned().await;
        let snapshot = guard.clone();

        Ok(Box::new(MemoryUnitOfWork {
            guard,
            snapshot: Some(snapshot),
            failing_commits: self.failing_commits.clone(),
        }))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Option<Tables>,
    failing_commits: Arc<AtomicUsize>,
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> ServiceResult<()> {
        let mut this = self;
        let should_fail = this
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ServiceError::retryable("could not serialize access"));
        }

        this.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ServiceResult<()> {
        Ok(())
    }

    async fn find_account_by_card_id(&mut self, card_id: &str) -> ServiceResult<Option<Account>> {
        Ok(self
            .guard
            .accounts
            .iter()
            .find(|a| a.card_id == card_id)
            .cloned())
    }

    async fn find_account_by_employee_id(
        &mut self,
        employee_id: &str,
    ) -> ServiceResult<Option<Account>> {
        Ok(self
            .guard
            .accounts
            .iter()
            .find(|a| a.employee_id == employee_id)
            .cloned())
    }

    async fn lock_account(&mut self, id: i64) -> ServiceResult<Option<Account>> {
        Ok(self.guard.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn insert_account(&mut self, account: NewAccount) -> ServiceResult<Account> {
        let accounts = &self.guard.accounts;
        if accounts.iter().any(|a| a.card_id == account.card_id) {
            return Err(ServiceError::Conflict(CARD_EXISTS.to_owned()));
        }
        if accounts.iter().any(|a| a.employee_id == account.employee_id) {
            return Err(ServiceError::Conflict(EMPLOYEE_EXISTS.to_owned()));
        }

        let account = Account {
            id: self.guard.next_id(),
            card_id: account.card_id,
            employee_id: account.employee_id,
            name: account.name,
            role: account.role,
            active: true,
            balance: Decimal::ZERO,
            default_pin: true,
            pin_hash: account.pin_hash,
            public_key: account.public_key,
            date_of_birth: None,
            department_id: 1,
            position_id: 1,
        };
        self.guard.accounts.push(account.clone());
        Ok(account)
    }

    async fn update_account(&mut self, account: &Account) -> ServiceResult<()> {
        if let Some(stored) = self.guard.accounts.iter_mut().find(|a| a.id == account.id) {
            let balance = stored.balance;
            *stored = account.clone();
            stored.balance = balance;
        }
        Ok(())
    }

    async fn delete_account(&mut self, id: i64) -> ServiceResult<()> {
        let tables = &mut *self.guard;
        tables.journal.retain(|e| e.account_id != id);
        tables.sessions.retain(|s| s.account_id != id);
        tables.accounts.retain(|a| a.id != id);
        Ok(())
    }

    async fn get_account_profiles(&mut self) -> ServiceResult<Vec<AccountProfile>> {
        let tables = &*self.guard;
        Ok(tables
            .accounts
            .iter()
            .map(|account| AccountProfile {
                account: account.clone(),
                department: tables
                    .departments
                    .iter()
                    .find(|d| d.id == account.department_id)
                    .map(|d| d.name.clone()),
                position: tables
                    .positions
                    .iter()
                    .find(|p| p.id == account.position_id)
                    .map(|p| p.name.clone()),
            })
            .collect())
    }

    async fn count_employee_ids_with_prefix(&mut self, prefix: &str) -> ServiceResult<i64> {
        Ok(self
            .guard
            .accounts
            .iter()
            .filter(|a| a.employee_id.starts_with(prefix))
            .count() as i64)
    }

    async fn append_journal_entry(&mut self, entry: NewJournalEntry) -> ServiceResult<JournalEntry> {
        let tables = &mut *self.guard;
        let account = tables
            .accounts
            .iter_mut()
            .find(|a| a.id == entry.account_id)
            .ok_or_else(|| ServiceError::store("foreign key violation on journal entry"))?;
        account.balance = entry.balance_after;

        let entry = JournalEntry {
            id: tables.next_id(),
            account_id: entry.account_id,
            kind: entry.kind,
            amount: entry.amount,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            description: entry.description,
            signature: entry.signature,
            timestamp: entry.timestamp,
        };
        tables.journal.push(entry.clone());
        Ok(entry)
    }

    async fn get_journal_by_account(&mut self, account_id: i64) -> ServiceResult<Vec<JournalEntry>> {
        Ok(self
            .guard
            .journal
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_journal_history(
        &mut self,
        employee_id: Option<&str>,
    ) -> ServiceResult<Vec<Owned<JournalEntry>>> {
        let tables = &*self.guard;
        let mut entries: Vec<Owned<JournalEntry>> = tables
            .journal
            .iter()
            .filter(|e| tables.employee_matches(e.account_id, employee_id))
            .map(|e| Owned {
                owner_name: tables.account_name(e.account_id),
                record: e.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then(b.record.id.cmp(&a.record.id))
        });
        Ok(entries)
    }

    async fn restore_balance(&mut self, account_id: i64, balance: Decimal) -> ServiceResult<()> {
        if let Some(account) = self.guard.accounts.iter_mut().find(|a| a.id == account_id) {
            account.balance = balance;
        }
        Ok(())
    }

    async fn get_open_sessions(
        &mut self,
        account_id: i64,
    ) -> ServiceResult<Vec<AttendanceSession>> {
        let mut sessions: Vec<AttendanceSession> = self
            .guard
            .sessions
            .iter()
            .filter(|s| s.account_id == account_id && s.is_open())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.check_in.cmp(&a.check_in).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn insert_session(
        &mut self,
        session: NewAttendanceSession,
    ) -> ServiceResult<AttendanceSession> {
        let tables = &mut *self.guard;
        let opens_second = session.state == SessionState::Open
            && tables
                .sessions
                .iter()
                .any(|s| s.account_id == session.account_id && s.is_open());
        if opens_second {
            return Err(ServiceError::Conflict(OPEN_SESSION_EXISTS.to_owned()));
        }

        let session = AttendanceSession {
            id: tables.next_id(),
            account_id: session.account_id,
            work_date: session.work_date,
            check_in: Some(session.check_in),
            state: session.state,
            note: session.note,
            created_at: session.check_in,
        };
        tables.sessions.push(session.clone());
        Ok(session)
    }

    async fn close_session(
        &mut self,
        session_id: i64,
        check_out: DateTime<Utc>,
        note: Option<String>,
    ) -> ServiceResult<()> {
        if let Some(session) = self.guard.sessions.iter_mut().find(|s| s.id == session_id) {
            session.state = SessionState::Finished { check_out };
            session.note = note;
        }
        Ok(())
    }

    async fn get_sessions_by_account(
        &mut self,
        account_id: i64,
    ) -> ServiceResult<Vec<AttendanceSession>> {
        Ok(self
            .guard
            .sessions
            .iter()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_session_history(
        &mut self,
        employee_id: Option<&str>,
    ) -> ServiceResult<Vec<Owned<AttendanceSession>>> {
        let tables = &*self.guard;
        let mut sessions: Vec<Owned<AttendanceSession>> = tables
            .sessions
            .iter()
            .filter(|s| tables.employee_matches(s.account_id, employee_id))
            .map(|s| Owned {
                owner_name: tables.account_name(s.account_id),
                record: s.clone(),
            })
            .collect();
        sessions.sort_by(|a, b| {
            b.record
                .check_in
                .cmp(&a.record.check_in)
                .then(b.record.id.cmp(&a.record.id))
        });
        Ok(sessions)
    }

    async fn get_departments(&mut self) -> ServiceResult<Vec<Department>> {
        Ok(self.guard.departments.clone())
    }

    async fn get_positions(&mut self) -> ServiceResult<Vec<Position>> {
        Ok(self.guard.positions.clone())
    }

    async fn get_available_products(&mut self) -> ServiceResult<Vec<Product>> {
        Ok(self
            .guard
            .products
            .iter()
            .filter(|p| p.available)
            .cloned()
            .collect())
    }
}
