//! Ledger and attendance operations
//!
//! Every operation runs inside exactly one unit of work of the store. A unit of work that the
//! store aborted with a retryable failure (serialization failure, deadlock) is run once more
//! before the failure reaches the caller.
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{error, warn};

use crate::clock::Clock;
use crate::database::{Store, UnitOfWork};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Account, AccountLookup};

mod attendance;
mod directory;
mod history;
mod ledger;

pub use attendance::AttendanceRequest;
pub use directory::{format_date_of_birth, parse_date_of_birth};
pub use ledger::{RegisterRequest, TransactionRequest};

pub const CARD_EXISTS: &str = "Card exists";
pub const EMPLOYEE_EXISTS: &str = "Employee id exists";
pub const USER_NOT_FOUND: &str = "User not found.";
pub const OPEN_SESSION_EXISTS: &str = "Open session exists. Must check out first.";
pub const NO_OPEN_SESSION: &str = "No open session found to check out.";

/// First attempt plus one retry.
const MAX_ATTEMPTS: usize = 2;

pub struct LedgerService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Run `work` inside a unit of work and commit it.
    ///
    /// Business rejections roll the unit back and are returned unchanged.
    async fn atomically<T, F>(&self, operation: &str, mut work: F) -> ServiceResult<T>
    where
        T: Send,
        F: for<'u> FnMut(&'u mut dyn UnitOfWork) -> BoxFuture<'u, ServiceResult<T>> + Send,
    {
        let mut attempt = 1;
        loop {
            let result = self.run_once(&mut work).await;
            match result {
                Err(ref e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!("{} was aborted by the store, retrying: {}", operation, e);
                    attempt += 1;
                }
                Err(ServiceError::StoreFailure { ref cause, .. }) => {
                    error!("{} failed after {} attempt(s): {}", operation, attempt, cause);
                    return result;
                }
                _ => return result,
            }
        }
    }

    async fn run_once<T, F>(&self, work: &mut F) -> ServiceResult<T>
    where
        T: Send,
        F: for<'u> FnMut(&'u mut dyn UnitOfWork) -> BoxFuture<'u, ServiceResult<T>> + Send,
    {
        let mut unit = self.store.begin().await?;

        match work(unit.as_mut()).await {
            Ok(value) => {
                unit.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = unit.rollback().await {
                    warn!("Rollback failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }
}

/// Find the account a caller refers to, without locking it.
async fn resolve_account(
    unit: &mut dyn UnitOfWork,
    lookup: &AccountLookup,
) -> ServiceResult<Option<Account>> {
    match lookup {
        AccountLookup::CardId(card_id) => unit.find_account_by_card_id(card_id).await,
        AccountLookup::EmployeeId(employee_id) => {
            unit.find_account_by_employee_id(employee_id).await
        }
        AccountLookup::CardOrEmployeeId(key) => match unit.find_account_by_card_id(key).await? {
            Some(account) => Ok(Some(account)),
            None => unit.find_account_by_employee_id(key).await,
        },
    }
}

/// Resolve and lock the account, or fail with `NotFound`.
async fn lock_existing_account(
    unit: &mut dyn UnitOfWork,
    lookup: &AccountLookup,
) -> ServiceResult<Account> {
    let account = resolve_account(unit, lookup)
        .await?
        .ok_or_else(|| ServiceError::NotFound(USER_NOT_FOUND.to_owned()))?;

    unit.lock_account(account.id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(USER_NOT_FOUND.to_owned()))
}
