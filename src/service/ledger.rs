use log::{info, warn};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Account, AccountLookup, BalanceAudit, JournalEntry, NewAccount, NewJournalEntry, Role,
    TransactionKind,
};

use super::{lock_existing_account, LedgerService, CARD_EXISTS, EMPLOYEE_EXISTS, USER_NOT_FOUND};

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRequest {
    pub card_id: String,
    pub employee_id: String,
    pub name: String,
    pub public_key_hex: String,
}

/// A signed balance change as submitted by a terminal
///
/// Posting the same request twice books it twice: every request is taken to be a distinct
/// physical event and there is no idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    pub lookup: AccountLookup,
    /// Positive amounts are top ups, zero and negative amounts are payments.
    pub amount: Decimal,
    pub description: String,
    pub signature_hex: String,
}

/// Money is booked with cent precision.
const MONEY_SCALE: u32 = 2;

fn decode_public_key(public_key_hex: &str) -> Option<Vec<u8>> {
    if public_key_hex.trim().is_empty() {
        return None;
    }
    match hex::decode(public_key_hex.trim()) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("Ignoring malformed public key: {}", e);
            None
        }
    }
}

/// Terminals without a signature send an empty string, which is kept as a single zero byte.
fn decode_signature(signature_hex: &str) -> Option<Vec<u8>> {
    let signature_hex = signature_hex.trim();
    if signature_hex.is_empty() {
        return Some(vec![0]);
    }
    match hex::decode(signature_hex) {
        Ok(signature) => Some(signature),
        Err(e) => {
            warn!("Ignoring malformed transaction signature: {}", e);
            None
        }
    }
}

/// Replay the journal of an account, oldest entry first.
///
/// The replayed balance is the `balance_after` of the latest entry, or zero without entries.
pub fn replay_journal(account: &Account, entries: &[JournalEntry]) -> BalanceAudit {
    let mut running = Decimal::ZERO;
    let mut broken_entries = Vec::new();

    for entry in entries {
        let chained = entry.balance_before == running;
        let adds_up = entry.kind.apply(entry.balance_before, entry.amount) == entry.balance_after;
        if !chained || !adds_up {
            broken_entries.push(entry.id);
        }
        running = entry.balance_after;
    }

    BalanceAudit {
        account_id: account.id,
        employee_id: account.employee_id.clone(),
        stored_balance: account.balance,
        replayed_balance: running,
        broken_entries,
    }
}

impl LedgerService {
    /// Create the account of a newly issued card.
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<Account> {
        let public_key = decode_public_key(&request.public_key_hex);

        let account = self
            .atomically("register", move |unit| {
                let request = request.clone();
                let public_key = public_key.clone();
                Box::pin(async move {
                    if unit.find_account_by_card_id(&request.card_id).await?.is_some() {
                        return Err(ServiceError::Conflict(CARD_EXISTS.to_owned()));
                    }
                    if unit
                        .find_account_by_employee_id(&request.employee_id)
                        .await?
                        .is_some()
                    {
                        return Err(ServiceError::Conflict(EMPLOYEE_EXISTS.to_owned()));
                    }

                    unit.insert_account(NewAccount {
                        card_id: request.card_id,
                        employee_id: request.employee_id,
                        name: request.name,
                        role: Role::User,
                        public_key,
                        pin_hash: None,
                    })
                    .await
                })
            })
            .await;

        match &account {
            Ok(account) => info!(
                "Registered card {} for employee {}",
                account.card_id, account.employee_id
            ),
            Err(ServiceError::Conflict(reason)) => info!("Registration rejected: {}", reason),
            Err(_) => {}
        }
        account
    }

    /// Book a signed amount on an account and return the new journal entry.
    ///
    /// The balance the terminal believes the card has is not consulted, the stored balance is
    /// authoritative.
    pub async fn post_transaction(&self, request: TransactionRequest) -> ServiceResult<JournalEntry> {
        let amount = request
            .amount
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
        let kind = TransactionKind::from_signed_amount(amount);
        let magnitude = amount.abs();
        let signature = decode_signature(&request.signature_hex);
        let clock = self.clock.clone();

        let entry = self
            .atomically("post transaction", move |unit| {
                let request = request.clone();
                let signature = signature.clone();
                let clock = clock.clone();
                Box::pin(async move {
                    let account = lock_existing_account(unit, &request.lookup).await?;
                    // Read under the lock so entries are stamped in chain order.
                    let timestamp = clock.now();

                    let balance_before = account.balance;
                    unit.append_journal_entry(NewJournalEntry {
                        account_id: account.id,
                        kind,
                        amount: magnitude,
                        balance_before,
                        balance_after: kind.apply(balance_before, magnitude),
                        description: Some(request.description),
                        signature,
                        timestamp,
                    })
                    .await
                })
            })
            .await?;

        info!(
            "Booked {} of {} on account {}, balance {} -> {}",
            kind.as_str(),
            entry.amount,
            entry.account_id,
            entry.balance_before,
            entry.balance_after
        );
        Ok(entry)
    }

    pub async fn get_balance(&self, employee_id: &str) -> ServiceResult<Decimal> {
        let employee_id = employee_id.to_owned();
        self.atomically("get balance", move |unit| {
            let employee_id = employee_id.clone();
            Box::pin(async move {
                unit.find_account_by_employee_id(&employee_id)
                    .await?
                    .map(|account| account.balance)
                    .ok_or_else(|| ServiceError::NotFound(USER_NOT_FOUND.to_owned()))
            })
        })
        .await
    }

    /// Replay the journal of every account and report the ones that do not match.
    pub async fn audit_balances(&self) -> ServiceResult<Vec<BalanceAudit>> {
        let audits = self
            .atomically("audit balances", |unit| {
                Box::pin(async move {
                    let mut audits = Vec::new();
                    for profile in unit.get_account_profiles().await? {
                        let entries = unit.get_journal_by_account(profile.account.id).await?;
                        let audit = replay_journal(&profile.account, &entries);
                        if !audit.is_consistent() {
                            audits.push(audit);
                        }
                    }
                    Ok(audits)
                })
            })
            .await?;

        for audit in &audits {
            warn!(
                "Balance of {} is {} but the journal says {} ({} broken entries)",
                audit.employee_id,
                audit.stored_balance,
                audit.replayed_balance,
                audit.broken_entries.len()
            );
        }
        Ok(audits)
    }

    /// Reset the cached balance of an account to the result of its journal.
    pub async fn rebuild_balance(&self, employee_id: &str) -> ServiceResult<BalanceAudit> {
        let lookup = AccountLookup::EmployeeId(employee_id.to_owned());

        let audit = self
            .atomically("rebuild balance", move |unit| {
                let lookup = lookup.clone();
                Box::pin(async move {
                    let account = lock_existing_account(unit, &lookup).await?;
                    let entries = unit.get_journal_by_account(account.id).await?;
                    let audit = replay_journal(&account, &entries);

                    if audit.stored_balance != audit.replayed_balance {
                        unit.restore_balance(account.id, audit.replayed_balance)
                            .await?;
                    }
                    Ok(audit)
                })
            })
            .await?;

        if audit.stored_balance != audit.replayed_balance {
            warn!(
                "Restored balance of {} from {} to {}",
                audit.employee_id, audit.stored_balance, audit.replayed_balance
            );
        }
        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn account(balance: Decimal) -> Account {
        Account {
            id: 7,
            card_id: "CARD-7".to_owned(),
            employee_id: "NV007".to_owned(),
            name: "Tran Van A".to_owned(),
            role: Role::User,
            active: true,
            balance,
            default_pin: true,
            pin_hash: None,
            public_key: None,
            date_of_birth: None,
            department_id: 1,
            position_id: 1,
        }
    }

    fn entry(id: i64, kind: TransactionKind, amount: i64, before: i64, after: i64) -> JournalEntry {
        JournalEntry {
            id,
            account_id: 7,
            kind,
            amount: Decimal::from(amount),
            balance_before: Decimal::from(before),
            balance_after: Decimal::from(after),
            description: None,
            signature: None,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, id as u32).unwrap(),
        }
    }

    #[test]
    fn test_replay_of_consistent_journal() {
        let entries = vec![
            entry(1, TransactionKind::TopUp, 100, 0, 100),
            entry(2, TransactionKind::Payment, 30, 100, 70),
        ];
        let audit = replay_journal(&account(Decimal::from(70)), &entries);
        assert!(audit.is_consistent());
        assert_eq!(audit.replayed_balance, Decimal::from(70));
    }

    #[test]
    fn test_replay_without_entries_is_zero() {
        let audit = replay_journal(&account(Decimal::ZERO), &[]);
        assert!(audit.is_consistent());

        let audit = replay_journal(&account(Decimal::from(5)), &[]);
        assert!(!audit.is_consistent());
        assert_eq!(audit.replayed_balance, Decimal::ZERO);
    }

    #[test]
    fn test_replay_reports_broken_chain() {
        let entries = vec![
            entry(1, TransactionKind::TopUp, 100, 0, 100),
            entry(2, TransactionKind::Payment, 30, 90, 60),
            entry(3, TransactionKind::TopUp, 10, 60, 80),
        ];
        let audit = replay_journal(&account(Decimal::from(80)), &entries);
        assert_eq!(audit.broken_entries, vec![2, 3]);
        assert_eq!(audit.replayed_balance, Decimal::from(80));
    }

    #[test]
    fn test_signature_decoding() {
        assert_eq!(decode_signature(""), Some(vec![0]));
        assert_eq!(decode_signature("  "), Some(vec![0]));
        assert_eq!(decode_signature("0aff"), Some(vec![0x0a, 0xff]));
        assert_eq!(decode_signature("xyz"), None);
    }

    #[test]
    fn test_public_key_decoding() {
        assert_eq!(decode_public_key(""), None);
        assert_eq!(decode_public_key("0102"), Some(vec![1, 2]));
        assert_eq!(decode_public_key("010"), None);
    }
}
