//! Tests against a real Postgres database, run with `cargo test -- --ignored` and `DATABASE_URL`
//! pointing at a server the test user may create databases on.
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::clock::ManualClock;
use crate::error::ServiceError;
use crate::models::{
    AccountLookup, AttendanceEventType, NewAccount, NewAttendanceSession, NewJournalEntry, Role,
    SessionState, TransactionKind,
};
use crate::service::{
    AttendanceRequest, LedgerService, TransactionRequest, CARD_EXISTS, EMPLOYEE_EXISTS,
};

use super::{PgStore, Store};

fn new_account(card_id: &str, employee_id: &str) -> NewAccount {
    NewAccount {
        card_id: card_id.to_owned(),
        employee_id: employee_id.to_owned(),
        name: format!("Holder of {card_id}"),
        role: Role::User,
        public_key: Some(vec![4, 2]),
        pin_hash: None,
    }
}

fn open_session(account_id: i64, state: SessionState) -> NewAttendanceSession {
    NewAttendanceSession {
        account_id,
        work_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        check_in: Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap(),
        state,
        note: Some("gate 1".to_owned()),
    }
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_account_crud(pool: PgPool) {
    let store = PgStore::from_pool(pool).await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let account = unit.insert_account(new_account("CARD-1", "NV001")).await.unwrap();
    assert_eq!(account.balance, Decimal::ZERO);
    assert_eq!(account.department_id, 1);
    assert!(account.default_pin);
    unit.commit().await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let duplicate = unit.insert_account(new_account("CARD-1", "NV002")).await;
    assert_eq!(duplicate, Err(ServiceError::Conflict(CARD_EXISTS.to_owned())));
    unit.rollback().await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let duplicate = unit.insert_account(new_account("CARD-2", "NV001")).await;
    assert_eq!(duplicate, Err(ServiceError::Conflict(EMPLOYEE_EXISTS.to_owned())));
    unit.rollback().await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let mut stored = unit.find_account_by_card_id("CARD-1").await.unwrap().unwrap();
    assert_eq!(stored, account);
    stored.name = "Renamed".to_owned();
    stored.date_of_birth = NaiveDate::from_ymd_opt(1990, 2, 14);
    stored.balance = Decimal::from(999);
    unit.update_account(&stored).await.unwrap();

    let reread = unit.find_account_by_employee_id("NV001").await.unwrap().unwrap();
    assert_eq!(reread.name, "Renamed");
    assert_eq!(reread.date_of_birth, stored.date_of_birth);
    assert_eq!(reread.balance, Decimal::ZERO);
    unit.commit().await.unwrap();
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_journal_moves_balance(pool: PgPool) {
    let store = PgStore::from_pool(pool).await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let account = unit.insert_account(new_account("CARD-1", "NV001")).await.unwrap();
    let locked = unit.lock_account(account.id).await.unwrap().unwrap();

    let entry = unit
        .append_journal_entry(NewJournalEntry {
            account_id: locked.id,
            kind: TransactionKind::TopUp,
            amount: Decimal::new(1250, 2),
            balance_before: locked.balance,
            balance_after: Decimal::new(1250, 2),
            description: Some("top up".to_owned()),
            signature: Some(vec![0]),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(entry.kind, TransactionKind::TopUp);

    let account = unit.lock_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.balance, Decimal::new(1250, 2));
    assert_eq!(unit.get_journal_by_account(account.id).await.unwrap(), vec![entry]);

    let history = unit.get_journal_history(Some("NV001")).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].owner_name, "Holder of CARD-1");
    assert!(unit.get_journal_history(Some("NV404")).await.unwrap().is_empty());
    unit.commit().await.unwrap();
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_single_open_session_index(pool: PgPool) {
    let store = PgStore::from_pool(pool).await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let account = unit.insert_account(new_account("CARD-1", "NV001")).await.unwrap();
    let open = unit
        .insert_session(open_session(account.id, SessionState::Open))
        .await
        .unwrap();
    unit.insert_session(open_session(account.id, SessionState::Restricted))
        .await
        .unwrap();
    unit.commit().await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let second = unit
        .insert_session(open_session(account.id, SessionState::Open))
        .await;
    assert!(matches!(second, Err(ServiceError::Conflict(_))));
    unit.rollback().await.unwrap();

    let mut unit = store.begin().await.unwrap();
    assert_eq!(unit.get_open_sessions(account.id).await.unwrap(), vec![open.clone()]);

    let check_out = open.check_in.unwrap() + Duration::hours(8);
    unit.close_session(open.id, check_out, Some("gate 1 (Out)".to_owned()))
        .await
        .unwrap();
    assert!(unit.get_open_sessions(account.id).await.unwrap().is_empty());

    let sessions = unit.get_sessions_by_account(account.id).await.unwrap();
    assert_eq!(sessions[0].state, SessionState::Finished { check_out });
    assert_eq!(sessions[1].state, SessionState::Restricted);
    unit.commit().await.unwrap();
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_delete_account_cascades(pool: PgPool) {
    let store = PgStore::from_pool(pool).await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let account = unit.insert_account(new_account("CARD-1", "NV001")).await.unwrap();
    unit.insert_session(open_session(account.id, SessionState::Open))
        .await
        .unwrap();
    unit.delete_account(account.id).await.unwrap();

    assert_eq!(unit.find_account_by_card_id("CARD-1").await.unwrap(), None);
    assert!(unit.get_session_history(None).await.unwrap().is_empty());
    unit.commit().await.unwrap();
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_lookups(pool: PgPool) {
    let store = PgStore::from_pool(pool).await.unwrap();

    let mut unit = store.begin().await.unwrap();
    assert_eq!(unit.get_departments().await.unwrap()[0].name, "General");
    assert_eq!(unit.get_positions().await.unwrap()[0].name, "Staff");

    unit.insert_account(new_account("CARD-1", "NV001")).await.unwrap();
    unit.insert_account(new_account("CARD-2", "NV002")).await.unwrap();
    unit.insert_account(new_account("CARD-3", "XX001")).await.unwrap();
    assert_eq!(unit.count_employee_ids_with_prefix("NV").await.unwrap(), 2);

    let profiles = unit.get_account_profiles().await.unwrap();
    assert_eq!(profiles.len(), 3);
    assert_eq!(profiles[0].department.as_deref(), Some("General"));
    unit.commit().await.unwrap();
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_service_on_postgres(pool: PgPool) {
    let store = PgStore::from_pool(pool).await.unwrap();
    let service = LedgerService::new(
        Arc::new(store.clone()),
        Arc::new(ManualClock::starting_at(2025, 6, 2)),
    );

    let mut unit = store.begin().await.unwrap();
    unit.insert_account(new_account("CARD-1", "NV001")).await.unwrap();
    unit.commit().await.unwrap();

    let (top_up, payment) = tokio::join!(
        service.post_transaction(TransactionRequest {
            lookup: AccountLookup::from_terminal_key("CARD-1"),
            amount: Decimal::from(50),
            description: "top up".to_owned(),
            signature_hex: String::new(),
        }),
        service.post_transaction(TransactionRequest {
            lookup: AccountLookup::from_terminal_key("NV001"),
            amount: Decimal::from(-20),
            description: "lunch".to_owned(),
            signature_hex: String::new(),
        }),
    );
    top_up.unwrap();
    payment.unwrap();
    assert_eq!(service.get_balance("NV001").await, Ok(Decimal::from(30)));

    let check_in = AttendanceRequest {
        employee_id: "NV001".to_owned(),
        event: AttendanceEventType::CheckIn,
        description: "gate 1".to_owned(),
    };
    let (a, b) = tokio::join!(
        service.log_attendance_event(check_in.clone()),
        service.log_attendance_event(check_in),
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

    assert_eq!(service.get_history(Some("NV001")).await.unwrap().len(), 3);
    assert!(service.audit_balances().await.unwrap().is_empty());
}
