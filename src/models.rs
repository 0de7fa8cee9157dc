use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    /// Unknown role names fall back to the least privileged role.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("ADMIN") {
            Role::Admin
        } else {
            Role::User
        }
    }
}

/// Represent an employee and the cached balance of their card
#[derive(Debug, PartialEq, Clone)]
pub struct Account {
    pub id: i64,
    pub card_id: String,
    pub employee_id: String,
    pub name: String,
    pub role: Role,
    pub active: bool,
    pub balance: Decimal,
    pub default_pin: bool,
    pub pin_hash: Option<String>,
    pub public_key: Option<Vec<u8>>,
    pub date_of_birth: Option<NaiveDate>,
    pub department_id: i64,
    pub position_id: i64,
}

/// Values of an account that does not exist yet
#[derive(Debug, PartialEq, Clone)]
pub struct NewAccount {
    pub card_id: String,
    pub employee_id: String,
    pub name: String,
    pub role: Role,
    pub public_key: Option<Vec<u8>>,
    pub pin_hash: Option<String>,
}

/// Account together with its resolved department and position names
#[derive(Debug, PartialEq, Clone)]
pub struct AccountProfile {
    pub account: Account,
    pub department: Option<String>,
    pub position: Option<String>,
}

/// How a caller identifies an account
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AccountLookup {
    CardId(String),
    EmployeeId(String),
    /// Try the card id first, then the employee id.
    CardOrEmployeeId(String),
}

impl AccountLookup {
    /// Terminals send either key in the same field. An empty key can only be an employee id.
    pub fn from_terminal_key(key: &str) -> Self {
        if key.is_empty() {
            AccountLookup::EmployeeId(key.to_owned())
        } else {
            AccountLookup::CardOrEmployeeId(key.to_owned())
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransactionKind {
    TopUp,
    Payment,
}

impl TransactionKind {
    /// Positive amounts top up the card, everything else is a payment.
    pub fn from_signed_amount(amount: Decimal) -> Self {
        if amount > Decimal::ZERO {
            TransactionKind::TopUp
        } else {
            TransactionKind::Payment
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::TopUp => "TOPUP",
            TransactionKind::Payment => "PAYMENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TOPUP" => Some(TransactionKind::TopUp),
            "PAYMENT" => Some(TransactionKind::Payment),
            _ => None,
        }
    }

    /// Apply an unsigned amount of this kind to a balance.
    pub fn apply(&self, balance: Decimal, amount: Decimal) -> Decimal {
        match self {
            TransactionKind::TopUp => balance + amount,
            TransactionKind::Payment => balance - amount,
        }
    }
}

/// Immutable record of a balance change
#[derive(Debug, PartialEq, Clone)]
pub struct JournalEntry {
    pub id: i64,
    pub account_id: i64,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub signature: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct NewJournalEntry {
    pub account_id: i64,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub signature: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
}

pub const STATUS_WORKING: &str = "Working";
pub const STATUS_FINISHED: &str = "Finished";
pub const STATUS_RESTRICTED: &str = "Restricted Access";

/// Lifecycle of an attendance session
///
/// A restricted access event is terminal from the start, it is never open and never closed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SessionState {
    Open,
    Finished { check_out: DateTime<Utc> },
    Restricted,
}

impl SessionState {
    pub fn status(&self) -> &'static str {
        match self {
            SessionState::Open => STATUS_WORKING,
            SessionState::Finished { .. } => STATUS_FINISHED,
            SessionState::Restricted => STATUS_RESTRICTED,
        }
    }

    pub fn check_out(&self) -> Option<DateTime<Utc>> {
        match self {
            SessionState::Finished { check_out } => Some(*check_out),
            _ => None,
        }
    }

    /// Rebuild the state from its stored columns.
    ///
    /// A set check out always means finished. Otherwise only the restricted status differs from
    /// an open session, which also covers rows written without a status.
    pub fn from_columns(status: Option<&str>, check_out: Option<DateTime<Utc>>) -> Self {
        match (status, check_out) {
            (_, Some(check_out)) => SessionState::Finished { check_out },
            (Some(STATUS_RESTRICTED), None) => SessionState::Restricted,
            _ => SessionState::Open,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct AttendanceSession {
    pub id: i64,
    pub account_id: i64,
    pub work_date: NaiveDate,
    pub check_in: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AttendanceSession {
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct NewAttendanceSession {
    pub account_id: i64,
    pub work_date: NaiveDate,
    pub check_in: DateTime<Utc>,
    pub state: SessionState,
    pub note: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AttendanceEventType {
    CheckIn,
    CheckOut,
    Restricted,
}

impl AttendanceEventType {
    /// Terminals send anything that is neither a check in nor a check out as restricted.
    pub fn parse(value: &str) -> Self {
        match value {
            "CHECK_IN" => AttendanceEventType::CheckIn,
            "CHECK_OUT" => AttendanceEventType::CheckOut,
            _ => AttendanceEventType::Restricted,
        }
    }
}

/// A journal or session row together with the name of its owner
#[derive(Debug, PartialEq, Clone)]
pub struct Owned<T> {
    pub owner_name: String,
    pub record: T,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HistoryKind {
    CheckIn,
    CheckOut,
    Restricted,
    TopUp,
    Payment,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::CheckIn => "CHECK_IN",
            HistoryKind::CheckOut => "CHECK_OUT",
            HistoryKind::Restricted => "RESTRICTED",
            HistoryKind::TopUp => "TOPUP",
            HistoryKind::Payment => "PAYMENT",
        }
    }
}

impl From<TransactionKind> for HistoryKind {
    fn from(value: TransactionKind) -> Self {
        match value {
            TransactionKind::TopUp => HistoryKind::TopUp,
            TransactionKind::Payment => HistoryKind::Payment,
        }
    }
}

/// One line of the merged history view, never persisted
#[derive(Debug, PartialEq, Clone)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub name: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub balance_after: Decimal,
}

/// Changes requested by the admin profile editor
#[derive(Debug, PartialEq, Clone)]
pub struct ProfileUpdate {
    pub card_id: String,
    pub employee_id: String,
    pub name: String,
    pub date_of_birth: String,
    pub department: String,
    pub position: String,
    pub default_pin: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Department {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Position {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub category: String,
    pub available: bool,
}

/// Result of replaying the journal of one account
#[derive(Debug, PartialEq, Clone)]
pub struct BalanceAudit {
    pub account_id: i64,
    pub employee_id: String,
    pub stored_balance: Decimal,
    pub replayed_balance: Decimal,
    /// Entries whose `balance_before` does not match the previous `balance_after`, or whose
    /// amounts do not add up.
    pub broken_entries: Vec<i64>,
}

impl BalanceAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.replayed_balance && self.broken_entries.is_empty()
    }
}
