use rust_decimal::Decimal;

use crate::error::ServiceResult;
use crate::models::{AttendanceSession, HistoryEntry, HistoryKind, JournalEntry, Owned, SessionState};

use super::LedgerService;

fn session_entries(session: Owned<AttendanceSession>) -> Vec<HistoryEntry> {
    let Owned {
        owner_name,
        record: session,
    } = session;

    let entry = |kind, timestamp| HistoryEntry {
        kind,
        timestamp,
        name: owner_name.clone(),
        description: session.note.clone(),
        amount: Decimal::ZERO,
        balance_after: Decimal::ZERO,
    };

    match session.state {
        SessionState::Restricted => vec![entry(HistoryKind::Restricted, session.check_in)],
        SessionState::Open => vec![entry(HistoryKind::CheckIn, session.check_in)],
        SessionState::Finished { check_out } => vec![
            entry(HistoryKind::CheckIn, session.check_in),
            entry(HistoryKind::CheckOut, Some(check_out)),
        ],
    }
}

fn journal_entry(entry: Owned<JournalEntry>) -> HistoryEntry {
    HistoryEntry {
        kind: entry.record.kind.into(),
        timestamp: Some(entry.record.timestamp),
        name: entry.owner_name,
        description: entry.record.description,
        amount: entry.record.amount,
        balance_after: entry.record.balance_after,
    }
}

/// Merge sessions and journal entries into one feed, newest first.
///
/// Entries without a timestamp sort last. Entries with equal timestamps keep their input order,
/// sessions before journal entries.
pub fn merge_history(
    sessions: Vec<Owned<AttendanceSession>>,
    journal: Vec<Owned<JournalEntry>>,
) -> Vec<HistoryEntry> {
    let mut history: Vec<HistoryEntry> = sessions
        .into_iter()
        .flat_map(session_entries)
        .chain(journal.into_iter().map(journal_entry))
        .collect();

    // `None` is the smallest `Option`, so it ends up at the back
    history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    history
}

impl LedgerService {
    /// Attendance and transaction history, optionally of a single employee.
    pub async fn get_history(&self, employee_id: Option<&str>) -> ServiceResult<Vec<HistoryEntry>> {
        let employee_id = employee_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned);

        let (sessions, journal) = self
            .atomically("get history", move |unit| {
                let employee_id = employee_id.clone();
                Box::pin(async move {
                    let sessions = unit.get_session_history(employee_id.as_deref()).await?;
                    let journal = unit.get_journal_history(employee_id.as_deref()).await?;
                    Ok((sessions, journal))
                })
            })
            .await?;

        Ok(merge_history(sessions, journal))
    }
}
