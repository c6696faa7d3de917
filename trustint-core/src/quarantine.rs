//! Quarantine ticket lifecycle.
//!
//! Tickets are minted by the intake state machine; this module covers the
//! operator side: listing open tickets, inspecting one together with its
//! originating inbox entry, and resolving it. Resolution is irrevocable.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::ledger::{rfc3339_utc_now, Ledger, LedgerError};
use crate::store::{Store, StoreError};
use trustint_spec::event;

/// Errors raised by ticket operations.
#[derive(Debug, Error)]
pub enum QuarantineError {
    /// No ticket with the given id.
    #[error("ticket '{0}' not found")]
    NotFound(String),
    /// Ticket already carries a `resolved_at`.
    #[error("ticket '{0}' is already resolved")]
    AlreadyResolved(String),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Ledger append failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<rusqlite::Error> for QuarantineError {
    fn from(err: rusqlite::Error) -> Self {
        QuarantineError::Store(StoreError::Sqlite(err))
    }
}

/// One quarantine ticket.
#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    /// Ticket id (`T` + 8 uppercase hex).
    pub id: String,
    /// Rejection reason, prefixed with the reject code.
    pub reason: String,
    /// Content hash of the rejected body (`unknown` for processing errors).
    pub sha256: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Resolution timestamp, if closed.
    pub resolved_at: Option<String>,
    /// Operator note written at resolution.
    pub note: Option<String>,
}

/// Ticket joined with its originating inbox entry.
#[derive(Debug, Clone, Serialize)]
pub struct TicketDetail {
    /// The ticket itself.
    #[serde(flatten)]
    pub ticket: Ticket,
    /// Path the file was submitted from.
    pub source_path: Option<String>,
    /// Size of the rejected body in bytes.
    pub size_bytes: Option<i64>,
    /// Policy in force at rejection time.
    pub policy_id: Option<String>,
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get("id")?,
        reason: row.get("reason")?,
        sha256: row.get("sha256")?,
        created_at: row.get("created_at")?,
        resolved_at: row.get("resolved_at")?,
        note: row.get("note")?,
    })
}

/// Open tickets, oldest first.
pub fn list_open(store: &Store) -> Result<Vec<Ticket>, QuarantineError> {
    let mut stmt = store.connection().prepare(
        "SELECT id, reason, sha256, created_at, resolved_at, note
         FROM quarantine_tickets WHERE resolved_at IS NULL ORDER BY created_at ASC, id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut tickets = Vec::new();
    while let Some(row) = rows.next()? {
        tickets.push(ticket_from_row(row)?);
    }
    Ok(tickets)
}

/// One ticket joined with its REJECT inbox entry.
pub fn show(store: &Store, ticket_id: &str) -> Result<TicketDetail, QuarantineError> {
    let detail = store
        .connection()
        .query_row(
            "SELECT q.id, q.reason, q.sha256, q.created_at, q.resolved_at, q.note,
                    i.source_path, i.size_bytes, i.policy_id
             FROM quarantine_tickets q
             LEFT JOIN inbox_log i ON i.ticket_id = q.id AND i.decision = 'REJECT'
             WHERE q.id = ?1",
            params![ticket_id],
            |row| {
                Ok(TicketDetail {
                    ticket: ticket_from_row(row)?,
                    source_path: row.get("source_path")?,
                    size_bytes: row.get("size_bytes")?,
                    policy_id: row.get("policy_id")?,
                })
            },
        )
        .optional()?;
    detail.ok_or_else(|| QuarantineError::NotFound(ticket_id.to_string()))
}

/// Close an open ticket, stamping `resolved_at` and the operator note, and
/// record a `QUARANTINE_RESOLVE` ledger event. Re-resolving fails.
pub fn resolve(
    store: &mut Store,
    ledger: &Ledger,
    ticket_id: &str,
    note: &str,
) -> Result<Ticket, QuarantineError> {
    let resolved_at = rfc3339_utc_now();
    {
        let tx = store.transaction()?;
        let existing: Option<Option<String>> = tx
            .query_row(
                "SELECT resolved_at FROM quarantine_tickets WHERE id = ?1",
                params![ticket_id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => return Err(QuarantineError::NotFound(ticket_id.to_string())),
            Some(Some(_)) => {
                return Err(QuarantineError::AlreadyResolved(ticket_id.to_string()))
            }
            Some(None) => {}
        }
        tx.execute(
            "UPDATE quarantine_tickets SET resolved_at = ?1, note = ?2 WHERE id = ?3",
            params![resolved_at, note, ticket_id],
        )?;
        tx.commit().map_err(StoreError::from)?;
    }

    ledger.append_kv(&[
        ("event", json!(event::QUARANTINE_RESOLVE)),
        ("ticket", json!(ticket_id)),
        ("note", json!(note)),
    ])?;
    tracing::info!(ticket = %ticket_id, "quarantine ticket resolved");

    let ticket = store.connection().query_row(
        "SELECT id, reason, sha256, created_at, resolved_at, note
         FROM quarantine_tickets WHERE id = ?1",
        params![ticket_id],
        ticket_from_row,
    )?;
    Ok(ticket)
}
