// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbox message rows and the per-user inbox.

use covtrace_core::{CovtraceError, Message, Payload};
use rusqlite::params;

use crate::database::Database;
use crate::queries::{format_ts, parse_enum, parse_ts};

/// Insert every message in one transaction. A failure on any row rolls back
/// the whole batch.
pub async fn insert_messages(db: &Database, messages: &[Message]) -> Result<(), CovtraceError> {
    let mut rows = Vec::with_capacity(messages.len());
    for msg in messages {
        rows.push((msg.clone(), msg.payload.to_json()?));
    }
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages
                        (id, user_phone, title, body, payload, message_type, sent, seen, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for (msg, payload) in &rows {
                    stmt.execute(params![
                        msg.id,
                        msg.user_phone,
                        msg.title,
                        msg.body,
                        payload,
                        msg.message_type.to_string(),
                        msg.sent,
                        msg.seen,
                        format_ts(&msg.created_at),
                    ])?;
                }
            }
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Flip `sent` on every listed row in one transaction.
pub async fn mark_messages_sent(db: &Database, ids: &[String]) -> Result<(), CovtraceError> {
    update_each(db, ids, "UPDATE messages SET sent = 1 WHERE id = ?1").await
}

/// Delete the listed rows that are still unsent, in one transaction.
pub async fn delete_messages(db: &Database, ids: &[String]) -> Result<(), CovtraceError> {
    update_each(db, ids, "DELETE FROM messages WHERE id = ?1 AND sent = 0").await
}

async fn update_each(db: &Database, ids: &[String], sql: &'static str) -> Result<(), CovtraceError> {
    let ids = ids.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(sql)?;
                for id in &ids {
                    stmt.execute(params![id])?;
                }
            }
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// A user's messages, newest first.
pub async fn list_messages(db: &Database, phone: &str) -> Result<Vec<Message>, CovtraceError> {
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_phone, title, body, payload, message_type, sent, seen, created_at
                 FROM messages WHERE user_phone = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map(params![phone], |row| {
                let payload: String = row.get(4)?;
                let message_type: String = row.get(5)?;
                let created_at: String = row.get(8)?;
                Ok(Message {
                    id: row.get(0)?,
                    user_phone: row.get(1)?,
                    title: row.get(2)?,
                    body: row.get(3)?,
                    payload: Payload::from_json(&payload).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            4,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    message_type: parse_enum(5, &message_type)?,
                    sent: row.get(6)?,
                    seen: row.get(7)?,
                    created_at: parse_ts(8, &created_at)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Flag one of `phone`'s messages as seen.
pub async fn mark_message_seen(
    db: &Database,
    phone: &str,
    message_id: &str,
) -> Result<(), CovtraceError> {
    let (owner, id) = (phone.to_string(), message_id.to_string());
    let updated = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET seen = 1 WHERE id = ?1 AND user_phone = ?2",
                params![id, owner],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    if updated == 0 {
        return Err(CovtraceError::not_found("message", message_id));
    }
    Ok(())
}
