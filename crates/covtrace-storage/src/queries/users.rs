// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User registry operations.

use covtrace_core::{CovtraceError, InfectionStatus, UserFilter, UserRecord};
use rusqlite::params;
use rusqlite::types::Value;

use crate::database::Database;
use crate::queries::{parse_enum, to_sql_int};

const USER_COLUMNS: &str = "phone_number, full_name, county, infection_status, device_token";

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserRecord, rusqlite::Error> {
    let status: String = row.get(3)?;
    Ok(UserRecord {
        phone_number: row.get(0)?,
        full_name: row.get(1)?,
        county: row.get(2)?,
        infection_status: parse_enum(3, &status)?,
        device_token: row.get(4)?,
    })
}

/// Insert a user, or replace every field of an existing one.
pub async fn upsert_user(db: &Database, user: &UserRecord) -> Result<(), CovtraceError> {
    let user = user.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO users (phone_number, full_name, county, infection_status, device_token)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(phone_number) DO UPDATE SET
                    full_name = excluded.full_name,
                    county = excluded.county,
                    infection_status = excluded.infection_status,
                    device_token = excluded.device_token,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![
                    user.phone_number,
                    user.full_name,
                    user.county,
                    user.infection_status.to_string(),
                    user.device_token,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_user(db: &Database, phone: &str) -> Result<Option<UserRecord>, CovtraceError> {
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE phone_number = ?1"
            ))?;
            match stmt.query_row(params![phone], row_to_user) {
                Ok(user) => Ok(Some(user)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Set a user's status. Any status may follow any other.
pub async fn update_infection_status(
    db: &Database,
    phone: &str,
    status: InfectionStatus,
) -> Result<(), CovtraceError> {
    let key = phone.to_string();
    let updated = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE users SET infection_status = ?1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE phone_number = ?2",
                params![status.to_string(), key],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    if updated == 0 {
        return Err(CovtraceError::not_found("user", phone));
    }
    Ok(())
}

/// Users matching any filter, ordered by phone number.
pub async fn list_users(
    db: &Database,
    filters: &[UserFilter],
    offset: u64,
    limit: u64,
) -> Result<Vec<UserRecord>, CovtraceError> {
    if filters.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut clauses = Vec::with_capacity(filters.len());
    let mut values: Vec<Value> = Vec::new();
    for filter in filters {
        match filter {
            UserFilter::All => clauses.push("1 = 1".to_string()),
            UserFilter::County(county) => {
                values.push(Value::Text(county.clone()));
                clauses.push(format!("county = ?{}", values.len()));
            }
            UserFilter::Status(status) => {
                values.push(Value::Text(status.to_string()));
                clauses.push(format!("infection_status = ?{}", values.len()));
            }
        }
    }
    values.push(Value::Integer(to_sql_int(limit)));
    let limit_idx = values.len();
    values.push(Value::Integer(to_sql_int(offset)));
    let offset_idx = values.len();

    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {}
         ORDER BY phone_number ASC LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
        clauses.join(" OR ")
    );

    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), row_to_user)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
