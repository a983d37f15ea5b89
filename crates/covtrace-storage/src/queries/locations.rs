// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only raw location log.

use chrono::NaiveDate;
use covtrace_core::{CovtraceError, LocationEvent};
use rusqlite::params;

use crate::database::Database;
use crate::queries::{format_ts, parse_ts, to_sql_int};

/// Append an event. Returns its log sequence number.
pub async fn append_location(db: &Database, event: &LocationEvent) -> Result<i64, CovtraceError> {
    let event = event.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO location_events
                    (user_id, latitude, longitude, geofence_id, time_bucket_id,
                     event_date, timestamp, accuracy, speed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.user_id,
                    event.latitude,
                    event.longitude,
                    event.geofence_id,
                    event.time_bucket_id,
                    event.date().to_string(),
                    format_ts(&event.timestamp),
                    event.accuracy,
                    event.speed,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Events recorded on `date` (UTC), in log order.
pub async fn locations_on(
    db: &Database,
    date: NaiveDate,
    offset: u64,
    limit: u64,
) -> Result<Vec<LocationEvent>, CovtraceError> {
    let date = date.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, latitude, longitude, geofence_id, time_bucket_id,
                        timestamp, accuracy, speed
                 FROM location_events
                 WHERE event_date = ?1
                 ORDER BY id ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(
                params![date, to_sql_int(limit), to_sql_int(offset)],
                |row| {
                    let ts: String = row.get(5)?;
                    Ok(LocationEvent {
                        user_id: row.get(0)?,
                        latitude: row.get(1)?,
                        longitude: row.get(2)?,
                        geofence_id: row.get(3)?,
                        time_bucket_id: row.get(4)?,
                        timestamp: parse_ts(5, &ts)?,
                        accuracy: row.get(6)?,
                        speed: row.get(7)?,
                    })
                },
            )?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::setup_db;
    use chrono::{TimeZone, Utc};

    fn event(user: &str, day: u32, hour: u32) -> LocationEvent {
        LocationEvent {
            user_id: user.to_string(),
            latitude: -1.286389,
            longitude: 36.817223,
            geofence_id: "-1.286250,36.817083".to_string(),
            time_bucket_id: (hour * 12).to_string(),
            timestamp: Utc.with_ymd_and_hms(2020, 3, day, hour, 0, 0).unwrap(),
            accuracy: Some(5.0),
            speed: None,
        }
    }

    #[tokio::test]
    async fn append_returns_increasing_sequence() {
        let (db, _dir) = setup_db().await;
        let a = append_location(&db, &event("+1", 2, 9)).await.unwrap();
        let b = append_location(&db, &event("+1", 2, 10)).await.unwrap();
        assert!(b > a, "sequence numbers must increase: {a} then {b}");
    }

    #[tokio::test]
    async fn locations_on_reads_only_that_day_in_order() {
        let (db, _dir) = setup_db().await;
        append_location(&db, &event("+1", 1, 23)).await.unwrap();
        append_location(&db, &event("+2", 2, 8)).await.unwrap();
        append_location(&db, &event("+1", 2, 9)).await.unwrap();
        append_location(&db, &event("+3", 3, 0)).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2020, 3, 2).unwrap();
        let events = locations_on(&db, day, 0, 100).await.unwrap();
        let users: Vec<_> = events.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(users, vec!["+2", "+1"]);
        assert_eq!(events[0], event("+2", 2, 8));

        let paged = locations_on(&db, day, 1, 100).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].user_id, "+1");
    }
}
