// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot CLI commands. Each prints its result as JSON on stdout.
//!
//! The ephemeral store lives inside the process, so presence sets do not
//! outlive a command. `trace` therefore replays the durable location log for
//! the traced range before matching.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use covtrace_config::model::CovtraceConfig;
use covtrace_core::{
    CovtraceError, DurableStore, InfectionStatus, Operation, Payload, UserFilter, UserRecord,
};
use covtrace_notify::{BroadcastRequest, NotificationService};
use covtrace_presence::{Location, PresenceStore};

use crate::services::{Services, open_durable};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn print_json<T: Serialize>(value: &T) -> Result<(), CovtraceError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|e| CovtraceError::Internal(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

/// Polls until the operation reaches a terminal state.
pub async fn wait_for_operation(
    notifier: &NotificationService,
    id: &str,
) -> Result<Operation, CovtraceError> {
    loop {
        let op = notifier.operation(id).await?;
        if op.done {
            return Ok(op);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn register(
    config: &CovtraceConfig,
    user: UserRecord,
) -> Result<(), CovtraceError> {
    if user.phone_number.trim().is_empty() {
        return Err(CovtraceError::InvalidArgument("phone is required".into()));
    }
    let durable = open_durable(config).await?;
    durable.upsert_user(&user).await?;
    info!(phone = %user.phone_number, "user registered");
    print_json(&user)?;
    durable.close().await
}

pub async fn set_status(
    config: &CovtraceConfig,
    phone: &str,
    status: InfectionStatus,
) -> Result<(), CovtraceError> {
    let durable = open_durable(config).await?;
    durable.update_infection_status(phone, status).await?;
    let user = durable
        .get_user(phone)
        .await?
        .ok_or_else(|| CovtraceError::not_found("user", phone))?;
    print_json(&user)?;
    durable.close().await
}

pub async fn locate(
    config: &CovtraceConfig,
    phone: &str,
    location: Location,
    at: Option<DateTime<Utc>>,
) -> Result<(), CovtraceError> {
    let durable = open_durable(config).await?;
    let ephemeral = covtrace_ephemeral::open(&config.ephemeral).await?;
    let presence = PresenceStore::from_config(durable.clone(), ephemeral, &config.presence);
    let event = presence
        .record_presence(phone, location, at.unwrap_or_else(Utc::now))
        .await?;
    print_json(&event)?;
    durable.close().await
}

pub async fn send(
    services: &Services,
    phone: &str,
    title: &str,
    body: &str,
    payload: Payload,
) -> Result<(), CovtraceError> {
    let message = services
        .notifier
        .send_direct(phone, title, body, payload)
        .await?;
    print_json(&message)
}

pub async fn broadcast(services: &Services, request: BroadcastRequest) -> Result<(), CovtraceError> {
    let id = services.notifier.broadcast(request).await?;
    let op = wait_for_operation(&services.notifier, &id).await?;
    print_json(&op)
}

/// Runs the trace and waits for it and its alerts to finish. With an
/// in-process store the durable log from `since` to today is replayed first.
pub async fn trace(
    services: &Services,
    config: &CovtraceConfig,
    phone: &str,
    since: NaiveDate,
) -> Result<(), CovtraceError> {
    if config.ephemeral.url.is_none() {
        let today = Utc::now().date_naive();
        let mut replayed = 0;
        for date in since.iter_days().take_while(|d| *d <= today) {
            replayed += services.presence.replay_day(date).await?;
        }
        info!(replayed, %since, "presence replayed for trace");
    }

    let id = services.matcher.start(phone, since).await?;
    let op = wait_for_operation(&services.notifier, &id).await?;
    print_json(&op)
}

pub async fn messages(
    config: &CovtraceConfig,
    phone: &str,
    mark_seen: Option<&str>,
) -> Result<(), CovtraceError> {
    let durable = open_durable(config).await?;
    if let Some(id) = mark_seen {
        durable.mark_message_seen(phone, id).await?;
    }
    let inbox = durable.list_messages(phone).await?;
    print_json(&inbox)?;
    durable.close().await
}

/// Builds broadcast filters from CLI flags. No flags at all means everyone.
pub fn filters(all: bool, counties: Vec<String>, statuses: Vec<InfectionStatus>) -> Vec<UserFilter> {
    let mut filters: Vec<UserFilter> = counties
        .into_iter()
        .map(UserFilter::County)
        .chain(statuses.into_iter().map(UserFilter::Status))
        .collect();
    if all || filters.is_empty() {
        filters.insert(0, UserFilter::All);
    }
    filters
}

/// Parses `key=value`.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_filter_flags_means_everyone() {
        assert_eq!(filters(false, vec![], vec![]), vec![UserFilter::All]);
    }

    #[test]
    fn county_and_status_filters_combine() {
        let f = filters(
            false,
            vec!["Kwale".into()],
            vec![InfectionStatus::Suspected],
        );
        assert_eq!(
            f,
            vec![
                UserFilter::County("Kwale".into()),
                UserFilter::Status(InfectionStatus::Suspected)
            ]
        );
    }

    #[test]
    fn key_value_pairs() {
        assert_eq!(
            parse_key_value("kind=advisory").unwrap(),
            ("kind".to_string(), "advisory".to_string())
        );
        assert_eq!(parse_key_value("url=a=b").unwrap().1, "a=b");
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
