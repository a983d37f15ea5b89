// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the collaborator traits and the Covtrace services.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CovtraceError;

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of collaborator behind an adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Durable,
    Ephemeral,
    Gateway,
    Observability,
}

/// Infection status of a registered user.
///
/// Any value may follow any other; no transition rules are enforced.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfectionStatus {
    #[default]
    Unknown,
    Negative,
    Positive,
    Recovered,
    Suspected,
}

/// A registered user, keyed by phone number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub phone_number: String,
    pub full_name: String,
    pub county: String,
    pub infection_status: InfectionStatus,
    /// Push device token. `None` until the device registers for notifications.
    pub device_token: Option<String>,
}

/// A raw location report, appended to the durable log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEvent {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub geofence_id: String,
    pub time_bucket_id: String,
    pub timestamp: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
}

impl LocationEvent {
    /// The presence token this event contributes to its user's day set.
    pub fn token(&self) -> PresenceToken {
        PresenceToken {
            geofence_id: self.geofence_id.clone(),
            time_bucket_id: self.time_bucket_id.clone(),
        }
    }

    /// Calendar day (UTC) the event belongs to.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// A `(cell, bucket)` pair: "this user was in this area during this window".
///
/// Rendered as `"{geofenceId}:{timeBucketId}"`. Cell ids never contain `:`,
/// so parsing splits on the last separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceToken {
    pub geofence_id: String,
    pub time_bucket_id: String,
}

impl fmt::Display for PresenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.geofence_id, self.time_bucket_id)
    }
}

impl FromStr for PresenceToken {
    type Err = CovtraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((cell, bucket)) if !cell.is_empty() && !bucket.is_empty() => Ok(Self {
                geofence_id: cell.to_string(),
                time_bucket_id: bucket.to_string(),
            }),
            _ => Err(CovtraceError::InvalidArgument(format!(
                "malformed presence token `{s}`"
            ))),
        }
    }
}

/// Result of scanning one candidate against a patient's presence history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub patient_phone: String,
    pub contact_phone: String,
    pub device_token: Option<String>,
    /// Number of shared presence tokens across the scanned date range.
    pub count: u64,
    pub contact_points: Vec<PresenceToken>,
}

/// Delivery mode of a persisted message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Direct,
    Alert,
    Broadcast,
}

/// Opaque data delivered alongside a notification.
///
/// Serialized as a flat JSON object of string values, which is the shape push
/// gateways accept for data payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, String>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_json(&self) -> Result<String, CovtraceError> {
        serde_json::to_string(&self.0).map_err(|e| CovtraceError::Internal(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, CovtraceError> {
        serde_json::from_str(raw)
            .map(Self)
            .map_err(|e| CovtraceError::InvalidArgument(format!("malformed payload: {e}")))
    }
}

impl From<BTreeMap<String, String>> for Payload {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// A persisted outbound notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub user_phone: String,
    pub title: String,
    pub body: String,
    pub payload: Payload,
    pub message_type: MessageType,
    pub sent: bool,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A new, unsent and unseen message with a fresh id.
    pub fn new(
        user_phone: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        payload: Payload,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_phone: user_phone.into(),
            title: title.into(),
            body: body.into(),
            payload,
            message_type,
            sent: false,
            seen: false,
            created_at: Utc::now(),
        }
    }
}

/// Selects a subset of the user population. A user matches a filter list if
/// it matches any entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserFilter {
    All,
    County(String),
    Status(InfectionStatus),
}

impl fmt::Display for UserFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::County(county) => write!(f, "county={county}"),
            Self::Status(status) => write!(f, "status={status}"),
        }
    }
}

/// Notification content handed to the push gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub payload: Payload,
}

/// A single- or multi-recipient push call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub tokens: Vec<String>,
    pub notification: PushNotification,
}

impl PushRequest {
    pub fn single(token: impl Into<String>, notification: PushNotification) -> Self {
        Self {
            tokens: vec![token.into()],
            notification,
        }
    }
}

/// Gateway acknowledgement for an accepted push call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushReceipt {
    pub success: u64,
    pub failure: u64,
    /// Tokens the gateway accepted the call for but could not deliver to.
    pub failed_tokens: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infection_status_round_trips_through_strings() {
        for status in [
            InfectionStatus::Unknown,
            InfectionStatus::Negative,
            InfectionStatus::Positive,
            InfectionStatus::Recovered,
            InfectionStatus::Suspected,
        ] {
            let s = status.to_string();
            assert_eq!(s, s.to_uppercase());
            assert_eq!(InfectionStatus::from_str(&s).unwrap(), status);
        }
        assert_eq!(
            InfectionStatus::from_str("positive").unwrap(),
            InfectionStatus::Positive
        );
    }

    #[test]
    fn presence_token_splits_on_last_colon() {
        let token: PresenceToken = "51.500000,-0.120000:117".parse().unwrap();
        assert_eq!(token.geofence_id, "51.500000,-0.120000");
        assert_eq!(token.time_bucket_id, "117");
        assert_eq!(token.to_string(), "51.500000,-0.120000:117");
    }

    #[test]
    fn malformed_presence_token_is_rejected() {
        assert!("no-separator".parse::<PresenceToken>().is_err());
        assert!(":5".parse::<PresenceToken>().is_err());
        assert!("cell:".parse::<PresenceToken>().is_err());
    }

    #[test]
    fn payload_serializes_as_flat_object() {
        let payload = Payload::new().with("kind", "alert").with("count", "3");
        let json = payload.to_json().unwrap();
        assert_eq!(json, r#"{"count":"3","kind":"alert"}"#);
        assert_eq!(Payload::from_json(&json).unwrap(), payload);
    }

    #[test]
    fn new_message_is_unsent_and_unseen() {
        let msg = Message::new("+1", "t", "b", Payload::new(), MessageType::Direct);
        assert!(!msg.sent);
        assert!(!msg.seen);
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn user_filter_display() {
        assert_eq!(UserFilter::All.to_string(), "ALL");
        assert_eq!(
            UserFilter::Status(InfectionStatus::Suspected).to_string(),
            "status=SUSPECTED"
        );
    }
}
