// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Presence recording and per-day overlap.
//!
//! Every location report lands in two places: the ephemeral set
//! `presence:{user}:{YYYY-MM-DD}` of `"{cell}:{bucket}"` tokens, used for
//! matching, and the durable location log, kept for audit and replay. The
//! ephemeral write happens first and is not undone if the durable append
//! fails; the sets are TTL'd and advisory, the log is the record.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use covtrace_config::model::PresenceConfig;
use covtrace_core::{CovtraceError, DurableStore, EphemeralStore, LocationEvent, PresenceToken};
use covtrace_geo::GeoTimeCodec;

const REPLAY_PAGE_SIZE: u64 = 1000;

/// A device location fix as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
        }
    }

    fn validate(&self) -> Result<(), CovtraceError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CovtraceError::InvalidArgument(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CovtraceError::InvalidArgument(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Overlap between two users' presence on one day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayOverlap {
    /// Size of the union of both day sets.
    pub union_size: u64,
    /// Tokens present in both day sets, sorted.
    pub shared: Vec<PresenceToken>,
}

impl DayOverlap {
    /// Number of shared tokens, derived as `|A| + |B| - |A ∪ B|`.
    pub fn count(&self) -> u64 {
        self.shared.len() as u64
    }
}

/// Key of a user's token set for one calendar day.
pub fn presence_key(user_id: &str, date: NaiveDate) -> String {
    format!("presence:{user_id}:{}", date.format("%Y-%m-%d"))
}

pub struct PresenceStore {
    durable: Arc<dyn DurableStore>,
    ephemeral: Arc<dyn EphemeralStore>,
    codec: GeoTimeCodec,
    ttl: Duration,
}

impl PresenceStore {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        codec: GeoTimeCodec,
        ttl: Duration,
    ) -> Self {
        Self {
            durable,
            ephemeral,
            codec,
            ttl,
        }
    }

    pub fn from_config(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        config: &PresenceConfig,
    ) -> Self {
        Self::new(
            durable,
            ephemeral,
            GeoTimeCodec::new(config.radius_units, config.bucket_minutes),
            config.ttl(),
        )
    }

    pub fn codec(&self) -> &GeoTimeCodec {
        &self.codec
    }

    /// Records one location report for `user_id`.
    ///
    /// The token is added to the day set before the durable append. A durable
    /// failure is returned to the caller, and the set keeps the token.
    pub async fn record_presence(
        &self,
        user_id: &str,
        location: Location,
        timestamp: DateTime<Utc>,
    ) -> Result<LocationEvent, CovtraceError> {
        if user_id.trim().is_empty() {
            return Err(CovtraceError::InvalidArgument("user id is required".into()));
        }
        location.validate()?;

        let token = self
            .codec
            .token(location.latitude, location.longitude, timestamp);
        let event = LocationEvent {
            user_id: user_id.to_string(),
            latitude: location.latitude,
            longitude: location.longitude,
            geofence_id: token.geofence_id.clone(),
            time_bucket_id: token.time_bucket_id.clone(),
            timestamp,
            accuracy: location.accuracy,
            speed: location.speed,
        };

        if let Err(e) = self.add_token(user_id, event.date(), &token).await {
            covtrace_prometheus::record_presence_write("ephemeral_error");
            return Err(e);
        }

        match self.durable.append_location(&event).await {
            Ok(seq) => {
                debug!(user_id, token = %token, seq, "presence recorded");
                covtrace_prometheus::record_presence_write("ok");
                Ok(event)
            }
            Err(e) => {
                warn!(user_id, token = %token, error = %e, "durable location append failed");
                covtrace_prometheus::record_presence_write("durable_error");
                Err(e)
            }
        }
    }

    async fn add_token(
        &self,
        user_id: &str,
        date: NaiveDate,
        token: &PresenceToken,
    ) -> Result<bool, CovtraceError> {
        let key = presence_key(user_id, date);
        let added = self.ephemeral.set_add(&key, &token.to_string()).await?;
        self.ephemeral.expire(&key, self.ttl).await?;
        Ok(added)
    }

    /// The tokens `user_id` occupied on `date`.
    pub async fn tokens(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<PresenceToken>, CovtraceError> {
        let raw = self
            .ephemeral
            .set_members(&presence_key(user_id, date))
            .await?;
        Ok(parse_tokens(raw))
    }

    /// Union of both users' token sets for `date`.
    ///
    /// A token both users recorded appears once; the overlap signal comes from
    /// comparing this size with the sizes of the two day sets (see [`Self::overlap`]).
    pub async fn union(
        &self,
        user_a: &str,
        user_b: &str,
        date: NaiveDate,
    ) -> Result<HashSet<PresenceToken>, CovtraceError> {
        let keys = [presence_key(user_a, date), presence_key(user_b, date)];
        let raw = self.ephemeral.set_union(&keys).await?;
        Ok(parse_tokens(raw))
    }

    /// Tokens shared by both users on `date`. Symmetric in its arguments.
    pub async fn overlap(
        &self,
        user_a: &str,
        user_b: &str,
        date: NaiveDate,
    ) -> Result<DayOverlap, CovtraceError> {
        let union = self.union(user_a, user_b, date).await?;
        let a = self.tokens(user_a, date).await?;
        if a.is_empty() {
            return Ok(DayOverlap {
                union_size: union.len() as u64,
                shared: Vec::new(),
            });
        }
        let b = self.tokens(user_b, date).await?;

        let shared: BTreeSet<PresenceToken> = union
            .iter()
            .filter(|t| a.contains(*t) && b.contains(*t))
            .cloned()
            .collect();
        Ok(DayOverlap {
            union_size: union.len() as u64,
            shared: shared.into_iter().collect(),
        })
    }

    /// Rebuilds every user's token set for `date` from the durable log.
    /// Returns the number of events replayed.
    pub async fn replay_day(&self, date: NaiveDate) -> Result<u64, CovtraceError> {
        let mut offset = 0;
        let mut replayed = 0u64;
        loop {
            let page = self
                .durable
                .locations_on(date, offset, REPLAY_PAGE_SIZE)
                .await?;
            if page.is_empty() {
                break;
            }
            for event in &page {
                self.add_token(&event.user_id, date, &event.token()).await?;
            }
            replayed += page.len() as u64;
            offset += page.len() as u64;
            if (page.len() as u64) < REPLAY_PAGE_SIZE {
                break;
            }
        }
        debug!(%date, replayed, "presence replayed from durable log");
        Ok(replayed)
    }
}

fn parse_tokens(raw: HashSet<String>) -> HashSet<PresenceToken> {
    raw.into_iter()
        .filter_map(|member| match member.parse::<PresenceToken>() {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(member, error = %e, "skipping malformed presence token");
                None
            }
        })
        .collect()
}
