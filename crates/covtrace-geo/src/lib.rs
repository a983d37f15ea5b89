// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Geo/time quantization.
//!
//! Turns a coordinate into a geofence cell id and a timestamp into a time
//! bucket id. Both are pure and total: any `f64` input, including zero,
//! negative, and non-finite values, produces an id without panicking.
//!
//! The cell id is a lossy bucketing, not a distance computation. Coordinates
//! are floored to six decimals, expressed as degrees/minutes/seconds, and the
//! seconds component is snapped down to a multiple of `radius_units`
//! arc-seconds. Negative coordinates snap toward negative infinity like
//! positive ones, so no box is wider at zero. Boxes restart at every arc-minute boundary. Two points in the
//! same box share a cell id; two points more than two boxes apart along either
//! axis never do. Larger radii raise recall and lower precision.

use chrono::{DateTime, Timelike, Utc};

use covtrace_core::PresenceToken;

pub const DEFAULT_RADIUS_UNITS: f64 = 1.5;
pub const DEFAULT_BUCKET_MINUTES: u32 = 5;

const MICROS_PER_DEGREE: f64 = 1_000_000.0;
const SECONDS_PER_DEGREE: f64 = 3600.0;

/// Codec parameters, fixed for the lifetime of a deployment.
///
/// Changing either parameter changes every id produced, so presence recorded
/// under one setting never matches presence recorded under another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTimeCodec {
    radius_units: f64,
    bucket_minutes: u32,
}

impl Default for GeoTimeCodec {
    fn default() -> Self {
        Self {
            radius_units: DEFAULT_RADIUS_UNITS,
            bucket_minutes: DEFAULT_BUCKET_MINUTES,
        }
    }
}

impl GeoTimeCodec {
    /// Invalid parameters (non-positive or non-finite radius, zero width)
    /// fall back to the defaults.
    pub fn new(radius_units: f64, bucket_minutes: u32) -> Self {
        Self {
            radius_units: sanitize_radius(radius_units),
            bucket_minutes: if bucket_minutes == 0 {
                DEFAULT_BUCKET_MINUTES
            } else {
                bucket_minutes
            },
        }
    }

    pub fn radius_units(&self) -> f64 {
        self.radius_units
    }

    pub fn bucket_minutes(&self) -> u32 {
        self.bucket_minutes
    }

    pub fn cell_id(&self, latitude: f64, longitude: f64) -> String {
        cell_id(latitude, longitude, self.radius_units)
    }

    pub fn time_bucket_id(&self, timestamp: DateTime<Utc>) -> String {
        time_bucket_id(timestamp, self.bucket_minutes)
    }

    /// The presence token for a position at a moment.
    pub fn token(&self, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> PresenceToken {
        PresenceToken {
            geofence_id: self.cell_id(latitude, longitude),
            time_bucket_id: self.time_bucket_id(timestamp),
        }
    }
}

fn sanitize_radius(radius_units: f64) -> f64 {
    if radius_units.is_finite() && radius_units > 0.0 {
        radius_units
    } else {
        DEFAULT_RADIUS_UNITS
    }
}

/// Geofence cell id for a coordinate, formatted `"{lat},{lng}"` with six decimals.
pub fn cell_id(latitude: f64, longitude: f64, radius_units: f64) -> String {
    let radius = sanitize_radius(radius_units);
    format!(
        "{:.6},{:.6}",
        snap_degrees(latitude, radius),
        snap_degrees(longitude, radius)
    )
}

/// Snaps one axis down to the start of its box, toward negative infinity on
/// both sides of zero, so the boxes either side of the equator or the prime
/// meridian are as wide as any other.
fn snap_degrees(value: f64, radius: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let micros = (value * MICROS_PER_DEGREE).floor();
    let total_seconds = micros / MICROS_PER_DEGREE * SECONDS_PER_DEGREE;

    let degrees = (total_seconds / SECONDS_PER_DEGREE).floor();
    let remainder = total_seconds - degrees * SECONDS_PER_DEGREE;
    let minutes = (remainder / 60.0).floor();
    let seconds = remainder - minutes * 60.0;
    let snapped = (seconds / radius).floor() * radius;

    let start = degrees + minutes / 60.0 + snapped / SECONDS_PER_DEGREE;
    // Normalize so `-0.0` never renders as "-0.000000".
    if start == 0.0 { 0.0 } else { start }
}

/// Time bucket id: minutes since UTC midnight divided by `bucket_minutes`.
/// A width of zero is treated as one minute.
pub fn time_bucket_id(timestamp: DateTime<Utc>, bucket_minutes: u32) -> String {
    let minutes = timestamp.hour() * 60 + timestamp.minute();
    (minutes / bucket_minutes.max(1)).to_string()
}
