/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Time bucketing for historic backfill
//!
//! A [`TimeRange`] is immutable; [`TimeRange::buckets`] hands out a fresh
//! iterator every call, so a range can be walked once per metric pass.

use super::interval::Resolution;
use crate::error::{InvalidRangeError, InvalidTimeError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use std::iter::FusedIterator;

/// A single bucket boundary
pub type Bucket = DateTime<Utc>;

/// Half-open span `[start, end)` walked in `resolution` steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    resolution: Resolution,
}

impl TimeRange {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Self, InvalidRangeError> {
        if start >= end {
            return Err(InvalidRangeError::Inverted {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        if resolution.as_delta() <= TimeDelta::zero() {
            return Err(InvalidRangeError::NonPositiveResolution);
        }
        Ok(Self {
            start,
            end,
            resolution,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Bucket boundaries `start, start + r, start + 2r, ...`.
    ///
    /// A bucket is only produced when a whole resolution step fits before
    /// `end`, so a trailing partial step is dropped and every boundary is
    /// strictly less than `end`.
    pub fn buckets(&self) -> Buckets {
        Buckets {
            cursor: Some(self.start),
            end: self.end,
            step: self.resolution.as_delta(),
        }
    }
}

/// Forward-only iterator over the boundaries of a [`TimeRange`]
#[derive(Debug, Clone)]
pub struct Buckets {
    cursor: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    step: TimeDelta,
}

impl Buckets {
    fn remaining(&self) -> usize {
        let Some(cursor) = self.cursor else {
            return 0;
        };
        let span = total_nanos(self.end - cursor);
        let step = total_nanos(self.step);
        if span <= 0 {
            return 0;
        }
        usize::try_from(span / step).unwrap_or(usize::MAX)
    }
}

impl Iterator for Buckets {
    type Item = Bucket;

    fn next(&mut self) -> Option<Bucket> {
        let current = self.cursor?;
        match current.checked_add_signed(self.step) {
            Some(next) if next <= self.end => {
                self.cursor = Some(next);
                Some(current)
            }
            _ => {
                self.cursor = None;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Buckets {}

impl FusedIterator for Buckets {}

fn total_nanos(delta: TimeDelta) -> i128 {
    i128::from(delta.num_seconds()) * 1_000_000_000 + i128::from(delta.subsec_nanos())
}

/// Parse a `--start`/`--end` argument as a UTC instant.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and a bare
/// `YYYY-MM-DD` (midnight).
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, InvalidTimeError> {
    let input = input.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(InvalidTimeError {
        input: input.to_string(),
    })
}
