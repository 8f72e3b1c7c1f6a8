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

//! Duration tokens
//!
//! Two independent micro-grammars live here. An [`Interval`] (`3h`, `1d`,
//! `2M`) is the reporting window and supplies the `timeframe`/`size` tags.
//! A [`Resolution`] (`30s`, `5m`, `1h`, `1d`, `1w`) is the spacing between
//! buckets. `1m` is a valid resolution (one minute) but not a valid interval.

use crate::error::{InvalidIntervalError, InvalidResolutionError};
use chrono::{DateTime, Months, TimeDelta, Utc};
use std::fmt;
use std::str::FromStr;

/// Calendar unit of an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Hour,
    Day,
    Month,
}

impl IntervalUnit {
    /// Value used for the `timeframe` tag
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
            IntervalUnit::Month => "month",
        }
    }

    fn token(&self) -> char {
        match self {
            IntervalUnit::Hour => 'h',
            IntervalUnit::Day => 'd',
            IntervalUnit::Month => 'M',
        }
    }
}

/// Reporting window: a positive magnitude of hours, days or months
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    magnitude: u32,
    unit: IntervalUnit,
}

impl Interval {
    /// Returns `None` for a zero magnitude
    pub fn new(magnitude: u32, unit: IntervalUnit) -> Option<Self> {
        (magnitude >= 1).then_some(Self { magnitude, unit })
    }

    /// Parse a `<digits><h|d|M>` token. Unit letters are case-sensitive.
    pub fn parse(token: &str) -> Result<Self, InvalidIntervalError> {
        let invalid = || InvalidIntervalError {
            token: token.to_string(),
        };

        let (digits, unit) = split_token(token).ok_or_else(invalid)?;
        let unit = match unit {
            'h' => IntervalUnit::Hour,
            'd' => IntervalUnit::Day,
            'M' => IntervalUnit::Month,
            _ => return Err(invalid()),
        };
        let magnitude: u32 = digits.parse().map_err(|_| invalid())?;

        Self::new(magnitude, unit).ok_or_else(invalid)
    }

    pub fn magnitude(&self) -> u32 {
        self.magnitude
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    /// The instant one interval before `end`.
    ///
    /// Months are subtracted on the calendar, so a one month window ending
    /// on March 31st starts on February 28th (or 29th).
    pub fn before(&self, end: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.unit {
            IntervalUnit::Hour => {
                end.checked_sub_signed(TimeDelta::try_hours(self.magnitude.into())?)
            }
            IntervalUnit::Day => {
                end.checked_sub_signed(TimeDelta::try_days(self.magnitude.into())?)
            }
            IntervalUnit::Month => end.checked_sub_months(Months::new(self.magnitude)),
        }
    }
}

impl FromStr for Interval {
    type Err = InvalidIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.token())
    }
}

/// Fixed spacing between consecutive buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resolution(TimeDelta);

impl Resolution {
    /// Returns `None` unless `step` is strictly positive
    pub fn new(step: TimeDelta) -> Option<Self> {
        (step > TimeDelta::zero()).then_some(Self(step))
    }

    /// Parse a `<digits><s|m|h|d|w>` token
    pub fn parse(token: &str) -> Result<Self, InvalidResolutionError> {
        let invalid = || InvalidResolutionError {
            token: token.to_string(),
        };

        let (digits, unit) = split_token(token).ok_or_else(invalid)?;
        let seconds_per_unit: i64 = match unit {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            'w' => 7 * 24 * 60 * 60,
            _ => return Err(invalid()),
        };
        let count: i64 = digits.parse().map_err(|_| invalid())?;
        let seconds = count.checked_mul(seconds_per_unit).ok_or_else(invalid)?;
        let step = TimeDelta::try_seconds(seconds).ok_or_else(invalid)?;

        Self::new(step).ok_or_else(invalid)
    }

    pub fn as_delta(&self) -> TimeDelta {
        self.0
    }
}

impl FromStr for Resolution {
    type Err = InvalidResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split `<digits><letter>` into its parts. Rejects anything else.
fn split_token(token: &str) -> Option<(&str, char)> {
    let unit = token.chars().last()?;
    let digits = &token[..token.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((digits, unit))
}
