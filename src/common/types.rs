use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PresenceError;

static TIME_OF_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01][0-9]|2[0-3]):([0-5][0-9])$").expect("valid regex"));

/// A color handed out to a friend, unique within its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub String);

impl Color {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Color {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One entry of a friend's inbound queue: a single color or a batch of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(pub Vec<Color>);

impl Signal {
    pub fn colors(&self) -> &[Color] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[&str; N]> for Signal {
    fn from(colors: [&str; N]) -> Self {
        Self(colors.into_iter().map(Color::from).collect())
    }
}

/// Minute-precision time of day, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// Drop seconds and below so comparisons happen at minute precision.
    pub fn truncate(time: NaiveTime) -> Self {
        Self::from_hm(time.hour(), time.minute()).unwrap_or(Self(time))
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = PresenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PresenceError::InvalidTimeOfDay(s.to_string());
        let caps = TIME_OF_DAY.captures(s).ok_or_else(invalid)?;
        let hour = caps[1].parse().map_err(|_| invalid())?;
        let minute = caps[2].parse().map_err(|_| invalid())?;
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How a window whose start is later than its end is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidnightPolicy {
    /// `22:00`-`06:00` covers the night across midnight.
    #[default]
    Wrap,
    /// A reversed window is empty.
    Strict,
}

/// Daily window during which a friend accepts pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeoutWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, PresenceError> {
        Ok(Self::new(start.parse()?, end.parse()?))
    }

    pub fn spans_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Both bounds are inclusive.
    pub fn contains(&self, at: NaiveTime, policy: MidnightPolicy) -> bool {
        let at = TimeOfDay::truncate(at);
        if !self.spans_midnight() {
            return self.start <= at && at <= self.end;
        }
        match policy {
            MidnightPolicy::Wrap => at >= self.start || at <= self.end,
            MidnightPolicy::Strict => false,
        }
    }
}

impl Default for TimeoutWindow {
    fn default() -> Self {
        Self {
            start: TimeOfDay(NaiveTime::MIN),
            end: TimeOfDay::from_hm(23, 59).unwrap_or(TimeOfDay(NaiveTime::MIN)),
        }
    }
}

/// A registered member of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friend {
    pub friend_id: String,
    pub group_id: String,
    pub color: Color,
    pub timeout: TimeoutWindow,
    pub last_ping: DateTime<Utc>,
    pub queue: Vec<Signal>,
    pub tile_ids: serde_json::Value,
}

/// Point-to-point message between two friends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from_friend_id: String,
    pub to_friend_id: String,
    pub timestamp: DateTime<Utc>,
    pub body: serde_json::Value,
}
