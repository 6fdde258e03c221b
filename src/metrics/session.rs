//! Trading session calendar and session-transition windows
//!
//! Session boundaries are minute-of-day values in UTC. Distances are measured
//! on the 24h circle, so a boundary at 00:00 is 10 minutes away from 23:50.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionParams;

const MINUTES_PER_DAY: i64 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Asia,
    London,
    NewYork,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Asia => "Asia",
            Session::London => "London",
            Session::NewYork => "New York",
        }
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    Open,
    Close,
}

/// One session's open/close, serialised as `"HH:MM"` strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub session: Session,
    #[serde(with = "hhmm")]
    pub open: u32,
    #[serde(with = "hhmm")]
    pub close: u32,
}

impl SessionWindow {
    pub fn new(session: Session, open_h: u32, open_m: u32, close_h: u32, close_m: u32) -> Self {
        Self {
            session,
            open: (open_h * 60 + open_m) % MINUTES_PER_DAY as u32,
            close: (close_h * 60 + close_m) % MINUTES_PER_DAY as u32,
        }
    }

    /// Whether `minute` (of the UTC day) falls inside the session; handles wrap past midnight
    pub fn contains(&self, minute: u32) -> bool {
        if self.open <= self.close {
            minute >= self.open && minute < self.close
        } else {
            minute >= self.open || minute < self.close
        }
    }
}

mod hhmm {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(minute: &u32, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:02}:{:02}", minute / 60, minute % 60))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| serde::de::Error::custom(format!("expected HH:MM, got {:?}", s)))?;
        let h: u32 = h.parse().map_err(serde::de::Error::custom)?;
        let m: u32 = m.parse().map_err(serde::de::Error::custom)?;
        if h > 24 || m > 59 {
            return Err(serde::de::Error::custom(format!("time out of range: {}", s)));
        }
        Ok((h * 60 + m) % 1440)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTransition {
    pub in_transition: bool,
    /// Nearest boundary within the window
    pub session: Option<Session>,
    pub boundary: Option<Boundary>,
    /// Signed distance to that boundary: negative before it, positive after
    pub minutes_from_boundary: Option<i64>,
    pub active_sessions: Vec<Session>,
}

/// Signed circular distance `from - to` in minutes, in [-720, 720)
fn circular_offset(from: u32, to: u32) -> i64 {
    let diff = (from as i64 - to as i64).rem_euclid(MINUTES_PER_DAY);
    if diff >= MINUTES_PER_DAY / 2 {
        diff - MINUTES_PER_DAY
    } else {
        diff
    }
}

pub fn active_sessions(now: DateTime<Utc>, sessions: &[SessionWindow]) -> Vec<Session> {
    let minute = now.hour() * 60 + now.minute();
    sessions
        .iter()
        .filter(|w| w.contains(minute))
        .map(|w| w.session)
        .collect()
}

/// Flag whether `now` is within `window_minutes` of any session open or close
///
/// When several boundaries qualify the nearest wins, opens before closes on ties.
pub fn session_transition(now: DateTime<Utc>, params: &SessionParams) -> SessionTransition {
    let minute = now.hour() * 60 + now.minute();

    let boundaries = params
        .sessions
        .iter()
        .map(|w| (w.session, Boundary::Open, w.open))
        .chain(params.sessions.iter().map(|w| (w.session, Boundary::Close, w.close)));

    let mut nearest: Option<(Session, Boundary, i64)> = None;
    for (session, boundary, at) in boundaries {
        let offset = circular_offset(minute, at);
        if offset.abs() > params.window_minutes {
            continue;
        }
        if nearest.map_or(true, |(_, _, best)| offset.abs() < best.abs()) {
            nearest = Some((session, boundary, offset));
        }
    }

    SessionTransition {
        in_transition: nearest.is_some(),
        session: nearest.map(|(s, _, _)| s),
        boundary: nearest.map(|(_, b, _)| b),
        minutes_from_boundary: nearest.map(|(_, _, o)| o),
        active_sessions: active_sessions(now, &params.sessions),
    }
}
