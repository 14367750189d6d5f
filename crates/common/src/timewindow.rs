//! Trading windows evaluated on a New York clock.
//!
//! Windows are comma-separated `HH:MM-HH:MM` pairs; a window whose end is
//! before its start wraps past midnight.

use chrono::{NaiveTime, Utc};
use chrono_tz::America::New_York;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Window {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            // overnight wrap
            t >= self.start || t <= self.end
        }
    }
}

pub fn parse_windows(spec: &str) -> Result<Vec<Window>> {
    let mut out = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (a, b) = part
            .split_once('-')
            .ok_or_else(|| Error::Config(format!("bad trading window '{part}'")))?;
        out.push(Window {
            start: parse_hhmm(a)?,
            end: parse_hhmm(b)?,
        });
    }
    Ok(out)
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| Error::Config(format!("bad time '{s}' in trading window")))
}

/// True when `t` falls inside any window.
pub fn in_windows_at(windows: &[Window], t: NaiveTime) -> bool {
    windows.iter().any(|w| w.contains(t))
}

/// True when the current New York wall-clock time falls inside any window.
pub fn in_windows(windows: &[Window]) -> bool {
    let now = Utc::now().with_timezone(&New_York).time();
    in_windows_at(windows, now)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
