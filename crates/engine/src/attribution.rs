//! Who is responsible for a bundle.

use std::fmt;

use chrono::{DateTime, Local};

use gink_core::{Medallion, MuTimestamp, Muid};

/// Everything known about the origin of one bundle.
///
/// Process details come from the personal directory its chain wrote when
/// it started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// Bundle timestamp
    pub timestamp: MuTimestamp,
    /// Chain medallion
    pub medallion: Medallion,
    /// Identity the chain started with
    pub identity: Option<String>,
    /// Bundle comment; none when the bundle isn't journaled here
    pub comment: Option<String>,
    /// `.user.name` of the writing process
    pub user_name: Option<String>,
    /// `.host.name` of the writing process
    pub host_name: Option<String>,
    /// `.full.name` of the writing user
    pub full_name: Option<String>,
    /// `.software` that wrote the bundle
    pub software: Option<String>,
}

impl Attribution {
    /// Local time of the bundle.
    pub fn datetime(&self) -> Option<DateTime<Local>> {
        DateTime::from_timestamp_micros(self.timestamp).map(|t| t.with_timezone(&Local))
    }
}

impl fmt::Display for Attribution {
    /// `timestamp-medallion  time  identity  comment`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let muid = Muid::new(self.timestamp, self.medallion, 0).to_string();
        let short = muid.get(..28).unwrap_or(&muid);
        let when = self
            .datetime()
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
            .unwrap_or_default();
        write!(
            f,
            "{short}  {when}  {}  {}",
            self.identity.as_deref().unwrap_or("<unknown>"),
            self.comment.as_deref().unwrap_or("<missing bundle>"),
        )
    }
}
