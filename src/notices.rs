use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::constants::notices::{ERROR_TTL_SECS, INFO_TTL_SECS};
use crate::errors::FloodError;
use crate::types::NoticeId;

/// Severity of a user-facing notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    /// Startup configuration problem; shown as a banner that never expires.
    Configuration,
    /// Failed operation; expires.
    Error,
    /// Rejected input; expires.
    Warning,
    /// Confirmation; expires quickly.
    Info,
}

impl NoticeLevel {
    /// Default lifetime; `None` means the notice stays until dismissed.
    pub fn default_ttl(self) -> Option<Duration> {
        match self {
            NoticeLevel::Configuration => None,
            NoticeLevel::Error | NoticeLevel::Warning => Some(Duration::seconds(ERROR_TTL_SECS)),
            NoticeLevel::Info => Some(Duration::seconds(INFO_TTL_SECS)),
        }
    }

    /// Notice level for an error surfaced by an operation.
    pub fn for_error(err: &FloodError) -> Self {
        match err {
            FloodError::Configuration(_) => NoticeLevel::Configuration,
            FloodError::Validation(_)
            | FloodError::InvalidCondition(_)
            | FloodError::RateLimited { .. } => NoticeLevel::Warning,
            _ => NoticeLevel::Error,
        }
    }
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoticeLevel::Configuration => "configuration",
            NoticeLevel::Error => "error",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Info => "info",
        })
    }
}

/// A dismissible message for the user.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notice {
    /// Board-unique, increasing identifier.
    pub id: NoticeId,
    /// Severity.
    pub level: NoticeLevel,
    /// Text shown to the user.
    pub message: String,
    /// When the notice was raised.
    pub issued_at: DateTime<Utc>,
    /// Lifetime after `issued_at`; `None` never expires.
    #[serde(skip)]
    pub ttl: Option<Duration>,
}

impl Notice {
    /// Whether the notice is still shown at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            None => true,
            Some(ttl) => now < self.issued_at + ttl,
        }
    }
}

/// Ordered collection of notices with auto-expiry.
#[derive(Clone, Debug, Default)]
pub struct NoticeBoard {
    next_id: NoticeId,
    notices: Vec<Notice>,
}

impl NoticeBoard {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a notice with the level's default lifetime.
    pub fn push(
        &mut self,
        level: NoticeLevel,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Notice {
        self.next_id += 1;
        let notice = Notice {
            id: self.next_id,
            level,
            message: message.into(),
            issued_at: now,
            ttl: level.default_ttl(),
        };
        self.notices.push(notice.clone());
        notice
    }

    /// Post the notice matching an operation failure.
    pub fn push_error(&mut self, err: &FloodError, now: DateTime<Utc>) -> Notice {
        self.push(NoticeLevel::for_error(err), err.to_string(), now)
    }

    /// Remove a notice. Returns whether it existed.
    pub fn dismiss(&mut self, id: NoticeId) -> bool {
        let before = self.notices.len();
        self.notices.retain(|notice| notice.id != id);
        self.notices.len() != before
    }

    /// Notices still shown at `now`, oldest first. Expired ones are pruned.
    pub fn active(&mut self, now: DateTime<Utc>) -> Vec<Notice> {
        self.notices.retain(|notice| notice.is_active(now));
        self.notices.clone()
    }

    /// Whether a configuration banner is up.
    pub fn has_banner(&self) -> bool {
        self.notices
            .iter()
            .any(|notice| notice.level == NoticeLevel::Configuration)
    }
}
