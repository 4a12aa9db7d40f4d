use std::time::Duration;

use chrono::{DateTime, Utc};

pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// A transient outcome message for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
    pub posted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StatusMessage {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Holds at most one message; a newer post replaces the current one and
/// messages clear themselves once their ttl has passed.
#[derive(Debug)]
pub struct StatusLine {
    ttl: chrono::Duration,
    current: Option<StatusMessage>,
}

impl StatusLine {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            current: None,
        }
    }

    pub fn post_at(
        &mut self,
        level: StatusLevel,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> StatusMessage {
        let message = StatusMessage {
            level,
            text: text.into(),
            posted_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.current = Some(message.clone());
        message
    }

    pub fn post(&mut self, level: StatusLevel, text: impl Into<String>) -> StatusMessage {
        self.post_at(level, text, Utc::now())
    }

    pub fn current_at(&mut self, now: DateTime<Utc>) -> Option<&StatusMessage> {
        if self
            .current
            .as_ref()
            .is_some_and(|message| message.is_expired_at(now))
        {
            self.current = None;
        }
        self.current.as_ref()
    }

    pub fn current(&mut self) -> Option<&StatusMessage> {
        self.current_at(Utc::now())
    }
}
