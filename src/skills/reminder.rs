//! Reminders and timers
//!
//! Reminders are persisted so they survive a restart; a background worker
//! announces them through the session once they are due.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use serde_json::json;
use tokio::task::JoinHandle;

use super::types::{Response, SessionHandle, Skill, SkillContext};
use crate::Result;
use crate::db::{MessageRole, ReminderRepo};

static HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:hour|hr)").expect("valid regex"));
static MINUTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:min|minute)").expect("valid regex"));
static SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:sec|second)").expect("valid regex"));
static MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:to|that)\s+(.+)$").expect("valid regex"));

/// How often the worker checks for due reminders
pub const WORKER_INTERVAL: Duration = Duration::from_secs(1);

const NO_TIME: &str = "I didn't catch the time. Try 'Remind me in 5 minutes'.";

/// A parsed "remind me in ..." request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRequest {
    pub delay: Duration,
    pub message: String,
}

/// Extract the delay and message from a request
///
/// Returns `None` when no positive duration is present.
#[must_use]
pub fn parse_request(text: &str) -> Option<ReminderRequest> {
    let text = text.to_lowercase();
    let amount = |re: &Regex| -> u64 {
        re.captures(&text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    let secs = amount(&HOURS)
        .saturating_mul(3600)
        .saturating_add(amount(&MINUTES).saturating_mul(60))
        .saturating_add(amount(&SECONDS));
    if secs == 0 {
        return None;
    }

    let message = MESSAGE
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if text.contains("alarm") || text.contains("timer") {
                "Alarm".to_string()
            } else {
                "Time's up!".to_string()
            }
        });

    Some(ReminderRequest {
        delay: Duration::from_secs(secs),
        message,
    })
}

/// Sets reminders, alarms and timers
pub struct ReminderSkill {
    repo: ReminderRepo,
}

impl ReminderSkill {
    #[must_use]
    pub const fn new(repo: ReminderRepo) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Skill for ReminderSkill {
    fn name(&self) -> &str {
        "reminder"
    }

    fn description(&self) -> &str {
        "Sets reminders, alarms and timers"
    }

    fn keywords(&self) -> &[&str] {
        &["remind", "alarm", "timer", "alert"]
    }

    async fn handle(&self, text: &str, _ctx: &SkillContext) -> Result<Option<Response>> {
        let Some(request) = parse_request(text) else {
            return Ok(Some(Response::simple(NO_TIME)));
        };

        let delay = chrono::Duration::from_std(request.delay)
            .map_err(|e| crate::Error::Skill(e.to_string()))?;
        let trigger_at = Utc::now() + delay;
        let reminder = self.repo.create(&request.message, trigger_at)?;

        tracing::info!(id = %reminder.id, at = %trigger_at, "reminder set");

        let at = trigger_at.with_timezone(&Local).format("%I:%M %p");
        Ok(Some(Response::simple(format!(
            "OK, I've set a reminder for {} at {at}.",
            request.message
        ))))
    }
}

/// Fire every reminder due at `now`; returns how many were announced
///
/// A reminder is marked completed before it is announced so it fires once
/// even if two workers race.
pub fn fire_due(repo: &ReminderRepo, session: &SessionHandle, now: DateTime<Utc>) -> Result<usize> {
    let mut fired = 0;

    for reminder in repo.due(now)? {
        if !repo.complete(&reminder.id)? {
            continue;
        }

        let text = format!("Reminder: {}", reminder.message);
        tracing::info!(id = %reminder.id, "reminder due");

        let mut metadata = serde_json::Map::new();
        metadata.insert("source".to_string(), json!("reminder"));
        metadata.insert("reminder_id".to_string(), json!(reminder.id));
        if let Err(e) = session
            .store()
            .add(MessageRole::Assistant, &text, Some(metadata))
        {
            tracing::warn!(error = %e, "failed to record reminder");
        }

        if !session.announce(text) {
            tracing::warn!("session closed, reminder not announced");
        }
        fired += 1;
    }

    Ok(fired)
}

/// Spawn the background worker
#[must_use]
pub fn spawn_worker(repo: ReminderRepo, session: SessionHandle, every: Duration) -> JoinHandle<()> {
    tracing::info!(interval_ms = every.as_millis(), "reminder worker started");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = fire_due(&repo, &session, Utc::now()) {
                tracing::error!(error = %e, "reminder worker error");
            }
        }
    })
}
