//! Reminder repository

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// A scheduled reminder
#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: String,
    pub message: String,
    pub trigger_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: ReminderStatus,
}

/// Reminder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderStatus {
    Pending,
    Completed,
}

impl ReminderStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "completed" {
            Self::Completed
        } else {
            Self::Pending
        }
    }
}

/// Reminder repository
#[derive(Clone)]
pub struct ReminderRepo {
    pool: DbPool,
}

impl ReminderRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Schedule a reminder
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, message: &str, trigger_at: DateTime<Utc>) -> Result<Reminder> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            message: message.to_string(),
            trigger_at,
            created_at: Utc::now(),
            status: ReminderStatus::Pending,
        };

        conn.execute(
            "INSERT INTO reminders (id, message, trigger_at, created_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                reminder.id,
                message,
                trigger_at.to_rfc3339(),
                reminder.created_at.to_rfc3339(),
                reminder.status.as_str(),
            ],
        )?;

        tracing::debug!(id = %reminder.id, trigger_at = %trigger_at, "reminder created");
        Ok(reminder)
    }

    /// Pending reminders whose trigger time is at or before `now`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        Ok(self
            .pending()?
            .into_iter()
            .filter(|r| r.trigger_at <= now)
            .collect())
    }

    /// All pending reminders, soonest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn pending(&self) -> Result<Vec<Reminder>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, message, trigger_at, created_at, status
             FROM reminders WHERE status = 'pending'",
        )?;

        let mut reminders = stmt
            .query_map([], |row| {
                Ok(Reminder {
                    id: row.get(0)?,
                    message: row.get(1)?,
                    trigger_at: parse_datetime(&row.get::<_, String>(2)?),
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                    status: ReminderStatus::parse(&row.get::<_, String>(4)?),
                })
            })?
            .filter_map(std::result::Result::ok)
            .collect::<Vec<_>>();

        reminders.sort_by_key(|r| r.trigger_at);
        Ok(reminders)
    }

    /// Mark a reminder as fired
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn complete(&self, id: &str) -> Result<bool> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE reminders SET status = ?1 WHERE id = ?2 AND status = 'pending'",
            [ReminderStatus::Completed.as_str(), id],
        )?;
        Ok(updated > 0)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::init_memory;

    #[test]
    fn test_due_and_complete() {
        let repo = ReminderRepo::new(init_memory().unwrap());
        let now = Utc::now();

        let past = repo.create("stretch", now - Duration::seconds(5)).unwrap();
        repo.create("check the oven", now + Duration::minutes(5))
            .unwrap();

        let due = repo.due(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, "stretch");

        assert!(repo.complete(&past.id).unwrap());
        assert!(!repo.complete(&past.id).unwrap());
        assert!(repo.due(now).unwrap().is_empty());
        assert_eq!(repo.pending().unwrap().len(), 1);
    }
}
