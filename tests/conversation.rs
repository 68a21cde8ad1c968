//! Persistent history and reminder delivery tests

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::mpsc;

use buddy::db::{ConversationStore, MessageRole, ReminderRepo, ReminderStatus};
use buddy::skills::{SessionHandle, fire_due};
use buddy::{Config, Daemon};

mod common;
use common::setup_test_db;

fn daemon_in(dir: &std::path::Path) -> Daemon {
    let mut config = Config::default();
    config.data_dir = dir.to_path_buf();
    config.llm.prefer_local = false;
    Daemon::new(config).unwrap()
}

#[test]
fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let daemon = daemon_in(dir.path());
        daemon
            .store()
            .add_exchange("my name is Sam", "Nice to meet you, Sam!")
            .unwrap();
    }

    let daemon = daemon_in(dir.path());
    let recent = daemon.store().get_recent(10).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].role, MessageRole::User);
    assert_eq!(recent[0].content, "my name is Sam");
    assert_eq!(recent[1].role, MessageRole::Assistant);
    assert!(recent[0].timestamp <= recent[1].timestamp);
}

#[test]
fn test_corrupt_database_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("buddy.db"), vec![0x5Au8; 8192]).unwrap();

    let daemon = daemon_in(dir.path());
    assert!(daemon.store().is_empty().unwrap());

    daemon
        .store()
        .add(MessageRole::User, "still works", None)
        .unwrap();
    assert_eq!(daemon.store().len().unwrap(), 1);
}

#[tokio::test]
async fn test_forget_skill_clears_history() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = daemon_in(dir.path());
    daemon.store().add_exchange("hello", "hi").unwrap();

    let reply = daemon.ask("please forget everything").await.unwrap();
    assert_eq!(reply, "Done, I've forgotten our conversation.");
    assert!(daemon.store().is_empty().unwrap());
}

#[test]
fn test_due_reminder_is_announced_once() {
    let pool = setup_test_db();
    let store = ConversationStore::new(pool.clone());
    let repo = ReminderRepo::new(pool);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = SessionHandle::new(tx, store.clone());

    let now = Utc::now();
    repo.create("stretch", now - ChronoDuration::seconds(5))
        .unwrap();
    repo.create("call mom", now + ChronoDuration::hours(1))
        .unwrap();

    assert_eq!(fire_due(&repo, &session, now).unwrap(), 1);
    assert_eq!(fire_due(&repo, &session, now).unwrap(), 0);

    assert_eq!(rx.try_recv().unwrap(), "Reminder: stretch");
    assert!(rx.try_recv().is_err());

    let recent = store.get_recent(5).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].role, MessageRole::Assistant);
    let metadata = recent[0].metadata.as_ref().unwrap();
    assert_eq!(metadata.get("source"), Some(&json!("reminder")));

    let pending = repo.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message, "call mom");
    assert_eq!(pending[0].status, ReminderStatus::Pending);
}

#[test]
fn test_closed_session_still_completes_reminder() {
    let pool = setup_test_db();
    let store = ConversationStore::new(pool.clone());
    let repo = ReminderRepo::new(pool);
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let session = SessionHandle::new(tx, store);

    let now = Utc::now();
    repo.create("water plants", now - ChronoDuration::seconds(1))
        .unwrap();

    assert_eq!(fire_due(&repo, &session, now).unwrap(), 1);
    assert!(repo.pending().unwrap().is_empty());
}
