//! Session watchdog
//!
//! The session loop beats once per iteration. A background task warns when
//! the beats stop; it never interrupts the loop itself. Crashes caught by
//! the loop are counted here and earn a cooldown once they pile up.

use std::fmt::Display;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SessionConfig;

struct Inner {
    last_beat: Mutex<Instant>,
    timeout: Duration,
    crash_threshold: u32,
    cooldown: Duration,
    crashes: AtomicU32,
    consecutive: AtomicU32,
}

/// Heartbeat and crash bookkeeping shared with the monitor task
#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<Inner>,
}

impl Watchdog {
    #[must_use]
    pub fn new(timeout: Duration, crash_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                last_beat: Mutex::new(Instant::now()),
                timeout,
                crash_threshold,
                cooldown,
                crashes: AtomicU32::new(0),
                consecutive: AtomicU32::new(0),
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.watchdog_timeout,
            config.crash_threshold,
            config.crash_cooldown,
        )
    }

    /// Mark the loop as alive
    pub fn heartbeat(&self) {
        if let Ok(mut last) = self.inner.last_beat.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the last heartbeat
    #[must_use]
    pub fn since_heartbeat(&self) -> Duration {
        self.inner
            .last_beat
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// No heartbeat within the timeout
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.since_heartbeat() > self.inner.timeout
    }

    /// Record a crash caught by the loop
    ///
    /// Returns the cooldown to wait when consecutive crashes exceed the
    /// threshold.
    pub fn record_crash(&self, error: &dyn Display) -> Option<Duration> {
        let total = self.inner.crashes.fetch_add(1, Ordering::SeqCst) + 1;
        let consecutive = self.inner.consecutive.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::error!(crash = total, consecutive, error = %error, "session step crashed");

        if consecutive > self.inner.crash_threshold {
            tracing::warn!(
                cooldown_secs = self.inner.cooldown.as_secs_f32(),
                "too many crashes, cooling down"
            );
            Some(self.inner.cooldown)
        } else {
            None
        }
    }

    /// A step finished cleanly
    pub fn record_success(&self) {
        self.inner.consecutive.store(0, Ordering::SeqCst);
    }

    /// Crashes since startup
    #[must_use]
    pub fn crash_count(&self) -> u32 {
        self.inner.crashes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn consecutive_crashes(&self) -> u32 {
        self.inner.consecutive.load(Ordering::SeqCst)
    }

    /// Start the monitor task
    #[must_use]
    pub fn spawn(&self, every: Duration) -> JoinHandle<()> {
        let watchdog = self.clone();
        tracing::info!(
            interval_secs = every.as_secs_f32(),
            timeout_secs = self.inner.timeout.as_secs_f32(),
            "health monitor started"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;

            loop {
                interval.tick().await;
                if watchdog.is_stalled() {
                    tracing::warn!(
                        elapsed_secs = watchdog.since_heartbeat().as_secs_f32(),
                        "no heartbeat, session may be frozen"
                    );
                }
            }
        })
    }
}
