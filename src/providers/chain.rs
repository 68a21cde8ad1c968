//! Ordered fallback over chat backends

use std::sync::Arc;
use std::time::Duration;

use mini_moka::sync::Cache;

use super::{ChatBackend, ChatMessage};
use crate::db::ConversationStore;

/// Reply when every backend has failed
pub const APOLOGY: &str =
    "All my brain connections are down. Please check your internet and API keys.";

/// Outcome of one chat turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    /// Backend that answered, `None` for the apology
    pub backend: Option<String>,
}

/// Tries each backend in priority order and records successful exchanges
pub struct ResponseProvider {
    backends: Vec<Arc<dyn ChatBackend>>,
    store: ConversationStore,
    system_prompt: String,
    history_len: usize,
    availability: Cache<String, bool>,
}

impl ResponseProvider {
    #[must_use]
    pub fn new(
        backends: Vec<Arc<dyn ChatBackend>>,
        store: ConversationStore,
        system_prompt: String,
        history_len: usize,
        availability_ttl: Duration,
    ) -> Self {
        let availability = Cache::builder()
            .max_capacity(64)
            .time_to_live(availability_ttl)
            .build();

        Self {
            backends,
            store,
            system_prompt,
            history_len,
            availability,
        }
    }

    /// Backend names in priority order
    #[must_use]
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// System prompt, recent history oldest first, then the new message
    ///
    /// A history read failure degrades to no history.
    #[must_use]
    pub fn build_messages(&self, user_message: &str) -> Vec<ChatMessage> {
        let history = self.store.get_recent(self.history_len).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load history");
            Vec::new()
        });

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(
            history
                .into_iter()
                .map(|m| ChatMessage::new(m.role, m.content)),
        );
        messages.push(ChatMessage::user(user_message));
        messages
    }

    /// Reply text for a user message; never fails
    pub async fn chat(&self, user_message: &str) -> String {
        self.chat_reply(user_message).await.text
    }

    /// Like [`chat`](Self::chat), also naming the backend that answered
    pub async fn chat_reply(&self, user_message: &str) -> ChatReply {
        let messages = self.build_messages(user_message);

        for backend in &self.backends {
            let name = backend.name().to_string();

            if !self.is_available(backend.as_ref()).await {
                tracing::debug!(backend = %name, "unavailable, skipping");
                continue;
            }

            match backend.chat(&messages).await {
                Ok(text) if !text.trim().is_empty() => {
                    let text = text.trim().to_string();
                    tracing::info!(backend = %name, chars = text.len(), "response generated");

                    if let Err(e) = self.store.add_exchange(user_message, &text) {
                        tracing::error!(error = %e, "failed to store exchange");
                    }

                    return ChatReply {
                        text,
                        backend: Some(name),
                    };
                }
                Ok(_) => {
                    tracing::warn!(backend = %name, "empty response, trying next");
                }
                Err(e) => {
                    tracing::warn!(backend = %name, error = %e, "backend failed, trying next");
                    self.availability.insert(name, false);
                }
            }
        }

        tracing::error!("all chat backends failed");
        ChatReply {
            text: APOLOGY.to_string(),
            backend: None,
        }
    }

    async fn is_available(&self, backend: &dyn ChatBackend) -> bool {
        let name = backend.name().to_string();
        if let Some(cached) = self.availability.get(&name) {
            return cached;
        }

        let available = backend.available().await;
        self.availability.insert(name, available);
        available
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::db::{MessageRole, init_memory};
    use crate::{Error, Result};

    enum Behavior {
        Reply(&'static str),
        Fail,
        Down,
    }

    struct Scripted {
        name: &'static str,
        behavior: Behavior,
        probes: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                probes: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn available(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            !matches!(self.behavior, Behavior::Down)
        }

        async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Reply(text) => Ok(text.to_string()),
                Behavior::Fail => Err(Error::Llm("boom".to_string())),
                Behavior::Down => unreachable!("chat on unavailable backend"),
            }
        }
    }

    fn provider(backends: Vec<Arc<dyn ChatBackend>>) -> (ResponseProvider, ConversationStore) {
        let store = ConversationStore::new(init_memory().unwrap());
        let provider = ResponseProvider::new(
            backends,
            store.clone(),
            "You are a test.".to_string(),
            10,
            Duration::from_secs(60),
        );
        (provider, store)
    }

    #[tokio::test]
    async fn test_falls_through_to_first_success() {
        let a = Scripted::new("a", Behavior::Down);
        let b = Scripted::new("b", Behavior::Fail);
        let c = Scripted::new("c", Behavior::Reply("hello"));
        let d = Scripted::new("d", Behavior::Reply("never"));
        let (provider, store) = provider(vec![a.clone(), b.clone(), c.clone(), d.clone()]);

        let reply = provider.chat_reply("hi").await;
        assert_eq!(reply.text, "hello");
        assert_eq!(reply.backend.as_deref(), Some("c"));
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(d.calls.load(Ordering::SeqCst), 0);

        let recent = store.get_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].role, MessageRole::User);
        assert_eq!(recent[1].content, "hello");
    }

    #[tokio::test]
    async fn test_empty_reply_counts_as_failure() {
        let a = Scripted::new("a", Behavior::Reply("   "));
        let b = Scripted::new("b", Behavior::Reply("second"));
        let (provider, _) = provider(vec![a, b]);

        assert_eq!(provider.chat("hi").await, "second");
    }

    #[tokio::test]
    async fn test_all_fail_apologizes_without_storing() {
        let (provider, store) = provider(vec![
            Scripted::new("a", Behavior::Fail),
            Scripted::new("b", Behavior::Down),
        ]);

        let reply = provider.chat_reply("hi").await;
        assert_eq!(reply.text, APOLOGY);
        assert!(reply.backend.is_none());
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_failed_backend_cached_unavailable() {
        let a = Scripted::new("a", Behavior::Fail);
        let b = Scripted::new("b", Behavior::Reply("ok"));
        let (provider, _) = provider(vec![a.clone(), b]);

        provider.chat("one").await;
        provider.chat("two").await;

        assert_eq!(a.probes.load(Ordering::SeqCst), 1);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_messages_include_history_in_order() {
        let (provider, store) = provider(Vec::new());
        store.add_exchange("first", "reply one").unwrap();
        store.add_exchange("second", "reply two").unwrap();

        let messages = provider.build_messages("third");
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            [
                "You are a test.",
                "first",
                "reply one",
                "second",
                "reply two",
                "third"
            ]
        );
        assert_eq!(messages[0].role, MessageRole::System);
    }
}
