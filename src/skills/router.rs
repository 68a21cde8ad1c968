//! Two-phase intent routing
//!
//! Keywords are checked first in registration order. Only when nothing
//! matches is the classifier asked to pick a skill by description.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use super::types::{Response, Skill, SkillContext};
use crate::Result;

/// Answer meaning "no skill fits, use the chat chain"
const GENERAL: &str = "general";

/// Fast model that maps a prompt to a skill name
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Raw completion for the classification prompt
    ///
    /// # Errors
    ///
    /// Returns error if the model call fails
    async fn classify(&self, prompt: &str) -> Result<String>;
}

/// Dispatches text to at most one skill
pub struct IntentRouter {
    skills: Vec<Arc<dyn Skill>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
}

impl IntentRouter {
    #[must_use]
    pub fn new(skills: Vec<Arc<dyn Skill>>, classifier: Option<Arc<dyn IntentClassifier>>) -> Self {
        Self { skills, classifier }
    }

    /// Registered skill names in registration order
    #[must_use]
    pub fn skill_names(&self) -> Vec<&str> {
        self.skills.iter().map(|s| s.name()).collect()
    }

    /// Route text to a skill; `None` hands it to the chat chain
    pub async fn route(&self, text: &str, ctx: &SkillContext) -> Option<Response> {
        if let Some(skill) = self.skills.iter().find(|s| s.matches(text)) {
            tracing::info!(skill = skill.name(), "keyword match");
            return invoke(skill.as_ref(), text, ctx).await;
        }

        let name = self.classify(text).await?;
        // Answers are lower-cased; names are unique ignoring case
        let skill = self
            .skills
            .iter()
            .find(|s| s.name().to_lowercase() == name)?;
        tracing::info!(skill = skill.name(), "classifier match");
        invoke(skill.as_ref(), text, ctx).await
    }

    async fn classify(&self, text: &str) -> Option<String> {
        let classifier = self.classifier.as_ref()?;
        if self.skills.is_empty() {
            return None;
        }

        let prompt = classification_prompt(&self.skills, text);
        match classifier.classify(&prompt).await {
            Ok(raw) => {
                let answer = normalize_answer(&raw);
                tracing::debug!(answer = %answer, "intent classified");
                (answer != GENERAL).then_some(answer)
            }
            Err(e) => {
                tracing::warn!(error = %e, "classification failed");
                None
            }
        }
    }
}

/// Run one skill, converting errors and panics into no match
async fn invoke(skill: &dyn Skill, text: &str, ctx: &SkillContext) -> Option<Response> {
    match AssertUnwindSafe(skill.handle(text, ctx)).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::warn!(skill = skill.name(), error = %e, "skill failed");
            None
        }
        Err(_) => {
            tracing::error!(skill = skill.name(), "skill panicked");
            None
        }
    }
}

fn classification_prompt(skills: &[Arc<dyn Skill>], text: &str) -> String {
    let list = skills
        .iter()
        .map(|s| format!("{}: {}", s.name(), s.description()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Classify this user request into one of these skills, or respond \"general\" if none match.\n\
         Skills: {list}\n\n\
         User: \"{text}\"\n\
         Respond with ONLY the skill name or \"general\". Nothing else."
    )
}

/// Lower-case and strip quotes and surrounding punctuation
fn normalize_answer(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(['"', '\''], "")
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_answer() {
        assert_eq!(normalize_answer("  \"Reminder\".\n"), "reminder");
        assert_eq!(normalize_answer("'time'"), "time");
        assert_eq!(normalize_answer("General!"), "general");
    }
}
