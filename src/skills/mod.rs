//! Skills: specialized handlers tried before the chat chain
//!
//! Skills are registered explicitly at startup; registration order decides
//! which skill wins when several keywords match.

mod memory;
mod reminder;
mod router;
mod time;
mod types;

pub use memory::MemorySkill;
pub use reminder::{
    ReminderRequest, ReminderSkill, WORKER_INTERVAL, fire_due, parse_request, spawn_worker,
};
pub use router::{IntentClassifier, IntentRouter};
pub use time::TimeSkill;
pub use types::{DEFAULT_FOLLOWUP_TIMEOUT, Response, SessionHandle, Skill, SkillContext};

use std::sync::Arc;

use crate::{Error, Result};

/// Builder collecting skills in registration order
#[derive(Default)]
pub struct SkillRegistry {
    skills: Vec<Arc<dyn Skill>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
}

impl SkillRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill
    ///
    /// # Errors
    ///
    /// Returns error if a skill with the same name is already registered
    pub fn register(&mut self, skill: Arc<dyn Skill>) -> Result<&mut Self> {
        let name = skill.name().to_lowercase();
        if self.skills.iter().any(|s| s.name().to_lowercase() == name) {
            return Err(Error::Skill(format!("duplicate skill name: {name}")));
        }

        tracing::debug!(skill = %name, keywords = ?skill.keywords(), "skill registered");
        self.skills.push(skill);
        Ok(self)
    }

    /// Classifier consulted when no keyword matches
    pub fn classifier(&mut self, classifier: Arc<dyn IntentClassifier>) -> &mut Self {
        self.classifier = Some(classifier);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Freeze the registry into a router
    #[must_use]
    pub fn build(self) -> IntentRouter {
        tracing::info!(
            skills = ?self.skills.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            classifier = self.classifier.is_some(),
            "skills loaded"
        );
        IntentRouter::new(self.skills, self.classifier)
    }
}
