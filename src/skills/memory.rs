//! Forget the conversation on request

use async_trait::async_trait;

use super::types::{Response, Skill, SkillContext};
use crate::Result;

/// Clears the stored conversation history
pub struct MemorySkill;

#[async_trait]
impl Skill for MemorySkill {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Forgets or clears the conversation history"
    }

    fn keywords(&self) -> &[&str] {
        &[
            "forget everything",
            "forget our conversation",
            "clear history",
            "clear your memory",
            "clear our conversation",
        ]
    }

    async fn handle(&self, _text: &str, ctx: &SkillContext) -> Result<Option<Response>> {
        let removed = ctx.session.store().clear()?;
        tracing::info!(removed, "conversation history cleared");
        Ok(Some(Response::simple(
            "Done, I've forgotten our conversation.",
        )))
    }
}
