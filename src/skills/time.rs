//! Current time

use async_trait::async_trait;
use chrono::Local;

use super::types::{Response, Skill, SkillContext};
use crate::Result;

/// Reads out the local time as `HH:MM`
pub struct TimeSkill;

#[async_trait]
impl Skill for TimeSkill {
    fn name(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "Tells the current time"
    }

    fn keywords(&self) -> &[&str] {
        &["time"]
    }

    async fn handle(&self, _text: &str, _ctx: &SkillContext) -> Result<Option<Response>> {
        Ok(Some(Response::simple(Local::now().format("%H:%M").to_string())))
    }
}
