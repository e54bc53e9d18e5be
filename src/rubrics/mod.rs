//! Built-in rubrics.

pub mod solvability;
pub mod trajectory;
pub mod trajectory_with_user;

use crate::rubric::{DefinitionError, Rubric};

pub const CONVERSATION_TOOL_NAME: &str = "annotate_conversation";
pub const CONVERSATION_TOOL_DESCRIPTION: &str = "Annotate agent conversation.";

/// Agent-only conversation rubric.
pub fn annotate_conversation_rubric() -> Result<Rubric, DefinitionError> {
    Rubric::builder(CONVERSATION_TOOL_NAME, CONVERSATION_TOOL_DESCRIPTION)
        .system_message(trajectory::SYSTEM_MESSAGE)
        .user_message(trajectory::INSTRUCTION_MESSAGE)
        .features(trajectory::features())
        .build()
}

/// Conversation rubric extended with user follow-up features.
pub fn annotate_conversation_with_user_rubric() -> Result<Rubric, DefinitionError> {
    Rubric::builder(CONVERSATION_TOOL_NAME, CONVERSATION_TOOL_DESCRIPTION)
        .system_message(trajectory_with_user::SYSTEM_MESSAGE)
        .user_message(trajectory_with_user::INSTRUCTION_MESSAGE)
        .features(trajectory::features())
        .features(trajectory_with_user::features())
        .build()
}

pub fn trajectory_rubric(has_user_follow_up: bool) -> Result<Rubric, DefinitionError> {
    if has_user_follow_up {
        annotate_conversation_with_user_rubric()
    } else {
        annotate_conversation_rubric()
    }
}

pub fn solvability_rubric() -> Result<Rubric, DefinitionError> {
    Rubric::builder(solvability::TOOL_NAME, solvability::TOOL_DESCRIPTION)
        .system_message(solvability::SYSTEM_MESSAGE)
        .user_message(solvability::INSTRUCTION_MESSAGE)
        .features(solvability::features())
        .build()
}
