use crate::io_struct::{ChatRequest, Role};

/// Model identifiers the relay forwards upstream. Anything else is rejected
/// before a connection is opened.
pub const AVAILABLE_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4.1",
    "o1",
    "o4-mini",
    "deepseek-r1-0528",
    "deepseek-v3-0324",
    "grok-3",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid model")]
    UnknownModel,

    #[error("messages cannot be empty")]
    EmptyMessages,

    #[error("invalid role")]
    InvalidRole,

    #[error("message content cannot be empty")]
    EmptyContent,
}

pub fn is_available_model(model: &str) -> bool {
    AVAILABLE_MODELS.contains(&model)
}

/// Checks `req` and reports the first violation in field order.
pub fn validate(req: &ChatRequest) -> Result<(), ValidationError> {
    if !is_available_model(&req.model) {
        return Err(ValidationError::UnknownModel);
    }
    if req.messages.is_empty() {
        return Err(ValidationError::EmptyMessages);
    }
    for message in &req.messages {
        message.role.parse::<Role>()?;
        if message.content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
    }
    Ok(())
}
