use crate::validator::ValidationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Inbound `/chat/completions` body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
}

/// A single chat turn as the caller sent it. The role stays free text until
/// validation so an unknown role is reported as such instead of as a
/// malformed body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(ValidationError::InvalidRole),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamMessage {
    pub role: Role,
    pub content: String,
}

/// Body sent to the provider. Built once per call from a validated
/// [`ChatRequest`]; the stream flag is set by the client for the mode it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<UpstreamMessage>,
    pub stream: bool,
}

impl UpstreamRequest {
    pub(crate) fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

impl TryFrom<ChatRequest> for UpstreamRequest {
    type Error = ValidationError;

    fn try_from(req: ChatRequest) -> Result<Self, Self::Error> {
        let messages = req
            .messages
            .into_iter()
            .map(|m| {
                Ok(UpstreamMessage {
                    role: m.role.parse()?,
                    content: m.content,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;
        Ok(Self {
            model: req.model,
            messages,
            stream: req.stream,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

/// Decoded non-streaming provider response.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatedResponse {
    pub choices: Vec<Choice>,
}

impl AggregatedResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}
