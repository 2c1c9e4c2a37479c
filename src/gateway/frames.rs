//! Wire format of the live channel.

use serde::{Deserialize, Serialize};

use crate::db::MessageEnvelope;
use crate::error::AppError;

/// What a client sends: one piece of message content.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub content: String,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text)
            .map_err(|e| AppError::Validation(format!("Malformed frame: {}", e)))
    }
}

/// Everything the server pushes, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage { message: MessageEnvelope },
}
