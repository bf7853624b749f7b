//! Worker protocol.
//!
//! The host talks to a render worker with [`RenderMessage`]s. Hosts that
//! speak JSON send a [`RenderCommand`] instead; the surface itself can only
//! be handed over in-process.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};
use crate::options::RenderOptions;

/// Messages delivered to a render worker.
#[derive(Debug)]
pub enum RenderMessage<S, D> {
    /// Exclusive ownership of the drawing surface.
    Canvas(S),
    /// Replacement view options.
    Opts(RenderOptions),
    /// Replacement plot data.
    Data(D),
}

impl<S, D> RenderMessage<S, D> {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RenderMessage::Canvas(_) => "canvas",
            RenderMessage::Opts(_) => "opts",
            RenderMessage::Data(_) => "data",
        }
    }
}

/// JSON form of the option and data messages.
///
/// Exactly one of `{"opts": ...}` or `{"data": ...}`; anything else is
/// rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderCommand<D> {
    /// Replacement view options.
    Opts(RenderOptions),
    /// Replacement plot data.
    Data(D),
}

impl<D: DeserializeOwned> RenderCommand<D> {
    /// Parse a command.
    ///
    /// # Errors
    /// Returns [`RenderError::InvalidCommand`] for malformed JSON or an
    /// unknown message shape.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RenderError::InvalidCommand(e.to_string()))
    }
}

impl<S, D> From<RenderCommand<D>> for RenderMessage<S, D> {
    fn from(command: RenderCommand<D>) -> Self {
        match command {
            RenderCommand::Opts(opts) => RenderMessage::Opts(opts),
            RenderCommand::Data(data) => RenderMessage::Data(data),
        }
    }
}
