//! Wire formats for step updates.
//!
//! Binary mode packs `{step, artifacts: [bin]}` as a MessagePack map.
//! Structured mode writes `{"step", "artifacts": [{"base64"}]}` as JSON.
//! Silent ticks omit `artifacts` in both.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lumen_core::{LumenError, Result, StepUpdate};
use serde::{Deserialize, Serialize};

/// Output mode, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Binary,
    Structured,
}

impl WireFormat {
    pub fn from_use_binary(use_binary: bool) -> Self {
        if use_binary {
            WireFormat::Binary
        } else {
            WireFormat::Structured
        }
    }
}

/// One encoded message, ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

#[derive(Serialize)]
struct BinaryUpdate<'a> {
    step: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifacts: Option<Vec<&'a serde_bytes::Bytes>>,
}

#[derive(Serialize, Deserialize)]
struct Base64Artifact {
    base64: String,
}

#[derive(Serialize)]
struct StructuredUpdate {
    step: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifacts: Option<Vec<Base64Artifact>>,
}

pub fn encode(update: &StepUpdate, format: WireFormat) -> Result<Frame> {
    let step = update.step();
    match format {
        WireFormat::Binary => {
            let message = BinaryUpdate {
                step,
                artifacts: update.artifacts().map(|artifacts| {
                    artifacts
                        .iter()
                        .map(|a| serde_bytes::Bytes::new(&a.jpeg))
                        .collect()
                }),
            };
            rmp_serde::to_vec_named(&message)
                .map(Frame::Binary)
                .map_err(|e| LumenError::Transport(format!("msgpack encode: {e}")))
        }
        WireFormat::Structured => {
            let message = StructuredUpdate {
                step,
                artifacts: update.artifacts().map(|artifacts| {
                    artifacts
                        .iter()
                        .map(|a| Base64Artifact {
                            base64: STANDARD.encode(&a.jpeg),
                        })
                        .collect()
                }),
            };
            Ok(Frame::Text(serde_json::to_string(&message)?))
        }
    }
}

/// A decoded update as a client sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireUpdate {
    pub step: usize,
    pub artifacts: Option<Vec<Vec<u8>>>,
}

#[derive(Deserialize)]
struct BinaryUpdateOwned {
    step: usize,
    #[serde(default)]
    artifacts: Option<Vec<serde_bytes::ByteBuf>>,
}

#[derive(Deserialize)]
struct StructuredUpdateOwned {
    step: usize,
    #[serde(default)]
    artifacts: Option<Vec<Base64Artifact>>,
}

pub fn decode_binary(bytes: &[u8]) -> Result<WireUpdate> {
    let message: BinaryUpdateOwned = rmp_serde::from_slice(bytes)
        .map_err(|e| LumenError::Transport(format!("msgpack decode: {e}")))?;
    Ok(WireUpdate {
        step: message.step,
        artifacts: message
            .artifacts
            .map(|a| a.into_iter().map(serde_bytes::ByteBuf::into_vec).collect()),
    })
}

pub fn decode_text(text: &str) -> Result<WireUpdate> {
    let message: StructuredUpdateOwned = serde_json::from_str(text)?;
    let artifacts = match message.artifacts {
        Some(artifacts) => Some(
            artifacts
                .into_iter()
                .map(|a| {
                    STANDARD
                        .decode(a.base64)
                        .map_err(|e| LumenError::Transport(format!("base64 decode: {e}")))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    Ok(WireUpdate {
        step: message.step,
        artifacts,
    })
}
