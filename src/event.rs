use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::ids::{AssetId, ElementId};

/// User-facing notices. Each is emitted at most once per reference per registry lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    /// The file behind an asset reference could not be found.
    AssetMissing { asset: AssetId, locator: String },
    /// Nested scene resolution exceeded the configured depth.
    RecursionLimit { locator: String, depth: usize },
    /// A document was embedded as an image while it was already being rendered that way.
    RecursionCycle { locator: String },
    /// A render backend gave up on an asset after all retries.
    RenderFailed { locator: String, reason: String },
}

impl Display for Notice {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Notice::AssetMissing { locator, .. } => write!(f, "Embedded file not found: {locator}"),
            Notice::RecursionLimit { locator, depth } => write!(
                f,
                "Embedding stopped at depth {depth} while rendering {locator}. Do these drawings embed each other?"
            ),
            Notice::RecursionCycle { locator } => write!(
                f,
                "{locator} embeds itself, directly or through another document. Rendering stopped."
            ),
            Notice::RenderFailed { locator, reason } => {
                write!(f, "Could not render {locator}: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    Notice(Notice),
    /// A foreign element id was replaced by a stable one (from, to).
    IdRewritten(ElementId, ElementId),
    /// A resolution batch was handed to the caller; carries the batch size.
    BatchFlushed(usize),
}

impl Display for SyncEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SyncEvent::Notice(notice) => write!(f, "Notice({notice})"),
            SyncEvent::IdRewritten(from, to) => write!(f, "IdRewritten({from} -> {to})"),
            SyncEvent::BatchFlushed(n) => write!(f, "BatchFlushed({n})"),
        }
    }
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<SyncEvent>;

/// Send on an optional channel, logging instead of failing when the receiver is gone.
pub fn emit(tx: Option<&EventSender>, event: SyncEvent) {
    if let Some(tx) = tx {
        if let Err(e) = tx.send(event) {
            tracing::debug!("[SyncEvent] receiver dropped, discarding {}", e.0);
        }
    }
}
