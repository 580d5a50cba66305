//! Trigger definitions.
//!
//! Only the identity and kind are material to the engine core; the
//! remaining fields pass through to external trigger adapters.

use std::time::Duration;

use mbflow_core::TriggerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What fires a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fired explicitly by a user.
    Manual,
    /// Fired automatically when the workflow is loaded.
    Auto,
    /// Fired by an inbound HTTP request.
    Http,
    /// Fired on a schedule.
    Schedule,
    /// Fired by an external event source.
    Event,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Auto => write!(f, "auto"),
            Self::Http => write!(f, "http"),
            Self::Schedule => write!(f, "schedule"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// A trigger attached to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Unique identifier.
    pub id: TriggerId,
    /// Trigger kind.
    pub kind: TriggerKind,
    /// Adapter-specific configuration (opaque to the engine).
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    /// Relative priority among triggers of the same workflow.
    #[serde(default)]
    pub priority: i32,
    /// Minimum interval between firings, in milliseconds.
    #[serde(default, with = "crate::serde_duration_opt")]
    pub cooldown: Option<Duration>,
    /// Maximum concurrently running executions started by this trigger.
    #[serde(default)]
    pub max_concurrent: Option<u32>,
}

impl TriggerDefinition {
    /// Create a trigger with default pass-through fields.
    #[must_use]
    pub fn new(id: TriggerId, kind: TriggerKind) -> Self {
        Self {
            id,
            kind,
            config: serde_json::Map::new(),
            priority: 0,
            cooldown: None,
            max_concurrent: None,
        }
    }

    /// A manual trigger with a fresh identity.
    #[must_use]
    pub fn manual() -> Self {
        Self::new(TriggerId::v4(), TriggerKind::Manual)
    }
}
