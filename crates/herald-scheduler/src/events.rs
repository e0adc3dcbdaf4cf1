//! Status events for the notification collaborator.

use herald_store::ContentStatus;
use serde::{Deserialize, Serialize};

/// Capacity of the status broadcast channel. Slow subscribers lag and lose
/// the oldest events.
pub const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Emitted when a content item is published or fails for good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub item_id: i64,
    pub owner_id: i64,
    pub schedule_id: i64,
    pub status: ContentStatus,
    pub message: String,
    pub data: serde_json::Value,
}
