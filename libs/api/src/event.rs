//! Pod update events delivered to a node.

use serde::{Deserialize, Serialize};

use crate::pod::Pod;

/// Kind of change carried by a `PodUpdateEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodUpdateType {
    Add,
    Update,
    Remove,
}

impl std::fmt::Display for PodUpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodUpdateType::Add => write!(f, "add"),
            PodUpdateType::Update => write!(f, "update"),
            PodUpdateType::Remove => write!(f, "remove"),
        }
    }
}

/// A change to a pod assigned to this node.
///
/// Events for the same pod must be applied in delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodUpdateEvent {
    #[serde(rename = "type")]
    pub update_type: PodUpdateType,
    pub pod: Pod,
}

impl PodUpdateEvent {
    pub fn add(pod: Pod) -> Self {
        Self {
            update_type: PodUpdateType::Add,
            pod,
        }
    }

    pub fn update(pod: Pod) -> Self {
        Self {
            update_type: PodUpdateType::Update,
            pod,
        }
    }

    pub fn remove(pod: Pod) -> Self {
        Self {
            update_type: PodUpdateType::Remove,
            pod,
        }
    }
}

/// One entry of the node event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventItem {
    /// Per-node delivery sequence, strictly increasing.
    pub seq: i64,
    pub event: PodUpdateEvent,
}

/// A page of the node event feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    #[serde(default)]
    pub items: Vec<EventItem>,
    /// Sequence to resume from on the next poll.
    #[serde(default)]
    pub next_after_seq: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_batch_deserialization() {
        let json = r#"{
            "items": [
                {"seq": 7, "event": {"type": "Add", "pod": {"metadata": {"id": "p1"}}}},
                {"seq": 8, "event": {"type": "Remove", "pod": {"metadata": {"id": "p1"}}}}
            ],
            "nextAfterSeq": 8
        }"#;

        let batch: EventBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[0].event.update_type, PodUpdateType::Add);
        assert_eq!(batch.items[1].event.update_type, PodUpdateType::Remove);
        assert_eq!(batch.next_after_seq, 8);
    }

    #[test]
    fn test_update_type_display() {
        assert_eq!(PodUpdateType::Add.to_string(), "add");
        assert_eq!(PodUpdateType::Update.to_string(), "update");
        assert_eq!(PodUpdateType::Remove.to_string(), "remove");
    }
}
