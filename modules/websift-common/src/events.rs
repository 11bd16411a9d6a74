//! Stream frames delivered to job subscribers.
//!
//! The `type` tag selects the variant; field names are the wire contract
//! consumed by browser clients, so they serialize camelCase and must not
//! change shape. Frames serialize to `serde_json::Value` for SSE delivery.

use serde::{Deserialize, Serialize};

use crate::types::RejectionReason;

/// One event on a job's subscriber stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// First frame after subscribing.
    #[serde(rename_all = "camelCase")]
    Connected { webset_id: String },

    /// Upstream/controller status transitions.
    #[serde(rename_all = "camelCase")]
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_count: Option<u64>,
    },

    /// An accepted item, raw upstream shape.
    Item { item: serde_json::Value },

    /// A new item is awaiting an LLM verdict.
    #[serde(rename_all = "camelCase")]
    Pending { tmp_id: String },

    /// A pending item was judged duplicate and will not appear.
    #[serde(rename_all = "camelCase")]
    Drop { tmp_id: String },

    /// A pending item was judged unique; `data.id` equals the earlier tmpId.
    Confirm { data: serde_json::Value },

    /// A suppressed item with the reason it was considered a duplicate.
    #[serde(rename_all = "camelCase")]
    Rejected {
        item: serde_json::Value,
        reason: RejectionReason,
        details: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        existing_item: Option<serde_json::Value>,
    },

    /// Terminal frame for a successful job.
    #[serde(rename_all = "camelCase")]
    Finished { status: String, total_items: u64 },

    /// Terminal frame for a failed job.
    Error { error: String },
}

impl StreamFrame {
    pub fn finished(total_items: u64) -> Self {
        StreamFrame::Finished {
            status: "idle".to_string(),
            total_items,
        }
    }
}
