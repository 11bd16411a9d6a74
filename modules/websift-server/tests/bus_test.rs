//! Broadcast bus ordering and replay semantics.

use serde_json::json;

use websift_common::{RejectionReason, StreamFrame};
use websift_server::bus::JobBus;

fn kind(frame: &StreamFrame) -> &'static str {
    match frame {
        StreamFrame::Connected { .. } => "connected",
        StreamFrame::Status { .. } => "status",
        StreamFrame::Item { .. } => "item",
        StreamFrame::Pending { .. } => "pending",
        StreamFrame::Drop { .. } => "drop",
        StreamFrame::Confirm { .. } => "confirm",
        StreamFrame::Rejected { .. } => "rejected",
        StreamFrame::Finished { .. } => "finished",
        StreamFrame::Error { .. } => "error",
    }
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn subscriber_sees_connected_then_live_frames_in_order() {
    let bus = JobBus::new("ws_1".into());
    let mut rx = bus.subscribe();

    bus.broadcast(StreamFrame::Item {
        item: json!({"id": "a"}),
    });
    bus.broadcast(StreamFrame::Pending {
        tmp_id: "b".into(),
    });
    bus.broadcast(StreamFrame::Confirm {
        data: json!({"id": "b"}),
    });

    let frames = drain(&mut rx);
    let kinds: Vec<_> = frames.iter().map(kind).collect();
    assert_eq!(kinds, vec!["connected", "item", "pending", "confirm"]);
}

#[tokio::test]
async fn late_subscriber_replays_accepted_items_only() {
    let bus = JobBus::new("ws_1".into());

    bus.broadcast(StreamFrame::Item {
        item: json!({"id": "a"}),
    });
    bus.broadcast(StreamFrame::Rejected {
        item: json!({"id": "b"}),
        reason: RejectionReason::ExactMatch,
        details: "fingerprint collision".into(),
        existing_item: Some(json!({"id": "a"})),
    });
    bus.broadcast(StreamFrame::Confirm {
        data: json!({"id": "c"}),
    });

    let mut rx = bus.subscribe();
    let frames = drain(&mut rx);
    let kinds: Vec<_> = frames.iter().map(kind).collect();
    // Rejections are not replayed; confirmed items replay as items.
    assert_eq!(kinds, vec!["connected", "item", "item"]);

    let ids: Vec<&str> = frames
        .iter()
        .filter_map(|f| match f {
            StreamFrame::Item { item } => item["id"].as_str(),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec!["a", "c"]);
}

#[tokio::test]
async fn finished_is_terminal_and_late_subscribers_get_it() {
    let bus = JobBus::new("ws_1".into());
    let mut live = bus.subscribe();

    bus.broadcast(StreamFrame::Item {
        item: json!({"id": "a"}),
    });
    bus.broadcast(StreamFrame::finished(1));

    // Live subscriber: finished is the last frame, channel closes after.
    let frames = drain(&mut live);
    assert_eq!(kind(frames.last().unwrap()), "finished");
    assert!(live.recv().await.is_none(), "bus must drop sinks after finished");

    // Late subscriber: connected, replay, then the terminal frame.
    let mut late = bus.subscribe();
    let frames = drain(&mut late);
    let kinds: Vec<_> = frames.iter().map(kind).collect();
    assert_eq!(kinds, vec!["connected", "item", "finished"]);
    assert!(late.recv().await.is_none());
}

#[tokio::test]
async fn slow_subscriber_is_dropped_without_blocking_others() {
    let bus = JobBus::new("ws_1".into());
    let mut slow = bus.subscribe();
    let mut healthy = bus.subscribe();

    // Overflow the slow subscriber's buffer without draining it.
    for i in 0..400 {
        bus.broadcast(StreamFrame::Status {
            status: format!("tick-{i}"),
            item_count: None,
        });
        // Keep the healthy subscriber drained.
        while healthy.try_recv().is_ok() {}
    }

    assert_eq!(bus.subscriber_count(), 1, "slow sink must be dropped");

    // The healthy subscriber still receives live frames.
    bus.broadcast(StreamFrame::Item {
        item: json!({"id": "a"}),
    });
    let frames = drain(&mut healthy);
    assert!(frames.iter().any(|f| kind(f) == "item"));

    // The slow subscriber got the prefix it had room for, then nothing.
    let got = drain(&mut slow);
    assert!(!got.is_empty());
}

#[tokio::test]
async fn totals_count_accepts_and_rejects() {
    let bus = JobBus::new("ws_1".into());

    bus.broadcast(StreamFrame::Item {
        item: json!({"id": "a"}),
    });
    bus.broadcast(StreamFrame::Confirm {
        data: json!({"id": "b"}),
    });
    bus.broadcast(StreamFrame::Rejected {
        item: json!({"id": "c"}),
        reason: RejectionReason::NearDuplicate,
        details: "close name".into(),
        existing_item: None,
    });

    assert_eq!(bus.totals(), (2, 1));
}

#[tokio::test]
async fn pending_and_drop_are_not_replayed() {
    let bus = JobBus::new("ws_1".into());

    bus.broadcast(StreamFrame::Pending {
        tmp_id: "x".into(),
    });
    bus.broadcast(StreamFrame::Drop {
        tmp_id: "x".into(),
    });

    let mut rx = bus.subscribe();
    let frames = drain(&mut rx);
    assert_eq!(frames.iter().map(kind).collect::<Vec<_>>(), vec!["connected"]);
}
