//! Live execution events and the channel backends emit them through.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One event in a task's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEvent {
    ToolStart {
        call_id: String,
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    ToolUpdate {
        call_id: String,
        text: String,
    },
    ToolEnd {
        call_id: String,
        tool: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    AssistantDelta {
        text: String,
    },
    TurnStart {
        turn: u32,
    },
    TurnEnd {
        turn: u32,
    },
}

impl TaskEvent {
    /// Whether applying this event changes the record's tool counters.
    pub fn touches_tool_counters(&self) -> bool {
        matches!(self, Self::ToolStart { .. } | Self::ToolEnd { .. })
    }
}

/// Sending half handed to a backend. Cloneable; events from all clones are
/// delivered in the order they were emitted.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink whose events go nowhere.
    pub fn discard() -> Self {
        let (sink, _rx) = Self::channel();
        sink
    }

    /// Emit an event. Dropped silently once the receiving side is gone.
    pub fn emit(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = TaskEvent::ToolEnd {
            call_id: "c1".to_string(),
            tool: "Read".to_string(),
            is_error: false,
            detail: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "tool_end");
        assert_eq!(json["tool"], "Read");
        assert!(json.get("detail").is_none());
    }

    #[tokio::test]
    async fn sink_preserves_order() {
        let (sink, mut rx) = EventSink::channel();
        let clone = sink.clone();
        sink.emit(TaskEvent::TurnStart { turn: 1 });
        clone.emit(TaskEvent::AssistantDelta { text: "hi".into() });
        sink.emit(TaskEvent::TurnEnd { turn: 1 });
        drop(sink);
        drop(clone);

        let mut got = Vec::new();
        while let Some(e) = rx.recv().await {
            got.push(e);
        }
        assert_eq!(
            got,
            vec![
                TaskEvent::TurnStart { turn: 1 },
                TaskEvent::AssistantDelta { text: "hi".into() },
                TaskEvent::TurnEnd { turn: 1 },
            ]
        );
    }

    #[test]
    fn discard_sink_never_blocks() {
        let sink = EventSink::discard();
        sink.emit(TaskEvent::TurnStart { turn: 1 });
    }
}
