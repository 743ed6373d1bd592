use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single recorded event.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct RecordedEvent {
    /// Milliseconds since the unix epoch when recorded. In a ping payload
    /// this is relative to the first event of that ping.
    pub timestamp: u64,
    /// The event's category.
    pub category: String,
    /// The event's name.
    pub name: String,
    /// Additional string key/value pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, String>>,
}

impl RecordedEvent {
    /// The `category.name` identifier of the event.
    pub fn identifier(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.category, self.name)
        }
    }
}

/// Rewrites event timestamps so they are relative to the earliest one.
///
/// Events are sorted by their timestamp first; ties keep their recording
/// order.
pub fn normalize_event_timestamps(events: &mut [RecordedEvent]) {
    events.sort_by_key(|event| event.timestamp);
    if let Some(first) = events.first().map(|event| event.timestamp) {
        for event in events.iter_mut() {
            event.timestamp -= first;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: u64, name: &str) -> RecordedEvent {
        RecordedEvent {
            timestamp,
            category: "ui".into(),
            name: name.into(),
            extra: None,
        }
    }

    #[test]
    fn test_normalize() {
        let mut events = vec![event(1500, "b"), event(1000, "a"), event(1500, "c")];
        normalize_event_timestamps(&mut events);
        let flat: Vec<_> = events.iter().map(|e| (e.timestamp, e.name.as_str())).collect();
        assert_eq!(flat, vec![(0, "a"), (500, "b"), (500, "c")]);
        assert_eq!(events[0].identifier(), "ui.a");
    }
}
