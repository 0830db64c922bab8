//! Reconstruct complete tool calls from streamed vendor output.
//!
//! Vendors deliver tool calls in one of two ways. Incremental vendors send the call id and
//! name first and then the argument JSON as text fragments split at arbitrary points.
//! Atomic vendors send the whole call, arguments already structured, in one block. Both
//! feed the same per call state machine here:
//!
//! ```text
//! Pending(fragments) --finish--> Complete(arguments)
//!        \--complete_with------------^
//! ```
//!
//! Fragments are concatenated in arrival order and parsed exactly once when the vendor
//! signals the call is complete. A document that does not parse to an object degrades to an
//! empty argument map. An accumulator lives for one response only.
use std::collections::HashMap;

use serde_json::{Map, Value};

use super::utils::generate_call_id;
use crate::errors::ProviderError;
use crate::models::tool::ToolCall;

/// How a delta identifies the call it belongs to
///
/// The id is authoritative. The stream position is a fallback for deltas that arrive
/// before, or without, an id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallKey<'a> {
    pub id: Option<&'a str>,
    pub index: Option<usize>,
}

impl<'a> CallKey<'a> {
    pub fn new(id: Option<&'a str>, index: Option<usize>) -> Self {
        Self {
            id: id.filter(|id| !id.is_empty()),
            index,
        }
    }

    pub fn id(id: &'a str) -> Self {
        Self::new(Some(id), None)
    }

    pub fn index(index: usize) -> Self {
        Self::new(None, Some(index))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    Pending { fragments: Vec<String> },
    Complete { arguments: Map<String, Value> },
}

impl Default for CallState {
    fn default() -> Self {
        CallState::Pending {
            fragments: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    id: Option<String>,
    name: String,
    state: CallState,
    emitted: bool,
}

impl Slot {
    /// Move to `Complete`, parsing the fragments if still pending
    fn complete(&mut self) -> Map<String, Value> {
        let arguments = match &self.state {
            CallState::Pending { fragments } => {
                parse_arguments(self.id.as_deref().unwrap_or_default(), &fragments.concat())
            }
            CallState::Complete { arguments } => arguments.clone(),
        };
        self.state = CallState::Complete {
            arguments: arguments.clone(),
        };
        arguments
    }
}

#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: Vec<Slot>,
    by_id: HashMap<String, usize>,
    by_index: HashMap<usize, usize>,
    last: Option<usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Find the slot for a key, creating it on first sight
    fn resolve(&mut self, key: CallKey<'_>) -> usize {
        let found = match (key.id, key.index) {
            // a bare continuation delta belongs to the call seen last
            (None, None) => self.last,
            (None, Some(index)) => self.by_index.get(&index).copied(),
            // a new id only adopts an index slot that has no id of its own
            (Some(id), index) => self.by_id.get(id).copied().or_else(|| {
                index
                    .and_then(|index| self.by_index.get(&index).copied())
                    .filter(|position| self.slots[*position].id.is_none())
            }),
        };

        let position = match found {
            Some(position) => position,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };

        if let Some(index) = key.index {
            self.by_index.insert(index, position);
        }
        if let Some(id) = key.id {
            let slot = &mut self.slots[position];
            if slot.id.is_none() {
                slot.id = Some(id.to_string());
                self.by_id.insert(id.to_string(), position);
            }
        }
        self.last = Some(position);
        position
    }

    /// Register a call, or fill in its name if it is already known
    pub fn begin(&mut self, key: CallKey<'_>, name: Option<&str>) {
        let position = self.resolve(key);
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            let slot = &mut self.slots[position];
            if slot.name.is_empty() {
                slot.name = name.to_string();
            }
        }
    }

    /// Append a fragment of argument text in arrival order
    pub fn push_fragment(&mut self, key: CallKey<'_>, fragment: &str) {
        let position = self.resolve(key);
        match &mut self.slots[position].state {
            CallState::Pending { fragments } => fragments.push(fragment.to_string()),
            CallState::Complete { .. } => {
                tracing::debug!(?key, "ignoring argument fragment for a completed tool call")
            }
        }
    }

    /// Record a call whose arguments arrived already structured
    pub fn complete_with(&mut self, key: CallKey<'_>, name: &str, arguments: Map<String, Value>) {
        self.begin(key, Some(name));
        let position = self.resolve(key);
        self.slots[position].state = CallState::Complete { arguments };
    }

    /// Current state of a call, if it is known
    pub fn state(&self, key: CallKey<'_>) -> Option<&CallState> {
        let position = key
            .id
            .and_then(|id| self.by_id.get(id))
            .or_else(|| key.index.and_then(|index| self.by_index.get(&index)))?;
        Some(&self.slots[*position].state)
    }

    /// Complete one call and hand it out
    ///
    /// Returns `None` if the call is unknown, has already been handed out, or never
    /// received a name.
    pub fn finish(&mut self, key: CallKey<'_>) -> Option<ToolCall> {
        let position = key
            .id
            .and_then(|id| self.by_id.get(id).copied())
            .or_else(|| key.index.and_then(|index| self.by_index.get(&index).copied()))?;
        self.finish_slot(position)
    }

    /// Complete every call not yet handed out, in the order they were first seen
    pub fn finish_all(&mut self) -> Vec<ToolCall> {
        (0..self.slots.len())
            .filter_map(|position| self.finish_slot(position))
            .collect()
    }

    fn finish_slot(&mut self, position: usize) -> Option<ToolCall> {
        let slot = &mut self.slots[position];
        if slot.emitted {
            return None;
        }
        slot.emitted = true;

        let arguments = slot.complete();
        if slot.name.is_empty() {
            tracing::warn!(id = ?slot.id, "dropping tool call that never received a name");
            return None;
        }
        let id = slot.id.get_or_insert_with(generate_call_id).clone();
        Some(ToolCall::new(id, slot.name.clone(), arguments))
    }
}

/// Parse accumulated argument text into an object
///
/// Empty text is an empty map. Anything that fails to parse, or parses to something other
/// than an object, is logged and degrades to an empty map.
pub fn parse_arguments(id: &str, text: &str) -> Map<String, Value> {
    if text.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(arguments)) => arguments,
        Ok(other) => {
            tracing::warn!(id, value = %other, "tool arguments are not an object, using empty arguments");
            Map::new()
        }
        Err(source) => {
            let err = ProviderError::ToolArgumentParse {
                id: id.to_string(),
                source,
            };
            tracing::warn!(error = %err, "using empty arguments");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_incremental_fragments_by_id() {
        let mut acc = ToolCallAccumulator::new();
        acc.begin(CallKey::id("c1"), Some("read_file"));
        acc.push_fragment(CallKey::id("c1"), "{\"filePath\":");
        acc.push_fragment(CallKey::id("c1"), "\"a.txt\"}");

        let calls = acc.finish_all();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, object(json!({"filePath": "a.txt"})));
    }

    #[test]
    fn test_index_fallback_binds_late_id() {
        let mut acc = ToolCallAccumulator::new();
        acc.begin(CallKey::new(Some("call_a"), Some(0)), Some("list_files"));
        acc.begin(CallKey::new(Some("call_b"), Some(1)), Some("read_file"));
        acc.push_fragment(CallKey::index(1), "{\"filePath\":\"b.rs\"}");
        acc.push_fragment(CallKey::index(0), "{\"path\":\".\"}");

        let calls = acc.finish_all();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, object(json!({"path": "."})));
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].arguments, object(json!({"filePath": "b.rs"})));
    }

    #[test]
    fn test_distinct_ids_sharing_an_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.begin(CallKey::new(Some("call_a"), Some(0)), Some("list_files"));
        acc.push_fragment(CallKey::index(0), "{\"path\":\".\"}");
        acc.begin(CallKey::new(Some("call_b"), Some(0)), Some("read_file"));
        acc.push_fragment(CallKey::index(0), "{\"path\":\"b.rs\"}");

        let calls = acc.finish_all();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "list_files");
        assert_eq!(calls[0].arguments, object(json!({"path": "."})));
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].name, "read_file");
        assert_eq!(calls[1].arguments, object(json!({"path": "b.rs"})));
    }

    #[test]
    fn test_id_arriving_after_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.push_fragment(CallKey::index(0), "{\"a\":");
        acc.begin(CallKey::new(Some("late"), Some(0)), Some("tool"));
        acc.push_fragment(CallKey::id("late"), "1}");

        let call = acc.finish(CallKey::id("late")).unwrap();
        assert_eq!(call.arguments, object(json!({"a": 1})));
    }

    #[test]
    fn test_fragment_split_invariance() {
        let document = r#"{"path":"src/main.rs","content":"fn main() {\n    println!(\"hi\");\n}","mode":{"append":false,"lines":[1,2,3]}}"#;
        let expected = parse_arguments("whole", document);
        assert!(!expected.is_empty());

        let boundaries: Vec<usize> = (0..=document.len())
            .filter(|i| document.is_char_boundary(*i))
            .collect();

        // every single split point
        for &split in &boundaries {
            let mut acc = ToolCallAccumulator::new();
            acc.begin(CallKey::id("c"), Some("write_file"));
            acc.push_fragment(CallKey::id("c"), &document[..split]);
            acc.push_fragment(CallKey::id("c"), &document[split..]);
            let call = acc.finish(CallKey::id("c")).unwrap();
            assert_eq!(call.arguments, expected, "split at {}", split);
        }

        // one character per fragment
        let mut acc = ToolCallAccumulator::new();
        acc.begin(CallKey::index(0), Some("write_file"));
        for ch in document.chars() {
            acc.push_fragment(CallKey::index(0), &ch.to_string());
        }
        assert_eq!(acc.finish_all()[0].arguments, expected);
    }

    #[test]
    fn test_malformed_arguments_degrade_to_empty() {
        let mut acc = ToolCallAccumulator::new();
        acc.begin(CallKey::id("c1"), Some("read_file"));
        acc.push_fragment(CallKey::id("c1"), "{invalid");

        let call = acc.finish(CallKey::id("c1")).unwrap();
        assert!(call.arguments.is_empty());
        assert_eq!(
            acc.state(CallKey::id("c1")),
            Some(&CallState::Complete {
                arguments: Map::new()
            })
        );
    }

    #[test]
    fn test_non_object_arguments_degrade_to_empty() {
        assert!(parse_arguments("c", "[1, 2]").is_empty());
        assert!(parse_arguments("c", "   ").is_empty());
    }

    #[test]
    fn test_atomic_block_needs_no_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.complete_with(
            CallKey::id("x"),
            "write_file",
            object(json!({"path": "b.txt", "content": "hi"})),
        );
        assert!(matches!(
            acc.state(CallKey::id("x")),
            Some(CallState::Complete { .. })
        ));

        let call = acc.finish(CallKey::id("x")).unwrap();
        assert_eq!(call.name, "write_file");
        assert_eq!(call.arguments, object(json!({"path": "b.txt", "content": "hi"})));
    }

    #[test]
    fn test_finish_hands_out_each_call_once() {
        let mut acc = ToolCallAccumulator::new();
        acc.begin(CallKey::id("c1"), Some("list_files"));
        assert!(acc.finish(CallKey::id("c1")).is_some());
        assert!(acc.finish(CallKey::id("c1")).is_none());
        assert!(acc.finish_all().is_empty());
        assert!(acc.finish(CallKey::id("unknown")).is_none());
    }

    #[test]
    fn test_bare_fragments_continue_last_call() {
        let mut acc = ToolCallAccumulator::new();
        acc.begin(CallKey::id("c1"), Some("read_file"));
        acc.push_fragment(CallKey::default(), "{\"filePath\":");
        acc.push_fragment(CallKey::default(), "\"x\"}");

        let calls = acc.finish_all();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, object(json!({"filePath": "x"})));
    }

    #[test]
    fn test_nameless_call_is_dropped_and_missing_id_generated() {
        let mut acc = ToolCallAccumulator::new();
        acc.push_fragment(CallKey::index(0), "{}");
        acc.begin(CallKey::index(1), Some("list_files"));

        let calls = acc.finish_all();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_files");
        assert!(calls[0].id.starts_with("call_"));
    }
}
