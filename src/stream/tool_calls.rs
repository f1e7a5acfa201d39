use std::collections::BTreeMap;

use crate::models::{ToolCall, ToolCallChunk};

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    args: String,
}

/// Folds streamed `tool_call_chunk` fragments into complete tool calls.
///
/// Fragments are grouped by `index`; a fragment without one continues the most
/// recent call. The name is taken from the first fragment that carries it and
/// argument text is concatenated in arrival order.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &ToolCallChunk) {
        let index = chunk
            .index
            .or_else(|| self.calls.keys().next_back().copied())
            .unwrap_or(0);
        let call = self.calls.entry(index).or_default();

        if let Some(id) = chunk.id.as_deref().filter(|id| !id.is_empty()) {
            call.id = id.to_string();
        }
        if let Some(name) = chunk.name.as_deref().filter(|name| !name.is_empty()) {
            if call.name.is_empty() {
                call.name = name.to_string();
            }
        }
        if let Some(args) = &chunk.args {
            call.args.push_str(args);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order; fragments that never got a name are dropped.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| ToolCall { id: call.id, name: call.name, args: call.args })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: Option<usize>, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallChunk {
        ToolCallChunk {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            args: args.map(str::to_string),
        }
    }

    #[test]
    fn assembles_interleaved_calls_by_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&chunk(Some(0), Some("call_1"), Some("search_flights"), Some("{\"to\":")));
        acc.push(&chunk(Some(1), Some("call_2"), Some("search_hotels"), Some("{")));
        acc.push(&chunk(Some(0), None, None, Some("\"NRT\"}")));
        acc.push(&chunk(Some(1), None, Some(""), Some("}")));

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "search_flights");
        assert_eq!(calls[0].args, "{\"to\":\"NRT\"}");
        assert_eq!(calls[1].name, "search_hotels");
        assert_eq!(calls[1].args, "{}");
    }

    #[test]
    fn chunk_without_index_continues_latest_call() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&chunk(None, Some("c"), Some("lookup"), Some("{\"a\"")));
        acc.push(&chunk(None, None, None, Some(":1}")));
        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, "{\"a\":1}");
    }

    #[test]
    fn nameless_fragments_are_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&chunk(Some(3), None, None, Some("{}")));
        assert!(!acc.is_empty());
        assert!(acc.finish().is_empty());
    }
}
