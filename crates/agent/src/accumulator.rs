//! Assembly of streamed tool-call fragments into finished requests.
//!
//! Fragments are addressed by positional index. Slots grow lazily to the
//! highest index seen, and each field of a slot fills in independently:
//! the ID and name are set by the first fragment carrying them, and argument
//! text is appended in arrival order.

use toolrelay_core::error::Error;
use toolrelay_core::message::ToolCallRequest;
use toolrelay_core::provider::ToolCallFragment;
use tracing::warn;

#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    /// Set once any fragment populated a field of this slot
    touched: bool,
}

/// Per-turn accumulator for streamed tool calls.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    slots: Vec<PartialToolCall>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into its slot.
    pub fn push(&mut self, fragment: ToolCallFragment) {
        if fragment.index >= self.slots.len() {
            self.slots
                .resize_with(fragment.index + 1, PartialToolCall::default);
        }
        let slot = &mut self.slots[fragment.index];

        if let Some(id) = fragment.id.filter(|s| !s.is_empty()) {
            slot.touched = true;
            if slot.id.is_none() {
                slot.id = Some(id);
            }
        }

        if let Some(name) = fragment.name.filter(|s| !s.is_empty()) {
            slot.touched = true;
            if slot.name.is_none() {
                slot.name = Some(name);
            }
        }

        if let Some(arguments) = fragment.arguments.filter(|s| !s.is_empty()) {
            slot.touched = true;
            slot.arguments.push_str(&arguments);
        }
    }

    /// True when no fragment has populated any field, meaning the turn
    /// ended with a plain answer.
    pub fn is_empty(&self) -> bool {
        !self.slots.iter().any(|slot| slot.touched)
    }

    /// Number of slots that received data.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.touched).count()
    }

    /// Finalize all populated slots in index order.
    ///
    /// Untouched gaps are skipped. A populated slot that never received an
    /// ID or a tool name makes the whole stream malformed.
    pub fn finalize(self) -> Result<Vec<ToolCallRequest>, Error> {
        let mut calls = Vec::with_capacity(self.slots.len());

        for (index, slot) in self.slots.into_iter().enumerate() {
            if !slot.touched {
                warn!(index, "Skipping tool call slot that received no data");
                continue;
            }

            let Some(id) = slot.id else {
                return Err(Error::MalformedStream(format!(
                    "tool call at index {index} has no id"
                )));
            };
            let Some(name) = slot.name else {
                return Err(Error::MalformedStream(format!(
                    "tool call {id} at index {index} has no tool name"
                )));
            };

            calls.push(ToolCallRequest {
                id,
                name,
                arguments: slot.arguments,
            });
        }

        Ok(calls)
    }
}
