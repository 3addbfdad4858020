//! The tool-calling agent loop, the heart of ToolRelay.
//!
//! A turn follows a **Call → Dispatch → Fold** cycle:
//!
//! 1. **Receive** user text and append it to the conversation
//! 2. **Send to LLM** with the full history and every tool schema
//! 3. **If tool calls**: run them all concurrently, append results in
//!    request order, loop back to step 2
//! 4. **If text only**: the turn is over
//!
//! The buffered and streaming entry points share this cycle. In streaming
//! mode, tool-call fragments are assembled by [`StreamAccumulator`] once a
//! model response has fully arrived.

pub mod accumulator;
pub mod dispatcher;
pub mod loop_runner;
pub mod session;

pub use accumulator::StreamAccumulator;
pub use dispatcher::ToolDispatcher;
pub use loop_runner::AgentLoop;
pub use session::AgentSession;
