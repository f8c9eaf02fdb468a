//! The per-channel agent runtime — the heart of chatrelay.
//!
//! One [`ChannelAgent`] serves one channel bot identity:
//!
//! 1. **Receive** a user message from the realtime listener
//! 2. **Record** it in the bounded history and build the prompt context
//! 3. **Create** the AI placeholder message and signal THINKING
//! 4. **Stream** the model's response into the placeholder via a
//!    [`ResponseHandler`], continuing through tool calls as needed
//! 5. **Finalize** exactly once, whether the turn completes, fails, or is
//!    stopped by the user
//!
//! The [`AgentRegistry`] owns every live agent and sweeps out the idle ones.

pub mod agent;
pub mod handler;
pub mod image;
pub mod registry;

#[cfg(test)]
pub(crate) mod testutil;

pub use agent::{AgentParams, ChannelAgent};
pub use handler::{HandlerContext, ResponseHandler, TurnOutcome};
pub use registry::AgentRegistry;
