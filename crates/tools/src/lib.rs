//! Built-in tool implementations for chatrelay.
//!
//! Tools are the functions the model can call mid-turn. Per the tool
//! contract they never fail outward: anything that prevents a real answer
//! collapses into the tool's sentinel output.

pub mod weather;

pub use weather::CurrentTemperatureTool;
