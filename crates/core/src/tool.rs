//! Tool trait — functions the model may call mid-turn.
//!
//! Tool failures are deliberately invisible to the turn state machine: a
//! tool that cannot produce a real answer returns a sentinel string and the
//! model explains the gap in prose. `invoke` therefore never fails.

use async_trait::async_trait;

use crate::provider::ToolDefinition;

/// A function exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The function name the model calls (e.g. `getCurrentTemperature`).
    fn name(&self) -> &str;

    /// The declaration sent to the backend with each turn.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool against a raw JSON arguments string.
    ///
    /// Infallible by contract: parse, credential, and transport failures all
    /// collapse into the tool's sentinel output.
    async fn invoke(&self, arguments_json: &str) -> String;
}

/// Dispatch a function call across a tool set.
///
/// Unknown function names produce an empty output, which still gets
/// submitted so the turn can complete.
pub async fn dispatch<T: AsRef<dyn Tool>>(tools: &[T], name: &str, arguments_json: &str) -> String {
    for tool in tools {
        let tool = tool.as_ref();
        if tool.name() == name {
            return tool.invoke(arguments_json).await;
        }
    }
    tracing::warn!(function = %name, "model called an undeclared function");
    String::new()
}
