use agentbench_core::{require_str, Result, Tool, ToolArguments, ToolDefinition};
use async_trait::async_trait;

/// Returns its `text` argument unchanged. Handy for smoke runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("echo", "Repeat the given text back verbatim").with_param(
            "text",
            "str",
            "Text to repeat.",
            true,
        )
    }

    async fn call(&self, arguments: ToolArguments) -> Result<String> {
        Ok(require_str(&arguments, "text")?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo() {
        let args = json!({"text": "hi"}).as_object().cloned().unwrap();
        assert_eq!(EchoTool.call(args).await.unwrap(), "hi");
        assert!(EchoTool.call(ToolArguments::new()).await.is_err());
    }
}
