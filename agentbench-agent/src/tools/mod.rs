//! Tools offered to the model

pub mod echo;
pub mod ecmwf;

pub use echo::EchoTool;
pub use ecmwf::{EcmwfClient, EcmwfDownloadTool};

use agentbench_core::ToolRegistry;

/// Registry with the benchmark tool set. Each call builds fresh tool
/// instances so trials never share tool state.
pub fn benchmark_registry() -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(EcmwfDownloadTool::new(EcmwfClient::new()))
        .with_tool(EchoTool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_registry() {
        let registry = benchmark_registry();
        assert_eq!(registry.names(), ["ecmwf_download", "echo"]);
    }
}
