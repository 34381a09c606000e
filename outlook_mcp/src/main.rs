use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use outlook_core::{
    config::OutlookConfig,
    mcp_server::{JsonRpcHandler, McpServer},
    transport::StdioTransport,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries JSON-RPC, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Outlook MCP server");

    let config = OutlookConfig::load()?;
    info!(
        graph = %config.graph_base(),
        tenant = %config.tenant_id,
        persist_tokens = config.persist_tokens,
        "configuration loaded"
    );

    let registry = Arc::new(Mutex::new(outlook_core::build_registry(&config)?));
    let server = McpServer::new(registry);
    let handler = JsonRpcHandler::new(server);
    let transport = StdioTransport::new(handler);

    info!("MCP server ready, listening on stdio");

    tokio::select! {
        res = transport.run() => {
            if let Err(e) = res {
                error!("Transport error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
