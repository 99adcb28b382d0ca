//! mail-gmail-mcp-rs: Gmail MCP server over stdio
//!
//! This server exposes a single Gmail account via the Model Context Protocol
//! (MCP) over stdio. It manages the account's OAuth credential (interactive
//! consent, silent refresh, reauth, revocation) backed by an encrypted local
//! secret store, and normalizes Gmail's message format into a canonical model.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and stdio serving
//! - [`config`]: Environment-driven configuration (paths, scopes, master key)
//! - [`errors`]: Application error model with MCP error mapping
//! - [`secrets`]: Encrypted file-per-key secret store
//! - [`auth`]: OAuth credential lifecycle with injected consent flow
//! - [`gmail`]: Gmail REST transport and wire types
//! - [`mapper`]: Pure raw-to-canonical message mapping
//! - [`provider`]: List/get/search/list-labels operations
//! - [`server`]: MCP tool handlers with validation and response formatting
//! - [`models`]: Canonical mail model and schema-bearing tool DTOs

mod auth;
mod config;
mod errors;
mod gmail;
mod mapper;
mod models;
mod provider;
mod secrets;
mod server;

use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server over stdio. This process expects to be spawned by an MCP client
/// via `stdio` transport.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_GMAIL_MASTER_KEY=$(head -c 32 /dev/urandom | base64) \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load_from_env()?;
    let service = server::MailGmailServer::new(config)?.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
