use chat_relay_rs::config::{ServerConfig, UpstreamConfig};
use chat_relay_rs::server::{self, AppState};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(about = "Chat completion relay - validates requests and forwards them to one upstream provider")]
#[command(long_about = r#"
Chat completion relay - validates requests and forwards them to one upstream provider

The upstream endpoint and credential are read from the environment (or a .env file):
  AZURE_AI_ENDPOINT   provider base URL, e.g. https://my-resource.services.ai.azure.com
  AZURE_AI_KEY        value sent in the api-key header

Examples:
  chat-relay --port 8080
  PORT=9000 chat-relay --log-level debug
"#)]
struct CliArgs {
    /// Host address to bind the server
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind the server
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Upstream request timeout in seconds (applies to whole streams)
    #[arg(long, default_value_t = 600)]
    timeout: u64,

    /// Maximum accepted request body size in bytes
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    max_payload_size: usize,

    /// Longest upstream event line the relay will buffer, in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    max_line_bytes: usize,

    /// Log level: off, error, warn, info, debug, trace
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // .env has to be loaded before clap reads PORT.
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    let server_config = ServerConfig {
        host: args.host,
        port: args.port,
        max_payload_size: args.max_payload_size,
        log_level: args.log_level,
    };
    server::init_logging(server_config.log_level);

    let upstream_config = UpstreamConfig::from_env()?
        .with_request_timeout(args.timeout)
        .with_max_line_bytes(args.max_line_bytes);
    let app_state = AppState::new(upstream_config)?;

    actix_web::rt::System::new().block_on(server::startup(server_config, app_state))?;
    Ok(())
}
