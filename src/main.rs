use dynamic_mcp_server::config::Config;
use dynamic_mcp_server::lifecycle;

#[tokio::main]
async fn main() {
    use tracing_subscriber::EnvFilter;

    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("startup: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = lifecycle::run(config).await {
        tracing::error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}
