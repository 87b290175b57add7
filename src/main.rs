use clap::Parser;
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clincase::cli::{Cli, Commands, DbCommands};
use clincase::config::Config;
use clincase::core::scoring::DeterministicEngine;
use clincase::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    setup_logging(&config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => migrate(config).await,
        Commands::Config => {
            tracing::info!(
                server_port = config.server_port,
                rate_limit_per_minute = config.rate_limit_per_minute,
                free_tier_case_limit = config.free_tier_case_limit,
                scoring_deadline_secs = config.scoring_deadline.as_secs(),
                app_env = %config.app_env,
                bootstrap_enabled = config.bootstrap_token.is_some(),
                "resolved configuration"
            );
            Ok(())
        }
    }
}

fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    if config.is_production() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn migrate(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("database migrations completed");
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("database migrations completed");

    let port = config.server_port;
    let state = AppState::new(pool, config, Arc::new(DeterministicEngine));
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
