use std::env;

use storefront_api::{
    config,
    migrator::{run_migration, MigrationDirection},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let direction: MigrationDirection = env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("up")
        .parse()?;

    // Prefer the layered app config so migrations target the same database as the server
    let database_url = match config::load_config() {
        Ok(cfg) => {
            config::init_tracing(cfg.log_level(), cfg.log_json);
            cfg.database_url
        }
        Err(e) => {
            config::init_tracing("info", false);
            warn!("Falling back to DATABASE_URL: {}", e);
            env::var("DATABASE_URL")?
        }
    };

    info!(?direction, "Starting database migration");
    run_migration(&database_url, direction).await?;
    info!("Migration finished");
    Ok(())
}
