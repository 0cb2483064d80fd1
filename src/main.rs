use std::net::SocketAddr;
use std::sync::Arc;
use nazr_people::db::Db;
use nazr_people::stats::Stats;
use nazr_people::utils::config::Config;
use nazr_people::utils::logging;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();
    let db_dir = cfg.data.join("db");
    std::fs::create_dir_all(&db_dir)?;
    let db_path = db_dir.join("nazr.db");
    let db = Db::open(&db_path, cfg.pool_size)?;
    info!(path = %db_path.display(), backend = cfg.search_backend.as_str(), "database ready");

    let stats = Arc::new(Stats::new());
    let state = Arc::new(nazr_people::AppState::new(cfg.clone(), db, stats));
    let recovered = state.recover().await?;
    if recovered > 0 {
        info!(recovered, "reloaded clustering jobs from previous run");
    }

    let app = nazr_people::api::routes::router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}
