// Arena Prediction Market - Main Entry Point

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use arena_prediction_market::app_state::AppState;
use arena_prediction_market::config::Config;
use arena_prediction_market::routes;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.logging.init();

    info!("🎲 Arena Prediction Market");

    let (state, _effects_task) = match AppState::from_config(&config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("❌ Failed to load state: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let state = Arc::new(state);
    let shutdown_state = state.clone();

    let app = routes::router(state);

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("❌ Failed to bind {}: {}", config.bind_addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("🚀 Server running on http://{}", config.bind_addr);
    info!("📋 Endpoints:");
    info!("   POST   /arenas/:arena_id/members               - Join arena");
    info!("   GET    /arenas/:arena_id/members/:user/balance - Member balance");
    info!("   GET    /arenas/:arena_id/markets               - Markets in arena");
    info!("   POST   /markets                                - Create market");
    info!("   GET    /markets/:id                            - Market view");
    info!("   DELETE /markets/:id                            - Delete market (admin)");
    info!("   POST   /markets/:id/bets                       - Place bet");
    info!("   POST   /markets/:id/resolve                    - Resolve market");
    info!("   GET    /ledger                                 - Ledger entries");
    info!("   GET    /ledger/verify                          - Verify hash chain");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ Failed to install CTRL+C handler: {}", e);
            }
            info!("🛑 Shutdown signal received...");
        })
        .await;

    let mut code = ExitCode::SUCCESS;
    if let Err(e) = served {
        error!("❌ Server error: {}", e);
        code = ExitCode::FAILURE;
    }

    info!("💾 Saving state to disk...");
    match shutdown_state.save_to_disk() {
        Ok(()) => info!("✅ State saved successfully"),
        Err(e) => {
            error!("❌ Failed to save state: {}", e);
            code = ExitCode::FAILURE;
        }
    }
    info!("👋 Goodbye!");
    code
}
