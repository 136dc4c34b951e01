mod api;
mod config;
mod handlers;
mod models;
mod services;

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;

use api::server::create_router;
use api::AppState;
use config::Config;
use handlers::AnalysisHandler;
use services::{
    AnthropicClient, ChainedCredentialProvider, CredentialProvider, EnvCredentialProvider,
    FileCredentialStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logger
    env_logger::init();

    log::info!("🚀 Starting CaloriAI...");

    let config = Config::from_env()?;

    let inference = Arc::new(AnthropicClient::new(&config));
    log::info!(
        "✅ Claude client initialized with model: {} (timeout {:?})",
        config.model,
        config.request_timeout
    );

    // Kayıtlı anahtar önce, sonra ortam değişkeni
    let credential_store = Arc::new(FileCredentialStore::new(&config.credential_store_path));
    let providers: Vec<Arc<dyn CredentialProvider>> = vec![
        credential_store.clone(),
        Arc::new(EnvCredentialProvider::default()),
    ];
    let credentials = Arc::new(ChainedCredentialProvider::new(providers));
    log::info!("🔐 Credential store: {}", credential_store.path().display());

    match credentials.credential().await {
        Ok(Some(_)) => log::info!("🔑 API key available"),
        Ok(None) => log::warn!("⚠️ No API key configured; requests must carry one (PUT /api/credential to save)"),
        Err(e) => log::warn!("⚠️ Could not read API key: {}", e),
    }

    let analysis = Arc::new(AnalysisHandler::new(
        inference,
        credentials,
        config.prompt_variant,
        config.daily_calorie_goal,
    ));
    log::info!("✅ Analysis handler initialized ({:?} prompt)", config.prompt_variant);

    let state = Arc::new(AppState {
        analysis: analysis.clone(),
        credential_store,
    });
    let app = create_router(state, config.body_limit_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    log::info!("🌐 Server listening on {}", config.server_addr);

    println!("\n🍽️ CaloriAI çalışıyor!");
    println!("🌐 Server: http://{}", config.server_addr);
    println!("📸 POST /api/estimate  - Kalori analizi");
    println!("🔁 POST /api/analyze   - Claude yanıtı (proxy)");
    println!("📊 GET  /api/session   - Günlük toplam");
    println!("🔑 PUT  /api/credential - API anahtarını kaydet");
    println!("\n🛑 Durdurmak için Ctrl+C basın\n");

    let shutdown_handler = analysis.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
            }
            log::info!("🛑 Shutting down...");
            // devam eden analizleri iptal et
            shutdown_handler.shutdown();
        })
        .await?;

    Ok(())
}
