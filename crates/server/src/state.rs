//! # Application State
//!
//! This module defines the shared application state (`AppState`) and the logic
//! for building it at startup: the database, the AI provider chain and the guide
//! service that every request handler goes through.

use crate::config::{AppConfig, CreatorlessPolicyKind, ProviderConfig};
use devotio::{
    providers::{
        ai::{AiProvider, GeminiProvider, LocalAiProvider},
        db::sqlite::SqliteProvider,
    },
    BillEveryone, ContentStore, CreatorlessPolicy, FreeForAll, GuideService, InputValidator,
    SqliteTokenLedger, SqliteUsageSink,
};
use std::{path::Path, sync::Arc};
use tracing::info;

/// The shared application state, accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration, loaded from `config.yml`.
    pub config: Arc<AppConfig>,
    pub sqlite_provider: Arc<SqliteProvider>,
    pub guide_service: Arc<GuideService>,
    pub ledger: SqliteTokenLedger,
    pub contents: ContentStore,
}

fn build_provider(name: &str, config: &ProviderConfig) -> anyhow::Result<Box<dyn AiProvider>> {
    let provider: Box<dyn AiProvider> = match config.provider.as_str() {
        "gemini" => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| anyhow::anyhow!("api_key is required for gemini provider '{name}'"))?;
            // If api_url is not provided in config, construct it from the model name.
            let api_url = config.api_url.clone().unwrap_or_else(|| {
                format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:streamGenerateContent",
                    config.model_name
                )
            });
            Box::new(GeminiProvider::new(api_url, api_key)?.with_rates(config.rates))
        }
        "local" => {
            let api_url = config.api_url.clone().filter(|u| !u.is_empty()).ok_or_else(|| {
                anyhow::anyhow!(
                    "api_url is required for local provider '{name}'. Please set LOCAL_AI_API_URL in your .env file."
                )
            })?;
            Box::new(
                LocalAiProvider::new(
                    api_url,
                    config.api_key.clone().filter(|k| !k.is_empty()),
                    Some(config.model_name.clone()),
                )?
                .with_rates(config.rates),
            )
        }
        other => {
            return Err(anyhow::anyhow!(
                "Unsupported AI provider type '{other}' for provider '{name}'"
            ));
        }
    };
    Ok(provider)
}

/// Builds the shared application state from the configuration.
///
/// Providers are instantiated in `generation.provider_chain` order, the database
/// schema is brought up to date, and the guide service is wired to both.
pub async fn build_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    let mut providers = Vec::with_capacity(config.generation.provider_chain.len());
    for name in &config.generation.provider_chain {
        let provider_config = config
            .providers
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown provider '{name}' in provider_chain"))?;
        providers.push(build_provider(name, provider_config)?);
    }
    info!(chain = ?config.generation.provider_chain, "Configured AI provider chain.");

    if config.db_url != ":memory:" {
        if let Some(dir) = Path::new(&config.db_url).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
    }
    let sqlite_provider = SqliteProvider::new(&config.db_url).await?;
    // Ensure the database schema is up-to-date on startup.
    sqlite_provider.initialize_schema().await?;
    let db = sqlite_provider.db.clone();

    let ledger = SqliteTokenLedger::new(db.clone(), config.billing.starting_balance);
    let policy: Box<dyn CreatorlessPolicy> = match config.generation.creatorless {
        CreatorlessPolicyKind::Free => Box::new(FreeForAll),
        CreatorlessPolicyKind::Bill => Box::new(BillEveryone),
    };
    let validator = InputValidator::new(config.validation.max_input_chars)?;

    let guide_service = GuideService::builder(db.clone(), Box::new(ledger.clone()))
        .providers(providers)
        .pricing(config.pricing.clone())
        .creatorless_policy(policy)
        .usage_sink(Box::new(SqliteUsageSink::new(db.clone())))
        .validator(validator)
        .stale_after(config.generation.stale_after())
        .poll_interval(config.generation.poll_interval())
        .poll_ceiling(config.generation.poll_ceiling())
        .build()?;

    Ok(AppState {
        config: Arc::new(config),
        sqlite_provider: Arc::new(sqlite_provider),
        guide_service: Arc::new(guide_service),
        ledger,
        contents: ContentStore::new(db),
    })
}
