//! Parley application binary - composition root.
//!
//! 1. Load configuration from TOML and apply `PARLEY_*` overrides
//! 2. Build the correction index client and search settings
//! 3. Build the fallback resolver (index, optional chat fallback)
//! 4. Run the selected subcommand

mod cli;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_core::config::{ParleyConfig, SearchMode};
use parley_index::{AutolearnStore, CommandIndex, CorrectionSearch, SearchSettings, TypesenseIndex};
use parley_resolve::{FallbackResolver, OpenAiChat, ResolverConfig};
use parley_session::{EngineRestClient, SessionManager, SessionSettings};

use cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing is up; report the outcome afterwards.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match ParleyConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (ParleyConfig::default(), Some(e)),
    };

    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config; using defaults"
        ),
    }
    config.apply_env_overrides();

    if let Command::InitConfig { force } = args.command() {
        if config_file.exists() && !force {
            return Err(format!(
                "{} already exists; pass --force to overwrite",
                config_file.display()
            )
            .into());
        }
        config.save(&config_file)?;
        println!("{}", config_file.display());
        return Ok(());
    }

    let index = Arc::new(TypesenseIndex::new(&config.index)?);
    let search = CorrectionSearch::new(
        Arc::clone(&index) as Arc<dyn CommandIndex>,
        SearchSettings::from(&config.correction),
    );

    match args.command() {
        Command::Run => run(&config, index, search).await,
        Command::AddEntities => add_entities(&config, index, search).await,
        Command::Search { text, mode, exact } => {
            let mode = if exact {
                SearchMode::Exact
            } else {
                mode.unwrap_or(config.correction.mode)
            };
            let outcome = search.search_with(&text, mode).await;
            let hit = outcome.top_hit.as_ref();
            let report = serde_json::json!({
                "matched": outcome.matched,
                "command": outcome.command,
                "mode": mode.to_string(),
                "candidate": hit.map(|h| h.command.clone()),
                "source": hit.map(|h| h.source.to_string()),
                "signal": hit.map(|h| format!("{:?}", h.signal)),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Delete { id } => {
            let command = index.delete(&id).await?;
            tracing::info!(%id, %command, "Deleted command");
            println!("{}", serde_json::json!({ "id": id, "command": command }));
            Ok(())
        }
        Command::Reset => {
            index.reset_collection().await?;
            tracing::info!(collection = %config.index.collection, "Index collection reset");
            Ok(())
        }
        Command::InitConfig { .. } => Ok(()),
    }
}

/// Resolve commands read from stdin until EOF.
async fn run(
    config: &ParleyConfig,
    index: Arc<TypesenseIndex>,
    search: CorrectionSearch,
) -> Result<(), Box<dyn Error>> {
    let rest = EngineRestClient::from_config(&config.engine);
    match rest.supports_pipeline().await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("Intent engine does not expose assist_pipeline; runs will fail"),
        Err(e) => tracing::warn!(error = %e, "Could not probe intent engine"),
    }

    if config.correction.enabled || config.correction.autolearn {
        if let Err(e) = index.ensure_collection().await {
            tracing::warn!(error = %e, "Correction index unavailable; searches will miss");
        }
    }

    let mut resolver =
        FallbackResolver::new(ResolverConfig::from(config)).with_search(search.clone());
    if let Some(mut chat) = OpenAiChat::from_config(&config.llm) {
        if let Err(e) = chat.resolve_model().await {
            tracing::warn!(error = %e, "Could not list chat models; using configured model");
        }
        tracing::info!(model = %chat.model(), "Chat fallback enabled");
        resolver = resolver.with_chat(Arc::new(chat));
    }

    let autolearn = AutolearnStore::new(search, config.skip_list());
    let manager = SessionManager::new(SessionSettings::from(config), resolver, Some(autolearn));

    let runner = manager.clone();
    let session = tokio::spawn(async move { runner.run().await });

    let startup = Duration::from_secs(config.engine.pending_ttl_secs.max(1));
    if tokio::time::timeout(startup, manager.wait_ready()).await.is_err() {
        tracing::warn!("Intent engine not ready yet; commands will queue until it connects");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(context) = cli::parse_line(&line) else {
            continue;
        };
        let reply = manager.ask(context).await;
        println!("{}", serde_json::to_string(&reply)?);
    }

    session.abort();
    tracing::info!("Parley shut down");
    Ok(())
}

/// Learn on/off commands for every switchable device the engine knows.
async fn add_entities(
    config: &ParleyConfig,
    index: Arc<TypesenseIndex>,
    search: CorrectionSearch,
) -> Result<(), Box<dyn Error>> {
    index.ensure_collection().await?;
    let names = EngineRestClient::from_config(&config.engine)
        .entity_names()
        .await?;
    let store = AutolearnStore::new(search, config.skip_list());
    let learned = store.add_from_entity_list(&names).await;
    tracing::info!(devices = names.len(), learned, "Imported device commands");
    println!("{}", serde_json::json!({ "devices": names.len(), "learned": learned }));
    Ok(())
}
