// Wren coding agent
// Main entry point for the wren binary

use clap::Parser;
use sdk::{EngineError, EngineErrorExt};
use wren_engine::agent::Resume;
use wren_engine::cli::{Cli, Command};
use wren_engine::handlers::{
    handle_chat, handle_doctor, handle_replay, handle_sessions, handle_todos, load_config,
    ChatOptions, OutputFormat,
};
use wren_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = &result {
        if let Some(engine_error) = e.downcast_ref::<EngineError>() {
            eprintln!("hint: {}", engine_error.user_hint());
        }
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = load_config(cli.config.as_deref())?;

    // --log wins over WREN_LOG and the config file; RUST_LOG wins over all
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::debug!(
        "wren v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Command::Chat {
            r#continue,
            resume,
            provider,
            model,
            yes,
        } => {
            let resume = match (resume, r#continue) {
                (Some(id), _) => Some(Resume::Id(id)),
                (None, true) => Some(Resume::Latest),
                (None, false) => None,
            };
            let options = ChatOptions {
                resume,
                provider,
                model,
                auto_apply: yes,
            };
            handle_chat(&config, options, format).await
        }

        Command::Sessions => handle_sessions(&config, format).await,

        Command::Replay { session_id } => handle_replay(&session_id, &config, format).await,

        Command::Todos { all } => handle_todos(all, &config, format).await,

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
