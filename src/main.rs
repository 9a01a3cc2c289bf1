// Module declarations
mod cli;
mod commands;
mod config;
mod confirm;
mod dispatch;
mod error;
mod gate;
mod host;
mod hud;
mod inference;
mod memory_store;
mod orchestrator;
mod search;
mod session;
mod transcript;
mod types;
mod util;

// Every module's items are visible at crate root; modules import siblings via `crate::{...}`.
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use commands::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use confirm::*;
#[allow(unused_imports)]
pub(crate) use dispatch::*;
#[allow(unused_imports)]
pub(crate) use error::*;
#[allow(unused_imports)]
pub(crate) use gate::*;
#[allow(unused_imports)]
pub(crate) use host::*;
#[allow(unused_imports)]
pub(crate) use hud::*;
#[allow(unused_imports)]
pub(crate) use inference::*;
#[allow(unused_imports)]
pub(crate) use memory_store::*;
#[allow(unused_imports)]
pub(crate) use orchestrator::*;
#[allow(unused_imports)]
pub(crate) use search::*;
#[allow(unused_imports)]
pub(crate) use session::*;
#[allow(unused_imports)]
pub(crate) use transcript::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use util::*;

use std::fs;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let workspace = resolve_workspace(cli.workspace);
    fs::create_dir_all(&workspace)?;
    let mut config = AssistantConfig::load(&workspace)?;

    match cli.command {
        Command::Run { no_llm } => {
            config.disable_llm |= no_llm;
            let (session, host) = build_session(&config, &workspace)?;
            session.start();
            info!(workspace = %workspace.display(), "listening on stdin");
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                session.handle_utterance(&line);
                if host.exit_requested() {
                    break;
                }
            }
            Ok(())
        }

        Command::Say { text, no_llm } => {
            config.disable_llm |= no_llm;
            let (session, _host) = build_session(&config, &workspace)?;
            let outcome = session.handle_utterance(&text.join(" "));
            if outcome == UtteranceOutcome::Ignored {
                eprintln!("Ignored (not addressed). Include the assistant's name or set AETHERVOICE_REQUIRE_NAME=0.");
            }
            Ok(())
        }

        Command::Memory { command } => run_memory_command(&config, &workspace, command),
    }
}

fn memory_config(config: &AssistantConfig) -> MemoryConfig {
    MemoryConfig {
        assistant_name: config
            .normalized_names()
            .first()
            .cloned()
            .unwrap_or_default(),
        ..MemoryConfig::default()
    }
}

fn open_memory(config: &AssistantConfig, workspace: &Path) -> Result<Arc<MemoryStore>, MemoryError> {
    let path = config
        .memory_db
        .clone()
        .unwrap_or_else(|| workspace.join("memory.sqlite"));
    Ok(Arc::new(MemoryStore::open(
        &path,
        memory_config(config),
        Arc::new(SystemClock),
    )?))
}

fn speaker_name(config: &AssistantConfig) -> String {
    let primary = config
        .normalized_names()
        .first()
        .cloned()
        .unwrap_or_else(|| "assistant".to_string());
    let mut chars = primary.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => primary,
    }
}

fn build_session(
    config: &AssistantConfig,
    workspace: &Path,
) -> Result<(Session, Arc<ConsoleHost>), Box<dyn std::error::Error>> {
    let host = Arc::new(ConsoleHost::new(&speaker_name(config)));
    let events: Arc<dyn EventSink> = match &config.hud_url {
        Some(url) => Arc::new(HudNotifier::new(url)),
        None => Arc::new(NullSink),
    };
    let ctx = DispatchContext {
        host: host.clone(),
        clock: Arc::new(SystemClock),
        events: events.clone(),
        base_dir: workspace.to_path_buf(),
    };

    let search: Arc<dyn WebSearch> = Arc::new(
        SearchClient::duckduckgo(config.search_min_gap(), config.search_max_results)
            .with_host(host.clone()),
    );

    let names = config.normalized_names();
    let dispatcher = Dispatcher::new(&DispatcherOptions {
        names: names.clone(),
        wake_window_secs: config.wake_window_secs,
        confirm_timeout_secs: config.confirm_timeout_secs,
        legacy_keyword_triggers: config.legacy_keyword_triggers,
    })?
    .with_search(search.clone());

    let orchestrator = if config.disable_llm {
        info!("language model disabled");
        None
    } else {
        let client = Arc::new(OllamaClient::new(
            &config.inference_url,
            &config.model,
            Duration::from_secs(config.probe_timeout_secs),
        ));
        let mut orchestrator =
            Orchestrator::new(client, events, OrchestratorOptions::from_config(config))
                .with_search(search.clone());
        if config.enable_memory {
            match open_memory(config, workspace) {
                Ok(memory) => orchestrator = orchestrator.with_memory(memory),
                Err(err) => warn!(error = %err, "memory store unavailable; continuing without it"),
            }
        }
        Some(orchestrator)
    };

    let session = Session::new(
        ctx,
        dispatcher,
        orchestrator,
        SessionOptions {
            names,
            require_name: config.require_name,
        },
    )
    .with_search(search);
    Ok((session, host))
}

fn run_memory_command(
    config: &AssistantConfig,
    workspace: &Path,
    command: MemoryCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_memory(config, workspace)?;
    let user_or_default = |user: Option<String>| user.unwrap_or_else(|| config.user_id.clone());

    match command {
        MemoryCommand::Add {
            text,
            user,
            namespace,
            importance,
        } => {
            let scope = MemoryScope {
                user_id: user_or_default(user),
                agent_id: Some(config.agent_id.clone()),
                namespace: namespace.unwrap_or_else(|| config.namespace.clone()),
            };
            let inserted = store.add(&[ConversationTurn::user(text)], &scope, "cli", importance)?;
            println!("inserted {inserted}");
        }
        MemoryCommand::Search {
            query,
            k,
            user,
            namespace,
        } => {
            let hits = store.search(&query, &user_or_default(user), namespace.as_deref(), k)?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        MemoryCommand::Export { user } => {
            let facts = store.export_user(&user_or_default(user))?;
            println!("{}", serde_json::to_string_pretty(&facts)?);
        }
        MemoryCommand::Import { file, user } => {
            let raw = fs::read_to_string(&file)?;
            let inserted = store.import_json(&user_or_default(user), &raw)?;
            println!("imported {inserted}");
        }
        MemoryCommand::Wipe { user } => {
            let removed = store.wipe_user(&user_or_default(user))?;
            println!("removed {removed}");
        }
        MemoryCommand::Forget { id } => {
            if store.forget(id)? {
                println!("forgot {id}");
            } else {
                eprintln!("No memory with id {id}");
                std::process::exit(2);
            }
        }
    }
    Ok(())
}
