//! workflow-replay - feed recorded envelopes through a workflow view.
//!
//! Usage: `workflow-replay [--submit <text>] [<envelopes.ndjson>]`
//!
//! Reads one envelope per line from the file (or stdin), restores any
//! persisted session first, and prints the final snapshot as JSON.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use workflow_view::actor::{deliver_envelope, snapshot, spawn_workflow_view, submit_request};
use workflow_view::config::env_flag;
use workflow_view::parsers::parse_envelope_line;
use workflow_view::requests::{ChannelTransport, TransportCommand};
use workflow_view::{Config, SessionStore, ViewSettings, WorkflowEngine, WorkflowViewArguments};

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => tracing::info!(path = %candidate.display(), "Loaded environment from .env"),
                Err(e) => tracing::warn!(
                    path = %candidate.display(),
                    error = %e,
                    "Failed to load .env file"
                ),
            }
            return;
        }
        if !current.pop() {
            break;
        }
    }

    tracing::debug!(cwd = %cwd.display(), "No .env file found; using process environment only");
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

struct CliArgs {
    submit: Option<String>,
    input: Option<String>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = std::env::args().skip(1);
    let mut parsed = CliArgs {
        submit: None,
        input: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--submit" => {
                parsed.submit = Some(args.next().context("--submit needs a request text")?);
            }
            other if other.starts_with("--") => anyhow::bail!("Unknown flag {other}"),
            _ => parsed.input = Some(arg),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is loaded after the subscriber, so only the process environment
    // can pick the log format.
    init_tracing(env_flag("WORKFLOW_LOG_JSON", false).unwrap_or(false));
    load_env_file();

    let args = parse_args()?;
    let config = Config::from_env()?;
    tracing::info!(
        backend = ?config.state_backend,
        path = %config.state_path.display(),
        "Starting workflow replay"
    );

    let store = config
        .open_store()
        .context("Failed to open session store")?;
    let engine = WorkflowEngine::new(
        SessionStore::new(store, config.storage_prefix.clone()),
        ViewSettings {
            canvas: config.canvas,
            half_screen: config.half_screen,
        },
    );

    let (transport, mut commands) = ChannelTransport::channel();
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                TransportCommand::Subscribe { topic } => {
                    tracing::info!(topic = %topic, "Transport subscribe");
                }
                TransportCommand::Send { topic, message } => {
                    tracing::info!(
                        topic = %topic,
                        plan_id = %message.session_info.message_serial_number,
                        "Transport send"
                    );
                }
            }
        }
    });

    let (actor, handle) = spawn_workflow_view(WorkflowViewArguments {
        engine,
        transport: Arc::new(transport),
        relayout_debounce: config.relayout_debounce,
        panel_settle: config.panel_settle,
        restore_on_start: true,
    })
    .await?;

    if let Some(content) = args.submit {
        let submitted = submit_request(&actor, content).await?;
        tracing::info!(topic = %submitted.topic, "Request submitted");
    }

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(std::io::BufReader::new(
            std::fs::File::open(path).with_context(|| format!("Failed to open {path}"))?,
        )),
        None => Box::new(std::io::stdin().lock()),
    };

    let mut delivered = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read envelope line")?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope = match parse_envelope_line(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping malformed line");
                continue;
            }
        };
        let outcome = deliver_envelope(&actor, envelope).await?;
        tracing::debug!(line = index + 1, outcome = ?outcome, "Envelope applied");
        delivered += 1;
    }

    let state = snapshot(&actor).await?;
    tracing::info!(
        delivered,
        nodes = state.graph.nodes.len(),
        open_panels = state.panels.len(),
        "Replay finished"
    );
    println!("{}", serde_json::to_string_pretty(&state)?);

    actor.stop(None);
    let _ = handle.await;
    Ok(())
}
