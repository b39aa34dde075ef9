//! CLI entry point for probe.

mod cli;

use clap::Parser;
use probe::bridge::{HostBridge, ProviderHost};
use probe::config::{load_config, ProbeConfig};
use probe::export::{export_session, write_document};
use probe::model::{PartState, SessionView};
use probe::provider::{ProviderRegistry, ScriptedProvider};
use probe::runtime::{
    spawn_runtime, ErrorEvent, RequestEvent, RuntimeCommand, RuntimeEvent, RuntimeEventStream,
    SessionEvent,
};
use probe::service::ProbeService;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long `run --remote` waits for the child to announce the provider.
const REMOTE_REGISTRATION_WAIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    let code = match args.command {
        cli::Command::Run {
            prompt,
            script,
            remote,
            export,
        } => match run_command(&config, prompt, script, remote, export).await {
            Ok(code) => code,
            Err(msg) => {
                eprintln!("error: {msg}");
                1
            }
        },
        cli::Command::Serve {
            script,
            provider_id,
        } => match serve_command(&config, &script, provider_id).await {
            Ok(()) => 0,
            Err(msg) => {
                eprintln!("error: {msg}");
                1
            }
        },
    };
    std::process::exit(code);
}

/// Logs go to stderr so `serve` keeps stdout for bridge frames.
fn init_tracing(config: &ProbeConfig) {
    let filter = EnvFilter::try_new(&config.log.filter).unwrap_or_else(|err| {
        eprintln!(
            "warning: invalid log filter `{}` ({err}); using `info`",
            config.log.filter
        );
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_script(path: &str) -> Result<ScriptedProvider, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read script `{path}`: {e}"))?;
    ScriptedProvider::from_json(&raw).map_err(|e| format!("invalid script `{path}`: {e}"))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run_command(
    config: &ProbeConfig,
    prompt: String,
    script: Option<String>,
    remote: Option<Vec<String>>,
    export: Option<String>,
) -> Result<i32, String> {
    let registry = Arc::new(ProviderRegistry::new());
    let provider_id = config.engine.provider.clone();

    // Held for the whole run: dropping the child kills it.
    let mut child_guard = None;
    if let Some(path) = script.as_deref() {
        registry
            .register(provider_id.clone(), Arc::new(load_script(path)?))
            .map_err(|e| e.to_string())?;
    } else if let Some(command) = remote.as_deref() {
        child_guard = Some(spawn_remote(config, &registry, command).await?);
    }

    let service = ProbeService::from_config(Arc::clone(&registry), &config.engine);
    let (handle, events) = spawn_runtime(service.clone());
    handle
        .send(RuntimeCommand::Submit { prompt })
        .await?;

    let code = drive_events(&handle, events).await;
    let _ = handle.send(RuntimeCommand::Shutdown).await;

    if let Some(path) = export.as_deref() {
        let Some(session) = service.current_session() else {
            return Err("no session to export".to_string());
        };
        write_document(Path::new(path), &export_session(&session))
            .map_err(|e| format!("failed to write export `{path}`: {e}"))?;
        info!(path, "session exported");
    }
    drop(child_guard);
    Ok(code)
}

/// Start a provider host child and bridge it over its stdio.
async fn spawn_remote(
    config: &ProbeConfig,
    registry: &Arc<ProviderRegistry>,
    command: &[String],
) -> Result<tokio::process::Child, String> {
    let Some((program, rest)) = command.split_first() else {
        return Err("--remote needs a command".to_string());
    };
    let mut child = tokio::process::Command::new(program)
        .args(rest)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to start `{program}`: {e}"))?;
    let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
        return Err("remote provider stdio unavailable".to_string());
    };
    let (_bridge, _connection) = HostBridge::connect(
        Arc::clone(registry),
        stdout,
        stdin,
        config.bridge.call_timeout(),
    );

    // Registration arrives as a notification after the child starts.
    let provider_id = &config.engine.provider;
    let started = Instant::now();
    while !registry.contains(provider_id) {
        if started.elapsed() > REMOTE_REGISTRATION_WAIT {
            return Err(format!(
                "remote did not register provider `{provider_id}` (registered: {:?})",
                registry.ids()
            ));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    debug!(provider = %provider_id, "remote provider registered");
    Ok(child)
}

/// Print runtime events until the submitted request settles.
async fn drive_events(
    handle: &probe::runtime::ProbeRuntimeHandle,
    mut events: RuntimeEventStream,
) -> i32 {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut last_view: Option<SessionView> = None;

    loop {
        let envelope = tokio::select! {
            envelope = events.recv() => envelope,
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("interrupted, cancelling request...");
                if let Err(e) = handle.send(RuntimeCommand::Cancel).await {
                    warn!(error = %e, "cancel not delivered");
                }
                continue;
            }
        };
        let Some(envelope) = envelope else {
            eprintln!("error: runtime stopped unexpectedly");
            return 1;
        };
        match envelope.event {
            RuntimeEvent::Session(SessionEvent::Started { session_id }) => {
                eprintln!("session {session_id}");
            }
            RuntimeEvent::Request(RequestEvent::Issued { preview, .. }) => {
                eprintln!("> {preview}");
            }
            RuntimeEvent::Progress(update) => {
                eprintln!("  {}", progress_line(&update.view));
                last_view = Some(update.view);
            }
            RuntimeEvent::Request(RequestEvent::Completed { .. }) => {
                print_summary(last_view.as_ref());
                return 0;
            }
            RuntimeEvent::Request(RequestEvent::Failed { error, .. }) => {
                print_summary(last_view.as_ref());
                eprintln!("error: provider failed: {error}");
                return 1;
            }
            RuntimeEvent::Request(RequestEvent::Cancelled { .. }) => {
                eprintln!("request cancelled");
                return 130;
            }
            RuntimeEvent::Error(ErrorEvent { message, .. }) => {
                eprintln!("error: {message}");
                return 1;
            }
            other => debug!(event = ?other, "runtime event"),
        }
    }
}

fn progress_line(view: &SessionView) -> String {
    let Some(response) = view.response.as_ref() else {
        return format!("[{:?}]", view.state);
    };
    let pending = response
        .parts
        .iter()
        .filter(|part| part.state == PartState::Pending)
        .count();
    format!(
        "[rev {}] breakdowns: {}, edits: {}, parts: {} ({} pending)",
        view.revision,
        response.breakdowns.len(),
        response.text_edits.len(),
        response.parts.len(),
        pending
    )
}

fn print_summary(view: Option<&SessionView>) {
    let Some(response) = view.and_then(|view| view.response.as_ref()) else {
        return;
    };
    for entry in &response.breakdowns {
        println!("## {} ({})", entry.reference.name, entry.reference.uri);
        for (label, value) in [
            ("query", &entry.query),
            ("reason", &entry.reason),
            ("response", &entry.response),
        ] {
            if let Some(value) = value {
                println!("- {label}: {value}");
            }
        }
    }
    for part in &response.parts {
        match part.content.as_deref() {
            Some(content) => println!("[{}] {content}", part.title),
            None => println!("[{}] ({:?})", part.title, part.state),
        }
    }
    if let Some(result) = response.result.as_deref() {
        println!("{result}");
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn serve_command(
    config: &ProbeConfig,
    script: &str,
    provider_id: Option<String>,
) -> Result<(), String> {
    let provider = load_script(script)?;
    let provider_id = provider_id.unwrap_or_else(|| config.engine.provider.clone());
    let (host, connection) = ProviderHost::connect(
        tokio::io::stdin(),
        tokio::io::stdout(),
        config.bridge.call_timeout(),
    );
    host.register_provider(provider_id, Arc::new(provider))
        .map_err(|e| e.to_string())?;
    connection.join().await;
    Ok(())
}
