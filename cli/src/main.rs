//! CLI entrypoint for guestlink
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod bootstrap;

use anyhow::{Context, Result, bail};
use clap::Parser;
use guestlink_application::{EngineStatus, ExecutionEngine, LoadProgressNotifier, NoLoadProgress};
use guestlink_domain::{BackendKind, ChatMessage};
use guestlink_infrastructure::{
    AsyncWriteChannel, ChannelWriter, ConfigLoader, EngineChannel, FileConfig, GenerateParams,
    JsonlConversationLogger, ProcessExecutionEngine, RpcClient, RpcError, RpcHost,
};
use guestlink_presentation::{
    Cli, Command, ConsoleFormatter, LoadProgressReporter, SimpleLoadProgress,
};
use std::io::{IsTerminal, Read};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const STDIN_BUFFER: usize = 4096;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level. stdout belongs to the
    // guest channel, so logs go to stderr.
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.show_config {
        for line in ConfigLoader::describe_sources(cli.config.as_deref()) {
            println!("{}", line);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = ConfigLoader::load(cli.config.as_deref()).context("loading configuration")?;
    config.validate().context("invalid configuration")?;

    let Some(command) = cli.command else {
        bail!("No command given. Run `guestlink --help` for usage.");
    };

    match command {
        Command::Host { command } => run_host(&config, &command, cli.quiet).await,
        Command::Ask {
            prompt,
            system,
            model,
            temperature,
            max_tokens,
            timeout,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(prompt));
            let mut params = GenerateParams::new(messages);
            params.temperature = temperature;
            params.max_tokens = max_tokens;
            params.model = model;

            let timeout = timeout
                .map(Duration::from_secs)
                .or_else(|| config.rpc.request_timeout());
            run_ask(&config, params, timeout).await
        }
        Command::Backends { json } => {
            let store = bootstrap::build_store(&config, env_var).await?;
            let router = bootstrap::build_router(&config, store, Arc::new(NoLoadProgress)).await;
            let backends = router.list_backends();
            if json {
                println!("{}", ConsoleFormatter::backends_json(&backends));
            } else {
                print!("{}", ConsoleFormatter::backends(&backends));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Load { kind, model } => run_load(&config, kind, &model, cli.quiet).await,
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn progress_for(quiet: bool) -> Arc<dyn LoadProgressNotifier> {
    if quiet {
        Arc::new(NoLoadProgress)
    } else if std::io::stderr().is_terminal() {
        Arc::new(LoadProgressReporter::new())
    } else {
        Arc::new(SimpleLoadProgress::new())
    }
}

/// Read local stdin on a plain thread. A blocking read must not hold up
/// runtime shutdown.
fn spawn_stdin_reader(mut on_bytes: impl FnMut(&[u8]) -> bool + Send + 'static) {
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; STDIN_BUFFER];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if !on_bytes(&buf[..n]) {
                        break;
                    }
                }
                Err(e) => {
                    debug!("stdin read failed: {}", e);
                    break;
                }
            }
        }
        on_bytes(&[]);
    });
}

/// Run the guest, relay its terminal, and serve its completion requests.
async fn run_host(config: &FileConfig, command: &[String], quiet: bool) -> Result<ExitCode> {
    let store = bootstrap::build_store(config, env_var).await?;
    // Line-based progress: the bar would fight the guest for the terminal.
    let progress: Arc<dyn LoadProgressNotifier> = if quiet {
        Arc::new(NoLoadProgress)
    } else {
        Arc::new(SimpleLoadProgress::new())
    };
    let router = Arc::new(bootstrap::build_router(config, store, progress).await);

    let engine = Arc::new(ProcessExecutionEngine::from_command(command)?);
    let (output_tx, mut output_rx) = mpsc::unbounded_channel();
    engine.init(output_tx).await?;

    let mut host = RpcHost::new(router, Arc::new(EngineChannel::new(engine.clone())))
        .with_max_frame_body(config.rpc.max_frame_body);
    if let Some(path) = &config.log.conversation_log {
        let logger = JsonlConversationLogger::open(path)
            .with_context(|| format!("opening conversation log {}", path.display()))?;
        host = host.with_conversation_logger(Arc::new(logger));
    }

    engine.start().await?;
    info!("Hosting guest: {}", command.join(" "));

    let (keys_tx, mut keys_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    spawn_stdin_reader(move |bytes| bytes.is_empty() || keys_tx.send(bytes.to_vec()).is_ok());

    let mut terminal = tokio::io::stdout();
    let mut keys_open = true;
    loop {
        tokio::select! {
            chunk = output_rx.recv() => match chunk {
                Some(bytes) => {
                    let passthrough = host.feed(&bytes);
                    if !passthrough.is_empty() {
                        terminal.write_all(&passthrough).await?;
                        terminal.flush().await?;
                    }
                }
                None => break,
            },
            keys = keys_rx.recv(), if keys_open => match keys {
                Some(bytes) => {
                    if let Err(e) = engine.send_input(&bytes).await {
                        warn!("Forwarding input to guest failed: {}", e);
                    }
                }
                None => keys_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping guest");
                if let Err(e) = engine.stop().await {
                    debug!("Stopping guest: {}", e);
                }
            }
        }
    }

    let rest = host.finish();
    if !rest.is_empty() {
        terminal.write_all(&rest).await?;
        terminal.flush().await?;
    }
    host.shutdown();

    let status = engine.status();
    info!("Guest finished ({})", status);
    if status == EngineStatus::Failed {
        eprintln!("guest exited with an error");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Guest side: send one request over stdout and read the reply from stdin.
async fn run_ask(
    config: &FileConfig,
    params: GenerateParams,
    timeout: Option<Duration>,
) -> Result<ExitCode> {
    let writer: Arc<dyn ChannelWriter> = Arc::new(AsyncWriteChannel::new(tokio::io::stdout()));
    let mut client =
        RpcClient::new(Arc::clone(&writer)).with_max_frame_body(config.rpc.max_frame_body);
    if let Some(timeout) = timeout {
        client = client.with_request_timeout(timeout);
    }
    let client = Arc::new(client);

    let reader = Arc::clone(&client);
    spawn_stdin_reader(move |bytes| {
        if bytes.is_empty() {
            reader.close();
            return false;
        }
        let stray = reader.feed(bytes);
        if !stray.is_empty() {
            debug!("Ignoring {} bytes of non-frame input", stray.len());
        }
        true
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    // Deltas go through the same writer as frames so they never split one.
    let (text_tx, mut text_rx) = mpsc::unbounded_channel::<String>();
    let printer_writer = Arc::clone(&writer);
    let printer = tokio::spawn(async move {
        while let Some(text) = text_rx.recv().await {
            if let Err(e) = printer_writer.write_bytes(text.as_bytes()).await {
                warn!("Writing completion failed: {}", e);
                break;
            }
        }
    });

    let outcome = client
        .generate(
            params,
            move |delta| {
                let _ = text_tx.send(delta.to_string());
            },
            &cancel,
        )
        .await;
    if let Err(e) = printer.await {
        warn!("Completion printer stopped: {}", e);
    }

    match outcome {
        Ok(_) => {
            writer.write_bytes(b"\n").await?;
            Ok(ExitCode::SUCCESS)
        }
        Err(RpcError::Cancelled) => {
            eprintln!("cancelled");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Err(e) => Err(e).context("completion failed"),
    }
}

async fn run_load(
    config: &FileConfig,
    kind: BackendKind,
    model: &str,
    quiet: bool,
) -> Result<ExitCode> {
    let store = bootstrap::build_store(config, env_var).await?;
    let router = bootstrap::build_router(config, store, progress_for(quiet)).await;
    router
        .load_model(kind, model)
        .await
        .with_context(|| format!("loading {} on {}", model, kind))?;
    if !quiet {
        println!("{} is loaded and recorded as the active model", model);
    }
    Ok(ExitCode::SUCCESS)
}
