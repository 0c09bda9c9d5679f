//! Hiroba chat client.
//!
//! Connects to a chat server (given explicitly or found via UDP discovery),
//! registers a username and relays lines typed at the prompt. Type `exit` or
//! press Ctrl+C to leave.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-client -- --username alice
//! cargo run --bin hiroba-client -- -H 192.168.1.20 -p 10000 -u bob
//! cargo run --bin hiroba-client -- --discover
//! ```

use std::{io::Write, time::Duration};

use clap::Parser;
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::mpsc;

use hiroba_client::{
    ClientConfig, ClientSession, DiscoveryConfig, SessionEvent, SessionState, discover_servers,
    formatter::MessageFormatter,
};
use hiroba_shared::{
    logger::setup_logger,
    protocol::{DEFAULT_CHAT_PORT, DEFAULT_DISCOVERY_PORT},
    time::{Clock, SystemClock},
};

const EXIT_COMMAND: &str = "exit";

#[derive(Parser, Debug)]
#[command(name = "hiroba-client")]
#[command(about = "TCP chat client with UDP server discovery", long_about = None)]
struct Args {
    /// Server host name or address
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server chat port
    #[arg(short = 'p', long, default_value_t = DEFAULT_CHAT_PORT)]
    port: u16,

    /// Username to register with (prompted for when omitted)
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Find a server on the local network instead of using --host/--port
    #[arg(long)]
    discover: bool,

    /// UDP port servers advertise to
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,

    /// Seconds to listen for server adverts
    #[arg(long, default_value_t = 3)]
    discovery_timeout: u64,

    /// Seconds to wait for connecting and the welcome line
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let (host, port) = if args.discover {
        match discover(&args).await {
            Some(target) => target,
            None => {
                tracing::error!("No chat server found on the local network");
                std::process::exit(1);
            }
        }
    } else {
        (args.host.clone(), args.port)
    };

    let username = match args.username.clone() {
        Some(username) => Some(username),
        None => prompt_username().await,
    };

    let config = ClientConfig {
        host,
        port,
        username,
        connect_timeout: Duration::from_secs(args.connect_timeout),
        ..ClientConfig::default()
    };

    if let Err(e) = run(config).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}

/// Listen for adverts and pick the first server found
async fn discover(args: &Args) -> Option<(String, u16)> {
    let config = DiscoveryConfig {
        port: args.discovery_port,
        timeout: Duration::from_secs(args.discovery_timeout),
        ..DiscoveryConfig::default()
    };

    let servers = match discover_servers(&config).await {
        Ok(servers) => servers,
        Err(e) => {
            tracing::error!("{}", e);
            return None;
        }
    };
    print!("{}", MessageFormatter::format_server_list(&servers));

    servers
        .into_iter()
        .next()
        .map(|(ip, port)| (ip.to_string(), port))
}

async fn prompt_username() -> Option<String> {
    let prompted = tokio::task::spawn_blocking(|| {
        let mut rl = DefaultEditor::new()?;
        rl.readline("Username: ")
    })
    .await;

    match prompted {
        Ok(Ok(line)) => Some(line),
        Ok(Err(ReadlineError::Interrupted | ReadlineError::Eof)) => None,
        Ok(Err(e)) => {
            tracing::error!("Readline error: {}", e);
            None
        }
        Err(e) => {
            tracing::error!("Username prompt failed: {}", e);
            None
        }
    }
}

async fn run(config: ClientConfig) -> Result<(), hiroba_client::ClientError> {
    let prompt = format!("{}> ", config.username.as_deref().unwrap_or_default().trim());
    let (session, events) = ClientSession::new(config);
    let printer = tokio::spawn(print_events(events, SystemClock, prompt.clone()));

    let started = match session.connect().await {
        Ok(()) => session.start_listening().await,
        Err(e) => Err(e),
    };
    if let Err(e) = started {
        // Let the printer show the failure status before exiting.
        drop(session);
        printer.await.ok();
        return Err(e);
    }

    let username = session.config().username.clone().unwrap_or_default();
    println!(
        "\nYou are '{}'. Type messages and press Enter to send. Type '{}' or press Ctrl+C to exit.\n",
        username.trim(),
        EXIT_COMMAND
    );

    let mut input_rx = spawn_input_thread(prompt);
    let mut state = session.subscribe_state();

    loop {
        tokio::select! {
            line = input_rx.recv() => match line {
                Some(line) if line == EXIT_COMMAND => break,
                Some(line) => {
                    if let Err(e) = session.send_message(&line).await {
                        tracing::warn!("{}", e);
                        if !session.is_connected() {
                            break;
                        }
                    }
                }
                // Ctrl+C or Ctrl+D at the prompt
                None => break,
            },
            _ = state.wait_for(|state| *state == SessionState::Disconnected) => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect().await;
    drop(session);
    if let Err(e) = printer.await {
        tracing::warn!("Event printer failed: {}", e);
    }
    Ok(())
}

async fn print_events<C: Clock>(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    clock: C,
    prompt: String,
) {
    while let Some(event) = events.recv().await {
        println!("\n{}", MessageFormatter::format_event(&event, clock.now_millis()));
        // No prompt once the session has ended.
        let ended = matches!(&event, SessionEvent::Status(status) if status.is_terminal());
        if !ended {
            redisplay_prompt(&prompt);
        }
    }
}

fn redisplay_prompt(prompt: &str) {
    print!("{}", prompt);
    std::io::stdout().flush().ok();
}

/// Read lines on a blocking thread (rustyline is synchronous)
fn spawn_input_thread(prompt: String) -> mpsc::UnboundedReceiver<String> {
    let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            // Channel closed, exit thread
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    input_rx
}
