use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sealpost::models::{InboxContent, InboxEntry};
use sealpost::{store, Config, CryptoEngine, KeyManager, KeyState, Messenger, Session};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sealpost", version, about = "Recipient-only encrypted messaging")]
struct Args {
    /// Local identity (overrides SEALPOST_USER_ID and the identity file)
    #[arg(short, long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and publish a key pair for the local identity
    Keygen,
    /// Show the local identity and its public key
    Whoami,
    /// Encrypt a message for a recipient and append it to their inbox
    Send {
        #[arg(long)]
        to: String,
        message: String,
    },
    /// Print the local inbox, newest first
    Inbox {
        /// Keep printing snapshots until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("SEALPOST_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "sealpost.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = init_tracing();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> sealpost::Result<()> {
    let config = Config::from_env()?;
    let identity = config.resolve_identity(args.user.as_deref())?;
    let session = Session::new(identity.as_str());

    let stores = store::open(&config, &identity).await?;
    let engine = CryptoEngine::new(config.group.build());
    let keys = KeyManager::new(stores.keys.clone(), engine.clone());
    let messenger = Messenger::new(stores, engine);

    info!(user_id = %identity, group = ?config.group, "Session started");
    keys.load(&session).await?;

    match args.command {
        Command::Keygen => {
            let pair = keys.generate(&session).await?;
            println!("Generated key pair for {}", identity);
            println!("public key: {}", pair.public_key.to_hex());
        }
        Command::Whoami => {
            println!("user id: {}", identity);
            match keys.public_key(&session) {
                Some(public_key) => println!("public key: {}", public_key.to_hex()),
                None => println!("public key: none (run `sealpost keygen`)"),
            }
        }
        Command::Send { to, message } => {
            let envelope = messenger.send(&session, &to, &message).await?;
            println!("Sent to {} at {}", to.trim(), format_time(envelope.sent_at));
        }
        Command::Inbox { watch } => {
            if let KeyState::NoKey = session.key_state() {
                println!("No local key yet; messages stay encrypted until `sealpost keygen`.");
            }

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let subscription = messenger
                .receive(&session, move |entries| {
                    let _ = tx.send(entries);
                })
                .await?;

            if watch {
                loop {
                    tokio::select! {
                        entries = rx.recv() => match entries {
                            Some(entries) => print_inbox(&entries),
                            None => break,
                        },
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            } else if let Some(entries) = rx.recv().await {
                print_inbox(&entries);
            }
            subscription.cancel();
        }
    }

    Ok(())
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_inbox(entries: &[InboxEntry]) {
    println!("--- {} message(s) ---", entries.len());
    for entry in entries {
        let body = match &entry.content {
            InboxContent::Decrypted(text) => text.clone(),
            InboxContent::PendingKey => "[encrypted: no local key]".to_string(),
            InboxContent::DecryptionFailed(reason) => format!("[unreadable: {}]", reason),
        };
        println!("[{}] {}: {}", format_time(entry.sent_at), entry.sender_id, body);
    }
}
