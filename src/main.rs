use sftp_relay::{
    config::{Config, TransportKind},
    transfer::{MemoryTransport, SftpTransport, Transport},
    parse_messages, Message, RunCoordinator,
};
use std::io::Read;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// The main entry point for the relay.
///
/// Usage: `sftp-relay [config.toml] <messages.json | ->`
///
/// Loads the configuration, reads a JSON array of messages (from a file, or
/// stdin when the path is `-`), uploads them and prints the run report.
/// Exits with an error when any message failed so the trigger can redeliver.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let input = args.pop().unwrap_or_else(|| "-".to_string());
    let config_path = args.pop().unwrap_or_else(|| "config/default.toml".to_string());

    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Relay starting with config: {:?}", config);

    let messages = read_messages(&input)?;

    let memory = MemoryTransport::new();
    let transport: Arc<dyn Transport> = match config.transport.kind {
        TransportKind::Sftp => Arc::new(SftpTransport),
        TransportKind::Memory => {
            warn!("Dry run: files are kept in memory and discarded on exit");
            Arc::new(memory.clone())
        }
    };

    let coordinator = RunCoordinator::from_config(&config, transport)?;
    let report = coordinator.run(messages, config.batch.batch_size).await?;

    if config.transport.kind == TransportKind::Memory {
        info!("Dry run stored {} files", memory.paths().len());
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_complete_success() {
        for failure in report.errors() {
            error!("{}", failure);
        }
        anyhow::bail!(
            "{} of {} messages failed",
            report.failed,
            report.total_messages
        );
    }
    Ok(())
}

fn read_messages(input: &str) -> anyhow::Result<Vec<Message>> {
    let content = if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(input)?
    };

    Ok(parse_messages(&content)?)
}
