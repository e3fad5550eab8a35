use clap::Parser;
use dabcast::{FileSink, Membership, Stack, StackConfiguration};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

/// Run one process of the broadcast group.
///
/// The process binds the address the membership gives it and waits for SIGUSR2 before
/// broadcasting the payloads 1 to `messages`. SIGINT or SIGTERM stop it and flush the output.
#[derive(Debug, Parser)]
#[command(name = "dabcast", version)]
struct Args {
    /// Identifier of this process in the membership file, starting at 1.
    #[arg(long)]
    id: u16,

    /// The membership file.
    #[arg(long)]
    hosts: PathBuf,

    /// Where the broadcast and delivery log is written.
    #[arg(long)]
    output: PathBuf,

    /// How many payloads to broadcast.
    #[arg(long, default_value_t = i32::MAX)]
    messages: i32,

    /// Start broadcasting right away instead of waiting for SIGUSR2.
    #[arg(long)]
    start_immediately: bool,

    /// Interval between retransmissions, in microseconds.
    #[arg(long, default_value_t = 1000)]
    retransmit_micros: u64,

    /// Workers of each pool, defaults to the available parallelism.
    #[arg(long)]
    workers: Option<usize>,

    /// Seed for the causal dependency watch selection.
    #[arg(long)]
    seed: Option<u64>,
}

fn configuration(args: &Args) -> dabcast::Result<StackConfiguration> {
    let mut builder = StackConfiguration::builder()
        .with_retransmit_interval(Duration::from_micros(args.retransmit_micros));
    if let Some(workers) = args.workers {
        builder = builder.with_workers(workers);
    }
    if let Some(seed) = args.seed {
        builder = builder.with_seed(seed);
    }
    builder.build()
}

#[tokio::main]
async fn main() -> dabcast::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.id == 0 {
        return Err(dabcast::Error::Configuration(String::from(
            "Process identifiers start at 1",
        )));
    }

    let configuration = configuration(&args)?;
    let membership = Membership::from_file(&args.hosts, args.id - 1, args.messages)?;
    let (sender, receiver) = mepa::channel(membership.local().address()).await?;
    let mut receiver = receiver.with_timeout(configuration.receive_timeout());
    let sink = Arc::new(FileSink::create(&args.output)?);
    let stack = Arc::new(Stack::start(
        &configuration,
        membership,
        Arc::new(sender),
        sink,
    ));

    let polling = {
        let inbound = stack.inbound();
        let shutdown = stack.shutdown();
        tokio::spawn(async move {
            receiver
                .poll(shutdown, move |data, _| inbound.receive(data))
                .await
        })
    };

    let mut start = signal(SignalKind::user_defined2())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let started = args.start_immediately || {
        tracing::info!("waiting for SIGUSR2 to start broadcasting");
        tokio::select! {
            _ = start.recv() => true,
            _ = terminate.recv() => false,
            _ = tokio::signal::ctrl_c() => false,
        }
    };

    let broadcasting = started.then(|| {
        let stack = Arc::clone(&stack);
        let messages = args.messages;
        tokio::spawn(async move {
            tracing::info!(messages, "broadcasting");
            for payload in 1..=messages {
                if let Err(e) = stack.broadcast(payload).await {
                    tracing::info!(error = %e, payload, "broadcasting interrupted");
                    return;
                }
            }
            tracing::info!("finished broadcasting");
        })
    });

    if started {
        tokio::select! {
            _ = terminate.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    tracing::info!("stopping");
    stack.stop().await?;
    if let Some(broadcasting) = broadcasting {
        if let Err(e) = broadcasting.await {
            tracing::warn!(error = %e, "broadcasting task failed");
        }
    }
    match polling.await {
        Ok(result) => result?,
        Err(e) => tracing::warn!(error = %e, "receiving task failed"),
    }
    Ok(())
}
