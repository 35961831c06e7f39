//! CLI binary to publish events to, and tail events from, a beacon stream.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use beacon_envelope::{Envelope, codec};
use beacon_messaging::{EventPublisher, EventSubscriber, HandlerError, handler_fn};
use beacon_messaging_nats::broker::{DEFAULT_STREAM_NAME, DEFAULT_STREAM_SUBJECT};
use beacon_messaging_nats::config::DEFAULT_NATS_URL;
use beacon_messaging_nats::{
    NatsPublisher, NatsSubscriber, PublisherConfig, RetryPolicy, StreamSpec, SubscriberConfig,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The `--data` argument is not valid JSON
    #[error("invalid --data: {0}")]
    Data(#[from] serde_json::Error),

    /// Envelope could not be built
    #[error(transparent)]
    Envelope(#[from] beacon_envelope::Error),

    /// Publishing or subscribing failed
    #[error(transparent)]
    Messaging(#[from] beacon_messaging_nats::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// NATS server address
    #[arg(long, global = true, default_value = DEFAULT_NATS_URL, env = "BEACON_NATS_URL")]
    nats_url: String,

    /// Stream name
    #[arg(long, global = true, default_value = DEFAULT_STREAM_NAME, env = "BEACON_STREAM")]
    stream: String,

    /// Subject pattern captured by the stream
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_STREAM_SUBJECT,
        env = "BEACON_STREAM_SUBJECT"
    )]
    stream_subject: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Publish a single event
    Publish {
        /// Event type, e.g. cloud.beacontower.device.created
        #[arg(long = "type")]
        event_type: String,

        /// Producer identifier
        #[arg(long)]
        source: String,

        /// Subject of the event within the producer
        #[arg(long)]
        subject: Option<String>,

        /// JSON payload
        #[arg(long)]
        data: Option<String>,

        /// Correlation id extension
        #[arg(long)]
        correlation_id: Option<String>,

        /// Publish attempts before giving up
        #[arg(long, default_value_t = 3, env = "BEACON_MAX_RETRY_ATTEMPTS")]
        max_retry_attempts: usize,
    },

    /// Print events matching a subject pattern until interrupted
    Tail {
        /// Subject pattern, `*` matches one token and `>` the rest
        pattern: String,

        /// Logical service name; instances sharing it split the messages.
        /// Defaults to a fresh name so tailing never takes messages from a service
        #[arg(long, env = "BEACON_SERVICE_NAME")]
        service_name: Option<String>,

        /// Events printed concurrently
        #[arg(long, default_value_t = 10, env = "BEACON_MAX_CONCURRENCY")]
        max_concurrency: usize,
    },
}

fn build_envelope(
    event_type: String,
    source: String,
    subject: Option<String>,
    data: Option<&str>,
    correlation_id: Option<String>,
) -> Result<Envelope, Error> {
    let mut builder = Envelope::builder(event_type, source);

    if let Some(subject) = subject {
        builder = builder.subject(subject);
    }

    if let Some(data) = data {
        let value: Value = serde_json::from_str(data)?;
        builder = builder.data_json(&value);
    }

    if let Some(correlation_id) = correlation_id {
        builder = builder.correlation_id(correlation_id);
    }

    builder.build().map_err(Error::from)
}

/// Tail consumers get their own delivery group unless told otherwise.
fn tail_service_name(service_name: Option<String>) -> String {
    service_name.unwrap_or_else(|| format!("tail_{}", Uuid::new_v4().simple()))
}

async fn publish(args: Args) -> Result<(), Error> {
    let Command::Publish {
        event_type,
        source,
        subject,
        data,
        correlation_id,
        max_retry_attempts,
    } = args.command
    else {
        return Ok(());
    };

    let envelope = build_envelope(event_type, source, subject, data.as_deref(), correlation_id)?;

    let publisher = NatsPublisher::connect(PublisherConfig {
        nats_url: args.nats_url,
        stream: StreamSpec {
            name: args.stream,
            subjects: vec![args.stream_subject],
        },
        retry: RetryPolicy {
            max_attempts: max_retry_attempts,
            ..RetryPolicy::default()
        },
        ..PublisherConfig::default()
    })
    .await?;

    let id = envelope.id().to_string();
    let receipt = publisher.publish(envelope).await?;

    println!(
        "published {id} to {} (sequence {}, {} attempt(s))",
        receipt.subject, receipt.sequence, receipt.attempts
    );

    Ok(())
}

async fn tail(args: Args, shutdown: CancellationToken) -> Result<(), Error> {
    let Command::Tail {
        pattern,
        service_name,
        max_concurrency,
    } = args.command
    else {
        return Ok(());
    };

    let subscriber = NatsSubscriber::connect(SubscriberConfig {
        nats_url: args.nats_url,
        stream: StreamSpec {
            name: args.stream,
            subjects: vec![args.stream_subject],
        },
        service_name: tail_service_name(service_name),
        max_concurrency,
        ..SubscriberConfig::default()
    })
    .await?;

    let mut events = subscriber.events();
    let reporter_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = reporter_shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => warn!(?event, "subscriber event"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped subscriber events"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    let handle = subscriber
        .subscribe_with_cancellation(
            &pattern,
            handler_fn(|envelope: Envelope, _data: Value, _cancel| async move {
                let document = codec::encode(&envelope)?;
                println!("{}", String::from_utf8_lossy(&document));
                Ok::<(), HandlerError>(())
            }),
            shutdown.clone(),
        )
        .await?;

    info!(subscription = %handle.key(), "tailing, press ctrl-c to stop");

    shutdown.cancelled().await;
    subscriber.shutdown().await?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        _ => {
            warn!("could not install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received interrupt signal");
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    match args.command {
        Command::Publish { .. } => publish(args).await,
        Command::Tail { .. } => tail(args, shutdown_token).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_publish() {
        let args = Args::try_parse_from([
            "beacon",
            "publish",
            "--type",
            "cloud.beacontower.device.created",
            "--source",
            "/devices",
            "--data",
            r#"{"device_id":"dev-1"}"#,
        ])
        .unwrap();

        assert_eq!(args.stream, "BEACONTOWER");
        assert!(matches!(
            args.command,
            Command::Publish { ref event_type, max_retry_attempts: 3, .. }
                if event_type == "cloud.beacontower.device.created"
        ));
    }

    #[test]
    fn test_parses_tail_with_global_flags() {
        let args = Args::try_parse_from([
            "beacon",
            "tail",
            "beacontower.*.created",
            "--stream",
            "EVENTS",
            "--service-name",
            "audit",
        ])
        .unwrap();

        assert_eq!(args.stream, "EVENTS");
        assert!(matches!(
            args.command,
            Command::Tail { ref pattern, ref service_name, .. }
                if pattern == "beacontower.*.created" && service_name.as_deref() == Some("audit")
        ));
    }

    #[test]
    fn test_tail_defaults_to_private_group() {
        let args = Args::try_parse_from(["beacon", "tail", "beacontower.>"]).unwrap();

        let Command::Tail { service_name, .. } = args.command else {
            panic!("expected tail");
        };
        assert_eq!(service_name, None);

        let first = tail_service_name(None);
        let second = tail_service_name(None);
        assert!(first.starts_with("tail_"));
        assert_ne!(first, second);
        assert_eq!(tail_service_name(Some("audit".to_string())), "audit");
    }

    #[test]
    fn test_build_envelope() {
        let envelope = build_envelope(
            "cloud.beacontower.device.created".to_string(),
            "/devices".to_string(),
            Some("dev-1".to_string()),
            Some(r#"{"device_id":"dev-1"}"#),
            Some("corr-1".to_string()),
        )
        .unwrap();

        assert_eq!(envelope.subject(), Some("dev-1"));
        assert_eq!(envelope.correlation_id(), Some("corr-1"));
        assert_eq!(envelope.data_content_type(), Some("application/json"));
    }

    #[test]
    fn test_build_envelope_rejects_bad_json() {
        let result = build_envelope(
            "cloud.beacontower.device.created".to_string(),
            "/devices".to_string(),
            None,
            Some("{not json"),
            None,
        );

        assert!(matches!(result, Err(Error::Data(_))));
    }
}
