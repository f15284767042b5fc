use std::{process, sync::Arc, time::Duration};

use natsbee::{
    config::Config,
    core::{output::EventWriter, signals::wait_for_shutdown_signal},
    logger::LoggerManager,
    print_error,
};
use natsbee_nats::{BridgeManager, ChannelSink, LifecycleEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// How long the writer may take to drain buffered events after the bridge closed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn load_config() -> Config {
    Config::new().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    let cfg = load_config();

    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting natsbee version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.input);

    let (sink, events) = ChannelSink::new(cfg.output.buffer);
    let manager = BridgeManager::from_config(cfg.input.clone(), Arc::new(sink)).unwrap_or_else(|e| {
        error!("Invalid input configuration: {}", e);
        process::exit(1);
    });
    info!(
        "Subscribing to {:?} (queue group: {}, codec: {})",
        cfg.input.subjects,
        cfg.input.queue_group.as_deref().unwrap_or("none"),
        cfg.input.codec
    );

    let mut writer = EventWriter::stdout(cfg.output.format);
    let writer_task = tokio::spawn(async move { writer.run(events).await });

    let mut lifecycle = manager.lifecycle();
    tokio::spawn(async move {
        loop {
            match lifecycle.recv().await {
                Ok(LifecycleEvent::Closed(reason)) => {
                    debug!("Lifecycle: closed ({reason})");
                    break;
                }
                Ok(event) => debug!("Lifecycle: {event:?}"),
                Err(RecvError::Lagged(n)) => warn!("Lifecycle monitor lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let bridge = manager.build_and_start();
    info!("Bridge started");

    let outcome = tokio::select! {
        result = bridge.closed() => result,
        signal = wait_for_shutdown_signal() => {
            match signal {
                Ok(name) => info!("Received {name}, initiating graceful shutdown..."),
                Err(e) => error!("Failed to listen for shutdown signals: {e}"),
            }
            bridge.shutdown().await
        }
    };

    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await {
        Ok(Ok(Ok(count))) => debug!("Output writer wrote {count} events"),
        Ok(Ok(Err(e))) => error!("Output writer failed: {e}"),
        Ok(Err(e)) => error!("Output writer task panicked: {e}"),
        Err(_) => warn!("Output writer did not drain within {:?}", WRITER_DRAIN_TIMEOUT),
    }

    let metrics = bridge.metrics();
    info!(
        received = metrics.messages_received,
        pushed = metrics.events_pushed,
        decode_errors = metrics.decode_errors,
        sink_errors = metrics.sink_errors,
        reconnects = metrics.reconnects,
        "Final counters"
    );

    match outcome {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => {
            error!("Bridge terminated: {e}");
            process::exit(1);
        }
    }
}
