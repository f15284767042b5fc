use std::sync::Arc;

use natsbee_nats::{BridgeManager, ChannelSink, Config, LifecycleEvent};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Subscribe to two subjects as members of one queue group
    let config = Config {
        subjects: vec!["orders".into(), "shipping".into()],
        queue_group: Some("workers".into()),
        ..Default::default()
    };

    let (sink, mut events) = ChannelSink::new(1024);
    let manager = BridgeManager::from_config(config, Arc::new(sink))?;
    let mut lifecycle = manager.lifecycle();
    let bridge = manager.build_and_start();

    // Print lifecycle transitions as they happen
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            match event {
                LifecycleEvent::Closed(reason) => {
                    info!("Bridge closed: {reason}");
                    break;
                }
                other => info!("Lifecycle: {other:?}"),
            }
        }
    });

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!("{}", serde_json::to_string(&event)?);
            }
            result = bridge.closed() => {
                if let Err(e) = result {
                    error!("Bridge failed: {e}");
                }
                break;
            }
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                bridge.shutdown().await?;
                break;
            }
        }
    }

    info!("Metrics: {:?}", bridge.metrics());
    Ok(())
}
