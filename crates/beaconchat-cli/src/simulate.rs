//! Two-node demo over the loopback medium

use std::time::Duration;

use beaconchat_core::{Identity, InboundMessage, ProtocolConfig};
use beaconchat_runtime::{
    ChannelListener, Coordinator, CoordinatorConfig, LoopbackConfig, LoopbackMedium, SendOutcome,
};
use tracing::{info, warn};

use crate::error::Result;

/// Knobs for [`run_simulation`]
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub drop_rate: f64,
    pub inter_fragment_delay: Duration,
    /// How long to keep listening after the last send completes
    pub settle: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            drop_rate: 0.0,
            inter_fragment_delay: Duration::from_millis(250),
            settle: Duration::from_secs(1),
        }
    }
}

/// Alice broadcasts presence, a public and a private message; Bob listens
///
/// Returns everything Bob received, in arrival order.
pub async fn run_simulation(settings: &SimulationSettings) -> Result<Vec<InboundMessage>> {
    let medium = LoopbackMedium::new(LoopbackConfig::default().with_drop_rate(settings.drop_rate));
    let _ticker = medium.start_ticker();

    let config = CoordinatorConfig::testing().with_protocol(
        ProtocolConfig::default().with_inter_fragment_delay(settings.inter_fragment_delay),
    );
    let alice = Coordinator::spawn(medium.endpoint("alice-radio").await, config.clone())?;
    let bob = Coordinator::spawn(medium.endpoint("bob-radio").await, config)?;

    let (listener, mut inbox) = ChannelListener::new(64);
    bob.start_listening(listener).await?;

    let me = Identity::new("Alice", "user-123");
    alice.start_presence(me.clone()).await?;
    info!("Alice is broadcasting presence");

    let receipt = alice.send_public(&me, "Hello from Alice!").await?;
    report(receipt.outcome().await);
    let receipt = alice.send_private(&me, "Bob", "just for you").await?;
    report(receipt.outcome().await);

    tokio::time::sleep(settings.settle).await;

    let mut received = Vec::new();
    while let Ok(message) = inbox.try_recv() {
        received.push(message);
    }

    alice.shutdown().await?;
    bob.shutdown().await?;
    Ok(received)
}

fn report(outcome: SendOutcome) {
    match outcome {
        SendOutcome::Completed => info!("Alice finished sending"),
        other => warn!("Alice's send ended early: {:?}", other),
    }
}
