//! Command handlers for the BeaconChat CLI

use std::time::Duration;

use beaconchat_ble::BleBroadcastTransport;
use beaconchat_core::{Identity, InboundMessage};
use beaconchat_runtime::{ChannelListener, Coordinator, SendOutcome, SendReceipt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::CliAppConfig;
use crate::error::{CliError, Result};
use crate::output::{format_message, format_nearby};
use crate::simulate::{run_simulation, SimulationSettings};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: CliAppConfig) -> Result<()> {
        let json = cli.json || config.cli.json_output;
        match cli.command {
            Commands::Listen { identity, quiet } => {
                let identity = config.resolve_identity(&identity)?;
                Self::handle_listen_command(&config, identity, quiet, json).await
            }
            Commands::Send { identity, text } => {
                let identity = config.resolve_identity(&identity)?;
                let coordinator = Self::spawn_ble(&config)?;
                let receipt = coordinator.send_public(&identity, text).await?;
                Self::wait_for_send(coordinator, receipt).await
            }
            Commands::Whisper { identity, to, text } => {
                let identity = config.resolve_identity(&identity)?;
                let coordinator = Self::spawn_ble(&config)?;
                let receipt = coordinator.send_private(&identity, to, text).await?;
                Self::wait_for_send(coordinator, receipt).await
            }
            Commands::Presence { identity } => {
                let identity = config.resolve_identity(&identity)?;
                Self::handle_presence_command(&config, identity).await
            }
            Commands::Simulate { drop_rate } => {
                Self::handle_simulate_command(drop_rate.clamp(0.0, 1.0), json).await
            }
        }
    }

    fn spawn_ble(config: &CliAppConfig) -> Result<Coordinator> {
        let transport = BleBroadcastTransport::new(config.ble.clone());
        Ok(Coordinator::spawn(transport, config.coordinator.clone())?)
    }

    /// Handle the listen command
    async fn handle_listen_command(
        config: &CliAppConfig,
        identity: Identity,
        quiet: bool,
        json: bool,
    ) -> Result<()> {
        let coordinator = Self::spawn_ble(config)?;
        let (listener, mut inbox) = ChannelListener::new(config.cli.inbox_size);
        coordinator.start_listening(listener).await?;
        if !quiet {
            coordinator.start_presence(identity.clone()).await?;
        }
        info!("Listening as {}... Press Ctrl+C to stop", identity);

        let result = Self::print_until_interrupted(&mut inbox, json).await;
        coordinator.shutdown().await?;
        result
    }

    async fn print_until_interrupted(
        inbox: &mut mpsc::Receiver<InboundMessage>,
        json: bool,
    ) -> Result<()> {
        loop {
            tokio::select! {
                message = inbox.recv() => {
                    let Some(message) = message else {
                        warn!("Coordinator stopped delivering messages");
                        return Ok(());
                    };
                    println!("{}", format_message(&message, json)?);
                }
                _ = tokio::signal::ctrl_c() => {
                    return Ok(());
                }
            }
        }
    }

    /// Wait for a send to finish, or for Ctrl+C
    async fn wait_for_send(coordinator: Coordinator, receipt: SendReceipt) -> Result<()> {
        let message_id = receipt.message_id().clone();
        let fragments = receipt.fragments();
        println!("Sending message {} ({} fragments)", message_id, fragments);

        let outcome = tokio::select! {
            outcome = receipt.outcome() => outcome,
            _ = tokio::signal::ctrl_c() => SendOutcome::Cancelled,
        };
        coordinator.shutdown().await?;

        match outcome {
            SendOutcome::Completed => {
                println!("Message {} sent", message_id);
                Ok(())
            }
            SendOutcome::Failed { reason } => Err(CliError::Beacon(
                beaconchat_core::BeaconError::transport(reason),
            )),
            other => {
                println!("Message {} not completed: {:?}", message_id, other);
                Ok(())
            }
        }
    }

    /// Handle the presence command
    async fn handle_presence_command(config: &CliAppConfig, identity: Identity) -> Result<()> {
        let coordinator = Self::spawn_ble(config)?;
        let (listener, mut inbox) = ChannelListener::new(config.cli.inbox_size);
        coordinator.start_listening(listener).await?;
        coordinator.start_presence(identity.clone()).await?;
        info!("Broadcasting presence as {}... Press Ctrl+C to stop", identity);

        let mut interval =
            tokio::time::interval(Duration::from_secs(config.cli.nearby_refresh_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let peers = coordinator.nearby().await?;
                    println!("Nearby peers:");
                    for line in format_nearby(&peers) {
                        println!("{line}");
                    }
                }
                Some(message) = inbox.recv() => {
                    debug!("Heard {} while broadcasting presence", message.alias());
                }
                _ = tokio::signal::ctrl_c() => {
                    break;
                }
            }
        }

        coordinator.shutdown().await?;
        Ok(())
    }

    /// Handle the simulate command
    async fn handle_simulate_command(drop_rate: f64, json: bool) -> Result<()> {
        let settings = SimulationSettings {
            drop_rate,
            ..SimulationSettings::default()
        };
        println!("Simulating Alice and Bob over a loopback radio...");

        let received = run_simulation(&settings).await?;
        println!("Bob received {} message(s):", received.len());
        for message in &received {
            println!("{}", format_message(message, json)?);
        }
        Ok(())
    }
}
