//! voice-gate: background daemon for the assistant's voice front end
//!
//! This daemon provides:
//! - Continuous speech recognition through an external recognizer process
//! - Wake phrase detection, voice authentication and timed sessions
//! - Command dispatch to the assistant backend with spoken replies
//! - IPC server for the host application (status, toggles, events)

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use voice_gate::backend::{Backend, HttpBackend};
use voice_gate::config::Settings;
use voice_gate::events::StateEvent;
use voice_gate::ipc::Server;
use voice_gate::lifecycle::ShutdownSignal;
use voice_gate::recognition::ProcessRecognizer;
use voice_gate::speech::ProcessSynthesizer;
use voice_gate::state::{Controller, ControllerInputs, ControllerOptions, EventHooks};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "voice-gate starting");

    // Load configuration
    let settings = Settings::load()?;
    info!(
        socket_path = ?settings.socket_path,
        api_base_url = %settings.api_base_url,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    let backend = Arc::new(HttpBackend::new(&settings)?);

    // Seed runtime configuration from the stored voice profile
    let mut options = ControllerOptions::from_settings(&settings);
    match backend.fetch_profile().await {
        Ok(profile) => {
            info!(?profile, "voice profile loaded");
            options.apply_profile(&profile);
        }
        Err(e) => {
            warn!(error = %e, "voice profile unavailable, using local settings");
        }
    }

    // Channels for inter-component communication
    // Recognizer -> controller
    let (engine_tx, engine_rx) = mpsc::channel(64);
    // Synthesizer -> controller
    let (synthesis_tx, synthesis_rx) = mpsc::channel(16);
    // IPC server -> controller
    let (control_tx, control_rx) = mpsc::channel(16);
    // Controller -> IPC server (for broadcasting events)
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(256);

    let recognizer = ProcessRecognizer::new(
        settings.recognizer_command.clone(),
        settings.recognizer_args.clone(),
        engine_tx,
    );
    let synthesizer = ProcessSynthesizer::new(
        settings.synthesizer_command.clone(),
        settings.synthesizer_args.clone(),
        synthesis_tx,
    );

    let mut controller = Controller::new(
        options,
        Box::new(recognizer),
        Box::new(synthesizer),
        backend,
        Arc::new(EventHooks::new(event_tx.clone())),
        event_tx.clone(),
    );

    // Create IPC server
    let server = Server::new(&settings.socket_path, control_tx, event_tx.clone())?;

    // Keep the IPC server's status snapshot current
    let mut status_rx = event_tx.subscribe();
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the controller (processes recognizer, synthesis and control input)
        _ = controller.run(ControllerInputs {
            engine: engine_rx,
            synthesis: synthesis_rx,
            control: control_rx,
        }) => {
            info!("controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Forward status snapshots to the IPC server
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(StateEvent::StatusChanged { status }) => {
                        server_for_events.set_status(status).await;
                    }
                    Ok(event) => {
                        info!(%event, "controller event");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("event forwarder exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    controller.shutdown();
    server.shutdown().await;

    info!("voice-gate stopped");

    Ok(())
}
