//! tcc-participant
//!
//! Runs a standalone participant: loads `config/<env>.yaml`, wires the
//! resource manager and fence store, and keeps the fence cleaner running
//! until Ctrl-C.

use std::sync::Arc;

use tcc_participant::config::TccConfig;
use tcc_participant::logging::init_logging;
use tcc_participant::participant::TccParticipant;
use tcc_participant::tcc::{RegistrationResponse, registrar_channel};
use tracing::info;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = TccConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    info!("Starting TCC participant in {} mode", env);

    let (registrar, mut registrations) = registrar_channel(config.registrar.channel_buffer);

    // No coordinator link in standalone mode: log and accept
    let transport = tokio::spawn(async move {
        while let Some(request) = registrations.recv().await {
            info!(
                resource_group = %request.resource_group_id,
                resource_id = %request.resource_id,
                branch_type = %request.branch_type,
                "Resource registration"
            );
            let _ = request.response_tx.send(RegistrationResponse::Accepted);
        }
    });

    let participant = TccParticipant::from_config(&config, Arc::new(registrar)).await?;
    let cleaner = participant.spawn_fence_cleaner();

    info!(
        resources = participant.resource_manager().managed_resources().len(),
        "Participant ready, press Ctrl+C to stop"
    );
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    if let Some(cleaner) = cleaner {
        cleaner.abort();
    }
    drop(participant);
    let _ = transport.await;

    Ok(())
}
