//! `otactl update`

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use meshota_core::session::ProgressCallback;
use meshota_core::{OtaCoordinator, UpdatePhase, UpdateProgress, UpdateState};
use std::sync::Arc;
use tracing::{info, warn};

use crate::commands::{Context, UpdateArgs};
use crate::device::StagingDevice;
use crate::error::CliError;
use crate::output;

pub async fn execute(args: &UpdateArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(chunk_size) = args.chunk_size {
        config.transfer = config.transfer.with_chunk_size(chunk_size);
    }

    let registry = args.identity.registry()?;
    let coordinator = OtaCoordinator::from_config(registry, &config)
        .await
        .map_err(CliError::from)?;

    let device = Arc::new(StagingDevice::new(args.identity.device(), &args.output));
    let bar = if ctx.json { None } else { Some(progress_bar()?) };
    let callback = bar.clone().map(|pb| -> ProgressCallback {
        Box::new(move |progress: UpdateProgress| show_progress(&pb, &progress))
    });

    let handle = coordinator
        .request_update(device, callback)
        .map_err(CliError::from)?;
    info!("Started session {}", handle.session_id());

    let session = tokio::select! {
        session = handle.wait() => session,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling session {}", handle.session_id());
            coordinator.cancel(&handle);
            handle.wait().await
        }
    };

    if let Some(pb) = bar {
        pb.finish_and_clear();
    }

    match (&session.state, session.error.clone()) {
        (UpdateState::Completed, _) => {
            output::print_session(&session, ctx.json);
            Ok(())
        }
        (_, Some(error)) => Err(CliError::from(error).into()),
        (state, None) => Err(CliError::UpdateFailed(state.to_string()).into()),
    }
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg:12} [{bar:40.cyan/blue}] {bytes}/{total_bytes}")?
        .progress_chars("#>-");
    pb.set_style(style);
    Ok(pb)
}

fn show_progress(pb: &ProgressBar, progress: &UpdateProgress) {
    let label = match progress.phase {
        UpdatePhase::Downloading => "downloading",
        UpdatePhase::Transferring => "transferring",
    };
    if pb.message() != label {
        pb.set_message(label);
        pb.set_length(progress.total_bytes);
    }
    pb.set_position(progress.bytes);
}
