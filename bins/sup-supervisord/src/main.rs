//! Application supervisor daemon.
//!
//! Wires the supervisor core to the operating system: loads the
//! configuration store, auto-starts the installed apps, translates
//! SIGCHLD into child-exit dispatch, and drives an orderly shutdown of
//! every app on SIGTERM/SIGINT.
//!
//! Everything runs on a single-threaded runtime; the supervisor state
//! is owned by the main task and never shared.

mod hostapp;

use anyhow::Result;
use clap::Parser;
use hostapp::HostAppFactory;
use std::sync::Arc;
use sup_common::ResultCode;
use sup_config::ConfigStore;
use sup_seclabel::ProcFsLabelReader;
use sup_supervisor::wait::{self, ChildReaper, OsChildReaper};
use sup_supervisor::{Event, Supervisor};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Application supervisor daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: String,

    /// Directory that installed apps unpack into
    #[arg(long, value_name = "DIR", default_value = "/opt/apps")]
    install_dir: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug)?;

    info!("Starting application supervisor");
    info!("Config file: {}", args.config);

    let config = Arc::new(ConfigStore::load_from_file(&args.config)?);

    let mut supervisor = Supervisor::new(
        Arc::clone(&config),
        &args.install_dir,
        Box::new(HostAppFactory::new(config)),
        Box::new(ProcFsLabelReader),
        Box::new(OsChildReaper),
    );

    // Fires once a shutdown has stopped the last application.
    let (all_stopped_tx, mut all_stopped_rx) = mpsc::unbounded_channel::<()>();
    supervisor.set_shutdown_handler(move || {
        let _ = all_stopped_tx.send(());
    });

    // Request queue for the IPC front-end services.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let _ipc_tx = event_tx;

    let mut sigchld = signal(SignalKind::child())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    supervisor.auto_start();

    loop {
        tokio::select! {
            _ = sigchld.recv() => {
                reap_children(&mut supervisor)?;
            }

            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
                supervisor.shutdown();
            }

            _ = sigint.recv() => {
                info!("Received SIGINT signal");
                supervisor.shutdown();
            }

            Some(event) = event_rx.recv() => {
                supervisor.handle_event(event);
            }

            Some(()) = all_stopped_rx.recv() => {
                info!("All applications stopped.");
                break;
            }
        }
    }

    Ok(())
}

/// Dispatches every child that has terminated since the last SIGCHLD.
///
/// One signal can stand for several exited children, so keep peeking
/// until no more are waiting.
fn reap_children(supervisor: &mut Supervisor) -> Result<()> {
    while let Some(pid) = wait::peek_next_child()? {
        match supervisor.sig_child(pid) {
            Ok(()) => {}

            Err(e) if e.code() == ResultCode::NotFound => {
                // Not an application process, so it must be one of our
                // own direct children.
                warn!("Reaping non-application child {}.", pid);
                let _ = OsChildReaper.reap(pid);
            }

            Err(e) => {
                // An app's fault policy demands a system reboot.  On a
                // real target this hands over to the platform reset
                // path; here the daemon exits with an error.
                error!("Rebooting the system: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    Ok(())
}
