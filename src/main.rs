mod approval;
mod audit;
mod cli;
mod clock;
mod config;
mod event;
mod idle;
mod limits;
mod monitor;
mod notify;
mod pane;
mod patterns;
mod quota;
mod registry;
mod state;
#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, warn};

use audit::AuditLog;
use cli::{Cli, Command};
use clock::{Clock, SystemClock};
use config::DaemonConfig;
use monitor::SessionMonitor;
use notify::LogNotifier;
use pane::{PaneAdapter, TmuxPaneAdapter};
use registry::{FileRegistry, SessionRecord, SessionRegistry, SessionStatus};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "kestrel=info",
        1 => "kestrel=debug",
        _ => "kestrel=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir()?;
    let (config, config_path) = DaemonConfig::load(&cwd)?;

    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .kestrel/config.toml found, using defaults"),
    }

    match cli.command {
        Command::Run => run_daemon(&cwd, &config).await?,
        Command::Add { id, pane, name } => {
            let registry = FileRegistry::new(config.registry_path(&cwd));
            let record = SessionRecord {
                name: name.unwrap_or_else(|| id.clone()),
                pane_id: pane,
                created: SystemClock.now(),
                status: SessionStatus::Active,
                quota_schedule: None,
                id,
            };
            registry.insert(record.clone())?;
            println!("registered session '{}' on pane {}", record.id, record.pane_id);
        }
        Command::Send { id, text } => {
            let registry = FileRegistry::new(config.registry_path(&cwd));
            let Some(record) = registry.get(&id)? else {
                bail!("unknown session '{id}'");
            };
            TmuxPaneAdapter::default().send_cooked(&record.pane_id, &text)?;
            println!("sent to '{}' (pane {})", record.id, record.pane_id);
        }
        Command::Sessions => {
            let registry = FileRegistry::new(config.registry_path(&cwd));
            let sessions = registry.all()?;
            if sessions.is_empty() {
                println!("no sessions in {}", registry.path().display());
            }
            for session in sessions {
                println!(
                    "{}  {}  pane={}  status={:?}  quota={}",
                    session.id,
                    session.name,
                    session.pane_id,
                    session.status,
                    session
                        .quota_schedule
                        .map(|q| q.time_of_day)
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        Command::Config => {
            let monitor = config.monitor_config();
            println!("Monitor config:");
            println!("  poll_interval: {:?}", monitor.poll_interval);
            println!("  max_retries:   {}", monitor.max_retries);
            println!("  auto_restart:  {}", monitor.auto_restart);
            println!("Registry:");
            println!("  path:          {}", config.registry_path(&cwd).display());
            match config_path {
                Some(p) => println!("  source:        {}", p.display()),
                None => println!("  source:        (defaults — no .kestrel/config.toml found)"),
            }
        }
    }

    Ok(())
}

/// Wire the concrete drivers together and supervise until Ctrl-C.
async fn run_daemon(cwd: &Path, config: &DaemonConfig) -> Result<()> {
    let registry = Arc::new(FileRegistry::new(config.registry_path(cwd)));
    let monitor = SessionMonitor::new(
        config.monitor_config(),
        Arc::new(TmuxPaneAdapter::default()),
        registry.clone(),
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
    );

    let audit = AuditLog::new(&cwd.join(".kestrel").join("logs").join("events.jsonl"))?;
    info!(log = %audit.path().display(), "audit log open");
    let events = monitor.subscribe();
    let audit_thread = std::thread::spawn(move || {
        for event in events {
            if let Err(e) = audit.record(&event) {
                warn!(error = %e, "failed to write audit entry");
            }
        }
    });

    let mut started = 0;
    for record in registry.all()? {
        if record.status != SessionStatus::Ended {
            monitor.start_monitoring(&record.id);
            started += 1;
        }
    }
    info!(sessions = started, "daemon running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    monitor.stop_all();
    drop(monitor);
    let _ = audit_thread.join();
    Ok(())
}
