//! Subcommand implementations
//!
//! Component calls are synchronous and may shell out, so they run on the
//! blocking pool.

use anyhow::{bail, Context, Result};
use netfence_core::resolver::monitoring_root;
use netfence_core::{ConfigRecord, ConfigStore, DomainStatus, FenceContext, RuleStatus};
use netfence_monitor::{platform_source, ProcessWatcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::spawn_blocking;

#[derive(Debug, Serialize)]
struct StatusReport {
    backend: &'static str,
    rules: RuleStatus,
    hosts_path: PathBuf,
    hosts_active: bool,
    domains: DomainStatus,
    record_path: PathBuf,
    record: ConfigRecord,
}

impl StatusReport {
    fn blocked(&self) -> bool {
        self.rules.count > 0 || self.hosts_active
    }
}

fn record_blocked(ctx: &FenceContext, blocked: bool) -> Result<()> {
    let store = ctx.open_store().context("Failed to open configuration record")?;
    store.update_network_blocked(blocked)?;
    store
        .flush()
        .with_context(|| format!("Failed to write {:?}", store.path()))
}

pub async fn enable(
    ctx: &FenceContext,
    root: &Path,
    watch_processes: bool,
    cleanup_on_exit: bool,
) -> Result<()> {
    // intent first; a partial enable is converged by running enable again
    record_blocked(ctx, true)?;

    let firewall = ctx.firewall();
    let install_root = root.to_path_buf();
    let report = spawn_blocking(move || firewall.apply_block(&install_root))
        .await?
        .with_context(|| format!("Failed to block executables under {:?}", root))?;

    for name in &report.created {
        println!("Created rule {}", name);
    }
    for name in &report.existing {
        println!("Rule {} already present", name);
    }
    for name in &report.missing {
        println!("Not installed: {}", name);
    }
    for failure in &report.failed {
        eprintln!("Failed to create {}: {}", failure.rule, failure.error);
    }

    let hosts = ctx.hosts();
    let hosts_path = hosts.path().to_path_buf();
    let added = spawn_blocking(move || hosts.add_blocks())
        .await?
        .with_context(|| format!("Failed to update {:?}", hosts_path))?;
    if added {
        println!("Blocked domains in {}", hosts_path.display());
    } else {
        println!("Domains already blocked in {}", hosts_path.display());
    }

    if !report.succeeded() {
        bail!("{} rule(s) could not be created", report.failed.len());
    }

    if watch_processes {
        watch(ctx, root).await?;
        if cleanup_on_exit {
            disable(ctx).await?;
        }
    }
    Ok(())
}

pub async fn disable(ctx: &FenceContext) -> Result<()> {
    record_blocked(ctx, false)?;

    let firewall = ctx.firewall();
    let report = spawn_blocking(move || firewall.remove_block()).await?;
    for name in &report.removed {
        println!("Removed rule {}", name);
    }
    for failure in &report.failed {
        eprintln!("Failed to remove {}: {}", failure.rule, failure.error);
    }

    let hosts = ctx.hosts();
    let hosts_path = hosts.path().to_path_buf();
    let removed = spawn_blocking(move || hosts.remove_blocks())
        .await?
        .with_context(|| format!("Failed to update {:?}", hosts_path))?;
    if removed {
        println!("Unblocked domains in {}", hosts_path.display());
    }

    if !report.succeeded() {
        bail!("{} rule(s) could not be removed", report.failed.len());
    }
    Ok(())
}

pub async fn status(ctx: &FenceContext, json: bool) -> Result<()> {
    let ctx = ctx.clone();
    let report = spawn_blocking(move || -> Result<StatusReport> {
        let firewall = ctx.firewall();
        let hosts = ctx.hosts();
        let store = ctx.open_store()?;
        Ok(StatusReport {
            backend: ctx.executor().backend_name(),
            rules: firewall.get_status()?,
            hosts_path: hosts.path().to_path_buf(),
            hosts_active: hosts.has_active_blocks()?,
            domains: hosts.get_status()?,
            record_path: store.path().to_path_buf(),
            record: store.load(),
        })
    })
    .await?
    .context("Failed to query blocking state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Firewall ({}): {} rule(s)", report.backend, report.rules.count);
    for name in &report.rules.names {
        println!("  {}", name);
    }
    println!(
        "Hosts ({}): {} domain(s){}",
        report.hosts_path.display(),
        report.domains.count,
        if report.hosts_active { "" } else { ", no section" }
    );
    for domain in &report.domains.domains {
        println!("  {}", domain);
    }
    println!("Record ({}):", report.record_path.display());
    println!("  network blocked: {}", report.record.network_blocked);
    println!("  license port:    {}", report.record.license_port);
    println!("  language:        {}", report.record.language);
    if !report.record.selected_version.is_empty() {
        println!(
            "  version:         {} ({})",
            report.record.selected_version, report.record.selected_version_path
        );
    }

    if report.record.network_blocked != report.blocked() {
        println!(
            "Recorded state differs from the system; run `netfence {}` to reconcile",
            if report.record.network_blocked {
                "enable --root <DIR>"
            } else {
                "disable"
            }
        );
    }
    Ok(())
}

pub async fn watch(ctx: &FenceContext, root: &Path) -> Result<()> {
    let settings = ctx.settings();
    let root = monitoring_root(root, settings.monitor.root_ancestor.as_deref());
    let source = platform_source(settings.monitor.poll_interval());
    let watcher = ProcessWatcher::new(
        ctx.executor(),
        source,
        settings.firewall.monitor_prefix.clone(),
        ctx.runtime().clone(),
    );
    let mut notifications = watcher.subscribe();

    let starter = watcher.clone();
    let monitored = root.clone();
    spawn_blocking(move || starter.start_monitoring(&monitored))
        .await?
        .with_context(|| format!("Failed to monitor {:?}", root))?;
    println!("Watching {} (Ctrl-C to stop)", root.display());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = notifications.recv() => match result {
                Ok(blocked) => println!(
                    "Blocked {} (pid {}) as {}",
                    blocked.path.display(),
                    blocked.pid,
                    blocked.rule
                ),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} block notifications", missed);
                }
                Err(RecvError::Closed) => break,
            },
            signal = &mut shutdown => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::debug!("Interrupted");
                break;
            }
        }
    }

    watcher.stop_monitoring();
    println!(
        "Stopped watching; {} process(es) blocked",
        watcher.blocked_paths().len()
    );
    Ok(())
}

fn open_store(ctx: &FenceContext) -> Result<ConfigStore> {
    ctx.open_store()
        .with_context(|| format!("Failed to open {:?}", ctx.record_path()))
}

pub fn config_show(ctx: &FenceContext) -> Result<()> {
    let record = open_store(ctx)?.load();
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn config_update(
    ctx: &FenceContext,
    update: impl FnOnce(&ConfigStore) -> netfence_core::Result<()>,
) -> Result<()> {
    let store = open_store(ctx)?;
    update(&store)?;
    store
        .flush()
        .with_context(|| format!("Failed to write {:?}", store.path()))?;
    println!("{}", serde_json::to_string_pretty(&store.load())?);
    Ok(())
}

pub fn config_reset(ctx: &FenceContext) -> Result<()> {
    let store = open_store(ctx)?;
    store
        .delete()
        .with_context(|| format!("Failed to delete {:?}", store.path()))?;
    println!("Removed {}", store.path().display());
    Ok(())
}
