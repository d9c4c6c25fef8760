//! CLI command implementations

use anyhow::{anyhow, Result};
use dcsandbox_core::{
    CleanupSelector, CreateRequest, SandboxEngine, SandboxRecord, SandboxStatus,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cancellation token wired to Ctrl-C
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    cancel
}

/// Create a sandbox, then serve its MCP endpoint in the foreground unless
/// detached. The listener lives for the lifetime of this process.
pub async fn create(engine: &Arc<SandboxEngine>, request: CreateRequest, detach: bool) -> Result<()> {
    let cancel = interrupt_token();
    let outcome = engine
        .create(request, cancel.clone())
        .await
        .map_err(|e| anyhow!("[{}] {}", e.code(), e))?;

    let record = &outcome.record;
    println!("Created sandbox '{}' ({})", record.name, record.id);
    println!("  template:  {}", record.template);
    println!("  status:    {}", record.status);
    if let Some(ref cid) = record.container_id {
        println!("  container: {}", &cid[..cid.len().min(12)]);
    }
    for warning in &outcome.warnings {
        eprintln!("Warning: {}", warning);
    }

    if let Some(port) = record.mcp.port {
        println!("  mcp:       ws://localhost:{}", port);
        if !detach {
            let reaper_cancel = CancellationToken::new();
            let reaper = engine.spawn_reaper(reaper_cancel.clone());
            println!("Serving MCP endpoint (Ctrl-C to detach)...");
            cancel.cancelled().await;
            reaper_cancel.cancel();
            let _ = reaper.await;
        }
    }

    Ok(())
}

pub async fn list(engine: &Arc<SandboxEngine>) -> Result<()> {
    let records = engine.list().await;
    if records.is_empty() {
        println!("No sandboxes found");
        return Ok(());
    }

    println!(
        "{:<14} {:<20} {:<10} {:<10} {:<8} {}",
        "ID", "NAME", "STATUS", "TEMPLATE", "PORT", "CREATED"
    );
    for record in records {
        println!(
            "{:<14} {:<20} {:<10} {:<10} {:<8} {}",
            record.id,
            record.name,
            record.status.to_string(),
            record.template,
            record
                .mcp
                .port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

pub async fn info(engine: &Arc<SandboxEngine>, sandbox: &str) -> Result<()> {
    let record = resolve(engine, sandbox).await?;
    let info = engine
        .info(&record.id)
        .await
        .map_err(|e| anyhow!("[{}] {}", e.code(), e))?;

    print_record(&info.record);
    match info.container {
        Some(details) => {
            println!("  container state: {}", details.state);
            if let Some(started) = details.started_at {
                println!("  started at:      {}", started);
            }
        }
        None => println!("  container state: unreachable"),
    }
    Ok(())
}

pub async fn start(engine: &Arc<SandboxEngine>, sandbox: &str) -> Result<()> {
    let record = resolve(engine, sandbox).await?;
    let started = engine
        .start(&record.id, interrupt_token())
        .await
        .map_err(|e| anyhow!("[{}] {}", e.code(), e))?;
    println!("Started sandbox '{}'", started.name);
    if let Some(port) = started.mcp.port {
        println!("  mcp: ws://localhost:{}", port);
    }
    Ok(())
}

pub async fn stop(engine: &Arc<SandboxEngine>, sandbox: &str) -> Result<()> {
    let record = resolve(engine, sandbox).await?;
    let was_stopped = record.status == SandboxStatus::Stopped;
    engine
        .stop(&record.id)
        .await
        .map_err(|e| anyhow!("[{}] {}", e.code(), e))?;
    if was_stopped {
        println!("Sandbox '{}' is already stopped", record.name);
    } else {
        println!("Stopped sandbox '{}'", record.name);
    }
    Ok(())
}

pub async fn remove(engine: &Arc<SandboxEngine>, sandbox: &str, force: bool) -> Result<()> {
    // With --force an unknown reference is not an error
    let record = match resolve(engine, sandbox).await {
        Ok(record) => Some(record),
        Err(_) if force => None,
        Err(e) => return Err(e),
    };

    let id = record
        .as_ref()
        .map(|r| r.id.clone())
        .unwrap_or_else(|| sandbox.to_string());
    engine
        .remove(&id, force)
        .await
        .map_err(|e| anyhow!("[{}] {}", e.code(), e))?;

    match record {
        Some(record) => println!("Removed sandbox '{}'", record.name),
        None => println!("Sandbox '{}' already absent", sandbox),
    }
    Ok(())
}

pub async fn cleanup(engine: &Arc<SandboxEngine>, all: bool, force: bool) -> Result<()> {
    let selector = if all {
        CleanupSelector::All
    } else {
        CleanupSelector::Default
    };
    let report = engine.cleanup(selector, force).await;
    println!(
        "Cleanup: {} removed, {} failed, {} preserved",
        report.removed, report.failed, report.skipped
    );
    Ok(())
}

pub async fn logs(engine: &Arc<SandboxEngine>, sandbox: &str, follow: bool, tail: u64) -> Result<()> {
    use tokio::io::AsyncBufReadExt;

    let record = resolve(engine, sandbox).await?;
    let stream = engine
        .logs(&record.id, follow, Some(tail))
        .await
        .map_err(|e| anyhow!("[{}] {}", e.code(), e))?;

    let cancel = interrupt_token();
    let reader = tokio::io::BufReader::new(stream.stream);
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => println!("{}", line),
                None => break,
            },
        }
    }
    Ok(())
}

async fn resolve(engine: &Arc<SandboxEngine>, name_or_id: &str) -> Result<SandboxRecord> {
    engine
        .resolve(name_or_id)
        .await
        .map_err(|_| anyhow!("Sandbox '{}' not found", name_or_id))
}

fn print_record(record: &SandboxRecord) {
    println!("Sandbox '{}' ({})", record.name, record.id);
    println!("  status:    {}", record.status);
    println!("  template:  {}", record.template);
    println!("  created:   {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ref git) = record.git {
        println!("  git:       {} @ {}", git.url, git.branch);
    }
    if let Some(port) = record.mcp.port {
        println!("  mcp:       ws://localhost:{}", port);
    }
    println!(
        "  resources: {}M memory, {}m CPU, {}s timeout",
        record.resources.memory_bytes >> 20,
        record.resources.cpu_millicores,
        record.resources.timeout_seconds,
    );
    if let Some(ref cid) = record.container_id {
        println!("  container: {}", &cid[..cid.len().min(12)]);
    }
}
