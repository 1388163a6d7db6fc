use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::{ResultType, ScanResult, Target};
use crate::registry::ScanRegistry;
use crate::target::{parse_ports, target_str_to_list};

/// Everything a worker needs to perform one scan: the job identity, its
/// target, the shared registry it reports through, and the cooperative stop
/// signal.
pub struct ScanContext {
    pub scan_id: String,
    pub target: Target,
    pub registry: Arc<ScanRegistry>,
    pub cancel: CancellationToken,
}

/// The scan engine collaborator. Implementations are expected to call back
/// into the registry (`add_result`, `set_host_progress`,
/// `mark_host_finished`, `set_progress`) as they work and to return promptly
/// once the cancellation token fires.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn run(&self, ctx: ScanContext) -> Result<()>;
}

/// Default engine: asynchronous TCP connect probing with a concurrency limit
/// and a short passive banner grab per open port.
pub struct TcpConnectEngine {
    concurrency: usize,
    connect_timeout: Duration,
}

impl TcpConnectEngine {
    pub fn new(concurrency: usize, connect_timeout: Duration) -> Self {
        TcpConnectEngine {
            concurrency: concurrency.clamp(1, 5_000),
            connect_timeout,
        }
    }
}

impl Default for TcpConnectEngine {
    fn default() -> Self {
        TcpConnectEngine::new(1000, Duration::from_millis(400))
    }
}

#[async_trait]
impl ScanEngine for TcpConnectEngine {
    async fn run(&self, ctx: ScanContext) -> Result<()> {
        let scan_id = ctx.scan_id.as_str();
        let registry = &ctx.registry;

        if let Some(vts) = registry.vts(scan_id)? {
            debug!(
                scan_id,
                singles = vts.singles.len(),
                groups = vts.group_filters.len(),
                "VT selection noted; connect engine probes ports only"
            );
        }
        registry.release_vts(scan_id)?;

        let ports = parse_ports(&ctx.target.ports)
            .with_context(|| format!("unusable port list '{}'", ctx.target.ports))?;

        let mut hosts = target_str_to_list(&ctx.target.hosts);
        let excluded = registry.simplify_exclude_hosts(scan_id)?;
        let already_done = registry.finished_hosts(scan_id)?;
        hosts.retain(|h| !excluded.contains(h) && !already_done.contains(h));

        info!(
            scan_id,
            hosts = hosts.len(),
            ports = ports.len(),
            "starting connect scan"
        );

        for host in hosts {
            if ctx.cancel.is_cancelled() {
                info!(scan_id, "scan cancelled, worker exiting");
                return Ok(());
            }

            self.scan_host(&ctx, &host, &ports).await?;

            registry.set_host_progress(scan_id, &host, 100)?;
            registry.mark_host_finished(scan_id, &host)?;

            let overall = registry.target_progress(scan_id)?;
            registry.set_progress(scan_id, overall.round() as i32)?;
        }

        if !ctx.cancel.is_cancelled() {
            registry.set_progress(scan_id, 100)?;
        }
        Ok(())
    }
}

impl TcpConnectEngine {
    async fn scan_host(&self, ctx: &ScanContext, host: &str, ports: &[u16]) -> Result<()> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut set: JoinSet<Option<ScanResult>> = JoinSet::new();
        let total = ports.len().max(1);

        for &port in ports {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .context("semaphore closed")?;
            let host = host.to_string();
            let cancel = ctx.cancel.clone();
            let timeout = self.connect_timeout;

            set.spawn(async move {
                let _permit = permit; // keep permit until task completes
                if cancel.is_cancelled() {
                    return None;
                }
                probe(&host, port, timeout).await
            });
        }

        let mut done = 0usize;
        while let Some(joined) = set.join_next().await {
            done += 1;
            if let Ok(Some(result)) = joined {
                ctx.registry.add_result(&ctx.scan_id, result)?;
            }
            let percent = ((done * 100) / total) as i32;
            ctx.registry
                .set_host_progress(&ctx.scan_id, host, percent.min(99))?;
        }

        Ok(())
    }
}

async fn probe(host: &str, port: u16, timeout: Duration) -> Option<ScanResult> {
    let addr = format!("{host}:{port}");
    match time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(mut stream)) => {
            let banner = read_banner(&mut stream).await;
            let value = match &banner {
                Some(b) => format!("open, banner: {b}"),
                None => "open".to_string(),
            };
            Some(ScanResult {
                result_type: ResultType::Log,
                name: "tcp-connect".to_string(),
                value,
                host: host.to_string(),
                hostname: String::new(),
                port: format!("{port}/tcp"),
                test_id: String::new(),
                severity: String::new(),
                qod: "80".to_string(),
            })
        }
        // Closed, filtered, or timed out; no result recorded.
        _ => None,
    }
}

/// Try to read up to 256 bytes with a short timeout and convert to a lossy
/// UTF-8 string.
async fn read_banner(stream: &mut TcpStream) -> Option<String> {
    let mut buf = vec![0u8; 256];
    match time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            let s = String::from_utf8_lossy(&buf).to_string();
            Some(s.replace('\n', "\\n").replace('\r', "\\r"))
        }
        _ => None,
    }
}
