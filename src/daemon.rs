use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commands::{CommandRegistry, Response};
use crate::engine::{ScanContext, ScanEngine};
use crate::models::{ResultType, ScanOptions, ScanResult, ScanStatus, Target, VtSelection};
use crate::registry::{CreateOutcome, RegistryError, ScanRegistry};
use crate::supervisor::WorkerSupervisor;
use crate::target::target_str_to_list;
use crate::vts::VtCollection;
use crate::xml::{self, simple_response, Element};

/// Identity strings reported by `get_version` and `get_scanner_details`.
#[derive(Debug, Clone)]
pub struct DaemonInfo {
    pub protocol_version: String,
    pub daemon_name: String,
    pub daemon_version: String,
    pub scanner_name: String,
    pub scanner_version: String,
    pub scanner_description: String,
}

impl Default for DaemonInfo {
    fn default() -> Self {
        DaemonInfo {
            protocol_version: "1.2".to_string(),
            daemon_name: "scannerd".to_string(),
            daemon_version: env!("CARGO_PKG_VERSION").to_string(),
            scanner_name: "tcp-connect".to_string(),
            scanner_version: env!("CARGO_PKG_VERSION").to_string(),
            scanner_description: "Asynchronous TCP connect scanner with banner grabbing"
                .to_string(),
        }
    }
}

/// One scanner parameter the daemon declares to clients.
#[derive(Debug, Clone)]
pub struct ScannerParamDef {
    pub id: &'static str,
    pub name: &'static str,
    pub param_type: &'static str,
    pub default: &'static str,
    pub description: &'static str,
}

fn default_scanner_params() -> Vec<ScannerParamDef> {
    vec![
        ScannerParamDef {
            id: "dry_run",
            name: "Dry run",
            param_type: "boolean",
            default: "0",
            description: "Mark all hosts finished without probing anything.",
        },
        ScannerParamDef {
            id: "connect_timeout_ms",
            name: "Connect timeout (ms)",
            param_type: "integer",
            default: "400",
            description: "Socket connect timeout per probe.",
        },
        ScannerParamDef {
            id: "concurrency",
            name: "Concurrency",
            param_type: "integer",
            default: "1000",
            description: "Maximum concurrent connect attempts per host.",
        },
    ]
}

/// The daemon control plane: owns the scan registry, the worker supervisor,
/// the VT catalogue and the command catalogue, and routes inbound request
/// documents to handlers.
pub struct Daemon {
    registry: Arc<ScanRegistry>,
    supervisor: WorkerSupervisor,
    engine: Arc<dyn ScanEngine>,
    vts: Arc<VtCollection>,
    commands: CommandRegistry,
    info: DaemonInfo,
    scanner_params: Vec<ScannerParamDef>,
}

impl Daemon {
    pub fn new(engine: Arc<dyn ScanEngine>, vts: VtCollection, info: DaemonInfo) -> Result<Self> {
        Ok(Daemon {
            registry: Arc::new(ScanRegistry::new()),
            supervisor: WorkerSupervisor::new(),
            engine,
            vts: Arc::new(vts),
            commands: CommandRegistry::with_builtin_commands()?,
            info,
            scanner_params: default_scanner_params(),
        })
    }

    pub fn registry(&self) -> &ScanRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    pub fn vts(&self) -> &VtCollection {
        &self.vts
    }

    pub fn vts_arc(&self) -> Arc<VtCollection> {
        self.vts.clone()
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn info(&self) -> &DaemonInfo {
        &self.info
    }

    pub fn scanner_params(&self) -> &[ScannerParamDef] {
        &self.scanner_params
    }

    /// Dispatch one raw request document: parse, look the handler up by the
    /// root tag, run it. Every failure mode comes back as a response
    /// document.
    pub async fn handle_request(&self, raw: &str) -> Response {
        let request = match xml::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "discarding unparseable request");
                return Response::from_element(simple_response(
                    "osp",
                    400,
                    &format!("Invalid request: {e}"),
                    vec![],
                ));
            }
        };

        let Some(command) = self.commands.get(&request.name) else {
            warn!(tag = %request.name, "unknown command tag");
            return Response::from_element(simple_response(
                &request.name,
                400,
                "Bogus command name",
                vec![],
            ));
        };

        match command.handle(self, &request).await {
            Ok(response) => response,
            Err(e) => {
                info!(command = %e.command, status = e.status, message = %e.message, "rejected request");
                Response::Buffer(e.to_response())
            }
        }
    }

    /// Create or resume a scan in the registry.
    pub fn create_scan(
        &self,
        scan_id: Option<&str>,
        target: Target,
        options: Option<ScanOptions>,
        vts: Option<VtSelection>,
    ) -> CreateOutcome {
        self.registry.create(scan_id, target, options, vts)
    }

    /// Spawn the worker for a created scan and track its handle. The worker
    /// owns status transitions from `Running` onwards; all scan data flows
    /// through the shared registry.
    pub fn start_worker(&self, scan_id: &str, target: Target, dry_run: bool) {
        let cancel = CancellationToken::new();
        let ctx = ScanContext {
            scan_id: scan_id.to_string(),
            target,
            registry: self.registry.clone(),
            cancel: cancel.clone(),
        };
        let engine = self.engine.clone();
        let registry = self.registry.clone();
        let id = scan_id.to_string();

        let join = tokio::spawn(async move {
            if let Err(e) = registry.set_status(&id, ScanStatus::Running) {
                error!(scan_id = %id, error = %e, "worker could not mark scan running");
                return;
            }

            let outcome = if dry_run {
                dry_run_scan(ctx).await
            } else {
                engine.run(ctx).await
            };

            finish_worker(&registry, &id, outcome);
        });

        self.supervisor.register(scan_id, cancel, join);
    }

    /// Flip the scan to `Stopped`, signal the worker, and block until the
    /// worker handle has been joined. "Stopped" is only reported once the
    /// worker is confirmed gone.
    pub async fn stop_scan(&self, scan_id: &str) -> Result<(), RegistryError> {
        self.registry.set_status(scan_id, ScanStatus::Stopped)?;
        self.supervisor.cancel(scan_id);
        self.supervisor.join(scan_id).await;
        info!(scan_id, "scan stopped, worker joined");
        Ok(())
    }

    /// Reconcile worker liveness for a scan before reading its state: a
    /// worker that died without reporting completion must not leave the scan
    /// stuck in `Running`.
    pub fn check_scan_process(&self, scan_id: &str) {
        if self.supervisor.is_finished(scan_id) != Some(true) {
            return;
        }

        if let Ok(ScanStatus::Running) = self.registry.status(scan_id) {
            let finished = self.registry.progress(scan_id).map(|p| p == 100).unwrap_or(false);
            if finished {
                let _ = self.registry.set_status(scan_id, ScanStatus::Finished);
            } else {
                warn!(scan_id, "worker exited mid-scan, marking scan stopped");
                let _ = self.registry.set_status(scan_id, ScanStatus::Stopped);
            }
        }
        self.supervisor.forget(scan_id);
    }

    /// Build the `<scan>` report element for one scan. With `details`,
    /// buffered results are included and optionally drained.
    pub fn get_scan_xml(
        &self,
        scan_id: &str,
        details: bool,
        pop_results: bool,
        max_results: Option<usize>,
    ) -> Result<Element, RegistryError> {
        let status = self.registry.status(scan_id)?;
        let mut scan = Element::new("scan")
            .attr("id", scan_id)
            .attr("target", self.registry.host_list(scan_id)?)
            .attr("progress", self.registry.progress(scan_id)?.to_string())
            .attr("status", status.as_str())
            .attr("start_time", self.registry.start_time(scan_id)?.to_string())
            .attr("end_time", self.registry.end_time(scan_id)?.to_string());

        if details {
            let drained = self
                .registry
                .drain_results(scan_id, pop_results, max_results)?;
            let mut results = Element::new("results");
            for result in drained {
                let el = Element::with_text("result", result.value.clone())
                    .attr("name", result.name.clone())
                    .attr("type", result.result_type.as_str())
                    .attr("severity", result.severity.clone())
                    .attr("host", result.host.clone())
                    .attr("hostname", result.hostname.clone())
                    .attr("test_id", result.test_id.clone())
                    .attr("port", result.port.clone())
                    .attr("qod", result.qod.clone());
                results.children.push(el);
            }
            scan.children.push(results);
        }

        Ok(scan)
    }

    /// Plain-text command reference for `help`.
    pub fn help_text(&self) -> String {
        let mut out = String::new();
        for command in self.commands.iter() {
            let _ = writeln!(out, "\t{:<24} {}", command.name(), command.description());
            if !command.attributes().is_empty() {
                let _ = writeln!(out, "\t Attributes:");
                for (name, desc) in command.attributes() {
                    let _ = writeln!(out, "\t  {name:<22} {desc}");
                }
            }
            if !command.elements().is_empty() {
                let _ = writeln!(out, "\t Elements:");
                for (name, desc) in command.elements() {
                    let _ = writeln!(out, "\t  {name:<22} {desc}");
                }
            }
        }
        out
    }
}

/// Record the worker's end state once its run future resolves.
fn finish_worker(registry: &ScanRegistry, scan_id: &str, outcome: Result<()>) {
    match outcome {
        Ok(()) => {
            let complete = registry.progress(scan_id).map(|p| p == 100).unwrap_or(false);
            if complete && matches!(registry.status(scan_id), Ok(ScanStatus::Running)) {
                let _ = registry.set_status(scan_id, ScanStatus::Finished);
                info!(scan_id, "scan finished");
            }
        }
        Err(e) => {
            error!(scan_id, error = %e, "scan worker failed");
            let _ = registry.add_result(
                scan_id,
                ScanResult {
                    result_type: ResultType::Error,
                    name: "scan-failure".to_string(),
                    value: e.to_string(),
                    host: String::new(),
                    hostname: String::new(),
                    port: String::new(),
                    test_id: String::new(),
                    severity: String::new(),
                    qod: String::new(),
                },
            );
            if matches!(registry.status(scan_id), Ok(ScanStatus::Running)) {
                let _ = registry.set_status(scan_id, ScanStatus::Stopped);
            }
        }
    }
}

/// Dry-run worker: marks every target host finished without probing.
async fn dry_run_scan(ctx: ScanContext) -> Result<()> {
    let scan_id = ctx.scan_id.as_str();
    let hosts = target_str_to_list(&ctx.target.hosts);
    let total = hosts.len().max(1);

    for (idx, host) in hosts.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        ctx.registry.add_result(
            scan_id,
            ScanResult {
                result_type: ResultType::Log,
                name: "host-status".to_string(),
                value: "alive (dry run)".to_string(),
                host: host.clone(),
                hostname: String::new(),
                port: String::new(),
                test_id: String::new(),
                severity: String::new(),
                qod: String::new(),
            },
        )?;
        ctx.registry.set_host_progress(scan_id, host, 100)?;
        ctx.registry.mark_host_finished(scan_id, host)?;
        ctx.registry
            .set_progress(scan_id, (((idx + 1) * 100) / total) as i32)?;
    }

    ctx.registry.set_progress(scan_id, 100)?;
    Ok(())
}
