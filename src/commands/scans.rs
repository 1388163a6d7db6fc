use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use super::{internal_error, Command, CommandError, Response};
use crate::daemon::Daemon;
use crate::models::{Credential, ScanOptions, ScanStatus, Target, TargetOptions, VtSelection};
use crate::registry::CreateOutcome;
use crate::xml::{simple_response, Element};

/// `<start_scan>`: create or resume a scan and launch its worker.
pub struct StartScan;

#[async_trait]
impl Command for StartScan {
    fn name(&self) -> &'static str {
        "start_scan"
    }

    fn description(&self) -> &'static str {
        "Start a new scan."
    }

    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("target", "Target host to scan (legacy form)."),
            ("ports", "Ports list to scan (legacy form)."),
            ("scan_id", "Optional UUID value to use as scan ID."),
            (
                "parallel",
                "Optional number of parallel targets; accepted and ignored.",
            ),
        ]
    }

    fn elements(&self) -> &'static [(&'static str, &'static str)] {
        &[
            (
                "targets",
                "Structured target list: hosts, ports, credentials, exclusions.",
            ),
            ("scanner_params", "Scanner-specific parameters for the scan."),
            (
                "vt_selection",
                "Vulnerability tests to run; must be non-empty when present.",
            ),
        ]
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        request: &Element,
    ) -> Result<Response, CommandError> {
        let target_attr = request.get_attr("target");
        let ports_attr = request.get_attr("ports");

        // Legacy attribute form wins when both attributes are set; otherwise
        // a structured <targets><target> element is required.
        let target = match (target_attr, ports_attr) {
            (Some(hosts), Some(ports)) => {
                warn!("legacy start_scan target/ports attributes in use; prefer <targets>");
                Target {
                    hosts: hosts.to_string(),
                    ports: ports.to_string(),
                    ..Default::default()
                }
            }
            _ => {
                let element = request
                    .find("targets/target")
                    .ok_or_else(|| CommandError::new("start_scan", "No targets or ports"))?;
                parse_target_element(element)
            }
        };

        let scan_id = request.get_attr("scan_id");
        if let Some(id) = scan_id {
            if !id.is_empty() && Uuid::parse_str(id).is_err() {
                return Err(CommandError::new("start_scan", "Invalid scan_id UUID"));
            }
        }

        if request.get_attr("parallel").is_some() {
            warn!("parallel attribute of start_scan is ignored, parallel scans are unsupported");
        }

        let scanner_params = request
            .find("scanner_params")
            .ok_or_else(|| CommandError::new("start_scan", "No scanner_params element"))?;
        let options = parse_scanner_params(scanner_params);

        let vt_selection = match request.find("vt_selection") {
            Some(element) => Some(parse_vt_selection(element)?),
            None => None,
        };

        let dry_run = options
            .get("dry_run")
            .and_then(|v| v.parse::<i64>().ok())
            .map(|v| v != 0)
            .unwrap_or(false);

        let outcome = daemon.create_scan(
            scan_id,
            target.clone(),
            if dry_run { None } else { Some(options) },
            vt_selection,
        );

        match outcome {
            CreateOutcome::Resumed(id) => {
                // The resume has been applied in the registry; the caller
                // continues polling rather than getting a fresh worker here.
                let id_el = Element::with_text("id", id);
                Ok(Response::from_element(simple_response(
                    "start_scan",
                    100,
                    "Continue",
                    vec![id_el],
                )))
            }
            CreateOutcome::Created(id) => {
                daemon.start_worker(&id, target, dry_run);
                let id_el = Element::with_text("id", id);
                Ok(Response::from_element(simple_response(
                    "start_scan",
                    200,
                    "OK",
                    vec![id_el],
                )))
            }
        }
    }
}

/// `<stop_scan>`: flip the scan to stopped and answer only once the worker
/// has exited.
pub struct StopScan;

#[async_trait]
impl Command for StopScan {
    fn name(&self) -> &'static str {
        "stop_scan"
    }

    fn description(&self) -> &'static str {
        "Stop a currently running scan."
    }

    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[("scan_id", "ID of scan to stop.")]
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        request: &Element,
    ) -> Result<Response, CommandError> {
        let scan_id = match request.get_attr("scan_id") {
            Some(id) if !id.is_empty() => id,
            _ => return Err(CommandError::new("stop_scan", "No scan_id attribute")),
        };

        if !daemon.registry().id_exists(scan_id) {
            return Err(CommandError::with_status(
                "stop_scan",
                404,
                format!("Failed to find scan '{scan_id}'"),
            ));
        }

        // Only a running scan can be stopped; a finished scan stays
        // finished and a scan that never started has no worker to stop.
        let status = daemon
            .registry()
            .status(scan_id)
            .map_err(|e| internal_error("stop_scan", e))?;
        if status != ScanStatus::Running {
            return Err(CommandError::new(
                "stop_scan",
                format!("Scan '{scan_id}' is not running"),
            ));
        }

        daemon
            .stop_scan(scan_id)
            .await
            .map_err(|e| internal_error("stop_scan", e))?;

        Ok(Response::from_element(simple_response(
            "stop_scan",
            200,
            "OK",
            vec![],
        )))
    }
}

/// `<delete_scan>`: drop a scan that is not running.
pub struct DeleteScan;

#[async_trait]
impl Command for DeleteScan {
    fn name(&self) -> &'static str {
        "delete_scan"
    }

    fn description(&self) -> &'static str {
        "Delete a finished scan."
    }

    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[("scan_id", "ID of scan to delete.")]
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        request: &Element,
    ) -> Result<Response, CommandError> {
        let Some(scan_id) = request.get_attr("scan_id") else {
            return Ok(Response::from_element(simple_response(
                "delete_scan",
                404,
                "No scan_id attribute",
                vec![],
            )));
        };

        if !daemon.registry().id_exists(scan_id) {
            return Ok(Response::from_element(simple_response(
                "delete_scan",
                404,
                &format!("Failed to find scan '{scan_id}'"),
                vec![],
            )));
        }

        daemon.check_scan_process(scan_id);

        let deleted = daemon
            .registry()
            .delete(scan_id)
            .map_err(|e| internal_error("delete_scan", e))?;

        if deleted {
            Ok(Response::from_element(simple_response(
                "delete_scan",
                200,
                "OK",
                vec![],
            )))
        } else {
            Err(CommandError::new("delete_scan", "Scan in progress"))
        }
    }
}

/// `<get_scans>`: report one scan or all scans, optionally draining buffered
/// results.
pub struct GetScans;

#[async_trait]
impl Command for GetScans {
    fn name(&self) -> &'static str {
        "get_scans"
    }

    fn description(&self) -> &'static str {
        "List the scans in buffer."
    }

    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("scan_id", "ID of a specific scan to get."),
            ("details", "Whether to return the full scan report."),
            ("pop_results", "Whether to remove the fetched results."),
            ("max_results", "Maximum number of results to fetch."),
        ]
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        request: &Element,
    ) -> Result<Response, CommandError> {
        let scan_id = request.get_attr("scan_id");
        let details = request.get_attr("details") != Some("0");

        // Result draining only makes sense when details are requested.
        let mut pop_results = false;
        let mut max_results = None;
        if details {
            pop_results = request.get_attr("pop_results") == Some("1");
            if let Some(raw) = request.get_attr("max_results") {
                let parsed = raw.parse::<usize>().map_err(|_| {
                    CommandError::new("get_scans", "max_results must be an integer")
                })?;
                max_results = Some(parsed);
            }
        }

        let mut reports = Vec::new();
        match scan_id {
            Some(id) if daemon.registry().id_exists(id) => {
                daemon.check_scan_process(id);
                let scan = daemon
                    .get_scan_xml(id, details, pop_results, max_results)
                    .map_err(|e| internal_error("get_scans", e))?;
                reports.push(scan);
            }
            Some(id) => {
                return Ok(Response::from_element(simple_response(
                    "get_scans",
                    404,
                    &format!("Failed to find scan '{id}'"),
                    vec![],
                )));
            }
            None => {
                for id in daemon.registry().ids() {
                    daemon.check_scan_process(&id);
                    let scan = daemon
                        .get_scan_xml(&id, details, pop_results, max_results)
                        .map_err(|e| internal_error("get_scans", e))?;
                    reports.push(scan);
                }
            }
        }

        Ok(Response::from_element(simple_response(
            "get_scans",
            200,
            "OK",
            reports,
        )))
    }
}

fn child_text(element: &Element, name: &str) -> String {
    element
        .find(name)
        .map(|c| c.text.trim().to_string())
        .unwrap_or_default()
}

fn flag(text: &str) -> Option<bool> {
    match text {
        "" => None,
        "1" => Some(true),
        _ => Some(false),
    }
}

/// Turn a `<target>` element into the structured target record.
fn parse_target_element(element: &Element) -> Target {
    let mut options = TargetOptions::default();
    let mut known = vec![
        "hosts",
        "ports",
        "exclude_hosts",
        "finished_hosts",
        "credentials",
    ];

    let alive_test = child_text(element, "alive_test");
    if !alive_test.is_empty() {
        options.alive_test = Some(alive_test);
    }
    options.reverse_lookup_only = flag(&child_text(element, "reverse_lookup_only"));
    options.reverse_lookup_unify = flag(&child_text(element, "reverse_lookup_unify"));
    known.extend(["alive_test", "reverse_lookup_only", "reverse_lookup_unify"]);

    // Any other child travels along as an opaque per-target option.
    for child in &element.children {
        if !known.contains(&child.name.as_str()) {
            options
                .extra
                .insert(child.name.clone(), child.text.trim().to_string());
        }
    }

    Target {
        hosts: child_text(element, "hosts"),
        ports: child_text(element, "ports"),
        exclude_hosts: child_text(element, "exclude_hosts"),
        finished_hosts: child_text(element, "finished_hosts"),
        credentials: parse_credentials(element.find("credentials")),
        options,
    }
}

fn parse_credentials(element: Option<&Element>) -> BTreeMap<String, Credential> {
    let mut out = BTreeMap::new();
    let Some(element) = element else {
        return out;
    };

    for cred in element.children.iter().filter(|c| c.name == "credential") {
        let service = cred.get_attr("service").unwrap_or_default().to_string();
        let mut credential = Credential {
            credential_type: cred.get_attr("type").unwrap_or_default().to_string(),
            port: cred.get_attr("port").unwrap_or_default().to_string(),
            username: child_text(cred, "username"),
            password: child_text(cred, "password"),
            extra: BTreeMap::new(),
        };
        for child in &cred.children {
            if child.name != "username" && child.name != "password" {
                credential
                    .extra
                    .insert(child.name.clone(), child.text.trim().to_string());
            }
        }
        out.insert(service, credential);
    }

    out
}

/// Scanner params arrive as one flat element per parameter.
fn parse_scanner_params(element: &Element) -> ScanOptions {
    let mut options = ScanOptions::default();
    for child in &element.children {
        options
            .extra
            .insert(child.name.clone(), child.text.trim().to_string());
    }
    options
}

/// `<vt_selection>` with `<vt_single id>` (plus `<vt_value id>` parameter
/// overrides) and `<vt_group filter>` children. Present-but-empty is a
/// rejected request.
fn parse_vt_selection(element: &Element) -> Result<VtSelection, CommandError> {
    if element.children.is_empty() {
        return Err(CommandError::new("start_scan", "VTs list is empty"));
    }

    let mut selection = VtSelection::default();
    for child in &element.children {
        match child.name.as_str() {
            "vt_single" => {
                let id = child
                    .get_attr("id")
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        CommandError::new("start_scan", "vt_single without an id attribute")
                    })?;
                let mut params = BTreeMap::new();
                for value in child.children.iter().filter(|c| c.name == "vt_value") {
                    if let Some(param_id) = value.get_attr("id") {
                        params.insert(param_id.to_string(), value.text.trim().to_string());
                    }
                }
                selection.singles.insert(id.to_string(), params);
            }
            "vt_group" => {
                let filter = child
                    .get_attr("filter")
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| {
                        CommandError::new("start_scan", "vt_group without a filter attribute")
                    })?;
                selection.group_filters.push(filter.to_string());
            }
            other => {
                return Err(CommandError::new(
                    "start_scan",
                    format!("Invalid element '{other}' in vt_selection"),
                ));
            }
        }
    }

    Ok(selection)
}
