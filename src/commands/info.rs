use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command as ProcessCommand;

use super::{Command, CommandError, Response};
use crate::daemon::Daemon;
use crate::memstat;
use crate::xml::{simple_response, Element};

/// `<help>`: plain-text or structured catalogue documentation.
pub struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "Print the commands help."
    }

    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[("format", "Help format. Could be text or xml.")]
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        request: &Element,
    ) -> Result<Response, CommandError> {
        match request.get_attr("format") {
            None | Some("text") => {
                let mut response = simple_response("help", 200, "OK", vec![]);
                response.text = daemon.help_text();
                Ok(Response::from_element(response))
            }
            Some("xml") => {
                let content = daemon.commands().iter().map(|c| c.as_xml()).collect();
                Ok(Response::from_element(simple_response(
                    "help", 200, "OK", content,
                )))
            }
            Some(_) => Err(CommandError::new("help", "Bogus help format")),
        }
    }
}

/// `<get_version>`: protocol, daemon and scanner version triples, plus the
/// VT feed version when one is loaded.
pub struct GetVersion;

fn version_element(tag: &str, name: &str, version: &str) -> Element {
    Element::new(tag)
        .child(Element::with_text("name", name))
        .child(Element::with_text("version", version))
}

#[async_trait]
impl Command for GetVersion {
    fn name(&self) -> &'static str {
        "get_version"
    }

    fn description(&self) -> &'static str {
        "Return various version information."
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        _request: &Element,
    ) -> Result<Response, CommandError> {
        let info = daemon.info();
        let mut content = vec![
            version_element("protocol", "OSP", &info.protocol_version),
            version_element("daemon", &info.daemon_name, &info.daemon_version),
            version_element("scanner", &info.scanner_name, &info.scanner_version),
        ];

        if let Some(feed_version) = daemon.vts().feed_version() {
            content.push(Element::new("vts").child(Element::with_text("version", feed_version)));
        }

        Ok(Response::from_element(simple_response(
            "get_version",
            200,
            "OK",
            content,
        )))
    }
}

/// `<get_scanner_details>`: static description plus declared scanner
/// parameters.
pub struct GetScannerDetails;

#[async_trait]
impl Command for GetScannerDetails {
    fn name(&self) -> &'static str {
        "get_scanner_details"
    }

    fn description(&self) -> &'static str {
        "Return scanner description and parameters."
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        _request: &Element,
    ) -> Result<Response, CommandError> {
        let description =
            Element::with_text("description", &daemon.info().scanner_description);

        let mut params = Element::new("scanner_params");
        for def in daemon.scanner_params() {
            params.children.push(
                Element::new("scanner_param")
                    .attr("id", def.id)
                    .attr("type", def.param_type)
                    .child(Element::with_text("name", def.name))
                    .child(Element::with_text("description", def.description))
                    .child(Element::with_text("default", def.default)),
            );
        }

        Ok(Response::from_element(simple_response(
            "get_scanner_details",
            200,
            "OK",
            vec![description, params],
        )))
    }
}

/// Report titles `gvmcg` is allowed to be asked for.
const GVMCG_TITLES: &[&str] = &[
    "cpu-*",
    "proc",
    "mem",
    "swap",
    "load",
    "df-*",
    "disk-sd[a-z][0-9]-rw",
    "disk-sd[a-z][0-9]-load",
    "disk-sd[a-z][0-9]-io-load",
    "interface-eth*-traffic",
    "interface-eth*-err-rate",
    "interface-eth*-err",
    "sensors-*_temperature-*",
    "sensors-*_fanspeed-*",
    "sensors-*_voltage-*",
    "titles",
];

/// `<get_performance>`: shell out to the external `gvmcg` reporting tool
/// and return its output verbatim. Arguments are validated strictly before
/// anything reaches the command line.
pub struct GetPerformance;

/// Compiled once: the titles allow-list and the shell-metacharacter ban.
fn titles_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let combined = format!("^(({}))", GVMCG_TITLES.join(")|("));
        (
            Regex::new(&combined).expect("static titles pattern"),
            Regex::new("^[^|&;]+$").expect("static metacharacter pattern"),
        )
    })
}

#[async_trait]
impl Command for GetPerformance {
    fn name(&self) -> &'static str {
        "get_performance"
    }

    fn description(&self) -> &'static str {
        "Return system report."
    }

    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("start", "Time of first data point in report."),
            ("end", "Time of last data point in report."),
            ("titles", "Name of report."),
        ]
    }

    async fn handle(
        &self,
        _daemon: &Daemon,
        request: &Element,
    ) -> Result<Response, CommandError> {
        let mut args: Vec<String> = Vec::new();

        if let Some(start) = request.get_attr("start") {
            if start.parse::<i64>().is_err() {
                return Err(CommandError::new(
                    "get_performance",
                    "Start argument must be integer.",
                ));
            }
            args.push(start.to_string());
        }

        if let Some(end) = request.get_attr("end") {
            if end.parse::<i64>().is_err() {
                return Err(CommandError::new(
                    "get_performance",
                    "End argument must be integer.",
                ));
            }
            args.push(end.to_string());
        }

        if let Some(titles) = request.get_attr("titles") {
            let (allowed, forbidden) = titles_patterns();
            if !allowed.is_match(titles) || !forbidden.is_match(titles) {
                return Err(CommandError::new("get_performance", "Arguments not allowed"));
            }
            args.push(titles.to_string());
        }

        let output = ProcessCommand::new("gvmcg")
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                CommandError::new(
                    "get_performance",
                    format!("Bogus get_performance format. {e}"),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CommandError::new(
                "get_performance",
                format!("Bogus get_performance format. {}", stderr.trim()),
            ));
        }

        let mut response = simple_response("get_performance", 200, "OK", vec![]);
        response.text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(Response::from_element(response))
    }
}

/// `<get_memory_usage>`: memory consumption of the daemon process and every
/// active scan worker. Workers run inside the daemon process, so their
/// entries carry the daemon pid; pids that cannot be resolved are skipped.
pub struct GetMemoryUsage;

fn format_memory(value: u64, unit: Option<&str>) -> String {
    match unit.map(|u| u.to_ascii_lowercase()).as_deref() {
        Some("kb") => (value as f64 / 1024.0).to_string(),
        Some("mb") => (value as f64 / (1024.0 * 1024.0)).to_string(),
        _ => value.to_string(),
    }
}

fn process_element(name: &str, pid: u32, unit: Option<&str>) -> Element {
    let mut el = Element::new("process")
        .attr("name", name)
        .attr("pid", pid.to_string());

    if let Some(mem) = memstat::memory_info(pid) {
        el.children
            .push(Element::with_text("rss", format_memory(mem.rss, unit)));
        el.children
            .push(Element::with_text("vms", format_memory(mem.vms, unit)));
        el.children
            .push(Element::with_text("shared", format_memory(mem.shared, unit)));
    }

    el
}

#[async_trait]
impl Command for GetMemoryUsage {
    fn name(&self) -> &'static str {
        "get_memory_usage"
    }

    fn description(&self) -> &'static str {
        "Print the memory consumption of all processes."
    }

    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[(
            "unit",
            "Unit for displaying memory consumption (b = bytes, kb = kilobytes, \
             mb = megabytes). Defaults to b.",
        )]
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        request: &Element,
    ) -> Result<Response, CommandError> {
        let unit = request.get_attr("unit");
        let pid = std::process::id();

        let mut processes = Element::new("processes");
        processes
            .children
            .push(process_element(&daemon.info().daemon_name, pid, unit));

        for scan_id in daemon.supervisor().active_ids() {
            processes
                .children
                .push(process_element(&format!("scan-{scan_id}"), pid, unit));
        }

        Ok(Response::from_element(simple_response(
            "get_memory",
            200,
            "OK",
            vec![processes],
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_unit_conversion() {
        assert_eq!(format_memory(2048, None), "2048");
        assert_eq!(format_memory(2048, Some("kb")), "2");
        assert_eq!(format_memory(3 * 1024 * 1024, Some("MB")), "3");
        assert_eq!(format_memory(1536, Some("kb")), "1.5");
    }

    #[test]
    fn titles_allow_list() {
        let (allowed, forbidden) = titles_patterns();

        assert!(allowed.is_match("mem"));
        assert!(allowed.is_match("titles"));
        assert!(!allowed.is_match("rm -rf"));

        assert!(forbidden.is_match("mem"));
        assert!(!forbidden.is_match("mem;reboot"));
        assert!(!forbidden.is_match("mem|cat"));
    }
}
