use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::{
    Credential, ScanOptions, ScanRecord, ScanResult, ScanStatus, Target, TargetOptions,
    VtSelection,
};
use crate::target::target_str_to_list;

/// Failures of registry operations.
///
/// `UnknownScan` signals a caller-contract violation: command handlers are
/// responsible for existence checks before invoking mutators, so a lookup
/// miss is logged with context and treated as fatal to the operation, never
/// surfaced as ordinary user input error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown scan '{0}'")]
    UnknownScan(String),
    #[error("scan '{0}' has no effective hosts to compute target progress over")]
    ZeroEffectiveHosts(String),
    #[error("a result requires a non-empty name or value")]
    EmptyResult,
}

/// Whether `create` made a fresh record or reinterpreted the call as a
/// resume of a stopped scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(String),
    Resumed(String),
}

impl CreateOutcome {
    pub fn scan_id(&self) -> &str {
        match self {
            CreateOutcome::Created(id) | CreateOutcome::Resumed(id) => id,
        }
    }
}

/// Concurrency-safe table of scan jobs.
///
/// The registry exclusively owns all scan records. Workers share it via
/// `Arc` and mutate scan state only through these methods; every mutator
/// performs one atomic read-modify-write of the fields it touches under the
/// table lock, so an update made by a worker is immediately visible to the
/// supervising side. The lock is never held across an await point.
///
/// The inner table is created lazily by the first `create` and released
/// again when the last scan is deleted, so a long-lived daemon does not pin
/// shared state for scans that are gone.
pub struct ScanRegistry {
    table: RwLock<Option<HashMap<String, ScanRecord>>>,
}

impl Default for ScanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanRegistry {
    pub fn new() -> Self {
        ScanRegistry {
            table: RwLock::new(None),
        }
    }

    /// Create a new scan, or resume `scan_id` when it already exists with
    /// status `Stopped`.
    ///
    /// A resume resets status to `Init` and `end_time` to 0, replaces the
    /// options wholesale when non-empty ones are supplied, and purges every
    /// buffered result belonging to a host the worker has not finished: a
    /// rerun must start clean for those hosts. A fresh record gets a
    /// generated UUID when `scan_id` is absent or empty.
    pub fn create(
        &self,
        scan_id: Option<&str>,
        target: Target,
        options: Option<ScanOptions>,
        vts: Option<VtSelection>,
    ) -> CreateOutcome {
        let mut guard = self.table.write();
        let table = guard.get_or_insert_with(HashMap::new);

        if let Some(id) = scan_id.filter(|s| !s.is_empty()) {
            if let Some(record) = table.get_mut(id) {
                if record.status == ScanStatus::Stopped {
                    record.end_time = 0;
                    Self::resume_record(record, options);
                    debug!(scan_id = id, "resuming stopped scan");
                    return CreateOutcome::Resumed(id.to_string());
                }
            }
        }

        let id = match scan_id {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        let record = ScanRecord {
            scan_id: id.clone(),
            status: ScanStatus::Init,
            target,
            options: options.unwrap_or_default(),
            vts,
            results: Vec::new(),
            progress: 0,
            target_progress: BTreeMap::new(),
            finished_hosts: Vec::new(),
            start_time: now(),
            end_time: 0,
        };
        table.insert(id.clone(), record);
        debug!(scan_id = %id, "created scan");
        CreateOutcome::Created(id)
    }

    fn resume_record(record: &mut ScanRecord, options: Option<ScanOptions>) {
        record.status = ScanStatus::Init;
        if let Some(options) = options.filter(|o| !o.is_empty()) {
            record.options = options;
        }
        // Purge results for hosts that will be rescanned; keep only those
        // belonging to hosts the worker already finished.
        let mut unfinished = target_str_to_list(&record.target.hosts);
        unfinished.retain(|h| !record.finished_hosts.contains(h));
        let results = mem::take(&mut record.results);
        record.results = results
            .into_iter()
            .filter(|r| !unfinished.contains(&r.host))
            .collect();
    }

    fn with_record<T>(
        &self,
        scan_id: &str,
        f: impl FnOnce(&ScanRecord) -> T,
    ) -> Result<T, RegistryError> {
        let guard = self.table.read();
        match guard.as_ref().and_then(|t| t.get(scan_id)) {
            Some(record) => Ok(f(record)),
            None => {
                error!(scan_id, "registry read for unknown scan");
                Err(RegistryError::UnknownScan(scan_id.to_string()))
            }
        }
    }

    fn with_record_mut<T>(
        &self,
        scan_id: &str,
        f: impl FnOnce(&mut ScanRecord) -> T,
    ) -> Result<T, RegistryError> {
        let mut guard = self.table.write();
        match guard.as_mut().and_then(|t| t.get_mut(scan_id)) {
            Some(record) => Ok(f(record)),
            None => {
                error!(scan_id, "registry mutation for unknown scan");
                Err(RegistryError::UnknownScan(scan_id.to_string()))
            }
        }
    }

    /// Set the lifecycle status. A transition to `Stopped` stamps the end
    /// time; completion stamping happens in `set_progress` instead.
    /// `Finished` is terminal: a status change for a finished scan is
    /// ignored.
    pub fn set_status(&self, scan_id: &str, status: ScanStatus) -> Result<(), RegistryError> {
        self.with_record_mut(scan_id, |record| {
            if record.status == ScanStatus::Finished && status != ScanStatus::Finished {
                warn!(scan_id, "ignoring status change for a finished scan");
                return;
            }
            record.status = status;
            if status == ScanStatus::Stopped {
                record.end_time = now();
            }
        })
    }

    pub fn status(&self, scan_id: &str) -> Result<ScanStatus, RegistryError> {
        self.with_record(scan_id, |r| r.status)
    }

    /// Set the overall progress percentage. Applied only for
    /// `0 < percent <= 100`; anything else is silently ignored. Reaching 100
    /// stamps the end time.
    pub fn set_progress(&self, scan_id: &str, percent: i32) -> Result<(), RegistryError> {
        self.with_record_mut(scan_id, |record| {
            if percent > 0 && percent <= 100 {
                record.progress = percent as u8;
                if percent == 100 {
                    record.end_time = now();
                }
            }
        })
    }

    pub fn progress(&self, scan_id: &str) -> Result<u8, RegistryError> {
        self.with_record(scan_id, |r| r.progress)
    }

    /// Set one host's progress percentage, same range rule as `set_progress`.
    pub fn set_host_progress(
        &self,
        scan_id: &str,
        host: &str,
        percent: i32,
    ) -> Result<(), RegistryError> {
        self.with_record_mut(scan_id, |record| {
            if percent > 0 && percent <= 100 {
                record.target_progress.insert(host.to_string(), percent as u8);
            }
        })
    }

    /// Drop hosts from the per-host progress map so they no longer weigh on
    /// the target progress average (dead or unreachable hosts).
    pub fn remove_host_progress(
        &self,
        scan_id: &str,
        hosts: &[String],
    ) -> Result<(), RegistryError> {
        if hosts.is_empty() {
            return Ok(());
        }
        self.with_record_mut(scan_id, |record| {
            for host in hosts {
                record.target_progress.remove(host);
            }
        })
    }

    /// Record that the worker completed a host. Idempotent.
    pub fn mark_host_finished(&self, scan_id: &str, host: &str) -> Result<(), RegistryError> {
        self.with_record_mut(scan_id, |record| {
            if !record.finished_hosts.iter().any(|h| h == host) {
                record.finished_hosts.push(host.to_string());
            }
        })
    }

    pub fn finished_hosts(&self, scan_id: &str) -> Result<Vec<String>, RegistryError> {
        self.with_record(scan_id, |r| r.finished_hosts.clone())
    }

    /// Hosts of the target the worker has not finished yet.
    pub fn unfinished_hosts(&self, scan_id: &str) -> Result<Vec<String>, RegistryError> {
        self.with_record(scan_id, |record| {
            let mut hosts = target_str_to_list(&record.target.hosts);
            hosts.retain(|h| !record.finished_hosts.contains(h));
            hosts
        })
    }

    /// Exclude-host list with client-declared finished hosts removed. The
    /// client sends finished hosts also as excluded for backward
    /// compatibility; counting them twice would skew the progress
    /// denominator.
    pub fn simplify_exclude_hosts(&self, scan_id: &str) -> Result<Vec<String>, RegistryError> {
        self.with_record(scan_id, |record| {
            let mut excluded = target_str_to_list(&record.target.exclude_hosts);
            let finished = target_str_to_list(&record.target.finished_hosts);
            excluded.retain(|h| !finished.contains(h));
            excluded
        })
    }

    /// Overall fractional progress over the whole target: the sum of
    /// per-host percentages divided by `(total hosts - excluded hosts after
    /// simplification)`. A zero denominator is a caller-contract violation
    /// and fails loudly rather than being papered over.
    pub fn target_progress(&self, scan_id: &str) -> Result<f64, RegistryError> {
        let excluded = self.simplify_exclude_hosts(scan_id)?.len();
        self.with_record(scan_id, |record| {
            let total = target_str_to_list(&record.target.hosts).len();
            if total == excluded {
                error!(scan_id, total, excluded, "zero effective hosts in target progress");
                return Err(RegistryError::ZeroEffectiveHosts(scan_id.to_string()));
            }
            let sum: u64 = record.target_progress.values().map(|&p| p as u64).sum();
            Ok(sum as f64 / (total as f64 - excluded as f64))
        })?
    }

    /// Buffer one finding. A result must carry a name or a value.
    pub fn add_result(&self, scan_id: &str, result: ScanResult) -> Result<(), RegistryError> {
        if result.name.is_empty() && result.value.is_empty() {
            error!(scan_id, "discarding result with neither name nor value");
            return Err(RegistryError::EmptyResult);
        }
        self.with_record_mut(scan_id, |record| {
            record.results.push(result);
        })
    }

    /// Read buffered results in append order.
    ///
    /// With `pop` false this is a pure snapshot. With `pop` true and no
    /// `max`, all results are returned and the buffer is cleared; with a
    /// `max`, the first `max` results are drained FIFO and the rest stay put.
    pub fn drain_results(
        &self,
        scan_id: &str,
        pop: bool,
        max: Option<usize>,
    ) -> Result<Vec<ScanResult>, RegistryError> {
        self.with_record_mut(scan_id, |record| {
            if !pop {
                return record.results.clone();
            }
            match max {
                Some(max) if max > 0 => {
                    let split = max.min(record.results.len());
                    let rest = record.results.split_off(split);
                    mem::replace(&mut record.results, rest)
                }
                _ => mem::take(&mut record.results),
            }
        })
    }

    /// Remove the first buffered result equal to `result`, if any.
    pub fn remove_result(&self, scan_id: &str, result: &ScanResult) -> Result<(), RegistryError> {
        self.with_record_mut(scan_id, |record| {
            if let Some(pos) = record.results.iter().position(|r| r == result) {
                record.results.remove(pos);
            }
        })
    }

    /// Delete a scan. Returns `Ok(false)` without mutation while the scan is
    /// `Running`. Deleting the last scan releases the inner table so the
    /// next `create` starts from fresh shared state.
    pub fn delete(&self, scan_id: &str) -> Result<bool, RegistryError> {
        let mut guard = self.table.write();
        let table = guard
            .as_mut()
            .ok_or_else(|| RegistryError::UnknownScan(scan_id.to_string()))?;
        let record = table
            .get(scan_id)
            .ok_or_else(|| RegistryError::UnknownScan(scan_id.to_string()))?;

        if record.status == ScanStatus::Running {
            return Ok(false);
        }

        table.remove(scan_id);
        if table.is_empty() {
            debug!("scan table empty, releasing shared state");
            *guard = None;
        }
        Ok(true)
    }

    pub fn id_exists(&self, scan_id: &str) -> bool {
        self.table
            .read()
            .as_ref()
            .is_some_and(|t| t.contains_key(scan_id))
    }

    /// Scan ids currently present, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.table
            .read()
            .as_ref()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn target(&self, scan_id: &str) -> Result<Target, RegistryError> {
        self.with_record(scan_id, |r| r.target.clone())
    }

    pub fn host_list(&self, scan_id: &str) -> Result<String, RegistryError> {
        self.with_record(scan_id, |r| r.target.hosts.clone())
    }

    pub fn ports(&self, scan_id: &str) -> Result<String, RegistryError> {
        self.with_record(scan_id, |r| r.target.ports.clone())
    }

    pub fn exclude_hosts(&self, scan_id: &str) -> Result<String, RegistryError> {
        self.with_record(scan_id, |r| r.target.exclude_hosts.clone())
    }

    /// The finished-host list declared by the client, not the worker's.
    pub fn declared_finished_hosts(&self, scan_id: &str) -> Result<String, RegistryError> {
        self.with_record(scan_id, |r| r.target.finished_hosts.clone())
    }

    pub fn credentials(
        &self,
        scan_id: &str,
    ) -> Result<BTreeMap<String, Credential>, RegistryError> {
        self.with_record(scan_id, |r| r.target.credentials.clone())
    }

    pub fn target_options(&self, scan_id: &str) -> Result<TargetOptions, RegistryError> {
        self.with_record(scan_id, |r| r.target.options.clone())
    }

    pub fn options(&self, scan_id: &str) -> Result<ScanOptions, RegistryError> {
        self.with_record(scan_id, |r| r.options.clone())
    }

    pub fn set_option(&self, scan_id: &str, name: &str, value: &str) -> Result<(), RegistryError> {
        self.with_record_mut(scan_id, |record| {
            record
                .options
                .extra
                .insert(name.to_string(), value.to_string());
        })
    }

    pub fn vts(&self, scan_id: &str) -> Result<Option<VtSelection>, RegistryError> {
        self.with_record(scan_id, |r| r.vts.clone())
    }

    /// Drop the VT selection once the worker has consumed it, releasing the
    /// memory it holds.
    pub fn release_vts(&self, scan_id: &str) -> Result<(), RegistryError> {
        self.with_record_mut(scan_id, |record| {
            record.vts = None;
        })
    }

    pub fn start_time(&self, scan_id: &str) -> Result<u64, RegistryError> {
        self.with_record(scan_id, |r| r.start_time)
    }

    pub fn end_time(&self, scan_id: &str) -> Result<u64, RegistryError> {
        self.with_record(scan_id, |r| r.end_time)
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResultType;

    fn target(hosts: &str) -> Target {
        Target {
            hosts: hosts.to_string(),
            ports: "22,80".to_string(),
            ..Default::default()
        }
    }

    fn result_for(host: &str, name: &str) -> ScanResult {
        ScanResult {
            result_type: ResultType::Log,
            name: name.to_string(),
            value: "v".to_string(),
            host: host.to_string(),
            hostname: String::new(),
            port: "22".to_string(),
            test_id: String::new(),
            severity: String::new(),
            qod: String::new(),
        }
    }

    fn create(reg: &ScanRegistry, id: &str, hosts: &str) {
        reg.create(Some(id), target(hosts), None, None);
    }

    #[test]
    fn create_generates_uuid_when_id_absent() {
        let reg = ScanRegistry::new();
        let outcome = reg.create(None, target("10.0.0.1"), None, None);
        let id = outcome.scan_id();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        assert_eq!(reg.status(id).unwrap(), ScanStatus::Init);
        assert_eq!(reg.progress(id).unwrap(), 0);
        assert_eq!(reg.end_time(id).unwrap(), 0);
    }

    #[test]
    fn progress_applies_only_in_range() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");

        reg.set_progress("s1", 40).unwrap();
        assert_eq!(reg.progress("s1").unwrap(), 40);

        reg.set_progress("s1", 0).unwrap();
        reg.set_progress("s1", -5).unwrap();
        reg.set_progress("s1", 101).unwrap();
        assert_eq!(reg.progress("s1").unwrap(), 40);
    }

    #[test]
    fn only_full_progress_stamps_end_time() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");

        reg.set_progress("s1", 99).unwrap();
        assert_eq!(reg.end_time("s1").unwrap(), 0);

        reg.set_progress("s1", 100).unwrap();
        assert!(reg.end_time("s1").unwrap() > 0);
    }

    #[test]
    fn finished_scans_keep_their_status() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        reg.set_status("s1", ScanStatus::Running).unwrap();
        reg.set_progress("s1", 100).unwrap();
        reg.set_status("s1", ScanStatus::Finished).unwrap();
        let end = reg.end_time("s1").unwrap();

        reg.set_status("s1", ScanStatus::Stopped).unwrap();
        assert_eq!(reg.status("s1").unwrap(), ScanStatus::Finished);
        assert_eq!(reg.end_time("s1").unwrap(), end);
    }

    #[test]
    fn stop_stamps_end_time() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        reg.set_status("s1", ScanStatus::Running).unwrap();
        assert_eq!(reg.end_time("s1").unwrap(), 0);
        reg.set_status("s1", ScanStatus::Stopped).unwrap();
        assert!(reg.end_time("s1").unwrap() > 0);
    }

    #[test]
    fn host_progress_respects_range() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1,10.0.0.2");
        reg.set_host_progress("s1", "10.0.0.1", 50).unwrap();
        reg.set_host_progress("s1", "10.0.0.2", 0).unwrap();
        reg.set_host_progress("s1", "10.0.0.2", 120).unwrap();
        let p = reg.target_progress("s1").unwrap();
        assert!((p - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mark_host_finished_is_idempotent() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        reg.mark_host_finished("s1", "10.0.0.1").unwrap();
        reg.mark_host_finished("s1", "10.0.0.1").unwrap();
        assert_eq!(reg.finished_hosts("s1").unwrap(), vec!["10.0.0.1"]);
    }

    #[test]
    fn target_progress_formula() {
        // 4 hosts, 1 excluded, progress {h2: 50, h3: 100} -> 150 / 3 = 50.
        let reg = ScanRegistry::new();
        let t = Target {
            hosts: "10.0.0.1,10.0.0.2,10.0.0.3,10.0.0.4".to_string(),
            exclude_hosts: "10.0.0.1".to_string(),
            ..Default::default()
        };
        reg.create(Some("s1"), t, None, None);
        reg.set_host_progress("s1", "10.0.0.2", 50).unwrap();
        reg.set_host_progress("s1", "10.0.0.3", 100).unwrap();
        assert!((reg.target_progress("s1").unwrap() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn client_finished_hosts_simplify_the_exclude_list() {
        let reg = ScanRegistry::new();
        let t = Target {
            hosts: "10.0.0.1,10.0.0.2".to_string(),
            exclude_hosts: "10.0.0.1,10.0.0.2".to_string(),
            finished_hosts: "10.0.0.2".to_string(),
            ..Default::default()
        };
        reg.create(Some("s1"), t, None, None);
        assert_eq!(reg.simplify_exclude_hosts("s1").unwrap(), vec!["10.0.0.1"]);
    }

    #[test]
    fn zero_effective_hosts_is_an_error() {
        let reg = ScanRegistry::new();
        let t = Target {
            hosts: "10.0.0.1".to_string(),
            exclude_hosts: "10.0.0.1".to_string(),
            ..Default::default()
        };
        reg.create(Some("s1"), t, None, None);
        assert!(matches!(
            reg.target_progress("s1"),
            Err(RegistryError::ZeroEffectiveHosts(_))
        ));
    }

    #[test]
    fn add_result_requires_name_or_value() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        let mut r = result_for("10.0.0.1", "");
        r.value = String::new();
        assert!(matches!(
            reg.add_result("s1", r),
            Err(RegistryError::EmptyResult)
        ));
    }

    #[test]
    fn drain_with_max_is_fifo() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        for i in 0..5 {
            reg.add_result("s1", result_for("10.0.0.1", &format!("r{i}")))
                .unwrap();
        }

        let first = reg.drain_results("s1", true, Some(2)).unwrap();
        assert_eq!(
            first.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["r0", "r1"]
        );

        let rest = reg.drain_results("s1", true, None).unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].name, "r2");
        assert!(reg.drain_results("s1", false, None).unwrap().is_empty());
    }

    #[test]
    fn snapshot_does_not_mutate() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        reg.add_result("s1", result_for("10.0.0.1", "r0")).unwrap();
        assert_eq!(reg.drain_results("s1", false, None).unwrap().len(), 1);
        assert_eq!(reg.drain_results("s1", false, None).unwrap().len(), 1);
    }

    #[test]
    fn resume_purges_unfinished_host_results() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1,10.0.0.2");
        reg.add_result("s1", result_for("10.0.0.1", "kept")).unwrap();
        reg.add_result("s1", result_for("10.0.0.2", "purged")).unwrap();
        reg.mark_host_finished("s1", "10.0.0.1").unwrap();
        reg.set_status("s1", ScanStatus::Stopped).unwrap();
        assert!(reg.end_time("s1").unwrap() > 0);

        let outcome = reg.create(Some("s1"), target("10.0.0.1,10.0.0.2"), None, None);
        assert_eq!(outcome, CreateOutcome::Resumed("s1".to_string()));
        assert_eq!(reg.status("s1").unwrap(), ScanStatus::Init);
        assert_eq!(reg.end_time("s1").unwrap(), 0);

        let results = reg.drain_results("s1", false, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].host, "10.0.0.1");
    }

    #[test]
    fn resume_replaces_options_wholesale_when_non_empty() {
        let reg = ScanRegistry::new();
        let mut opts = ScanOptions::default();
        opts.extra.insert("old".into(), "1".into());
        reg.create(Some("s1"), target("10.0.0.1"), Some(opts), None);
        reg.set_status("s1", ScanStatus::Stopped).unwrap();

        let mut new_opts = ScanOptions::default();
        new_opts.extra.insert("new".into(), "2".into());
        reg.create(Some("s1"), target("10.0.0.1"), Some(new_opts), None);

        let opts = reg.options("s1").unwrap();
        assert_eq!(opts.get("new"), Some("2"));
        assert_eq!(opts.get("old"), None);
    }

    #[test]
    fn delete_refuses_running_scans() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        reg.set_status("s1", ScanStatus::Running).unwrap();
        assert_eq!(reg.delete("s1").unwrap(), false);
        assert!(reg.id_exists("s1"));

        reg.set_status("s1", ScanStatus::Finished).unwrap();
        assert_eq!(reg.delete("s1").unwrap(), true);
        assert!(!reg.id_exists("s1"));
    }

    #[test]
    fn deleting_last_scan_releases_shared_state() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        assert!(reg.delete("s1").unwrap());
        assert!(reg.ids().is_empty());

        // A later create must succeed as if starting fresh.
        let outcome = reg.create(Some("s2"), target("10.0.0.9"), None, None);
        assert_eq!(outcome, CreateOutcome::Created("s2".to_string()));
        assert!(reg.id_exists("s2"));
    }

    #[test]
    fn unknown_scan_is_an_error() {
        let reg = ScanRegistry::new();
        assert!(matches!(
            reg.set_progress("nope", 10),
            Err(RegistryError::UnknownScan(_))
        ));
        assert!(matches!(
            reg.delete("nope"),
            Err(RegistryError::UnknownScan(_))
        ));
    }

    #[test]
    fn release_vts_frees_the_selection() {
        let reg = ScanRegistry::new();
        let mut sel = VtSelection::default();
        sel.singles.insert("1.2.3".into(), BTreeMap::new());
        reg.create(Some("s1"), target("10.0.0.1"), None, Some(sel));
        assert!(reg.vts("s1").unwrap().is_some());
        reg.release_vts("s1").unwrap();
        assert!(reg.vts("s1").unwrap().is_none());
    }

    #[test]
    fn unfinished_hosts_excludes_worker_finished() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1,10.0.0.2,10.0.0.3");
        reg.mark_host_finished("s1", "10.0.0.2").unwrap();
        assert_eq!(
            reg.unfinished_hosts("s1").unwrap(),
            vec!["10.0.0.1", "10.0.0.3"]
        );
    }

    #[test]
    fn removed_hosts_stop_weighing_on_target_progress() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1,10.0.0.2");
        reg.set_host_progress("s1", "10.0.0.1", 100).unwrap();
        reg.set_host_progress("s1", "10.0.0.2", 40).unwrap();
        reg.remove_host_progress("s1", &["10.0.0.2".to_string()])
            .unwrap();
        assert!((reg.target_progress("s1").unwrap() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn set_option_upserts_a_single_value() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        reg.set_option("s1", "profile", "fast").unwrap();
        reg.set_option("s1", "profile", "slow").unwrap();
        assert_eq!(reg.options("s1").unwrap().get("profile"), Some("slow"));
    }

    #[test]
    fn remove_result_deletes_exact_match_only() {
        let reg = ScanRegistry::new();
        create(&reg, "s1", "10.0.0.1");
        reg.add_result("s1", result_for("10.0.0.1", "a")).unwrap();
        reg.add_result("s1", result_for("10.0.0.1", "b")).unwrap();
        reg.remove_result("s1", &result_for("10.0.0.1", "a")).unwrap();
        let left = reg.drain_results("s1", false, None).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "b");
    }
}
