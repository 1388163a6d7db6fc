use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a scan job.
///
/// Transitions: `Init -> Running` when the worker starts, `Running -> Stopped`
/// on an explicit stop, `Running -> Finished` when the worker reports 100%
/// progress, and `Stopped -> Init` on resume. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Init,
    Running,
    Stopped,
    Finished,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Init => "init",
            ScanStatus::Running => "running",
            ScanStatus::Stopped => "stopped",
            ScanStatus::Finished => "finished",
        }
    }
}

/// Kind of finding a worker reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultType {
    Alarm,
    Log,
    Error,
    HostDetail,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Alarm => "alarm",
            ResultType::Log => "log",
            ResultType::Error => "error",
            ResultType::HostDetail => "host-detail",
        }
    }
}

/// One finding produced by a scan worker. Immutable once buffered, except for
/// removal by exact match when a resume purges unfinished hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub result_type: ResultType,
    pub name: String,
    pub value: String,
    pub host: String,
    pub hostname: String,
    pub port: String,
    pub test_id: String,
    pub severity: String,
    pub qod: String,
}

/// Authentication material for one service on the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_type: String,
    pub port: String,
    pub username: String,
    pub password: String,
    /// Scanner-specific credential keys that have no named field.
    pub extra: BTreeMap<String, String>,
}

/// Named per-target options, with an escape hatch for scanner-specific names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOptions {
    pub alive_test: Option<String>,
    pub reverse_lookup_only: Option<bool>,
    pub reverse_lookup_unify: Option<bool>,
    pub extra: BTreeMap<String, String>,
}

/// The host/port/credential/exclusion specification a scan runs against.
///
/// `finished_hosts` here is the list the *client* declared as already scanned
/// (kept for backward-compatible progress accounting); the set of hosts the
/// worker itself completed lives on the scan record instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub hosts: String,
    pub ports: String,
    pub exclude_hosts: String,
    pub finished_hosts: String,
    pub credentials: BTreeMap<String, Credential>,
    pub options: TargetOptions,
}

/// Scan-level options, fully replaceable on resume. Scanner params arrive as
/// free-form name/value pairs, so a single explicit map carries them all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub extra: BTreeMap<String, String>,
}

impl ScanOptions {
    pub fn is_empty(&self) -> bool {
        self.extra.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.extra.get(name).map(String::as_str)
    }
}

/// Selected vulnerability tests for one scan: single VTs with parameter
/// overrides plus group filter expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VtSelection {
    pub singles: BTreeMap<String, BTreeMap<String, String>>,
    pub group_filters: Vec<String>,
}

impl VtSelection {
    pub fn is_empty(&self) -> bool {
        self.singles.is_empty() && self.group_filters.is_empty()
    }
}

/// Full state of one scan job, owned exclusively by the scan registry.
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub scan_id: String,
    pub status: ScanStatus,
    pub target: Target,
    pub options: ScanOptions,
    pub vts: Option<VtSelection>,
    pub results: Vec<ScanResult>,
    pub progress: u8,
    pub target_progress: BTreeMap<String, u8>,
    pub finished_hosts: Vec<String>,
    pub start_time: u64,
    pub end_time: u64,
}
