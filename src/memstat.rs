use sysinfo::{Pid, System};

/// Memory footprint of one OS process, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    pub rss: u64,
    pub vms: u64,
    pub shared: u64,
}

/// Resident/virtual/shared byte counts for a pid, or `None` when the process
/// cannot be found.
pub fn memory_info(pid: u32) -> Option<MemoryInfo> {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    if !sys.refresh_process(pid) {
        return None;
    }
    let process = sys.process(pid)?;
    Some(MemoryInfo {
        rss: process.memory(),
        vms: process.virtual_memory(),
        shared: shared_memory(pid.as_u32()).unwrap_or(0),
    })
}

// statm reports page counts; 4 KiB pages assumed.
#[cfg(target_os = "linux")]
fn shared_memory(pid: u32) -> Option<u64> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let shared_pages: u64 = statm.split_whitespace().nth(2)?.parse().ok()?;
    Some(shared_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn shared_memory(_pid: u32) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_found() {
        let info = memory_info(std::process::id()).expect("own pid must resolve");
        assert!(info.rss > 0);
        assert!(info.vms >= info.rss);
    }

    #[test]
    fn bogus_pid_is_not_found() {
        // Pid values this large do not exist on any supported platform.
        assert!(memory_info(u32::MAX - 1).is_none());
    }
}
