//! Process and system health snapshots
//!
//! Point-in-time reads, recomputed on every call and never cached.
//! Figures come from procfs on Linux; other platforms get zeroed
//! memory/cpu fields so the endpoints stay functional.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::time::Instant;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Record the process start time. Call once, early in main; uptime is
/// measured from the first call.
pub fn record_process_start() {
    Lazy::force(&PROCESS_START);
}

/// Memory usage breakdown in megabytes.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub rss_mb: u64,
    pub peak_rss_mb: u64,
    pub virtual_mb: u64,
    pub data_mb: u64,
}

/// Cumulative CPU time in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CpuUsage {
    pub user_ms: u64,
    pub system_ms: u64,
}

/// Point-in-time process health snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHealth {
    pub uptime_secs: u64,
    pub memory: MemoryUsage,
    pub cpu: CpuUsage,
    pub pid: u32,
    pub platform: &'static str,
    pub runtime_version: String,
}

impl ProcessHealth {
    pub fn snapshot() -> Self {
        Self {
            uptime_secs: PROCESS_START.elapsed().as_secs(),
            memory: read_memory_usage(),
            cpu: read_cpu_usage(),
            pid: std::process::id(),
            platform: std::env::consts::OS,
            runtime_version: format!(
                "rust-{}",
                option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")
            ),
        }
    }
}

/// Host-level figures for the detailed health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub hostname: String,
    pub platform: &'static str,
    pub arch: &'static str,
    pub cpus: usize,
    pub total_memory_mb: u64,
    pub free_memory_mb: u64,
    pub load_average: [f64; 3],
    pub os_uptime_secs: u64,
}

impl SystemInfo {
    pub fn snapshot() -> Self {
        let (total_memory_mb, free_memory_mb) = read_system_memory();
        Self {
            hostname: read_hostname(),
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            total_memory_mb,
            free_memory_mb,
            load_average: read_load_average(),
            os_uptime_secs: read_os_uptime(),
        }
    }
}

#[cfg(target_os = "linux")]
fn read_memory_usage() -> MemoryUsage {
    std::fs::read_to_string("/proc/self/status")
        .map(|status| parse_memory_status(&status))
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn read_memory_usage() -> MemoryUsage {
    MemoryUsage::default()
}

/// Parse `VmRSS`/`VmHWM`/`VmSize`/`VmData` lines (values in kB).
fn parse_memory_status(status: &str) -> MemoryUsage {
    let mut usage = MemoryUsage::default();
    for line in status.lines() {
        let Some((field, rest)) = line.split_once(':') else {
            continue;
        };
        let kb = rest
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse::<u64>()
            .unwrap_or(0);
        match field {
            "VmRSS" => usage.rss_mb = kb / 1024,
            "VmHWM" => usage.peak_rss_mb = kb / 1024,
            "VmSize" => usage.virtual_mb = kb / 1024,
            "VmData" => usage.data_mb = kb / 1024,
            _ => {}
        }
    }
    usage
}

#[cfg(target_os = "linux")]
fn read_cpu_usage() -> CpuUsage {
    let Ok(stat) = std::fs::read_to_string("/proc/self/stat") else {
        return CpuUsage::default();
    };
    let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    let ticks_per_sec = if ticks_per_sec > 0 {
        ticks_per_sec as u64
    } else {
        100
    };
    parse_cpu_stat(&stat, ticks_per_sec)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_usage() -> CpuUsage {
    CpuUsage::default()
}

/// Fields 14 and 15 after the parenthesized command name are utime and
/// stime in clock ticks.
fn parse_cpu_stat(stat: &str, ticks_per_sec: u64) -> CpuUsage {
    let Some(close_paren) = stat.rfind(')') else {
        return CpuUsage::default();
    };
    let fields: Vec<&str> = stat[close_paren + 1..].split_whitespace().collect();
    // After the command name, utime is field index 11 and stime 12
    // (state is index 0).
    let utime = fields.get(11).and_then(|f| f.parse::<u64>().ok()).unwrap_or(0);
    let stime = fields.get(12).and_then(|f| f.parse::<u64>().ok()).unwrap_or(0);
    CpuUsage {
        user_ms: utime * 1000 / ticks_per_sec,
        system_ms: stime * 1000 / ticks_per_sec,
    }
}

fn read_hostname() -> String {
    if let Ok(hostname) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        return hostname.trim().to_string();
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(target_os = "linux")]
fn read_system_memory() -> (u64, u64) {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return (0, 0);
    };
    parse_meminfo(&meminfo)
}

#[cfg(not(target_os = "linux"))]
fn read_system_memory() -> (u64, u64) {
    (0, 0)
}

fn parse_meminfo(meminfo: &str) -> (u64, u64) {
    let mut total = 0;
    let mut available = 0;
    for line in meminfo.lines() {
        let Some((field, rest)) = line.split_once(':') else {
            continue;
        };
        let kb = rest
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse::<u64>()
            .unwrap_or(0);
        match field {
            "MemTotal" => total = kb / 1024,
            "MemAvailable" => available = kb / 1024,
            _ => {}
        }
    }
    (total, available)
}

fn read_load_average() -> [f64; 3] {
    let Ok(loadavg) = std::fs::read_to_string("/proc/loadavg") else {
        return [0.0; 3];
    };
    let mut values = loadavg.split_whitespace();
    let mut load = [0.0; 3];
    for slot in load.iter_mut() {
        *slot = values
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
    }
    load
}

fn read_os_uptime() -> u64 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|uptime| {
            uptime
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
        })
        .map(|secs| secs as u64)
        .unwrap_or(0)
}
