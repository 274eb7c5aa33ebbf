//! Local host probes
//!
//! Collectors behind the info endpoints. Probe failures ride inside the
//! payload (each payload carries an `error` field), never in the HTTP
//! status: the coordinator wants one envelope per node even when a probe
//! partially fails.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sysinfo::{CpuExt, DiskExt, PidExt, ProcessExt, System, SystemExt};

use crate::object::DiskHandle;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerProperties {
    pub endpoint: String,
    pub uptime_secs: u64,
    pub version: String,
    pub region: String,
    pub state: String,
    pub num_cpu: usize,
    pub total_mem: u64,
}

pub fn server_properties(endpoint: &str, region: &str, started: Instant) -> ServerProperties {
    let mut sys = System::new();
    sys.refresh_cpu();
    sys.refresh_memory();
    ServerProperties {
        endpoint: endpoint.to_string(),
        uptime_secs: started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        region: region.to_string(),
        state: "online".to_string(),
        num_cpu: sys.cpus().len(),
        total_mem: sys.total_memory(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuStat {
    pub name: String,
    pub brand: String,
    pub frequency_mhz: u64,
    pub usage_percent: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuInfoPayload {
    pub addr: String,
    pub cpus: Vec<CpuStat>,
    pub load_one: f64,
    pub load_five: f64,
    pub load_fifteen: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

pub fn cpu_info(addr: &str) -> CpuInfoPayload {
    let mut sys = System::new();
    sys.refresh_cpu();
    let load = sys.load_average();
    CpuInfoPayload {
        addr: addr.to_string(),
        cpus: sys
            .cpus()
            .iter()
            .map(|cpu| CpuStat {
                name: cpu.name().to_string(),
                brand: cpu.brand().to_string(),
                frequency_mhz: cpu.frequency(),
                usage_percent: cpu.cpu_usage(),
            })
            .collect(),
        load_one: load.one,
        load_five: load.five,
        load_fifteen: load.fifteen,
        error: String::new(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemInfoPayload {
    pub addr: String,
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

pub fn mem_info(addr: &str) -> MemInfoPayload {
    let mut sys = System::new();
    sys.refresh_memory();
    MemInfoPayload {
        addr: addr.to_string(),
        total: sys.total_memory(),
        available: sys.available_memory(),
        used: sys.used_memory(),
        swap_total: sys.total_swap(),
        swap_used: sys.used_swap(),
        error: String::new(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsInfoPayload {
    pub addr: String,
    pub name: String,
    pub kernel_version: String,
    pub os_version: String,
    pub host_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

pub fn os_info(addr: &str) -> OsInfoPayload {
    let sys = System::new();
    OsInfoPayload {
        addr: addr.to_string(),
        name: sys.name().unwrap_or_default(),
        kernel_version: sys.kernel_version().unwrap_or_default(),
        os_version: sys.os_version().unwrap_or_default(),
        host_name: sys.host_name().unwrap_or_default(),
        error: String::new(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcInfoPayload {
    pub addr: String,
    pub pid: u32,
    pub name: String,
    pub cmd: Vec<String>,
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub cpu_percent: f32,
    pub start_time_secs: u64,
    pub run_time_secs: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

pub fn proc_info(addr: &str) -> ProcInfoPayload {
    let pid = sysinfo::Pid::from_u32(std::process::id());
    let mut sys = System::new();
    sys.refresh_process(pid);
    match sys.process(pid) {
        Some(process) => ProcInfoPayload {
            addr: addr.to_string(),
            pid: pid.as_u32(),
            name: process.name().to_string(),
            cmd: process.cmd().to_vec(),
            memory_bytes: process.memory(),
            virtual_memory_bytes: process.virtual_memory(),
            cpu_percent: process.cpu_usage(),
            start_time_secs: process.start_time(),
            run_time_secs: process.run_time(),
            error: String::new(),
        },
        None => ProcInfoPayload {
            addr: addr.to_string(),
            pid: pid.as_u32(),
            error: "process not visible to prober".to_string(),
            ..Default::default()
        },
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskStat {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total_space: u64,
    pub available_space: u64,
    pub removable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskHwInfoPayload {
    pub addr: String,
    pub disks: Vec<DiskStat>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

pub fn disk_hw_info(addr: &str) -> DiskHwInfoPayload {
    let mut sys = System::new();
    sys.refresh_disks_list();
    DiskHwInfoPayload {
        addr: addr.to_string(),
        disks: sys
            .disks()
            .iter()
            .map(|disk| DiskStat {
                name: disk.name().to_string_lossy().into_owned(),
                mount_point: disk.mount_point().to_string_lossy().into_owned(),
                file_system: String::from_utf8_lossy(disk.file_system()).into_owned(),
                total_space: disk.total_space(),
                available_space: disk.available_space(),
                removable: disk.is_removable(),
            })
            .collect(),
        error: String::new(),
    }
}

/// One measured drive access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrivePerf {
    pub path: String,
    pub latency_micros: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Reply of the drive probe: one serial and one parallel pass over the
/// node's local disks, with pass-level errors concatenated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrivesInfoPayload {
    pub addr: String,
    pub serial: Vec<DrivePerf>,
    pub parallel: Vec<DrivePerf>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub probed_at: Option<DateTime<Utc>>,
}

fn probe_one(path: String) -> DrivePerf {
    let start = Instant::now();
    match std::fs::metadata(&path) {
        Ok(_) => DrivePerf {
            path,
            latency_micros: start.elapsed().as_micros() as u64,
            ok: true,
            error: String::new(),
        },
        Err(e) => DrivePerf {
            path,
            latency_micros: start.elapsed().as_micros() as u64,
            ok: false,
            error: e.to_string(),
        },
    }
}

fn pass_error(results: &[DrivePerf]) -> String {
    results
        .iter()
        .filter(|r| !r.ok)
        .map(|r| format!("{}: {}", r.path, r.error))
        .collect::<Vec<_>>()
        .join("; ")
}

pub async fn drives_info(addr: &str, disks: &[DiskHandle]) -> DrivesInfoPayload {
    let local: Vec<&DiskHandle> = disks.iter().filter(|d| d.local).collect();

    let serial: Vec<DrivePerf> = local.iter().map(|d| probe_one(d.path.clone())).collect();

    let parallel_tasks = local
        .iter()
        .map(|d| {
            let path = d.path.clone();
            tokio::task::spawn_blocking(move || probe_one(path))
        })
        .collect::<Vec<_>>();
    let parallel: Vec<DrivePerf> = join_all(parallel_tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap_or_else(|e| DrivePerf {
            error: e.to_string(),
            ..Default::default()
        }))
        .collect();

    let mut error = String::new();
    let serial_err = pass_error(&serial);
    if !serial_err.is_empty() {
        error.push_str("serial: ");
        error.push_str(&serial_err);
    }
    let parallel_err = pass_error(&parallel);
    if !parallel_err.is_empty() {
        if !error.is_empty() {
            error.push(' ');
        }
        error.push_str("parallel: ");
        error.push_str(&parallel_err);
    }

    DrivesInfoPayload {
        addr: addr.to_string(),
        serial,
        parallel,
        error,
        probed_at: Some(Utc::now()),
    }
}

/// Throughput measured by the net probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetPerfPayload {
    pub addr: String,
    pub bytes_per_sec: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Sink-throughput measurement standing in for the cross-peer probe on a
/// single node.
pub async fn net_perf(addr: &str) -> NetPerfPayload {
    let addr = addr.to_string();
    let result = tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let payload = vec![0u8; 1 << 20];
        let mut sink = std::io::sink();
        let start = Instant::now();
        for _ in 0..8 {
            if let Err(e) = sink.write_all(&payload) {
                return NetPerfPayload {
                    addr,
                    bytes_per_sec: 0.0,
                    error: e.to_string(),
                };
            }
        }
        let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
        NetPerfPayload {
            addr,
            bytes_per_sec: (8 << 20) as f64 / elapsed,
            error: String::new(),
        }
    })
    .await;
    result.unwrap_or_else(|e| NetPerfPayload {
        error: e.to_string(),
        ..Default::default()
    })
}
