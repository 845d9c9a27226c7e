//! Compute device probing.
//!
//! Detects an NVIDIA GPU via nvidia-smi, Apple Silicon by target, and falls
//! back to the CPU with system RAM read through sysinfo.

use std::fmt;
#[cfg(feature = "gpu-monitor")]
use std::process::Command;

use serde::Serialize;
use sysinfo::System;
use tracing::debug;

const GIB: u64 = 1024 * 1024 * 1024;

/// Unified-memory budget assumed for Apple Silicon accelerators.
pub const APPLE_SHARED_BUDGET: u64 = 4 * GIB;

/// RAM assumed when the host cannot be probed.
pub const CPU_FALLBACK_MEMORY: u64 = 16 * GIB;

/// Accelerator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Cuda,
    AppleSilicon,
    Cpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cuda => write!(f, "cuda"),
            DeviceKind::AppleSilicon => write!(f, "apple_silicon"),
            DeviceKind::Cpu => write!(f, "cpu"),
        }
    }
}

/// The device tile parameters are tuned for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    pub name: Option<String>,
    /// Memory available to the accelerator, in bytes.
    pub memory_bytes: u64,
    pub cpu_count: usize,
}

impl DeviceProfile {
    pub fn cuda(memory_bytes: u64) -> Self {
        Self {
            kind: DeviceKind::Cuda,
            name: None,
            memory_bytes,
            cpu_count: cpu_count(),
        }
    }

    pub fn apple_silicon() -> Self {
        Self {
            kind: DeviceKind::AppleSilicon,
            name: Some("Apple Silicon".to_string()),
            memory_bytes: APPLE_SHARED_BUDGET,
            cpu_count: cpu_count(),
        }
    }

    pub fn cpu(memory_bytes: u64) -> Self {
        Self {
            kind: DeviceKind::Cpu,
            name: None,
            memory_bytes,
            cpu_count: cpu_count(),
        }
    }

    /// Probe the host.
    pub fn detect() -> Self {
        if let Some((name, memory_bytes)) = query_nvidia_smi() {
            debug!("Detected CUDA device {} with {} bytes", name, memory_bytes);
            return Self {
                name: Some(name),
                ..Self::cuda(memory_bytes)
            };
        }

        if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            debug!("Detected Apple Silicon");
            return Self::apple_silicon();
        }

        let mut system = System::new();
        system.refresh_memory();
        let total = system.total_memory();
        let memory_bytes = if total > 0 { total } else { CPU_FALLBACK_MEMORY };
        debug!("Using CPU with {} bytes of RAM", memory_bytes);
        Self::cpu(memory_bytes)
    }

    pub fn memory_gib(&self) -> f64 {
        self.memory_bytes as f64 / GIB as f64
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(feature = "gpu-monitor")]
fn query_nvidia_smi() -> Option<(String, u64)> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=memory.total,name", "--format=csv,noheader,nounits"])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            debug!(
                "nvidia-smi returned non-zero: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            None
        }
        Err(e) => {
            debug!("nvidia-smi not available: {}", e);
            None
        }
    }
}

/// Parse the first line of `memory.total,name` CSV output (MiB, no units).
#[cfg_attr(not(feature = "gpu-monitor"), allow(dead_code))]
fn parse_nvidia_smi(stdout: &str) -> Option<(String, u64)> {
    let line = stdout.lines().next()?;
    let mut parts = line.splitn(2, ',').map(str::trim);
    let memory_mb = parts.next()?.parse::<u64>().ok()?;
    let name = parts.next().unwrap_or("NVIDIA GPU").to_string();
    if memory_mb == 0 {
        return None;
    }
    Some((name, memory_mb * 1024 * 1024))
}

#[cfg(not(feature = "gpu-monitor"))]
fn query_nvidia_smi() -> Option<(String, u64)> {
    None
}
