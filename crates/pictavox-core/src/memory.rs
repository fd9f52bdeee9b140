//! Process memory introspection.

use serde::Serialize;
use std::sync::Mutex;
use sysinfo::{MemoryRefreshKind, Pid, RefreshKind, System};
use tracing::warn;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Snapshot of memory use, in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    /// Resident set size of this process.
    pub rss_mb: f64,
    /// Share of system memory in use, 0-100.
    pub system_percent: f64,
    /// Accelerator memory held by this process, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_mb: Option<f64>,
}

/// Source of memory figures; swapped for a fixed value in tests.
pub trait MemoryProbe: Send + Sync {
    fn usage(&self) -> MemoryUsage;
}

/// Reads the current process's memory through `sysinfo`.
pub struct SysinfoProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine current pid, memory ceiling disabled: {}", e);
                None
            }
        };
        let system = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            pid,
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn usage(&self) -> MemoryUsage {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();

        let rss_bytes = match self.pid {
            Some(pid) if system.refresh_process(pid) => {
                system.process(pid).map(|p| p.memory()).unwrap_or(0)
            }
            _ => 0,
        };

        let total = system.total_memory();
        let system_percent = if total > 0 {
            system.used_memory() as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        MemoryUsage {
            rss_mb: rss_bytes as f64 / BYTES_PER_MB,
            system_percent,
            accelerator_mb: None,
        }
    }
}

/// Always reports the same figures.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub MemoryUsage);

impl FixedProbe {
    pub fn rss_mb(rss_mb: f64) -> Self {
        Self(MemoryUsage {
            rss_mb,
            ..MemoryUsage::default()
        })
    }
}

impl MemoryProbe for FixedProbe {
    fn usage(&self) -> MemoryUsage {
        self.0
    }
}
