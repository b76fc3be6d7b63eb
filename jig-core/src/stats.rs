use serde::{Deserialize, Serialize};

const MIB: f64 = 1_048_576.0;

/// Point-in-time counters reported by the runtime for one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCounters {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: u64,
    pub precpu_system: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    /// Reclaimable page cache, excluded from used memory.
    pub memory_cache: u64,
    pub memory_limit: u64,
}

/// Normalized resource usage of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub name: String,
    pub cpu_percentage: f64,
    pub memory_percentage: f64,
    /// Used memory in MiB; the key name predates the unit change.
    pub memory_bytes: f64,
}

/// Round to two decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 { numerator / denominator } else { 0.0 }
}

/// Reduce raw counters to percentages.
///
/// The system delta is taken against the previous *container* CPU total,
/// not the previous system total; displayed values of existing deployments
/// depend on it. A zero denominator yields 0.
pub fn aggregate(name: &str, raw: &RawCounters) -> Stats {
    let used = raw.memory_usage.saturating_sub(raw.memory_cache) as f64;

    let cpu_delta = raw.cpu_total as f64 - raw.precpu_total as f64;
    let sys_delta = raw.system_cpu as f64 - raw.precpu_total as f64;

    Stats {
        name: name.to_string(),
        cpu_percentage: round2(100.0 * ratio(cpu_delta, sys_delta) * raw.online_cpus as f64),
        memory_percentage: round2(100.0 * ratio(used, raw.memory_limit as f64)),
        memory_bytes: round2(used / MIB),
    }
}
