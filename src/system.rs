//! Host CPU and memory utilisation for heartbeats.
//!
//! Read from `/proc` on Linux. Anywhere the files are missing or unreadable
//! the figures are reported as zero, which the collector treats as unknown.

use std::fs;

/// CPU utilisation is a delta between two `/proc/stat` samples, so the
/// sampler keeps the previous reading.
#[derive(Debug, Default)]
pub struct CpuSampler {
    last: Option<CpuTimes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle:  u64,
    pub total: u64,
}

impl CpuSampler {
    pub fn new() -> Self {
        let mut sampler = Self::default();
        sampler.last = read_cpu_times();
        sampler
    }

    /// Percentage of CPU time spent non-idle since the previous call.
    pub fn sample(&mut self) -> f32 {
        let current = match read_cpu_times() {
            Some(c) => c,
            None => return 0.0,
        };
        let pct = match self.last {
            Some(prev) => busy_percent(prev, current),
            None => 0.0,
        };
        self.last = Some(current);
        pct
    }
}

fn read_cpu_times() -> Option<CpuTimes> {
    fs::read_to_string("/proc/stat").ok().and_then(|s| parse_cpu_times(&s))
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes { idle, total: fields.iter().sum() })
}

pub fn busy_percent(prev: CpuTimes, current: CpuTimes) -> f32 {
    let total = current.total.saturating_sub(prev.total);
    if total == 0 {
        return 0.0;
    }
    let idle = current.idle.saturating_sub(prev.idle).min(total);
    ((total - idle) as f64 / total as f64 * 100.0) as f32
}

/// Percentage of physical memory in use.
pub fn memory_percent() -> f32 {
    fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| parse_memory_percent(&s))
        .unwrap_or(0.0)
}

pub fn parse_memory_percent(meminfo: &str) -> Option<f32> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some((used as f64 / total as f64 * 100.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aggregate_cpu_line() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        let t = parse_cpu_times(stat).unwrap();
        assert_eq!(t, CpuTimes { idle: 850, total: 1000 });
    }

    #[test]
    fn busy_percent_uses_deltas() {
        let a = CpuTimes { idle: 800, total: 1000 };
        let b = CpuTimes { idle: 875, total: 1100 };
        assert_eq!(busy_percent(a, b), 25.0);
        assert_eq!(busy_percent(b, b), 0.0);
    }

    #[test]
    fn parses_meminfo() {
        let info = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        assert_eq!(parse_memory_percent(info), Some(75.0));
        assert_eq!(parse_memory_percent("MemTotal: 10 kB\n"), None);
    }
}
