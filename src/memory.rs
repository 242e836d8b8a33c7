//! Resident-memory ceiling checks.
//!
//! The driver calls [`MemoryGovernor::check`] every K units. Above the ceiling it forces a
//! reclamation pass (flush every buffer and release spare capacity). Sampling failures are
//! logged and ignored.

use sysinfo::{Pid, System};

const MB: u64 = 1024 * 1024;

/// Source of the current process resident set size.
pub trait MemoryProbe: Send {
    /// Resident memory in bytes, or `None` if it cannot be sampled.
    fn resident_bytes(&mut self) -> Option<u64>;
}

/// [`MemoryProbe`] backed by `sysinfo`.
pub struct SysinfoProbe {
    system: System,
    pid: Pid,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from(std::process::id() as usize),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn resident_bytes(&mut self) -> Option<u64> {
        if !self.system.refresh_process(self.pid) {
            return None;
        }
        self.system.process(self.pid).map(|p| p.memory())
    }
}

/// Outcome of one memory check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCheck {
    Below { resident_mb: u64 },
    Exceeded { resident_mb: u64 },
    Unavailable,
}

/// Compares resident memory against a ceiling.
pub struct MemoryGovernor {
    ceiling_mb: u64,
    probe: Box<dyn MemoryProbe>,
    checks: u64,
    exceeded: u64,
}

impl MemoryGovernor {
    /// Governor using the process-wide `sysinfo` probe.
    pub fn new(ceiling_mb: u64) -> Self {
        Self::with_probe(ceiling_mb, Box::new(SysinfoProbe::new()))
    }

    pub fn with_probe(ceiling_mb: u64, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            ceiling_mb,
            probe,
            checks: 0,
            exceeded: 0,
        }
    }

    pub fn ceiling_mb(&self) -> u64 {
        self.ceiling_mb
    }

    /// Number of checks that found memory above the ceiling.
    pub fn times_exceeded(&self) -> u64 {
        self.exceeded
    }

    pub fn checks(&self) -> u64 {
        self.checks
    }

    /// Sample resident memory once.
    pub fn check(&mut self) -> MemoryCheck {
        self.checks += 1;
        let Some(bytes) = self.probe.resident_bytes() else {
            tracing::warn!("could not sample resident memory; skipping check");
            return MemoryCheck::Unavailable;
        };
        let resident_mb = bytes / MB;
        if resident_mb > self.ceiling_mb {
            self.exceeded += 1;
            tracing::info!(
                resident_mb,
                ceiling_mb = self.ceiling_mb,
                "memory usage exceeds limit, forcing reclamation"
            );
            MemoryCheck::Exceeded { resident_mb }
        } else {
            tracing::debug!(resident_mb, ceiling_mb = self.ceiling_mb, "memory check");
            MemoryCheck::Below { resident_mb }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryCheck, MemoryGovernor, MemoryProbe, MB};

    struct Fixed(Option<u64>);

    impl MemoryProbe for Fixed {
        fn resident_bytes(&mut self) -> Option<u64> {
            self.0
        }
    }

    #[test]
    fn flags_usage_above_ceiling() {
        let mut g = MemoryGovernor::with_probe(100, Box::new(Fixed(Some(150 * MB))));
        assert_eq!(g.check(), MemoryCheck::Exceeded { resident_mb: 150 });
        assert_eq!(g.times_exceeded(), 1);

        let mut g = MemoryGovernor::with_probe(100, Box::new(Fixed(Some(100 * MB))));
        assert_eq!(g.check(), MemoryCheck::Below { resident_mb: 100 });
    }

    #[test]
    fn sampling_failure_is_not_fatal() {
        let mut g = MemoryGovernor::with_probe(1, Box::new(Fixed(None)));
        assert_eq!(g.check(), MemoryCheck::Unavailable);
        assert_eq!(g.checks(), 1);
        assert_eq!(g.times_exceeded(), 0);
    }

    #[test]
    fn sysinfo_probe_reads_this_process() {
        let mut g = MemoryGovernor::new(u64::MAX);
        assert!(matches!(g.check(), MemoryCheck::Below { .. } | MemoryCheck::Unavailable));
    }
}
