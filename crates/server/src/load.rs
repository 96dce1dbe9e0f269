//! Host load sampling for the adaptive quota policy.

use std::sync::Arc;
use std::time::Duration;

use bridgeway_core::AdaptiveQuotaPolicy;
use sysinfo::System;
use tokio::task::JoinHandle;
use tracing::debug;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

/// Reads CPU and memory utilisation as percentages.
pub fn sample(system: &mut System) -> (f64, f64) {
    system.refresh_cpu_usage();
    system.refresh_memory();

    let cpu = f64::from(system.global_cpu_usage());
    let total = system.total_memory();
    let memory = if total == 0 { 0.0 } else { system.used_memory() as f64 / total as f64 * 100.0 };
    (cpu, memory)
}

pub fn spawn_sampler(policy: Arc<AdaptiveQuotaPolicy>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut system = System::new_all();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let (cpu_percent, memory_percent) = sample(&mut system);
            policy.record_load(cpu_percent, memory_percent);
            debug!(
                event_name = "system.load.sampled",
                cpu_percent,
                memory_percent,
                "recorded host load sample"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use sysinfo::System;

    use super::sample;

    #[test]
    fn samples_are_percentages() {
        let mut system = System::new_all();
        let (cpu, memory) = sample(&mut system);
        assert!((0.0..=100.0).contains(&memory));
        assert!(cpu >= 0.0);
    }
}
