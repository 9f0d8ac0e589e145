use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use pipebench_metrics::WeightTable;

use crate::error::{Error, Result};

/// When a worker gives up on a degraded target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressurePolicy {
    /// Iterations slower than this count as slow.
    pub slow_ceiling: Duration,
    /// Consecutive slow or timed-out iterations before `TooSlow`.
    pub slow_tolerance: u32,
    /// Consecutive rate-limited iterations before `TooManySpam`.
    pub spam_tolerance: u32,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self {
            slow_ceiling: Duration::from_secs(5),
            slow_tolerance: 3,
            spam_tolerance: 3,
        }
    }
}

/// Adaptive worker pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub initial_workers: u64,
    pub max_workers: u64,
    pub scale_step: u64,
    pub scale_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 4,
            max_workers: 64,
            scale_step: 4,
            scale_interval: Duration::from_secs(5),
        }
    }
}

/// Relative weights of the built-in scenarios. Zero disables a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadMix {
    pub register_viewer: u32,
    pub reserve_livestream: u32,
    pub browse_livestreams: u32,
    pub post_tip: u32,
}

impl Default for WorkloadMix {
    fn default() -> Self {
        Self {
            register_viewer: 1,
            reserve_livestream: 2,
            browse_livestreams: 4,
            post_tip: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub target_base_url: String,
    pub nameserver: IpAddr,
    pub dns_port: u16,
    pub base_domain: String,

    pub benchmark_duration: Duration,
    /// Budget for pretest and for finalcheck, each.
    pub check_timeout: Duration,
    pub request_timeout: Duration,
    pub initialize_timeout: Duration,

    pub disqualify_threshold: u64,
    pub backpressure: BackpressurePolicy,
    pub pool: PoolConfig,
    pub mix: WorkloadMix,
    pub weights: WeightTable,

    pub bench_resolve_attempts: u32,
    pub check_resolve_attempts: u32,

    /// Accounts and livestreams re-validated by finalcheck.
    pub finalcheck_sample: usize,
    pub progress_interval: Duration,
    pub pretest_only: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            target_base_url: "http://pipe.u.isucon.dev:8080".to_string(),
            nameserver: IpAddr::V4(Ipv4Addr::LOCALHOST),
            dns_port: 53,
            base_domain: "u.isucon.dev".to_string(),
            benchmark_duration: Duration::from_secs(60),
            check_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            initialize_timeout: Duration::from_secs(42),
            disqualify_threshold: 10,
            backpressure: BackpressurePolicy::default(),
            pool: PoolConfig::default(),
            mix: WorkloadMix::default(),
            weights: WeightTable::default(),
            bench_resolve_attempts: 2,
            check_resolve_attempts: 10,
            finalcheck_sample: 20,
            progress_interval: Duration::from_secs(1),
            pretest_only: false,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));

        match url_scheme(&self.target_base_url) {
            Some("http" | "https") => {}
            _ => return invalid("`target` must be an http:// or https:// URL"),
        }
        if self.base_domain.trim_matches('.').is_empty() {
            return invalid("`base-domain` must not be empty");
        }
        if self.benchmark_duration.is_zero() {
            return invalid("`duration` must be a positive duration");
        }
        if self.check_timeout.is_zero() || self.request_timeout.is_zero() {
            return invalid("timeouts must be positive durations");
        }
        if self.disqualify_threshold == 0 {
            return invalid("`disqualify-threshold` must be a positive integer");
        }
        if self.backpressure.slow_tolerance == 0 || self.backpressure.spam_tolerance == 0 {
            return invalid("backpressure tolerances must be positive integers");
        }
        if self.pool.initial_workers == 0 {
            return invalid("`workers` must be a positive integer");
        }
        if self.pool.max_workers < self.pool.initial_workers {
            return invalid("`max-workers` must be >= `workers`");
        }
        if self.pool.scale_interval.is_zero() {
            return invalid("`scale-interval` must be a positive duration");
        }
        if self.bench_resolve_attempts == 0 || self.check_resolve_attempts == 0 {
            return invalid("resolve attempts must be positive integers");
        }
        let mix = self.mix;
        if mix.register_viewer + mix.reserve_livestream + mix.browse_livestreams + mix.post_tip == 0
        {
            return invalid("at least one scenario must have a positive weight");
        }
        if self.progress_interval.is_zero() {
            return invalid("`progress-interval` must be a positive duration");
        }
        Ok(())
    }

    /// `<label>.<base_domain>`
    pub fn subdomain(&self, label: &str) -> String {
        format!("{label}.{}", self.base_domain.trim_matches('.'))
    }
}

fn url_scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(BenchConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_pool_smaller_than_initial_workers() {
        let mut cfg = BenchConfig::default();
        cfg.pool.initial_workers = 8;
        cfg.pool.max_workers = 4;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_non_http_target_and_empty_mix() {
        let cfg = BenchConfig {
            target_base_url: "ftp://pipe".to_string(),
            ..BenchConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = BenchConfig {
            mix: WorkloadMix {
                register_viewer: 0,
                reserve_livestream: 0,
                browse_livestreams: 0,
                post_tip: 0,
            },
            ..BenchConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn subdomain_joins_label_and_base() {
        let cfg = BenchConfig {
            base_domain: "u.isucon.dev.".to_string(),
            ..BenchConfig::default()
        };
        assert_eq!(cfg.subdomain("alice"), "alice.u.isucon.dev");
    }
}
