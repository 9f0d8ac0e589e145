use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts,
};
use hickory_resolver::error::ResolveErrorKind;
use pipebench_metrics::{CounterRegistry, ScoreTag};
use tokio::time::Instant;

pub const DEFAULT_ATTEMPTS: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = Result<IpAddr, LookupError>> + Send + 'a>>;

/// One A-record lookup, without retries.
pub trait Lookup: Send + Sync {
    fn lookup<'a>(&'a self, hostname: &'a str) -> LookupFuture<'a>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no A record for `{0}`")]
    NoRecord(String),

    #[error("lookup timed out")]
    Timeout,

    #[error("dns error: {0}")]
    Resolve(String),
}

/// Queries a single nameserver over UDP. System configuration, hosts file and
/// caching are all bypassed so every attempt reaches the target.
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    pub fn new(nameserver: SocketAddr, attempt_timeout: Duration) -> Self {
        let group =
            NameServerConfigGroup::from_ips_clear(&[nameserver.ip()], nameserver.port(), true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);

        let mut opts = ResolverOpts::default();
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;
        opts.ip_strategy = LookupIpStrategy::Ipv4Only;
        opts.timeout = attempt_timeout;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl Lookup for HickoryLookup {
    fn lookup<'a>(&'a self, hostname: &'a str) -> LookupFuture<'a> {
        Box::pin(async move {
            // Fully qualified, so no search domain is ever appended.
            let fqdn = if hostname.ends_with('.') {
                hostname.to_string()
            } else {
                format!("{hostname}.")
            };
            match self.resolver.lookup_ip(fqdn.as_str()).await {
                Ok(found) => found
                    .iter()
                    .next()
                    .ok_or_else(|| LookupError::NoRecord(hostname.to_string())),
                Err(err) if matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                    Err(LookupError::NoRecord(hostname.to_string()))
                }
                Err(err) => Err(LookupError::Resolve(err.to_string())),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to resolve `{hostname}` after {attempts} attempt(s): {last}")]
    Exhausted {
        hostname: String,
        attempts: u32,
        last: LookupError,
    },

    #[error("deadline reached while resolving `{hostname}`")]
    Deadline { hostname: String, attempts: u32 },
}

/// One attempt sequence for a hostname.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub hostname: String,
    pub attempts: u32,
    pub outcome: Result<IpAddr, ResolveError>,
}

/// Resolves user subdomains against the target's nameserver with bounded
/// retries, reporting `DNSResolve` / `DNSFailed` into the phase counters.
#[derive(Clone)]
pub struct SubdomainResolver {
    lookup: Arc<dyn Lookup>,
    attempts: u32,
    retry_delay: Duration,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for SubdomainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubdomainResolver")
            .field("attempts", &self.attempts)
            .field("retry_delay", &self.retry_delay)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl SubdomainResolver {
    pub fn new(nameserver: IpAddr, port: u16) -> Self {
        let lookup = HickoryLookup::new(SocketAddr::new(nameserver, port), DEFAULT_ATTEMPT_TIMEOUT);
        Self::with_lookup(Arc::new(lookup))
    }

    pub fn with_lookup(lookup: Arc<dyn Lookup>) -> Self {
        Self {
            lookup,
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Resolves `hostname`, counting the outcome into `counters`.
    ///
    /// Exhausting every attempt counts `DNSFailed`. Running into the deadline
    /// counts nothing: the phase is over and the failure is not the target's.
    pub async fn resolve(
        &self,
        hostname: &str,
        counters: &CounterRegistry,
        deadline: Instant,
    ) -> Result<IpAddr, ResolveError> {
        self.resolve_with_attempts(hostname, self.attempts, counters, deadline)
            .await
    }

    pub async fn resolve_with_attempts(
        &self,
        hostname: &str,
        attempts: u32,
        counters: &CounterRegistry,
        deadline: Instant,
    ) -> Result<IpAddr, ResolveError> {
        let resolution = self.resolution(hostname, attempts, deadline).await;
        let tag = match &resolution.outcome {
            Ok(_) => Some(ScoreTag::DnsResolve),
            Err(ResolveError::Exhausted { .. }) => Some(ScoreTag::DnsFailed),
            Err(ResolveError::Deadline { .. }) => None,
        };
        if let Some(tag) = tag {
            // A frozen registry already logged the anomaly.
            let _ = counters.add(tag);
        }
        resolution.outcome
    }

    /// Runs the attempt sequence without touching any counters.
    pub async fn resolution(&self, hostname: &str, attempts: u32, deadline: Instant) -> Resolution {
        let attempts = attempts.max(1);
        let mut made = 0;
        let mut last = LookupError::Timeout;

        while made < attempts {
            let now = Instant::now();
            if now >= deadline {
                return Resolution {
                    hostname: hostname.to_string(),
                    attempts: made,
                    outcome: Err(ResolveError::Deadline {
                        hostname: hostname.to_string(),
                        attempts: made,
                    }),
                };
            }
            made += 1;

            let budget = self.attempt_timeout.min(deadline - now);
            let result = match tokio::time::timeout(budget, self.lookup.lookup(hostname)).await {
                Ok(result) => result,
                Err(_) => Err(LookupError::Timeout),
            };
            match result {
                Ok(addr) => {
                    tracing::debug!(hostname, %addr, attempts = made, "resolved");
                    return Resolution {
                        hostname: hostname.to_string(),
                        attempts: made,
                        outcome: Ok(addr),
                    };
                }
                Err(err) => {
                    tracing::debug!(hostname, attempt = made, error = %err, "lookup failed");
                    last = err;
                }
            }

            if made < attempts {
                tokio::time::sleep_until((Instant::now() + self.retry_delay).min(deadline)).await;
            }
        }

        let outcome = if Instant::now() >= deadline && matches!(last, LookupError::Timeout) {
            Err(ResolveError::Deadline {
                hostname: hostname.to_string(),
                attempts: made,
            })
        } else {
            Err(ResolveError::Exhausted {
                hostname: hostname.to_string(),
                attempts: made,
                last,
            })
        };
        Resolution {
            hostname: hostname.to_string(),
            attempts: made,
            outcome,
        }
    }
}
