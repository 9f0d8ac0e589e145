use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use strum::{EnumCount as _, IntoEnumIterator as _};
use tokio::sync::Notify;

use crate::failure::{BenchError, ErrorCategory};
use crate::progress::ErrorCounts;

/// Upper bound on stored messages for categories that are only reported,
/// never acted on.
pub const DEFAULT_MESSAGE_CAP: usize = 1_000;

#[derive(Debug, Default)]
struct CategoryLog {
    count: u64,
    messages: Vec<String>,
}

/// Collects failures from every worker of one phase.
///
/// Each category has its own lock. Critical failures are additionally counted
/// on an atomic so the disqualification check never waits on a lock.
#[derive(Debug)]
pub struct ErrorAggregator {
    threshold: u64,
    message_cap: usize,
    logs: [Mutex<CategoryLog>; ErrorCategory::COUNT],
    critical: AtomicU64,
    disqualified: AtomicBool,
    frozen: AtomicBool,
    in_flight: AtomicU64,
    dropped: AtomicU64,
    notify: Notify,
}

impl ErrorAggregator {
    /// `threshold` is the critical count at which the run is disqualified.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            message_cap: DEFAULT_MESSAGE_CAP,
            logs: std::array::from_fn(|_| Mutex::new(CategoryLog::default())),
            critical: AtomicU64::new(0),
            disqualified: AtomicBool::new(false),
            frozen: AtomicBool::new(false),
            in_flight: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn with_message_cap(mut self, cap: usize) -> Self {
        self.message_cap = cap;
        self
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Clears every category and the disqualification flag.
    pub fn init(&self) {
        for log in &self.logs {
            *log.lock() = CategoryLog::default();
        }
        self.critical.store(0, Ordering::SeqCst);
        self.disqualified.store(false, Ordering::SeqCst);
        self.dropped.store(0, Ordering::Relaxed);
        self.frozen.store(false, Ordering::SeqCst);
    }

    /// Files `err` under its category. Returns `false` if the aggregator was
    /// already frozen and the error was dropped.
    pub fn record(&self, err: BenchError) -> bool {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.frozen.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "dropping error recorded after the phase ended");
            return false;
        }

        let category = err.category();
        match category {
            ErrorCategory::Critical => tracing::warn!(error = %err, "critical error"),
            ErrorCategory::Timeout | ErrorCategory::Temporary => {
                tracing::debug!(error = %err, "recorded error")
            }
            ErrorCategory::Application => tracing::info!(error = %err, "application error"),
        }

        {
            let mut log = self.logs[category.index()].lock();
            log.count += 1;
            // Application messages are the only ones an unhealthy target can
            // produce without bound.
            if category != ErrorCategory::Application || log.messages.len() < self.message_cap {
                log.messages.push(err.message().to_string());
            }
        }

        if category == ErrorCategory::Critical {
            let critical = self.critical.fetch_add(1, Ordering::SeqCst) + 1;
            if critical >= self.threshold && !self.disqualified.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    critical,
                    threshold = self.threshold,
                    "critical error threshold reached, disqualifying run"
                );
                self.notify.notify_waiters();
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        true
    }

    /// Freezes the aggregator and waits out records already past the frozen
    /// check. Later records are dropped and counted.
    pub fn done(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
        }
    }

    #[must_use]
    pub fn is_disqualified(&self) -> bool {
        self.disqualified.load(Ordering::SeqCst)
    }

    /// Resolves once the run is disqualified.
    pub async fn disqualified(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_disqualified() {
                return;
            }
            notified.await;
        }
    }

    pub fn count(&self, category: ErrorCategory) -> u64 {
        self.logs[category.index()].lock().count
    }

    pub fn counts(&self) -> ErrorCounts {
        ErrorCounts {
            critical: self.count(ErrorCategory::Critical),
            timeout: self.count(ErrorCategory::Timeout),
            application: self.count(ErrorCategory::Application),
            temporary: self.count(ErrorCategory::Temporary),
        }
    }

    /// Errors that arrived after `done`.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stored messages of one category, in arrival order and not deduplicated.
    pub fn messages(&self, category: ErrorCategory) -> Vec<String> {
        self.logs[category.index()].lock().messages.clone()
    }

    /// Every category's messages in category order.
    pub fn get_final_error_messages(&self) -> Vec<(ErrorCategory, Vec<String>)> {
        ErrorCategory::iter()
            .map(|category| (category, self.messages(category)))
            .collect()
    }
}

/// Removes repeated messages, keeping the first occurrence of each.
pub fn unique_messages<I, S>(messages: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for message in messages {
        let message = message.into();
        if seen.insert(message.clone()) {
            out.push(message);
        }
    }
    out
}
