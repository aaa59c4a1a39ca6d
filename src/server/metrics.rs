//! Process-wide counters exported by `GET /metrics` in the Prometheus text
//! exposition format. Hand-rolled on atomics; the handful of gauges here does
//! not warrant a metrics framework.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct Metrics {
    events_received: AtomicU64,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    commands: Mutex<BTreeMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_processed(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self, name: &str) {
        let mut commands = self.commands.lock().expect("command counter lock poisoned");
        *commands.entry(name.to_string()).or_default() += 1;
    }

    /// Renders all counters. The queue depth is sampled by the caller since it
    /// lives in the worker pool, not here.
    pub fn render(&self, queue_depth: usize) -> String {
        let mut out = String::new();
        counter(
            &mut out,
            "pr_cli_events_received_total",
            "Webhook events accepted by ingress.",
            self.events_received.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "pr_cli_jobs_processed_total",
            "Jobs completed by the worker pool.",
            self.jobs_processed.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "pr_cli_jobs_failed_total",
            "Jobs that ended with an error.",
            self.jobs_failed.load(Ordering::Relaxed),
        );
        out.push_str("# HELP pr_cli_queue_depth Jobs waiting in the queue.\n");
        out.push_str("# TYPE pr_cli_queue_depth gauge\n");
        out.push_str(&format!("pr_cli_queue_depth {queue_depth}\n"));

        let commands = self.commands.lock().expect("command counter lock poisoned");
        if !commands.is_empty() {
            out.push_str("# HELP pr_cli_commands_total Commands parsed, by name.\n");
            out.push_str("# TYPE pr_cli_commands_total counter\n");
            for (name, count) in commands.iter() {
                out.push_str(&format!("pr_cli_commands_total{{command=\"{name}\"}} {count}\n"));
            }
        }
        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
    out.push_str(&format!("{name} {value}\n"));
}
