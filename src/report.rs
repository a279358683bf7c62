//! Aggregation of the outcome stream into end-of-run statistics.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::outcome::RequestOutcome;
use crate::percentiles::{as_ms, LatencySummary, PercentileTracker};

/// Statistics for one `"<METHOD> <label>"` key.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStats {
    pub key: String,
    pub requests: u64,
    pub failures: u64,
    /// Latency over all requests for the key, failed ones included.
    pub latency: Option<LatencySummary>,
    pub requests_per_sec: f64,
}

impl LabelStats {
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }

    fn format_table_row(&self) -> String {
        let (avg, min, max, median) = match &self.latency {
            Some(l) => (as_ms(l.mean), as_ms(l.min), as_ms(l.max), as_ms(l.median)),
            None => (0.0, 0.0, 0.0, 0.0),
        };
        format!(
            "{:<32} {:>8} {:>8} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>8.2}",
            self.key,
            self.requests,
            self.failures,
            avg,
            min,
            max,
            median,
            self.requests_per_sec
        )
    }
}

/// One distinct failure message and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    pub key: String,
    pub message: String,
    pub occurrences: u64,
}

/// Final statistics handed back by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub elapsed: Duration,
    /// Sorted by key.
    pub labels: Vec<LabelStats>,
    /// Sorted by occurrences, most frequent first.
    pub failures: Vec<FailureEntry>,
}

impl RunStatistics {
    pub fn total_requests(&self) -> u64 {
        self.labels.iter().map(|l| l.requests).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.labels.iter().map(|l| l.failures).sum()
    }

    pub fn label(&self, key: &str) -> Option<&LabelStats> {
        self.labels.iter().find(|l| l.key == key)
    }
}

#[derive(Default)]
struct KeyAccumulator {
    requests: u64,
    failures: u64,
    latencies: PercentileTracker,
}

/// Folds outcomes into per-key counters and latency histograms.
#[derive(Default)]
pub struct StatsAggregator {
    keys: BTreeMap<String, KeyAccumulator>,
    failures: HashMap<(String, String), u64>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: &RequestOutcome) {
        let key = outcome.key();
        let acc = self.keys.entry(key.clone()).or_default();
        acc.requests += 1;
        acc.latencies.record(outcome.latency);

        if let Some(error) = &outcome.error {
            acc.failures += 1;
            *self.failures.entry((key, error.to_string())).or_insert(0) += 1;
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.keys.values().map(|a| a.requests).sum()
    }

    /// Statistics over `elapsed`, which is the divisor for requests/sec.
    pub fn finish(&self, elapsed: Duration) -> RunStatistics {
        let secs = elapsed.as_secs_f64();
        let labels = self
            .keys
            .iter()
            .map(|(key, acc)| LabelStats {
                key: key.clone(),
                requests: acc.requests,
                failures: acc.failures,
                latency: acc.latencies.summary(),
                requests_per_sec: if secs > 0.0 {
                    acc.requests as f64 / secs
                } else {
                    0.0
                },
            })
            .collect();

        let mut failures: Vec<FailureEntry> = self
            .failures
            .iter()
            .map(|((key, message), count)| FailureEntry {
                key: key.clone(),
                message: message.clone(),
                occurrences: *count,
            })
            .collect();
        failures.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| a.message.cmp(&b.message))
        });

        RunStatistics {
            elapsed,
            labels,
            failures,
        }
    }
}

/// Plain-text summary: per-key table, totals, then the error list.
pub fn format_report(stats: &RunStatistics) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "\n## Results ({:.1}s)\n\n",
        stats.elapsed.as_secs_f64()
    ));
    output.push_str(&format!(
        "{:<32} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>8}\n",
        "Name", "Requests", "Fails", "Avg", "Min", "Max", "Median", "Req/s"
    ));
    output.push_str(&format!(
        "{:<32} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>8}\n",
        "", "", "", "(ms)", "(ms)", "(ms)", "(ms)", ""
    ));
    output.push_str(&"-".repeat(100));
    output.push('\n');

    for label in &stats.labels {
        output.push_str(&label.format_table_row());
        output.push('\n');
    }

    output.push_str(&"-".repeat(100));
    output.push('\n');
    let total_rps = if stats.elapsed.as_secs_f64() > 0.0 {
        stats.total_requests() as f64 / stats.elapsed.as_secs_f64()
    } else {
        0.0
    };
    output.push_str(&format!(
        "{:<32} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>8.2}\n",
        "Total",
        stats.total_requests(),
        stats.total_failures(),
        "",
        "",
        "",
        "",
        total_rps
    ));

    output.push_str("\n## Errors\n\n");
    if stats.failures.is_empty() {
        output.push_str("No errors!\n");
        return output;
    }
    output.push_str(&format!("{:>11}  {:<32} {}\n", "Occurrences", "Name", "Error"));
    output.push_str(&"-".repeat(100));
    output.push('\n');
    for failure in &stats.failures {
        output.push_str(&format!(
            "{:>11}  {:<32} {}\n",
            failure.occurrences, failure.key, failure.message
        ));
    }
    output
}
