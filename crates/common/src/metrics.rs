use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    records_read: CounterVec,
    records_bucketed: CounterVec,
    spill_bytes: CounterVec,
    spill_runs: CounterVec,
    spill_time_seconds: HistogramVec,
    join_rows_out: CounterVec,
    shards_written: CounterVec,
    shard_bytes_written: CounterVec,
    partition_time_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_read(&self, side: &str, records: u64) {
        self.inner
            .records_read
            .with_label_values(&[side])
            .inc_by(records as f64);
    }

    pub fn record_bucketed(&self, side: &str, partition: u32, records: u64) {
        let labels = [side, &partition.to_string()];
        self.inner
            .records_bucketed
            .with_label_values(&labels)
            .inc_by(records as f64);
    }

    pub fn record_spill(&self, side: &str, kind: &str, bytes: u64, runs: u64, secs: f64) {
        let labels = [side, kind];
        self.inner
            .spill_bytes
            .with_label_values(&labels)
            .inc_by(bytes as f64);
        self.inner
            .spill_runs
            .with_label_values(&labels)
            .inc_by(runs as f64);
        self.inner
            .spill_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn record_join_output(&self, partition: u32, rows: u64) {
        self.inner
            .join_rows_out
            .with_label_values(&[partition.to_string().as_str()])
            .inc_by(rows as f64);
    }

    pub fn record_shards_written(&self, partition: u32, shards: u64, bytes: u64) {
        let partition = partition.to_string();
        let labels = [partition.as_str()];
        self.inner
            .shards_written
            .with_label_values(&labels)
            .inc_by(shards as f64);
        self.inner
            .shard_bytes_written
            .with_label_values(&labels)
            .inc_by(bytes as f64);
    }

    pub fn record_partition_time(&self, partition: u32, outcome: &str, secs: f64) {
        let partition = partition.to_string();
        let labels = [partition.as_str(), outcome];
        self.inner
            .partition_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let records_read = counter_vec(
            &registry,
            "bsj_records_read_total",
            "Records read from input collections",
            &["side"],
        );
        let records_bucketed = counter_vec(
            &registry,
            "bsj_records_bucketed_total",
            "Records written to hash partition buckets",
            &["side", "partition"],
        );
        let spill_bytes = counter_vec(
            &registry,
            "bsj_spill_bytes_total",
            "Bytes written to working storage",
            &["side", "kind"],
        );
        let spill_runs = counter_vec(
            &registry,
            "bsj_spill_runs_total",
            "Spill files written to working storage",
            &["side", "kind"],
        );
        let spill_time_seconds = histogram_vec(
            &registry,
            "bsj_spill_time_seconds",
            "Time spent writing spill files",
            &["side", "kind"],
        );
        let join_rows_out = counter_vec(
            &registry,
            "bsj_join_rows_out_total",
            "Joined records produced per partition",
            &["partition"],
        );
        let shards_written = counter_vec(
            &registry,
            "bsj_shards_written_total",
            "Output shards committed per partition",
            &["partition"],
        );
        let shard_bytes_written = counter_vec(
            &registry,
            "bsj_shard_bytes_written_total",
            "Output shard bytes committed per partition",
            &["partition"],
        );
        let partition_time_seconds = histogram_vec(
            &registry,
            "bsj_partition_time_seconds",
            "Wall time of one partition worker task",
            &["partition", "outcome"],
        );

        Self {
            registry,
            records_read,
            records_bucketed,
            spill_bytes,
            spill_runs,
            spill_time_seconds,
            join_rows_out,
            shards_written,
            shard_bytes_written,
            partition_time_seconds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
