use query::{QueryResult, QueryStatus};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Queries
    total_queries: AtomicUsize,
    answered_queries: AtomicUsize,
    failed_queries: AtomicUsize,
    cancelled_queries: AtomicUsize,

    // Ingestion
    documents_ingested: AtomicUsize,
    failed_ingests: AtomicUsize,
    total_chunks_indexed: AtomicUsize,
    total_entities_extracted: AtomicUsize,

    // Timing (in microseconds)
    total_ingest_time_us: AtomicU64,
    total_query_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_queries: AtomicUsize::new(0),
            answered_queries: AtomicUsize::new(0),
            failed_queries: AtomicUsize::new(0),
            cancelled_queries: AtomicUsize::new(0),
            documents_ingested: AtomicUsize::new(0),
            failed_ingests: AtomicUsize::new(0),
            total_chunks_indexed: AtomicUsize::new(0),
            total_entities_extracted: AtomicUsize::new(0),
            total_ingest_time_us: AtomicU64::new(0),
            total_query_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_query(&self, result: &QueryResult, duration: Duration) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        let counter = match result.status {
            QueryStatus::Answered => &self.answered_queries,
            QueryStatus::Failed { .. } => &self.failed_queries,
            QueryStatus::Cancelled => &self.cancelled_queries,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingest(&self, duration: Duration, documents: usize, chunks: usize, entities: usize) {
        self.total_ingest_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.documents_ingested.fetch_add(documents, Ordering::Relaxed);
        self.total_chunks_indexed.fetch_add(chunks, Ordering::Relaxed);
        self.total_entities_extracted.fetch_add(entities, Ordering::Relaxed);
    }

    pub fn record_ingest_failure(&self) {
        self.failed_ingests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            answered_queries: self.answered_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            cancelled_queries: self.cancelled_queries.load(Ordering::Relaxed),
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            failed_ingests: self.failed_ingests.load(Ordering::Relaxed),
            total_chunks_indexed: self.total_chunks_indexed.load(Ordering::Relaxed),
            total_entities_extracted: self.total_entities_extracted.load(Ordering::Relaxed),
            avg_ingest_time_ms: avg_time_ms(&self.total_ingest_time_us, &self.documents_ingested),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, &self.total_queries),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_queries: usize,
    pub answered_queries: usize,
    pub failed_queries: usize,
    pub cancelled_queries: usize,
    pub documents_ingested: usize,
    pub failed_ingests: usize,
    pub total_chunks_indexed: usize,
    pub total_entities_extracted: usize,
    pub avg_ingest_time_ms: f64,
    pub avg_query_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_averages_are_per_document() {
        let metrics = Metrics::new();
        metrics.record_ingest(Duration::from_millis(30), 2, 10, 4);
        metrics.record_ingest(Duration::from_millis(10), 2, 6, 1);
        metrics.record_ingest_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 4);
        assert_eq!(snapshot.total_chunks_indexed, 16);
        assert_eq!(snapshot.failed_ingests, 1);
        assert!((snapshot.avg_ingest_time_ms - 10.0).abs() < 1e-9);
        assert_eq!(snapshot.avg_query_time_ms, 0.0);
    }
}
