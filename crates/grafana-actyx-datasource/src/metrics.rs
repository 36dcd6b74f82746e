//! Prometheus metrics exposed through Grafana's plugin metrics endpoint.
use std::{fmt, time::Duration};

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

/// Query metrics of the datasource.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    queries: IntCounter,
    query_errors: IntCounter,
    query_duration: Histogram,
}

impl Metrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let queries = IntCounter::new(
            "actyx_datasource_queries_total",
            "Number of AQL queries sent to the event store.",
        )?;
        let query_errors = IntCounter::new(
            "actyx_datasource_query_errors_total",
            "Number of AQL queries which failed.",
        )?;
        let query_duration = Histogram::with_opts(HistogramOpts::new(
            "actyx_datasource_query_duration_seconds",
            "Time taken by the event store to answer AQL queries.",
        ))?;
        registry.register(Box::new(queries.clone()))?;
        registry.register(Box::new(query_errors.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        Ok(Self {
            registry,
            queries,
            query_errors,
            query_duration,
        })
    }

    /// Record a finished query.
    pub fn observe_query(&self, elapsed: Duration, failed: bool) {
        self.queries.inc();
        if failed {
            self.query_errors.inc();
        }
        self.query_duration.observe(elapsed.as_secs_f64());
    }

    /// Encode all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = vec![];
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("queries", &self.queries.get())
            .field("query_errors", &self.query_errors.get())
            .finish()
    }
}
