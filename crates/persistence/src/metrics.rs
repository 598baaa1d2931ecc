//! Query timing and pool gauges for the export database.

use metrics::{gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Histogram of repository query latency, labelled by query name.
pub const QUERY_DURATION_METRIC: &str = "export_db_query_duration_seconds";

/// Publishes the current pool occupancy.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("export_db_connections_active").set(size.saturating_sub(idle) as f64);
    gauge!("export_db_connections_idle").set(idle as f64);
    gauge!("export_db_connections_max").set(pool.options().get_max_connections() as f64);
}

/// Times one repository query; call [`QueryTimer::record`] once it returns.
#[derive(Debug)]
pub struct QueryTimer {
    query: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query: &'static str) -> Self {
        Self {
            query,
            start: Instant::now(),
        }
    }

    pub fn query(&self) -> &'static str {
        self.query
    }

    pub fn record(self) {
        histogram!(QUERY_DURATION_METRIC, "query" => self.query)
            .record(self.start.elapsed().as_secs_f64());
    }
}
