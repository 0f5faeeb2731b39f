//! Server metrics for observability
//!
//! Counters are process-local and reset on restart.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently registered duplex sockets
    pub active_sockets: AtomicU64,
    /// Currently registered push streams
    pub active_streams: AtomicU64,
    /// Total connections (both transports) since server start
    pub total_connections: AtomicU64,

    // Fan-out metrics
    /// Logical events handed to the broadcaster
    pub broadcasts: AtomicU64,
    /// Frames successfully queued on a client handle
    pub frames_sent: AtomicU64,
    /// Handles removed because a write failed
    pub write_failures: AtomicU64,
    /// Heartbeat sweeps completed
    pub heartbeats: AtomicU64,

    // Job metrics
    pub jobs_started: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self, transport: &str) {
        self.gauge(transport).fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, transport: &str) {
        self.gauge(transport).fetch_sub(1, Ordering::Relaxed);
    }

    fn gauge(&self, transport: &str) -> &AtomicU64 {
        match transport {
            "stream" => &self.active_streams,
            _ => &self.active_sockets,
        }
    }

    pub fn broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_sent(&self, n: u64) {
        self.frames_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn write_failures(&self, n: u64) {
        self.write_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                sockets: self.active_sockets.load(Ordering::Relaxed),
                streams: self.active_streams.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            fanout: FanoutMetrics {
                broadcasts: self.broadcasts.load(Ordering::Relaxed),
                frames_sent: self.frames_sent.load(Ordering::Relaxed),
                write_failures: self.write_failures.load(Ordering::Relaxed),
                heartbeats: self.heartbeats.load(Ordering::Relaxed),
            },
            jobs: JobMetrics {
                started: self.jobs_started.load(Ordering::Relaxed),
                succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
                failed: self.jobs_failed.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub fanout: FanoutMetrics,
    pub jobs: JobMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub sockets: u64,
    pub streams: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutMetrics {
    pub broadcasts: u64,
    pub frames_sent: u64,
    pub write_failures: u64,
    pub heartbeats: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetrics {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: ConnectionMetrics,
    pub jobs_in_flight: u64,
    pub uptime_secs: u64,
}
