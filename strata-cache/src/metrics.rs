//! Per-operation latency and status recording.
//!
//! Every backend call lands in one histogram, labeled by backend kind,
//! instance, command, and outcome. The sink is whatever `metrics` recorder
//! the application installed; none installed means the macros are no-ops.

use std::time::Instant;

use strata_core::CacheError;

/// Histogram name shared by all tiers.
const LATENCY_METRIC: &str = "strata_cache_client_latency_ms";

/// Backend command being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
    Get,
    Set,
    Delete,
    Ping,
}

impl CacheCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Delete => "DELETE",
            Self::Ping => "PING",
        }
    }
}

/// Outcome label for a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Found,
    Ok,
    Missing,
    Err,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "FOUND",
            Self::Ok => "OK",
            Self::Missing => "MISSING",
            Self::Err => "ERR",
        }
    }

    /// Status for a read outcome: hits are FOUND, absence is MISSING.
    pub fn for_read<T>(result: &Result<T, CacheError>) -> Self {
        match result {
            Ok(_) => Self::Found,
            Err(CacheError::Miss) => Self::Missing,
            Err(_) => Self::Err,
        }
    }

    /// Status for a write/delete/ping outcome.
    pub fn for_write<T>(result: &Result<T, CacheError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(CacheError::Miss) => Self::Missing,
            Err(_) => Self::Err,
        }
    }
}

/// Label set for one backend instance.
#[derive(Debug, Clone)]
pub struct OpMetrics {
    backend: &'static str,
    instance: String,
}

impl OpMetrics {
    pub fn new(backend: &'static str, instance: impl Into<String>) -> Self {
        Self {
            backend,
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Record one call's latency with its status label.
    pub fn observe(&self, command: CacheCommand, status: CacheStatus, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        metrics::histogram!(
            LATENCY_METRIC,
            "backend" => self.backend,
            "instance" => self.instance.clone(),
            "command" => command.as_str(),
            "status" => status.as_str(),
        )
        .record(elapsed_ms);
    }

    /// Record a read call, deriving the status from its result.
    pub fn observe_read<T>(&self, started: Instant, result: &Result<T, CacheError>) {
        self.observe(CacheCommand::Get, CacheStatus::for_read(result), started);
    }

    /// Record a write-like call, deriving the status from its result.
    pub fn observe_write<T>(
        &self,
        command: CacheCommand,
        started: Instant,
        result: &Result<T, CacheError>,
    ) {
        self.observe(command, CacheStatus::for_write(result), started);
    }
}
