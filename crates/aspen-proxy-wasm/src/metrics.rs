//! Typed handles over host-side metrics.
//!
//! A metric is defined once, usually from `on_vm_start` or `on_configure`,
//! and the returned handle is kept in the root context. Handles are plain
//! ids; they stay valid for the life of the VM.

use crate::error::HostResult;
use crate::host::Host;
use crate::types::MetricType;

/// Monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    id: u32,
}

impl Counter {
    /// Define a counter named `name` on the host.
    pub fn define(host: &dyn Host, name: &str) -> HostResult<Self> {
        let id = host.define_metric(MetricType::Counter, name)?;
        Ok(Self { id })
    }

    /// Host-assigned metric id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Add one.
    pub fn increment(&self, host: &dyn Host) -> HostResult<()> {
        self.add(host, 1)
    }

    /// Add `delta`, clamped to `i64::MAX`.
    pub fn add(&self, host: &dyn Host, delta: u64) -> HostResult<()> {
        let offset = i64::try_from(delta).unwrap_or(i64::MAX);
        host.increment_metric(self.id, offset)
    }

    /// Current value as reported by the host.
    pub fn value(&self, host: &dyn Host) -> HostResult<u64> {
        host.get_metric(self.id)
    }
}

/// Value that moves both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gauge {
    id: u32,
}

impl Gauge {
    /// Define a gauge named `name` on the host.
    pub fn define(host: &dyn Host, name: &str) -> HostResult<Self> {
        let id = host.define_metric(MetricType::Gauge, name)?;
        Ok(Self { id })
    }

    /// Host-assigned metric id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Overwrite the current value.
    pub fn set(&self, host: &dyn Host, value: u64) -> HostResult<()> {
        host.record_metric(self.id, value)
    }

    /// Move the value by `offset`.
    pub fn adjust(&self, host: &dyn Host, offset: i64) -> HostResult<()> {
        host.increment_metric(self.id, offset)
    }

    /// Current value as reported by the host.
    pub fn value(&self, host: &dyn Host) -> HostResult<u64> {
        host.get_metric(self.id)
    }
}

/// Distribution of recorded samples. Only `record` is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Histogram {
    id: u32,
}

impl Histogram {
    /// Define a histogram named `name` on the host.
    pub fn define(host: &dyn Host, name: &str) -> HostResult<Self> {
        let id = host.define_metric(MetricType::Histogram, name)?;
        Ok(Self { id })
    }

    /// Host-assigned metric id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Record one sample.
    pub fn record(&self, host: &dyn Host, sample: u64) -> HostResult<()> {
        host.record_metric(self.id, sample)
    }
}
