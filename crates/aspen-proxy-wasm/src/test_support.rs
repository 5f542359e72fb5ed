//! In-memory host for exercising the runtime off-wasm.
//!
//! [`MockHost`] implements [`Host`] over plain collections and records what
//! the module asked it to do. Failures are injected one call at a time with
//! [`MockHost::fail_next`].

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::SystemTime;

use crate::codec;
use crate::error::HostResult;
use crate::error::Status;
use crate::host::Host;
use crate::types::BufferStatus;
use crate::types::BufferType;
use crate::types::LogLevel;
use crate::types::MapType;
use crate::types::MetricType;
use crate::types::StreamType;

/// One `dispatch_http_call` the module issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCallRecord {
    pub token: u32,
    pub upstream: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub trailers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// One `send_http_response` the module issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResponse {
    pub status_code: u32,
    pub details: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub grpc_status: Option<i32>,
}

#[derive(Debug)]
struct Metric {
    metric_type: MetricType,
    name: String,
    value: u64,
}

#[derive(Debug)]
struct MockState {
    logs: Vec<(LogLevel, String)>,
    log_level: LogLevel,
    fail_next: Option<Status>,
    status: (u32, Option<Vec<u8>>),
    properties: HashMap<Vec<String>, Vec<u8>>,
    tick_period: Option<Duration>,
    now: SystemTime,
    resumed: Vec<StreamType>,
    local_responses: Vec<LocalResponse>,
    route_cache_clears: usize,
    shared_data: HashMap<String, (Vec<u8>, u32)>,
    queues: Vec<(String, VecDeque<Vec<u8>>)>,
    maps: HashMap<MapType, Vec<(String, String)>>,
    buffers: HashMap<BufferType, (Vec<u8>, bool)>,
    metrics: Vec<Metric>,
    http_calls: Vec<HttpCallRecord>,
    next_token: u32,
    effective_context: Option<u32>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            logs: Vec::new(),
            log_level: LogLevel::Trace,
            fail_next: None,
            status: (0, None),
            properties: HashMap::new(),
            tick_period: None,
            now: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            resumed: Vec::new(),
            local_responses: Vec::new(),
            route_cache_clears: 0,
            shared_data: HashMap::new(),
            queues: Vec::new(),
            maps: HashMap::new(),
            buffers: HashMap::new(),
            metrics: Vec::new(),
            http_calls: Vec::new(),
            next_token: 1,
            effective_context: None,
        }
    }
}

/// Host double backed by in-memory state.
#[derive(Debug, Default)]
pub struct MockHost {
    state: Mutex<MockState>,
}

fn owned_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A should_panic test may poison the lock; the data stays usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the state for a boundary call, consuming an injected failure.
    fn call(&self) -> HostResult<MutexGuard<'_, MockState>> {
        let mut state = self.state();
        match state.fail_next.take() {
            Some(status) => Err(status),
            None => Ok(state),
        }
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    /// Make the next boundary call other than `log` fail with `status`.
    pub fn fail_next(&self, status: Status) {
        self.state().fail_next = Some(status);
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.state().log_level = level;
    }

    pub fn set_property_value(&self, path: &[&str], value: &[u8]) {
        let key = path.iter().map(|s| s.to_string()).collect();
        self.state().properties.insert(key, value.to_vec());
    }

    pub fn set_buffer(&self, buffer: BufferType, bytes: &[u8]) {
        self.state().buffers.insert(buffer, (bytes.to_vec(), false));
    }

    pub fn set_end_of_stream(&self, buffer: BufferType, end_of_stream: bool) {
        self.state().buffers.entry(buffer).or_default().1 = end_of_stream;
    }

    pub fn set_current_time(&self, now: SystemTime) {
        self.state().now = now;
    }

    pub fn set_status(&self, code: u32, message: Option<&[u8]>) {
        self.state().status = (code, message.map(<[u8]>::to_vec));
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.state().logs.clone()
    }

    pub fn property(&self, path: &[&str]) -> Option<Vec<u8>> {
        let key: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        self.state().properties.get(&key).cloned()
    }

    /// Current contents of a map, without going through failure injection.
    pub fn map(&self, map: MapType) -> Vec<(String, String)> {
        self.state().maps.get(&map).cloned().unwrap_or_default()
    }

    pub fn http_calls(&self) -> Vec<HttpCallRecord> {
        self.state().http_calls.clone()
    }

    pub fn local_responses(&self) -> Vec<LocalResponse> {
        self.state().local_responses.clone()
    }

    pub fn resumed(&self) -> Vec<StreamType> {
        self.state().resumed.clone()
    }

    pub fn effective_context(&self) -> Option<u32> {
        self.state().effective_context
    }

    pub fn tick_period(&self) -> Option<Duration> {
        self.state().tick_period
    }

    pub fn route_cache_clears(&self) -> usize {
        self.state().route_cache_clears
    }

    /// Value of the metric registered under `name`.
    pub fn metric_value(&self, name: &str) -> Option<u64> {
        self.state().metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }
}

impl Host for MockHost {
    fn log(&self, level: LogLevel, message: &str) -> HostResult<()> {
        self.state().logs.push((level, message.to_string()));
        Ok(())
    }

    fn get_log_level(&self) -> HostResult<LogLevel> {
        Ok(self.call()?.log_level)
    }

    fn get_status(&self) -> HostResult<(u32, Option<Vec<u8>>)> {
        Ok(self.call()?.status.clone())
    }

    fn get_property(&self, path: &[&str]) -> HostResult<Option<Vec<u8>>> {
        let state = self.call()?;
        let key: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        Ok(state.properties.get(&key).cloned())
    }

    fn set_property(&self, path: &[&str], value: Option<&[u8]>) -> HostResult<()> {
        let mut state = self.call()?;
        let key: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        match value {
            Some(value) => state.properties.insert(key, value.to_vec()),
            None => state.properties.remove(&key),
        };
        Ok(())
    }

    fn set_tick_period(&self, period: Duration) -> HostResult<()> {
        self.call()?.tick_period = Some(period);
        Ok(())
    }

    fn get_current_time(&self) -> HostResult<SystemTime> {
        Ok(self.call()?.now)
    }

    fn resume_stream(&self, stream: StreamType) -> HostResult<()> {
        self.call()?.resumed.push(stream);
        Ok(())
    }

    fn send_http_response(
        &self,
        status_code: u32,
        details: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        grpc_status: Option<i32>,
    ) -> HostResult<()> {
        self.call()?.local_responses.push(LocalResponse {
            status_code,
            details: details.to_string(),
            headers: owned_pairs(headers),
            body: body.map(<[u8]>::to_vec),
            grpc_status,
        });
        Ok(())
    }

    fn clear_route_cache(&self) -> HostResult<()> {
        self.call()?.route_cache_clears += 1;
        Ok(())
    }

    fn get_shared_data(&self, key: &str) -> HostResult<(Option<Vec<u8>>, Option<u32>)> {
        let state = self.call()?;
        Ok(match state.shared_data.get(key) {
            Some((value, cas)) => (Some(value.clone()), Some(*cas)),
            None => (None, None),
        })
    }

    fn set_shared_data(&self, key: &str, value: Option<&[u8]>, cas: Option<u32>) -> HostResult<()> {
        let mut state = self.call()?;
        let current = state.shared_data.get(key).map(|(_, cas)| *cas);
        if cas.is_some() && cas != current {
            return Err(Status::CasMismatch);
        }
        let next = current.map_or(1, |c| c.wrapping_add(1));
        state.shared_data.insert(key.to_string(), (value.unwrap_or_default().to_vec(), next));
        Ok(())
    }

    fn register_shared_queue(&self, name: &str) -> HostResult<u32> {
        let mut state = self.call()?;
        if let Some(index) = state.queues.iter().position(|(n, _)| n == name) {
            return Ok(index as u32 + 1);
        }
        state.queues.push((name.to_string(), VecDeque::new()));
        Ok(state.queues.len() as u32)
    }

    fn resolve_shared_queue(&self, _vm_id: &str, name: &str) -> HostResult<Option<u32>> {
        let state = self.call()?;
        Ok(state.queues.iter().position(|(n, _)| n == name).map(|index| index as u32 + 1))
    }

    fn enqueue_shared_queue(&self, queue_id: u32, value: Option<&[u8]>) -> HostResult<()> {
        let mut state = self.call()?;
        let queue = queue_slot(&mut state, queue_id)?;
        queue.push_back(value.unwrap_or_default().to_vec());
        Ok(())
    }

    fn dequeue_shared_queue(&self, queue_id: u32) -> HostResult<Option<Vec<u8>>> {
        let mut state = self.call()?;
        Ok(queue_slot(&mut state, queue_id)?.pop_front())
    }

    fn get_map_bytes(&self, map: MapType) -> HostResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.call()?;
        let pairs = state.maps.get(&map).map(Vec::as_slice).unwrap_or_default();
        Ok(pairs.iter().map(|(k, v)| (k.clone().into_bytes(), v.clone().into_bytes())).collect())
    }

    fn set_map(&self, map: MapType, pairs: &[(&str, &str)]) -> HostResult<()> {
        self.call()?.maps.insert(map, owned_pairs(pairs));
        Ok(())
    }

    fn get_map_value(&self, map: MapType, key: &str) -> HostResult<Option<String>> {
        let state = self.call()?;
        let value = state.maps.get(&map).and_then(|pairs| pairs.iter().find(|(k, _)| k == key)).map(|(_, v)| v.clone());
        Ok(value)
    }

    fn replace_map_value(&self, map: MapType, key: &str, value: &str) -> HostResult<()> {
        let mut state = self.call()?;
        let pairs = state.maps.entry(map).or_default();
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value.to_string(),
            None => pairs.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn add_map_value(&self, map: MapType, key: &str, value: &str) -> HostResult<()> {
        self.call()?.maps.entry(map).or_default().push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn remove_map_value(&self, map: MapType, key: &str) -> HostResult<()> {
        if let Some(pairs) = self.call()?.maps.get_mut(&map) {
            pairs.retain(|(k, _)| k != key);
        }
        Ok(())
    }

    fn get_map_size(&self, map: MapType) -> HostResult<usize> {
        let state = self.call()?;
        let pairs = state.maps.get(&map).map(Vec::as_slice).unwrap_or_default();
        Ok(codec::encode_pairs(pairs).len())
    }

    fn get_buffer(&self, buffer: BufferType, start: usize, max_size: usize) -> HostResult<Option<Vec<u8>>> {
        let state = self.call()?;
        let Some((bytes, _)) = state.buffers.get(&buffer) else {
            return Ok(None);
        };
        let start = start.min(bytes.len());
        let end = start.saturating_add(max_size).min(bytes.len());
        Ok(Some(bytes[start..end].to_vec()))
    }

    fn get_buffer_status(&self, buffer: BufferType) -> HostResult<BufferStatus> {
        let state = self.call()?;
        let (length, end_of_stream) = state.buffers.get(&buffer).map_or((0, false), |(bytes, eos)| (bytes.len(), *eos));
        Ok(BufferStatus { length, end_of_stream })
    }

    fn define_metric(&self, metric_type: MetricType, name: &str) -> HostResult<u32> {
        let mut state = self.call()?;
        if let Some(index) = state.metrics.iter().position(|m| m.name == name) {
            if state.metrics[index].metric_type != metric_type {
                return Err(Status::BadArgument);
            }
            return Ok(index as u32 + 1);
        }
        state.metrics.push(Metric {
            metric_type,
            name: name.to_string(),
            value: 0,
        });
        Ok(state.metrics.len() as u32)
    }

    fn increment_metric(&self, metric_id: u32, offset: i64) -> HostResult<()> {
        let mut state = self.call()?;
        let metric = metric_slot(&mut state, metric_id)?;
        if metric.metric_type == MetricType::Histogram {
            return Err(Status::BadArgument);
        }
        metric.value = metric.value.saturating_add_signed(offset);
        Ok(())
    }

    fn record_metric(&self, metric_id: u32, value: u64) -> HostResult<()> {
        let mut state = self.call()?;
        metric_slot(&mut state, metric_id)?.value = value;
        Ok(())
    }

    fn get_metric(&self, metric_id: u32) -> HostResult<u64> {
        let mut state = self.call()?;
        Ok(metric_slot(&mut state, metric_id)?.value)
    }

    fn dispatch_http_call(
        &self,
        upstream: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        trailers: &[(&str, &str)],
        timeout: Duration,
    ) -> HostResult<u32> {
        let mut state = self.call()?;
        let token = state.next_token;
        state.next_token += 1;
        state.http_calls.push(HttpCallRecord {
            token,
            upstream: upstream.to_string(),
            headers: owned_pairs(headers),
            body: body.map(<[u8]>::to_vec),
            trailers: owned_pairs(trailers),
            timeout,
        });
        Ok(token)
    }

    fn set_effective_context(&self, context_id: u32) -> HostResult<()> {
        self.call()?.effective_context = Some(context_id);
        Ok(())
    }
}

fn queue_slot(state: &mut MockState, queue_id: u32) -> HostResult<&mut VecDeque<Vec<u8>>> {
    let index = (queue_id as usize).checked_sub(1).ok_or(Status::NotFound)?;
    state.queues.get_mut(index).map(|(_, queue)| queue).ok_or(Status::NotFound)
}

fn metric_slot(state: &mut MockState, metric_id: u32) -> HostResult<&mut Metric> {
    let index = (metric_id as usize).checked_sub(1).ok_or(Status::NotFound)?;
    state.metrics.get_mut(index).ok_or(Status::NotFound)
}
