//! Raw `proxy_*` imports and the [`Host`] implementation built on them.
//!
//! Only compiled for `wasm32`. Every call packs its arguments as
//! pointer/length pairs, receives variable-length results through
//! [`marshal::call_with_slot`] and fixed-size ones through
//! [`marshal::call_with_scalar`], then maps the status code. Statuses that
//! mean "absent" for a given call (`NotFound`, `Empty` for queues) become
//! `Ok(None)`.

use std::time::Duration;
use std::time::SystemTime;

use crate::codec;
use crate::error::HostResult;
use crate::error::Status;
use crate::host::Host;
use crate::host::serialize_headers;
use crate::marshal;
use crate::marshal::ScalarCell;
use crate::marshal::absent_as_none;
use crate::marshal::optional;
use crate::marshal::saturating_millis;
use crate::types::BUFFER_FLAG_END_OF_STREAM;
use crate::types::BufferStatus;
use crate::types::BufferType;
use crate::types::LogLevel;
use crate::types::MapType;
use crate::types::MetricType;
use crate::types::StreamType;

unsafe extern "C" {
    fn proxy_log(level: u32, message_data: *const u8, message_size: usize) -> u32;
    fn proxy_get_log_level(return_level: *mut u32) -> u32;
    fn proxy_get_status(
        return_code: *mut u32,
        return_message_data: *mut *mut u8,
        return_message_size: *mut usize,
    ) -> u32;
    fn proxy_set_tick_period_milliseconds(period: u32) -> u32;
    fn proxy_get_current_time_nanoseconds(return_time: *mut u64) -> u32;

    fn proxy_get_property(
        path_data: *const u8,
        path_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
    ) -> u32;
    fn proxy_set_property(path_data: *const u8, path_size: usize, value_data: *const u8, value_size: usize) -> u32;

    fn proxy_continue_stream(stream_type: u32) -> u32;
    fn proxy_send_local_response(
        status_code: u32,
        status_code_details_data: *const u8,
        status_code_details_size: usize,
        body_data: *const u8,
        body_size: usize,
        headers_data: *const u8,
        headers_size: usize,
        grpc_status: i32,
    ) -> u32;
    fn proxy_clear_route_cache() -> u32;

    fn proxy_get_shared_data(
        key_data: *const u8,
        key_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
        return_cas: *mut u32,
    ) -> u32;
    fn proxy_set_shared_data(
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
        cas: u32,
    ) -> u32;
    fn proxy_register_shared_queue(name_data: *const u8, name_size: usize, return_id: *mut u32) -> u32;
    fn proxy_resolve_shared_queue(
        vm_id_data: *const u8,
        vm_id_size: usize,
        name_data: *const u8,
        name_size: usize,
        return_id: *mut u32,
    ) -> u32;
    fn proxy_enqueue_shared_queue(queue_id: u32, value_data: *const u8, value_size: usize) -> u32;
    fn proxy_dequeue_shared_queue(queue_id: u32, return_value_data: *mut *mut u8, return_value_size: *mut usize) -> u32;

    fn proxy_get_header_map_pairs(map_type: u32, return_map_data: *mut *mut u8, return_map_size: *mut usize) -> u32;
    fn proxy_set_header_map_pairs(map_type: u32, map_data: *const u8, map_size: usize) -> u32;
    fn proxy_get_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
    ) -> u32;
    fn proxy_replace_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
    ) -> u32;
    fn proxy_add_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
    ) -> u32;
    fn proxy_remove_header_map_value(map_type: u32, key_data: *const u8, key_size: usize) -> u32;
    fn proxy_get_header_map_size(map_type: u32, return_size: *mut usize) -> u32;

    fn proxy_get_buffer_bytes(
        buffer_type: u32,
        start: usize,
        max_size: usize,
        return_buffer_data: *mut *mut u8,
        return_buffer_size: *mut usize,
    ) -> u32;
    fn proxy_get_buffer_status(buffer_type: u32, return_buffer_size: *mut usize, return_flags: *mut u32) -> u32;

    fn proxy_define_metric(metric_type: u32, name_data: *const u8, name_size: usize, return_id: *mut u32) -> u32;
    fn proxy_increment_metric(metric_id: u32, offset: i64) -> u32;
    fn proxy_record_metric(metric_id: u32, value: u64) -> u32;
    fn proxy_get_metric(metric_id: u32, return_value: *mut u64) -> u32;

    fn proxy_http_call(
        upstream_data: *const u8,
        upstream_size: usize,
        headers_data: *const u8,
        headers_size: usize,
        body_data: *const u8,
        body_size: usize,
        trailers_data: *const u8,
        trailers_size: usize,
        timeout_milliseconds: u32,
        return_token: *mut u32,
    ) -> u32;

    fn proxy_set_effective_context(context_id: u32) -> u32;
}

/// The host the module is loaded into.
///
/// Stateless: every method is a direct boundary call. Pointers passed to
/// the host reference locals or borrowed arguments that outlive the call.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbiHost;

impl Host for AbiHost {
    fn log(&self, level: LogLevel, message: &str) -> HostResult<()> {
        Status::check(unsafe { proxy_log(level as u32, message.as_ptr(), message.len()) })
    }

    fn get_log_level(&self) -> HostResult<LogLevel> {
        let raw = marshal::call_with_scalar(|level| unsafe { proxy_get_log_level(level) })?;
        Ok(LogLevel::from_raw(raw))
    }

    fn get_status(&self) -> HostResult<(u32, Option<Vec<u8>>)> {
        let mut code = ScalarCell::<u32>::new();
        let message = marshal::call_with_slot(|data, size| unsafe { proxy_get_status(code.as_mut_ptr(), data, size) })?;
        Ok((code.get(), message))
    }

    fn get_property(&self, path: &[&str]) -> HostResult<Option<Vec<u8>>> {
        let path = marshal::encode_property_path(path);
        let result =
            marshal::call_with_slot(|data, size| unsafe { proxy_get_property(path.as_ptr(), path.len(), data, size) });
        absent_as_none(Status::NotFound, result)
    }

    fn set_property(&self, path: &[&str], value: Option<&[u8]>) -> HostResult<()> {
        let path = marshal::encode_property_path(path);
        let (value_data, value_size) = optional(value);
        Status::check(unsafe { proxy_set_property(path.as_ptr(), path.len(), value_data, value_size) })
    }

    fn set_tick_period(&self, period: Duration) -> HostResult<()> {
        Status::check(unsafe { proxy_set_tick_period_milliseconds(saturating_millis(period)) })
    }

    fn get_current_time(&self) -> HostResult<SystemTime> {
        let nanos = marshal::call_with_scalar(|time| unsafe { proxy_get_current_time_nanoseconds(time) })?;
        Ok(SystemTime::UNIX_EPOCH + Duration::from_nanos(nanos))
    }

    fn resume_stream(&self, stream: StreamType) -> HostResult<()> {
        Status::check(unsafe { proxy_continue_stream(stream as u32) })
    }

    fn send_http_response(
        &self,
        status_code: u32,
        details: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        grpc_status: Option<i32>,
    ) -> HostResult<()> {
        let headers = serialize_headers(headers);
        let (body_data, body_size) = optional(body);
        Status::check(unsafe {
            proxy_send_local_response(
                status_code,
                details.as_ptr(),
                details.len(),
                body_data,
                body_size,
                headers.as_ptr(),
                headers.len(),
                grpc_status.unwrap_or(-1),
            )
        })
    }

    fn clear_route_cache(&self) -> HostResult<()> {
        Status::check(unsafe { proxy_clear_route_cache() })
    }

    fn get_shared_data(&self, key: &str) -> HostResult<(Option<Vec<u8>>, Option<u32>)> {
        let mut cas = ScalarCell::<u32>::new();
        let result = marshal::call_with_slot(|data, size| unsafe {
            proxy_get_shared_data(key.as_ptr(), key.len(), data, size, cas.as_mut_ptr())
        });
        match result {
            Ok(value) => Ok((value, Some(cas.get()))),
            Err(Status::NotFound) => Ok((None, None)),
            Err(status) => Err(status),
        }
    }

    fn set_shared_data(&self, key: &str, value: Option<&[u8]>, cas: Option<u32>) -> HostResult<()> {
        let (value_data, value_size) = optional(value);
        Status::check(unsafe {
            proxy_set_shared_data(key.as_ptr(), key.len(), value_data, value_size, cas.unwrap_or(0))
        })
    }

    fn register_shared_queue(&self, name: &str) -> HostResult<u32> {
        marshal::call_with_scalar(|id| unsafe { proxy_register_shared_queue(name.as_ptr(), name.len(), id) })
    }

    fn resolve_shared_queue(&self, vm_id: &str, name: &str) -> HostResult<Option<u32>> {
        let result = marshal::call_with_scalar(|id| unsafe {
            proxy_resolve_shared_queue(vm_id.as_ptr(), vm_id.len(), name.as_ptr(), name.len(), id)
        });
        absent_as_none(Status::NotFound, result.map(Some))
    }

    fn enqueue_shared_queue(&self, queue_id: u32, value: Option<&[u8]>) -> HostResult<()> {
        let (value_data, value_size) = optional(value);
        Status::check(unsafe { proxy_enqueue_shared_queue(queue_id, value_data, value_size) })
    }

    fn dequeue_shared_queue(&self, queue_id: u32) -> HostResult<Option<Vec<u8>>> {
        let result = marshal::call_with_slot(|data, size| unsafe { proxy_dequeue_shared_queue(queue_id, data, size) });
        absent_as_none(Status::Empty, result)
    }

    fn get_map_bytes(&self, map: MapType) -> HostResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let encoded =
            marshal::call_with_slot(|data, size| unsafe { proxy_get_header_map_pairs(map as u32, data, size) })?;
        match encoded {
            Some(bytes) => codec::decode_pairs(&bytes),
            None => Ok(Vec::new()),
        }
    }

    fn set_map(&self, map: MapType, pairs: &[(&str, &str)]) -> HostResult<()> {
        let encoded = serialize_headers(pairs);
        Status::check(unsafe { proxy_set_header_map_pairs(map as u32, encoded.as_ptr(), encoded.len()) })
    }

    fn get_map_value(&self, map: MapType, key: &str) -> HostResult<Option<String>> {
        let result = marshal::call_with_slot(|data, size| unsafe {
            proxy_get_header_map_value(map as u32, key.as_ptr(), key.len(), data, size)
        });
        absent_as_none(Status::NotFound, result)?.map(marshal::to_utf8).transpose()
    }

    fn replace_map_value(&self, map: MapType, key: &str, value: &str) -> HostResult<()> {
        Status::check(unsafe {
            proxy_replace_header_map_value(map as u32, key.as_ptr(), key.len(), value.as_ptr(), value.len())
        })
    }

    fn add_map_value(&self, map: MapType, key: &str, value: &str) -> HostResult<()> {
        Status::check(unsafe {
            proxy_add_header_map_value(map as u32, key.as_ptr(), key.len(), value.as_ptr(), value.len())
        })
    }

    fn remove_map_value(&self, map: MapType, key: &str) -> HostResult<()> {
        Status::check(unsafe { proxy_remove_header_map_value(map as u32, key.as_ptr(), key.len()) })
    }

    fn get_map_size(&self, map: MapType) -> HostResult<usize> {
        marshal::call_with_scalar(|size| unsafe { proxy_get_header_map_size(map as u32, size) })
    }

    fn get_buffer(&self, buffer: BufferType, start: usize, max_size: usize) -> HostResult<Option<Vec<u8>>> {
        let result = marshal::call_with_slot(|data, size| unsafe {
            proxy_get_buffer_bytes(buffer as u32, start, max_size, data, size)
        });
        absent_as_none(Status::NotFound, result)
    }

    fn get_buffer_status(&self, buffer: BufferType) -> HostResult<BufferStatus> {
        let mut flags = ScalarCell::<u32>::new();
        let length = marshal::call_with_scalar(|size| unsafe {
            proxy_get_buffer_status(buffer as u32, size, flags.as_mut_ptr())
        })?;
        Ok(BufferStatus {
            length,
            end_of_stream: flags.get() & BUFFER_FLAG_END_OF_STREAM != 0,
        })
    }

    fn define_metric(&self, metric_type: MetricType, name: &str) -> HostResult<u32> {
        marshal::call_with_scalar(|id| unsafe {
            proxy_define_metric(metric_type as u32, name.as_ptr(), name.len(), id)
        })
    }

    fn increment_metric(&self, metric_id: u32, offset: i64) -> HostResult<()> {
        Status::check(unsafe { proxy_increment_metric(metric_id, offset) })
    }

    fn record_metric(&self, metric_id: u32, value: u64) -> HostResult<()> {
        Status::check(unsafe { proxy_record_metric(metric_id, value) })
    }

    fn get_metric(&self, metric_id: u32) -> HostResult<u64> {
        marshal::call_with_scalar(|value| unsafe { proxy_get_metric(metric_id, value) })
    }

    fn dispatch_http_call(
        &self,
        upstream: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        trailers: &[(&str, &str)],
        timeout: Duration,
    ) -> HostResult<u32> {
        let headers = serialize_headers(headers);
        let trailers = serialize_headers(trailers);
        let (body_data, body_size) = optional(body);
        marshal::call_with_scalar(|token| unsafe {
            proxy_http_call(
                upstream.as_ptr(),
                upstream.len(),
                headers.as_ptr(),
                headers.len(),
                body_data,
                body_size,
                trailers.as_ptr(),
                trailers.len(),
                saturating_millis(timeout),
                token,
            )
        })
    }

    fn set_effective_context(&self, context_id: u32) -> HostResult<()> {
        Status::check(unsafe { proxy_set_effective_context(context_id) })
    }
}
