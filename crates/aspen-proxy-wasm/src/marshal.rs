//! Memory marshalling across the proxy-wasm boundary.
//!
//! Variable-length results come back through an [`OutputSlot`]: the guest
//! passes the address of a data pointer and the address of a size, the host
//! allocates a buffer through `proxy_on_memory_allocate` (backed by
//! [`allocate`]) and writes both fields. The guest then converts the slot into
//! an owned `Vec<u8>` exactly once, which also releases the host allocation.
//!
//! Fixed-size results use a [`ScalarCell`]. Both are created per call so no
//! scratch state is shared between calls.

use std::ptr;
use std::time::Duration;

use crate::error::HostResult;
use crate::error::Status;

/// Allocate `size` bytes for the host.
///
/// The allocation is an exact-size boxed slice so that [`OutputSlot::take`]
/// can rebuild and free it without knowing anything but the size.
pub fn allocate(size: usize) -> *mut u8 {
    let buffer = vec![0u8; size].into_boxed_slice();
    Box::into_raw(buffer) as *mut u8
}

/// Reclaim an allocation made by [`allocate`] as an owned vector.
///
/// # Safety
///
/// `data` must come from [`allocate`] with exactly `size` bytes and must not
/// have been reclaimed before.
unsafe fn reclaim(data: *mut u8, size: usize) -> Vec<u8> {
    // SAFETY: the caller guarantees `data`/`size` describe a live boxed slice.
    unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(data, size)) }.into_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Pointers may have been handed out; contents not read yet.
    Open,
    /// Converted once. Any further conversion is a programming error.
    Consumed,
}

/// Out-parameter pair receiving a host-allocated buffer.
#[derive(Debug)]
pub struct OutputSlot {
    data: *mut u8,
    size: usize,
    state: SlotState,
}

impl Default for OutputSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSlot {
    /// Create an empty slot with a null data pointer.
    pub fn new() -> Self {
        Self {
            data: ptr::null_mut(),
            size: 0,
            state: SlotState::Open,
        }
    }

    /// Address the callee writes the buffer pointer into.
    pub fn data_ptr(&mut self) -> *mut *mut u8 {
        &mut self.data
    }

    /// Address the callee writes the buffer length into.
    pub fn size_ptr(&mut self) -> *mut usize {
        &mut self.size
    }

    /// Whether the slot has been read.
    pub fn is_consumed(&self) -> bool {
        self.state == SlotState::Consumed
    }

    /// Convert the filled slot into an owned buffer and release the host allocation.
    ///
    /// Returns `None` when the callee left the data pointer null. The slot is
    /// poisoned afterwards; calling `take` again panics.
    ///
    /// # Safety
    ///
    /// A non-null data pointer must have been produced by [`allocate`] with the
    /// size written alongside it.
    pub unsafe fn take(&mut self) -> Option<Vec<u8>> {
        if self.state == SlotState::Consumed {
            panic!("output slot converted twice");
        }
        self.state = SlotState::Consumed;
        let data = std::mem::replace(&mut self.data, ptr::null_mut());
        let size = std::mem::replace(&mut self.size, usize::MAX);
        if data.is_null() {
            return None;
        }
        // SAFETY: upheld by the caller; the slot no longer references `data`.
        Some(unsafe { reclaim(data, size) })
    }
}

impl Drop for OutputSlot {
    fn drop(&mut self) {
        // A failed call may still have filled the slot; release it once.
        if self.state == SlotState::Open && !self.data.is_null() {
            // SAFETY: only `allocate` hands pointers to the host.
            drop(unsafe { reclaim(self.data, self.size) });
        }
    }
}

/// Single-value out-parameter for fixed-size results.
#[derive(Debug, Default)]
pub struct ScalarCell<T: Copy + Default> {
    value: T,
}

impl<T: Copy + Default> ScalarCell<T> {
    /// Create a cell holding `T::default()`.
    pub fn new() -> Self {
        Self { value: T::default() }
    }

    /// Address the callee writes the value into.
    pub fn as_mut_ptr(&mut self) -> *mut T {
        &mut self.value
    }

    /// Value written by the callee, or the default if it wrote nothing.
    pub fn get(&self) -> T {
        self.value
    }
}

/// Run a boundary call that returns a variable-length buffer.
///
/// `call` receives the slot addresses and returns the raw status. On a
/// non-`Ok` status nothing is read and any partial allocation is released.
pub fn call_with_slot<F>(call: F) -> HostResult<Option<Vec<u8>>>
where F: FnOnce(*mut *mut u8, *mut usize) -> u32 {
    let mut slot = OutputSlot::new();
    let raw = call(slot.data_ptr(), slot.size_ptr());
    Status::check(raw)?;
    // SAFETY: the host fills slots only with buffers from `allocate`.
    Ok(unsafe { slot.take() })
}

/// Run a boundary call that returns one fixed-size value.
pub fn call_with_scalar<T, F>(call: F) -> HostResult<T>
where
    T: Copy + Default,
    F: FnOnce(*mut T) -> u32,
{
    let mut cell = ScalarCell::<T>::new();
    Status::check(call(cell.as_mut_ptr()))?;
    Ok(cell.get())
}

/// Decode a host buffer as UTF-8.
pub fn to_utf8(bytes: Vec<u8>) -> HostResult<String> {
    String::from_utf8(bytes).map_err(|e| {
        tracing::warn!(error = %e, "host returned invalid UTF-8");
        Status::ParseFailure
    })
}

/// Encode a property path: segments joined by a single NUL byte.
pub fn encode_property_path(path: &[&str]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(path.iter().map(|s| s.len() + 1).sum());
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            encoded.push(0);
        }
        encoded.extend_from_slice(segment.as_bytes());
    }
    encoded
}

/// Pointer/length of optional bytes; `None` is a null pointer.
pub fn optional(value: Option<&[u8]>) -> (*const u8, usize) {
    match value {
        Some(bytes) => (bytes.as_ptr(), bytes.len()),
        None => (ptr::null(), 0),
    }
}

/// Milliseconds for a timeout or period argument, saturating at `u32::MAX`.
pub fn saturating_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Treat `absent` as a missing value. Other statuses pass through.
pub fn absent_as_none<T>(absent: Status, result: HostResult<Option<T>>) -> HostResult<Option<T>> {
    match result {
        Err(status) if status == absent => Ok(None),
        other => other,
    }
}
