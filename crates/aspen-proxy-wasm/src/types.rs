//! Numeric enumerations shared with the proxy host.
//!
//! Every value crossing the boundary is a plain `u32`. The discriminants
//! below are the host's numbering and must not be reordered.

/// Severity of a message sent to the host log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    /// Decode a level reported by the host. Values above `Critical` clamp to it.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Critical,
        }
    }
}

/// Verdict returned from stream hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Action {
    /// Let the host continue processing the stream.
    #[default]
    Continue = 0,
    /// Stop iteration until the module resumes the stream.
    Pause = 1,
}

/// Which side closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PeerType {
    Unknown = 0,
    Local = 1,
    Remote = 2,
}

impl PeerType {
    /// Decode the host's peer value; unknown values map to `Unknown`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => PeerType::Local,
            2 => PeerType::Remote,
            _ => PeerType::Unknown,
        }
    }
}

/// Header and trailer maps addressable through the map calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MapType {
    HttpRequestHeaders = 0,
    HttpRequestTrailers = 1,
    HttpResponseHeaders = 2,
    HttpResponseTrailers = 3,
    GrpcReceiveInitialMetadata = 4,
    GrpcReceiveTrailingMetadata = 5,
    HttpCallResponseHeaders = 6,
    HttpCallResponseTrailers = 7,
}

/// Byte buffers addressable through the buffer calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BufferType {
    HttpRequestBody = 0,
    HttpResponseBody = 1,
    DownstreamData = 2,
    UpstreamData = 3,
    HttpCallResponseBody = 4,
    GrpcReceiveBuffer = 5,
    VmConfiguration = 6,
    PluginConfiguration = 7,
}

/// Stream direction passed to `proxy_continue_stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StreamType {
    HttpRequest = 0,
    HttpResponse = 1,
    Downstream = 2,
    Upstream = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MetricType {
    Counter = 0,
    Gauge = 1,
    Histogram = 2,
}

/// Length and end-of-stream flag of a host buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStatus {
    pub length: usize,
    pub end_of_stream: bool,
}

/// Flag bit set in `proxy_get_buffer_status` when the buffer is complete.
pub const BUFFER_FLAG_END_OF_STREAM: u32 = 0x1;

/// Property holding the name of the root context to instantiate.
pub const PLUGIN_ROOT_ID_PROPERTY: &str = "plugin_root_id";
