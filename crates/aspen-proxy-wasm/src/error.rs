//! Boundary status codes and fatal escalation.
//!
//! Two tiers of failure exist:
//!
//! - **Expected conditions** (missing property, stale token, rejected call)
//!   surface as `Err(Status)` to the immediate caller.
//! - **Protocol violations** (a must-succeed call failed, an unknown context
//!   id, a missing root factory) go through [`fatal`], which logs at
//!   `Critical` on the host and then panics. Inside the sandbox a panic is a
//!   trap, so the host tears the module down.

use crate::host::Host;
use crate::types::LogLevel;

/// Status code returned by every boundary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u32)]
pub enum Status {
    #[error("ok")]
    Ok = 0,
    #[error("not found")]
    NotFound = 1,
    #[error("bad argument")]
    BadArgument = 2,
    #[error("serialization failure")]
    SerializationFailure = 3,
    #[error("parse failure")]
    ParseFailure = 4,
    #[error("bad expression")]
    BadExpression = 5,
    #[error("invalid memory access")]
    InvalidMemoryAccess = 6,
    #[error("empty")]
    Empty = 7,
    #[error("cas mismatch")]
    CasMismatch = 8,
    #[error("result mismatch")]
    ResultMismatch = 9,
    #[error("internal failure")]
    InternalFailure = 10,
    #[error("broken connection")]
    BrokenConnection = 11,
}

impl Status {
    /// Decode a raw status. Codes outside the closed set become `InternalFailure`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Status::Ok,
            1 => Status::NotFound,
            2 => Status::BadArgument,
            3 => Status::SerializationFailure,
            4 => Status::ParseFailure,
            5 => Status::BadExpression,
            6 => Status::InvalidMemoryAccess,
            7 => Status::Empty,
            8 => Status::CasMismatch,
            9 => Status::ResultMismatch,
            10 => Status::InternalFailure,
            11 => Status::BrokenConnection,
            other => {
                tracing::error!(status = other, "host returned unknown status code");
                Status::InternalFailure
            }
        }
    }

    /// Turn a raw status into a `Result`, `Ok` being the only success.
    pub fn check(raw: u32) -> Result<(), Status> {
        match Status::from_raw(raw) {
            Status::Ok => Ok(()),
            status => Err(status),
        }
    }
}

/// Result of a boundary call.
pub type HostResult<T> = Result<T, Status>;

/// Escalate a protocol violation: critical log on the host, then abort.
pub fn fatal(host: &dyn Host, message: &str) -> ! {
    // The host may already be unusable; the panic below is what matters.
    let _ = host.log(LogLevel::Critical, message);
    tracing::error!(reason = %message, "fatal proxy-wasm protocol violation");
    panic!("{message}");
}

/// Unwrap a must-succeed call or escalate through [`fatal`].
pub fn expect_ok<T>(host: &dyn Host, operation: &str, result: HostResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(status) => fatal(host, &format!("{operation} failed: {status}")),
    }
}
