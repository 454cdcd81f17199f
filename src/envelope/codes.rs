//! Result codes carried in [`Response::result_code`](super::Response).

/// The call succeeded.
pub const SUCCESS: i32 = 0;

/// Generic failure reported by the engine.
pub const FAILED: i32 = 1;

/// The calling client, or the action named in the call, is not registered.
pub const NOT_REGISTERED: i32 = 2;

/// The request could not be decoded or carried invalid arguments.
pub const INVALID_REQUEST: i32 = 3;

/// The action is already owned by another client.
pub const CONFLICT: i32 = 4;

/// The engine is shutting down and will not process the call.
pub const SHUTTING_DOWN: i32 = 5;

/// A response was pushed back with no command awaiting acknowledgement.
pub const NO_PENDING_REQUEST: i32 = 6;

/// Message attached to successful responses.
pub const SUCCESS_MESSAGE: &str = "Succeeded";
