//! Protocol state, reset taxonomy, and the per-cycle status surface.

/// A connection's position in the Reset → Session → Connection → Parameter
/// → Data sequence (§4.5/§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsoeState {
    Reset,
    Session,
    Connection,
    Parameter,
    Data,
}

/// Who tore the connection down, as seen by the endpoint reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetEvent {
    /// No reset occurred on this cycle.
    None,
    /// This endpoint initiated the reset (local validation failure or
    /// `set_reset_request_flag()`).
    ByMaster,
    /// A Reset frame was received from the peer.
    BySlave,
}

/// Wire-level reset reason codes (§6). Values for the fixed taxonomy match
/// the specification exactly; `DeviceSpecific` covers the `0x80..=0xFF`
/// range reserved for `verify_parameters` return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    LocalReset,
    InvalidCmd,
    UnknownCmd,
    InvalidConnId,
    InvalidCrc,
    WdExpired,
    InvalidAddress,
    InvalidData,
    InvalidCompaLen,
    InvalidCompa,
    InvalidUserParaLen,
    InvalidUserPara,
    DeviceSpecific(u8),
}

impl ResetReason {
    /// Encode as the wire byte carried in a Reset frame's payload.
    pub const fn wire_value(self) -> u8 {
        match self {
            ResetReason::LocalReset => 0,
            ResetReason::InvalidCmd => 1,
            ResetReason::UnknownCmd => 2,
            ResetReason::InvalidConnId => 3,
            ResetReason::InvalidCrc => 4,
            ResetReason::WdExpired => 5,
            ResetReason::InvalidAddress => 6,
            ResetReason::InvalidData => 7,
            ResetReason::InvalidCompaLen => 8,
            ResetReason::InvalidCompa => 9,
            ResetReason::InvalidUserParaLen => 10,
            ResetReason::InvalidUserPara => 11,
            ResetReason::DeviceSpecific(v) => v,
        }
    }

    /// Decode a wire byte back into a reason. Unrecognised values below
    /// `0x80` are folded into `UnknownCmd` rather than panicking; a
    /// corrupted Reset frame is still just a Reset frame.
    pub const fn from_wire(v: u8) -> ResetReason {
        match v {
            0 => ResetReason::LocalReset,
            1 => ResetReason::InvalidCmd,
            2 => ResetReason::UnknownCmd,
            3 => ResetReason::InvalidConnId,
            4 => ResetReason::InvalidCrc,
            5 => ResetReason::WdExpired,
            6 => ResetReason::InvalidAddress,
            7 => ResetReason::InvalidData,
            8 => ResetReason::InvalidCompaLen,
            9 => ResetReason::InvalidCompa,
            10 => ResetReason::InvalidUserParaLen,
            11 => ResetReason::InvalidUserPara,
            v if v >= 0x80 => ResetReason::DeviceSpecific(v),
            _ => ResetReason::UnknownCmd,
        }
    }
}

/// Result of the slave's `verify_parameters` collaborator call (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamVerifyResult {
    Ok,
    BadTimeout,
    BadAppParameter,
    DeviceSpecific(u8),
}

impl ParamVerifyResult {
    /// The reset reason a non-`Ok` result maps to, if any.
    pub const fn reset_reason(self) -> Option<ResetReason> {
        match self {
            ParamVerifyResult::Ok => None,
            ParamVerifyResult::BadTimeout => Some(ResetReason::InvalidCompa),
            ParamVerifyResult::BadAppParameter => Some(ResetReason::InvalidUserPara),
            ParamVerifyResult::DeviceSpecific(v) => Some(ResetReason::DeviceSpecific(v)),
        }
    }
}

/// The status snapshot exposed after every `sync_with_master`/`sync_with_slave`
/// tick (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub current_state: FsoeState,
    pub is_process_data_received: bool,
    pub reset_event: ResetEvent,
    pub reset_reason: Option<ResetReason>,
}

/// Programmer-error taxonomy (§7), distinct from protocol-level resets.
/// Surfaced both as an `Err` return and through `ErrorSink::handle_user_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    /// The caller's `outputs`/`inputs` slice length doesn't match the
    /// configured process-data size.
    OutputsSizeMismatch { expected: usize, got: usize },
    InputsSizeMismatch { expected: usize, got: usize },
    AppParamsSizeMismatch { expected: usize, got: usize },
    /// A query was made that is only meaningful once the connection has
    /// progressed far enough (e.g. reading the peer's session id before
    /// it has been received).
    WrongState { expected_at_least: FsoeState, actual: FsoeState },
}
