//! Fail-Safe over EtherCAT (FSoE) master/slave protocol core.
//!
//! This crate implements the black-channel-agnostic part of an FSoE
//! connection: the Reset → Session → Connection → Parameter → Data
//! state machine, its frame codec, CRC engine, and watchdog, for both
//! the master and slave roles. It does not touch an EtherCAT stack, a
//! network socket, or any hardware register directly — callers supply
//! those through the small collaborator traits in [`channel`], the same
//! way the rest of this crate's ancestry drives its hardware through
//! `embedded-hal`-style traits rather than baking in one transport.
//!
//! ```ignore
//! let master = FsoeMaster::init(master_config, my_env)?;
//! loop {
//!     let status = master.sync(&outputs, &mut inputs)?;
//!     // act on status.current_state / status.reset_event
//! }
//! ```
//!
//! Every frame in a connection is authenticated by a per-frame, rolling
//! CRC-16 in [`crc`], seeded by the previous frame's output. [`sra`] is a
//! separate, optional CRC-32 primitive this crate exposes but never calls
//! itself: an integrator can use it to checksum an application-parameter
//! blob before handing it to [`master::FsoeMaster::set_application_parameters`],
//! the same way the wire protocol treats those bytes as opaque. Frames
//! never allocate; buffers are fixed-capacity arrays (`frame`) or
//! [`heapless`] vectors (process data, application parameters) sized by
//! the constants in [`config`].

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod channel;
pub mod config;
mod crc;
pub mod frame;
pub mod master;
pub mod slave;
pub mod sra;
pub mod status;
mod watchdog;
mod xfer;

pub use config::{
    ConfigError, ConnectionConfig, MasterConfig, SlaveConfig, FSOE_APPLICATION_PARAMETERS_MAX_SIZE,
    FSOE_PROCESS_DATA_MAX_SIZE, FSOE_SAFE_PARA_HEADER_SIZE, FSOE_SAFE_PARA_MAX_SIZE,
};
pub use master::{FsoeMaster, MasterEnv};
pub use slave::{FsoeSlave, SlaveEnv};
pub use status::{ApiError, FsoeState, ParamVerifyResult, ResetEvent, ResetReason, SyncStatus};
pub use watchdog::Watchdog;
