//! The master-role state machine (§4.5): drives Reset → Session →
//! Connection → Parameter → Data, originates session ids and connection
//! parameters, and is the side that decides when to fall back to Reset.

use crate::channel::{BlackChannel, Clock, EntropySource, ErrorSink};
use crate::config::{
    ConnectionConfig, ConfigError, MasterConfig, CONN_DATA_SIZE, FSOE_PROCESS_DATA_MAX_SIZE,
    FSOE_SAFE_PARA_HEADER_SIZE, FSOE_SAFE_PARA_MAX_SIZE,
};
use crate::frame::{self, pack_cmd_byte, Command, DecodedFrame, Frame};
use crate::status::{ApiError, FsoeState, ResetEvent, ResetReason, SyncStatus};
use crate::watchdog::Watchdog;
use crate::xfer::ChunkCursor;
use fugit::ExtU32;

/// Bundle of collaborators a master needs. Implemented automatically for
/// any type that implements the four individual roles, so integrators
/// write one concrete type instead of wiring four generic parameters.
pub trait MasterEnv: BlackChannel + Clock + EntropySource + ErrorSink {}
impl<T: BlackChannel + Clock + EntropySource + ErrorSink> MasterEnv for T {}

struct ResetOutcome {
    event: ResetEvent,
    reason: ResetReason,
}

/// The master-role connection state machine.
pub struct FsoeMaster<E: MasterEnv> {
    env: E,
    config: MasterConfig,
    state: FsoeState,

    watchdog: Watchdog,
    reset_frame_sent: bool,
    pending_reset_request: bool,
    last_reset: Option<ResetOutcome>,

    local_crc_seed: u16,
    peer_crc_seed: u16,
    local_seq: u8,
    peer_seq_bit: Option<u8>,

    master_session_id: u16,
    slave_session_id_bytes: [u8; 2],
    tx_cursor: ChunkCursor,
    rx_cursor: ChunkCursor,

    conn_payload: [u8; CONN_DATA_SIZE],
    param_payload: heapless::Vec<u8, FSOE_SAFE_PARA_MAX_SIZE>,

    last_inputs: heapless::Vec<u8, FSOE_PROCESS_DATA_MAX_SIZE>,
    is_process_data_received: bool,
    process_data_enabled: bool,

    send_frame: Frame,
    recv_frame: Frame,
}

impl<E: MasterEnv> FsoeMaster<E> {
    /// Validate `config` and construct a master in the Reset state. No
    /// invalid-but-constructed instance exists: a bad configuration
    /// never produces an `FsoeMaster` at all.
    pub fn init(config: MasterConfig, env: E) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        // watchdog_timeout_ms is validated above to fit u16; this carries it
        // into the `SafePara` header sent to the slave during Parameter.
        let watchdog_ms = config.watchdog_timeout_ms as u16;
        let mut param_payload: heapless::Vec<u8, FSOE_SAFE_PARA_MAX_SIZE> = heapless::Vec::new();
        param_payload.extend_from_slice(&2u16.to_le_bytes()).ok();
        param_payload.extend_from_slice(&watchdog_ms.to_le_bytes()).ok();
        param_payload
            .extend_from_slice(&(config.connection.app_params_size as u16).to_le_bytes())
            .ok();
        param_payload
            .resize(FSOE_SAFE_PARA_HEADER_SIZE + config.connection.app_params_size, 0)
            .ok();
        Ok(FsoeMaster {
            env,
            watchdog: Watchdog::new(config.watchdog_timeout_ms.millis()),
            config,
            state: FsoeState::Reset,
            reset_frame_sent: false,
            pending_reset_request: false,
            last_reset: None,
            local_crc_seed: 0,
            peer_crc_seed: 0,
            local_seq: 0,
            peer_seq_bit: None,
            master_session_id: 0,
            slave_session_id_bytes: [0; 2],
            tx_cursor: ChunkCursor::new(0),
            rx_cursor: ChunkCursor::new(0),
            conn_payload: [0; CONN_DATA_SIZE],
            param_payload,
            last_inputs: heapless::Vec::new(),
            is_process_data_received: false,
            process_data_enabled: false,
            send_frame: Frame::new(),
            recv_frame: Frame::new(),
        })
    }

    pub fn state(&self) -> FsoeState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config.connection
    }

    /// Supply the application parameters sent to the slave during the
    /// Parameter state. Must be called with exactly `app_params_size`
    /// bytes. Safe to call repeatedly (e.g. to update before a
    /// reconnect); until called, zero-filled parameters are sent.
    pub fn set_application_parameters(&mut self, params: &[u8]) -> Result<(), ApiError> {
        if params.len() != self.config.connection.app_params_size {
            let err = ApiError::AppParamsSizeMismatch {
                expected: self.config.connection.app_params_size,
                got: params.len(),
            };
            self.env.handle_user_error(err);
            return Err(err);
        }
        self.param_payload[FSOE_SAFE_PARA_HEADER_SIZE..].copy_from_slice(params);
        Ok(())
    }

    /// Request the connection be torn down and re-established on the
    /// next cycle (§4.5 "reset initiation").
    pub fn request_reset(&mut self) {
        self.pending_reset_request = true;
    }

    /// Enable or disable transmission of live process data in the Data
    /// state. While disabled (the default, and the state after every
    /// reset), every frame sent in Data carries `Command::FailSafeData`
    /// with an all-zero payload instead of `outputs` (§4.5.5, §8).
    pub fn set_process_data_enabled(&mut self, enabled: bool) {
        self.process_data_enabled = enabled;
    }

    /// The session id last observed from the peer. Only meaningful once
    /// the connection has passed the Session state.
    pub fn peer_session_id(&self) -> Result<u16, ApiError> {
        if matches!(self.state, FsoeState::Reset | FsoeState::Session) {
            return Err(ApiError::WrongState {
                expected_at_least: FsoeState::Connection,
                actual: self.state,
            });
        }
        Ok(u16::from_le_bytes(self.slave_session_id_bytes))
    }

    fn chunk_size(&self) -> usize {
        self.config.connection.outputs_size
    }

    fn enter_reset(&mut self, reason: ResetReason, event: ResetEvent) {
        self.state = FsoeState::Reset;
        self.watchdog.disarm();
        self.reset_frame_sent = false;
        self.local_crc_seed = 0;
        self.peer_crc_seed = 0;
        self.local_seq = 0;
        self.peer_seq_bit = None;
        self.tx_cursor = ChunkCursor::new(0);
        self.rx_cursor = ChunkCursor::new(0);
        self.process_data_enabled = false;
        self.last_reset = Some(ResetOutcome { event, reason });
    }

    fn next_seq(&mut self) -> u8 {
        let s = self.local_seq;
        self.local_seq = self.local_seq.wrapping_add(1);
        s
    }

    fn send(&mut self, cmd: Command, payload: &[u8], aux: u16) {
        let seq = self.next_seq();
        let crc = frame::encode(
            &mut self.send_frame,
            cmd,
            seq,
            payload,
            self.config.connection_id,
            self.local_crc_seed,
            aux,
        );
        self.local_crc_seed = crc;
        let _ = self.env.send(self.send_frame.as_bytes());
    }

    fn accept(&mut self, decoded: &DecodedFrame<'_>, aux: u16) -> Result<(), ResetReason> {
        if let Some(prev) = self.peer_seq_bit {
            if prev == decoded.seqno {
                return Err(ResetReason::InvalidData);
            }
        }
        let cmd_byte = pack_cmd_byte(decoded.cmd, decoded.seqno);
        match frame::validate_chain(decoded, cmd_byte, self.peer_crc_seed, aux) {
            Some(seed) => {
                self.peer_crc_seed = seed;
                self.peer_seq_bit = Some(decoded.seqno);
                Ok(())
            }
            None => Err(ResetReason::InvalidCrc),
        }
    }

    fn try_recv(&mut self) -> bool {
        let scratch = self.recv_frame.recv_scratch();
        match self.env.recv(scratch) {
            Ok(n) => {
                self.recv_frame.set_received_len(n);
                true
            }
            Err(_) => false,
        }
    }

    /// `Err((event, reason))` means the received frame forces a reset.
    /// `Ok(())` covers both "nothing receivable parsed as a frame" noise
    /// and a well-formed frame accepted for the current state.
    fn handle_incoming(&mut self) -> Result<(), (ResetEvent, ResetReason)> {
        let len = self.recv_frame.len();
        // Copy out of `self` first: `Frame` is `Copy`, and decoding in place
        // would tie `decoded`'s lifetime to `self.recv_frame`, making every
        // `&mut self` call below (`self.accept`, `self.rx_cursor.advance`,
        // ...) a borrow conflict for as long as `decoded` is still in use.
        let recv_frame = self.recv_frame;
        let decoded = match frame::decode(&recv_frame.as_bytes()[..len]) {
            Ok(d) => d,
            Err(frame::DecodeError::UnknownCommand { .. }) => {
                return Err((ResetEvent::ByMaster, ResetReason::UnknownCmd))
            }
            Err(_) => return Ok(()),
        };

        // Outside Reset, an incoming Reset frame is the slave tearing the
        // connection down and must be honored. Inside Reset it is just
        // the slave's half of the reset handshake (every cycle while both
        // sides sit in Reset, each announces its own reason) and must not
        // re-enter reset itself, or `reset_frame_sent` would never stay
        // true long enough for `advance_state_machine` to move on.
        if decoded.cmd == Command::Reset && self.state != FsoeState::Reset {
            let mut words = decoded.words;
            let reason_byte = words.next().map(|(data, _)| data[0]).unwrap_or(0);
            return Err((ResetEvent::BySlave, ResetReason::from_wire(reason_byte)));
        }

        let local = |r: ResetReason| (ResetEvent::ByMaster, r);

        match self.state {
            FsoeState::Reset => Ok(()),
            FsoeState::Session => {
                if decoded.cmd != Command::Session {
                    return Err(local(ResetReason::InvalidCmd));
                }
                self.accept(&decoded, 0).map_err(local)?;
                for (data, _) in decoded.words {
                    let off = self.rx_cursor.offset();
                    if off + data.len() > self.slave_session_id_bytes.len() {
                        return Err(local(ResetReason::InvalidData));
                    }
                    self.slave_session_id_bytes[off..off + data.len()].copy_from_slice(data);
                    self.rx_cursor.advance(data.len());
                }
                Ok(())
            }
            FsoeState::Connection => {
                if decoded.cmd != Command::Connection {
                    return Err(local(ResetReason::InvalidCmd));
                }
                self.accept(&decoded, 0).map_err(local)?;
                for (data, _) in decoded.words {
                    let off = self.rx_cursor.offset();
                    if off + data.len() > self.conn_payload.len()
                        || self.conn_payload[off..off + data.len()] != *data
                    {
                        return Err(local(ResetReason::InvalidData));
                    }
                    self.rx_cursor.advance(data.len());
                }
                Ok(())
            }
            FsoeState::Parameter => {
                if decoded.cmd != Command::Parameter {
                    return Err(local(ResetReason::InvalidCmd));
                }
                if decoded.conn_id != self.config.connection_id {
                    return Err(local(ResetReason::InvalidConnId));
                }
                self.accept(&decoded, 0).map_err(local)?;
                for (data, _) in decoded.words {
                    let off = self.rx_cursor.offset();
                    if off + data.len() > self.param_payload.len()
                        || self.param_payload[off..off + data.len()] != *data
                    {
                        return Err(local(ResetReason::InvalidData));
                    }
                    self.rx_cursor.advance(data.len());
                }
                Ok(())
            }
            FsoeState::Data => {
                if decoded.cmd != Command::ProcessData && decoded.cmd != Command::FailSafeData {
                    return Err(local(ResetReason::InvalidCmd));
                }
                if decoded.data_size != self.config.connection.inputs_size {
                    return Err(local(ResetReason::InvalidData));
                }
                if decoded.conn_id != self.config.connection_id {
                    return Err(local(ResetReason::InvalidConnId));
                }
                self.accept(&decoded, self.config.connection_id).map_err(local)?;
                match decoded.cmd {
                    Command::ProcessData => {
                        self.last_inputs.clear();
                        for (data, _) in decoded.words {
                            self.last_inputs.extend_from_slice(data).ok();
                        }
                        self.is_process_data_received = true;
                    }
                    Command::FailSafeData => {
                        self.last_inputs.clear();
                        self.last_inputs
                            .resize(self.config.connection.inputs_size, 0)
                            .ok();
                    }
                    _ => unreachable!(),
                }
                Ok(())
            }
        }
    }

    fn advance_state_machine(&mut self, now_ms: u32) {
        match self.state {
            FsoeState::Reset => {
                if !self.reset_frame_sent {
                    let reason = self
                        .last_reset
                        .as_ref()
                        .map(|r| r.reason)
                        .unwrap_or(ResetReason::LocalReset);
                    self.send(Command::Reset, &[reason.wire_value()], 0);
                    self.reset_frame_sent = true;
                } else {
                    self.master_session_id = self.env.next_u16();
                    self.tx_cursor = ChunkCursor::new(2);
                    self.rx_cursor = ChunkCursor::new(2);
                    self.watchdog.arm(now_ms);
                    self.state = FsoeState::Session;
                }
            }
            FsoeState::Session => {
                if !self.tx_cursor.done() {
                    let bytes = self.master_session_id.to_le_bytes();
                    let n = self.tx_cursor.next_chunk_len(self.chunk_size());
                    let off = self.tx_cursor.offset();
                    self.send(Command::Session, &bytes[off..off + n], 0);
                    self.tx_cursor.advance(n);
                }
                if self.tx_cursor.done() && self.rx_cursor.done() {
                    let conn_id_bytes = self.config.connection_id.to_le_bytes();
                    let addr_bytes = self.config.connection.slave_address.to_le_bytes();
                    self.conn_payload = [conn_id_bytes[0], conn_id_bytes[1], addr_bytes[0], addr_bytes[1]];
                    self.tx_cursor = ChunkCursor::new(CONN_DATA_SIZE);
                    self.rx_cursor = ChunkCursor::new(CONN_DATA_SIZE);
                    self.watchdog.arm(now_ms);
                    self.state = FsoeState::Connection;
                }
            }
            FsoeState::Connection => {
                if !self.tx_cursor.done() {
                    let n = self.tx_cursor.next_chunk_len(self.chunk_size());
                    let off = self.tx_cursor.offset();
                    let mut buf = [0u8; CONN_DATA_SIZE];
                    buf[..n].copy_from_slice(&self.conn_payload[off..off + n]);
                    self.send(Command::Connection, &buf[..n], 0);
                    self.tx_cursor.advance(n);
                }
                if self.tx_cursor.done() && self.rx_cursor.done() {
                    let total = FSOE_SAFE_PARA_HEADER_SIZE + self.config.connection.app_params_size;
                    self.tx_cursor = ChunkCursor::new(total);
                    self.rx_cursor = ChunkCursor::new(total);
                    self.state = FsoeState::Parameter;
                }
            }
            FsoeState::Parameter => {
                if !self.tx_cursor.done() {
                    let n = self.tx_cursor.next_chunk_len(self.chunk_size());
                    let off = self.tx_cursor.offset();
                    let mut buf = [0u8; FSOE_SAFE_PARA_MAX_SIZE];
                    buf[..n].copy_from_slice(&self.param_payload[off..off + n]);
                    self.send(Command::Parameter, &buf[..n], 0);
                    self.tx_cursor.advance(n);
                }
                if self.tx_cursor.done() && self.rx_cursor.done() {
                    self.watchdog.arm(now_ms);
                    self.state = FsoeState::Data;
                }
            }
            FsoeState::Data => {}
        }
    }

    /// One protocol cycle: optionally transmit, attempt to receive,
    /// report status. `outputs` must be exactly `outputs_size` bytes and
    /// is only actually put on the wire once the connection reaches the
    /// Data state *and* [`Self::set_process_data_enabled`] has been called
    /// with `true` — until then every Data-state frame carries
    /// `Command::FailSafeData` with an all-zero payload regardless of
    /// `outputs`. `inputs` must be exactly `inputs_size` bytes and is
    /// overwritten with the slave's last validated process-data frame
    /// (zeroed if none has been validated yet, or if the slave's own
    /// process-data sending is disabled).
    pub fn sync(&mut self, outputs: &[u8], inputs: &mut [u8]) -> Result<SyncStatus, ApiError> {
        if outputs.len() != self.config.connection.outputs_size {
            let err = ApiError::OutputsSizeMismatch {
                expected: self.config.connection.outputs_size,
                got: outputs.len(),
            };
            self.env.handle_user_error(err);
            return Err(err);
        }
        if inputs.len() != self.config.connection.inputs_size {
            let err = ApiError::InputsSizeMismatch {
                expected: self.config.connection.inputs_size,
                got: inputs.len(),
            };
            self.env.handle_user_error(err);
            return Err(err);
        }

        self.is_process_data_received = false;
        self.last_reset = None;
        let now = self.env.now_ms();

        if core::mem::take(&mut self.pending_reset_request) {
            self.enter_reset(ResetReason::LocalReset, ResetEvent::ByMaster);
        } else if self.watchdog.is_running() && self.watchdog.expired(now) {
            self.enter_reset(ResetReason::WdExpired, ResetEvent::ByMaster);
        }

        if self.try_recv() {
            match self.handle_incoming() {
                Ok(()) => {
                    if self.watchdog.is_running() {
                        self.watchdog.arm(now);
                    }
                }
                Err((event, reason)) => self.enter_reset(reason, event),
            }
        }

        self.advance_state_machine(now);

        if self.state == FsoeState::Data {
            if self.process_data_enabled {
                self.send(Command::ProcessData, outputs, self.config.connection_id);
            } else {
                let zeros = [0u8; FSOE_PROCESS_DATA_MAX_SIZE];
                self.send(
                    Command::FailSafeData,
                    &zeros[..self.config.connection.outputs_size],
                    self.config.connection_id,
                );
            }
        }

        inputs.fill(0);
        inputs[..self.last_inputs.len()].copy_from_slice(&self.last_inputs);

        let (event, reason) = match &self.last_reset {
            Some(r) => (r.event, Some(r.reason)),
            None => (ResetEvent::None, None),
        };
        Ok(SyncStatus {
            current_state: self.state,
            is_process_data_received: self.is_process_data_received,
            reset_event: event,
            reset_reason: reason,
        })
    }
}
