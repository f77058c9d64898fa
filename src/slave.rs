//! The slave-role state machine (§4.6): the responder. Never self-
//! advances out of Reset — it waits for the master's first Session
//! frame — and echoes Connection/Parameter payloads back for the master
//! to cross-check, rather than originating their content itself.

use crate::channel::{BlackChannel, Clock, EntropySource, ErrorSink, ParameterValidator};
use crate::config::{
    ConnectionConfig, ConfigError, SlaveConfig, CONN_DATA_SIZE, FSOE_PROCESS_DATA_MAX_SIZE,
    FSOE_SAFE_PARA_HEADER_SIZE, FSOE_SAFE_PARA_MAX_SIZE,
};
use crate::frame::{self, pack_cmd_byte, Command, DecodedFrame, Frame};
use crate::status::{ApiError, FsoeState, ResetEvent, ResetReason, SyncStatus};
use crate::watchdog::Watchdog;
use crate::xfer::ChunkCursor;
use fugit::ExtU32;

/// Bundle of collaborators a slave needs.
pub trait SlaveEnv:
    BlackChannel + Clock + EntropySource + ErrorSink + ParameterValidator
{
}
impl<T: BlackChannel + Clock + EntropySource + ErrorSink + ParameterValidator> SlaveEnv for T {}

struct ResetOutcome {
    event: ResetEvent,
    reason: ResetReason,
}

/// The slave-role connection state machine.
pub struct FsoeSlave<E: SlaveEnv> {
    env: E,
    config: SlaveConfig,
    state: FsoeState,

    watchdog: Watchdog,
    reset_frame_sent: bool,
    pending_reset_request: bool,
    last_reset: Option<ResetOutcome>,

    local_crc_seed: u16,
    peer_crc_seed: u16,
    local_seq: u8,
    peer_seq_bit: Option<u8>,

    slave_session_id: u16,
    master_session_id_bytes: [u8; 2],
    tx_cursor: ChunkCursor,
    rx_cursor: ChunkCursor,

    connection_id: u16,
    conn_payload: [u8; CONN_DATA_SIZE],
    param_payload: heapless::Vec<u8, FSOE_SAFE_PARA_MAX_SIZE>,

    last_outputs: heapless::Vec<u8, FSOE_PROCESS_DATA_MAX_SIZE>,
    is_process_data_received: bool,
    process_data_enabled: bool,

    send_frame: Frame,
    recv_frame: Frame,
}

impl<E: SlaveEnv> FsoeSlave<E> {
    pub fn init(config: SlaveConfig, env: E) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        Ok(FsoeSlave {
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
            slave_session_id: 0,
            master_session_id_bytes: [0; 2],
            tx_cursor: ChunkCursor::new(0),
            rx_cursor: ChunkCursor::new(0),
            connection_id: 0,
            conn_payload: [0; CONN_DATA_SIZE],
            param_payload: heapless::Vec::new(),
            last_outputs: heapless::Vec::new(),
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

    /// The connection id the master established. Only meaningful once
    /// the connection has passed the Connection state.
    pub fn connection_id(&self) -> Result<u16, ApiError> {
        if matches!(self.state, FsoeState::Reset | FsoeState::Session) {
            return Err(ApiError::WrongState {
                expected_at_least: FsoeState::Connection,
                actual: self.state,
            });
        }
        Ok(self.connection_id)
    }

    pub fn request_reset(&mut self) {
        self.pending_reset_request = true;
    }

    /// Enable or disable transmission of live process data in the Data
    /// state. While disabled (the default, and the state after every
    /// reset), every frame sent in Data carries `Command::FailSafeData`
    /// with an all-zero payload instead of `inputs` (§4.5.5, §8).
    pub fn set_process_data_enabled(&mut self, enabled: bool) {
        self.process_data_enabled = enabled;
    }

    fn chunk_size(&self) -> usize {
        self.config.connection.inputs_size
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
            self.connection_id,
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

    fn handle_incoming(&mut self, now_ms: u32) -> Result<(), (ResetEvent, ResetReason)> {
        let len = self.recv_frame.len();
        // Copy out of `self` first: `Frame` is `Copy`, and decoding in place
        // would tie `decoded`'s lifetime to `self.recv_frame`, making every
        // `&mut self` call below (`self.accept`, `self.rx_cursor.advance`,
        // ...) a borrow conflict for as long as `decoded` is still in use.
        let recv_frame = self.recv_frame;
        let decoded = match frame::decode(&recv_frame.as_bytes()[..len]) {
            Ok(d) => d,
            Err(frame::DecodeError::UnknownCommand { .. }) => {
                return Err((ResetEvent::BySlave, ResetReason::UnknownCmd))
            }
            Err(_) => return Ok(()),
        };

        // Outside Reset, an incoming Reset frame is the master tearing the
        // connection down and must be honored. Inside Reset it is just
        // the master's half of the reset handshake and is handled by the
        // `FsoeState::Reset` arm below (ignored unless it's a Session
        // frame), so `reset_frame_sent` is never clobbered mid-handshake.
        if decoded.cmd == Command::Reset && self.state != FsoeState::Reset {
            let mut words = decoded.words;
            let reason_byte = words.next().map(|(data, _)| data[0]).unwrap_or(0);
            return Err((ResetEvent::ByMaster, ResetReason::from_wire(reason_byte)));
        }

        let local = |r: ResetReason| (ResetEvent::BySlave, r);

        match self.state {
            FsoeState::Reset => {
                if decoded.cmd != Command::Session {
                    return Ok(());
                }
                // The first frame of a new connection attempt: nothing
                // to desynchronize from yet, so always accept.
                self.peer_crc_seed = 0;
                self.peer_seq_bit = None;
                self.accept(&decoded, 0).map_err(local)?;
                self.master_session_id_bytes = [0; 2];
                self.rx_cursor = ChunkCursor::new(2);
                for (data, _) in decoded.words {
                    let off = self.rx_cursor.offset();
                    if off + data.len() > self.master_session_id_bytes.len() {
                        return Err(local(ResetReason::InvalidData));
                    }
                    self.master_session_id_bytes[off..off + data.len()].copy_from_slice(data);
                    self.rx_cursor.advance(data.len());
                }
                self.slave_session_id = self.env.next_u16();
                self.tx_cursor = ChunkCursor::new(2);
                self.watchdog.arm(now_ms);
                self.state = FsoeState::Session;
                Ok(())
            }
            FsoeState::Session => {
                if decoded.cmd != Command::Session {
                    return Err(local(ResetReason::InvalidCmd));
                }
                self.accept(&decoded, 0).map_err(local)?;
                for (data, _) in decoded.words {
                    let off = self.rx_cursor.offset();
                    if off + data.len() > self.master_session_id_bytes.len() {
                        return Err(local(ResetReason::InvalidData));
                    }
                    self.master_session_id_bytes[off..off + data.len()].copy_from_slice(data);
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
                    if off + data.len() > self.conn_payload.len() {
                        return Err(local(ResetReason::InvalidData));
                    }
                    self.conn_payload[off..off + data.len()].copy_from_slice(data);
                    self.rx_cursor.advance(data.len());
                }
                if self.rx_cursor.done() {
                    self.connection_id =
                        u16::from_le_bytes([self.conn_payload[0], self.conn_payload[1]]);
                    let addr =
                        u16::from_le_bytes([self.conn_payload[2], self.conn_payload[3]]);
                    if addr != self.config.connection.slave_address {
                        return Err(local(ResetReason::InvalidAddress));
                    }
                }
                Ok(())
            }
            FsoeState::Parameter => {
                if decoded.cmd != Command::Parameter {
                    return Err(local(ResetReason::InvalidCmd));
                }
                if decoded.conn_id != self.connection_id {
                    return Err(local(ResetReason::InvalidConnId));
                }
                self.accept(&decoded, 0).map_err(local)?;
                for (data, _) in decoded.words {
                    let off = self.rx_cursor.offset();
                    if off + data.len() > self.param_payload.capacity() {
                        return Err(local(ResetReason::InvalidData));
                    }
                    if off + data.len() > self.param_payload.len() {
                        self.param_payload.resize(off + data.len(), 0).ok();
                    }
                    self.param_payload[off..off + data.len()].copy_from_slice(data);
                    self.rx_cursor.advance(data.len());
                }
                if self.rx_cursor.done() {
                    let watchdog_size =
                        u16::from_le_bytes([self.param_payload[0], self.param_payload[1]]);
                    let watchdog_ms =
                        u16::from_le_bytes([self.param_payload[2], self.param_payload[3]]);
                    let app_params_size =
                        u16::from_le_bytes([self.param_payload[4], self.param_payload[5]]);
                    if watchdog_size != 2 {
                        return Err(local(ResetReason::InvalidCompaLen));
                    }
                    if watchdog_ms == 0 {
                        return Err(local(ResetReason::InvalidCompa));
                    }
                    if app_params_size as usize != self.config.connection.app_params_size {
                        return Err(local(ResetReason::InvalidUserParaLen));
                    }
                    let app_params = &self.param_payload[FSOE_SAFE_PARA_HEADER_SIZE..];
                    let result = self.env.verify_parameters(watchdog_ms, app_params);
                    if let Some(reason) = result.reset_reason() {
                        return Err(local(reason));
                    }
                }
                Ok(())
            }
            FsoeState::Data => {
                if decoded.cmd != Command::ProcessData && decoded.cmd != Command::FailSafeData {
                    return Err(local(ResetReason::InvalidCmd));
                }
                if decoded.data_size != self.config.connection.outputs_size {
                    return Err(local(ResetReason::InvalidData));
                }
                if decoded.conn_id != self.connection_id {
                    return Err(local(ResetReason::InvalidConnId));
                }
                self.accept(&decoded, self.connection_id).map_err(local)?;
                match decoded.cmd {
                    Command::ProcessData => {
                        self.last_outputs.clear();
                        for (data, _) in decoded.words {
                            self.last_outputs.extend_from_slice(data).ok();
                        }
                        self.is_process_data_received = true;
                    }
                    Command::FailSafeData => {
                        self.last_outputs.clear();
                        self.last_outputs
                            .resize(self.config.connection.outputs_size, 0)
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
                }
                // Otherwise: keep waiting for the master's Session frame.
            }
            FsoeState::Session => {
                if !self.tx_cursor.done() {
                    let bytes = self.slave_session_id.to_le_bytes();
                    let n = self.tx_cursor.next_chunk_len(self.chunk_size());
                    let off = self.tx_cursor.offset();
                    self.send(Command::Session, &bytes[off..off + n], 0);
                    self.tx_cursor.advance(n);
                }
                if self.tx_cursor.done() && self.rx_cursor.done() {
                    self.conn_payload = [0; CONN_DATA_SIZE];
                    self.rx_cursor = ChunkCursor::new(CONN_DATA_SIZE);
                    self.tx_cursor = ChunkCursor::new(CONN_DATA_SIZE);
                    self.state = FsoeState::Connection;
                }
            }
            FsoeState::Connection => {
                self.echo_available(now_ms, Command::Connection);
                if self.tx_cursor.done() && self.rx_cursor.done() {
                    let total = FSOE_SAFE_PARA_HEADER_SIZE + self.config.connection.app_params_size;
                    self.param_payload.clear();
                    self.rx_cursor = ChunkCursor::new(total);
                    self.tx_cursor = ChunkCursor::new(total);
                    self.watchdog.arm(now_ms);
                    self.state = FsoeState::Parameter;
                }
            }
            FsoeState::Parameter => {
                self.echo_available(now_ms, Command::Parameter);
                if self.tx_cursor.done() && self.rx_cursor.done() {
                    self.watchdog.arm(now_ms);
                    self.state = FsoeState::Data;
                }
            }
            FsoeState::Data => {}
        }
    }

    /// Send whatever has been received but not yet echoed for the
    /// Connection/Parameter states, where the slave's outbound content
    /// is exactly what it most recently decoded rather than its own
    /// independently generated data.
    fn echo_available(&mut self, _now_ms: u32, cmd: Command) {
        if self.tx_cursor.done() {
            return;
        }
        let available = self.rx_cursor.offset().saturating_sub(self.tx_cursor.offset());
        if available == 0 {
            return;
        }
        let n = self.tx_cursor.next_chunk_len(self.chunk_size()).min(available);
        if n == 0 {
            return;
        }
        let off = self.tx_cursor.offset();
        let mut buf = [0u8; FSOE_SAFE_PARA_MAX_SIZE];
        match cmd {
            Command::Connection => buf[..n].copy_from_slice(&self.conn_payload[off..off + n]),
            Command::Parameter => buf[..n].copy_from_slice(&self.param_payload[off..off + n]),
            _ => unreachable!("echo_available only used for Connection/Parameter"),
        }
        self.send(cmd, &buf[..n], 0);
        self.tx_cursor.advance(n);
    }

    /// One protocol cycle. `inputs` (exactly `inputs_size` bytes) is
    /// this device's current safety input values, put on the wire once
    /// the connection reaches Data *and*
    /// [`Self::set_process_data_enabled`] has been called with `true` —
    /// until then every Data-state frame carries `Command::FailSafeData`
    /// with an all-zero payload regardless of `inputs`. `outputs` (exactly
    /// `outputs_size` bytes) is overwritten with the master's last
    /// validated process-data frame (zeroed if none has been validated
    /// yet).
    pub fn sync(&mut self, inputs: &[u8], outputs: &mut [u8]) -> Result<SyncStatus, ApiError> {
        if inputs.len() != self.config.connection.inputs_size {
            let err = ApiError::InputsSizeMismatch {
                expected: self.config.connection.inputs_size,
                got: inputs.len(),
            };
            self.env.handle_user_error(err);
            return Err(err);
        }
        if outputs.len() != self.config.connection.outputs_size {
            let err = ApiError::OutputsSizeMismatch {
                expected: self.config.connection.outputs_size,
                got: outputs.len(),
            };
            self.env.handle_user_error(err);
            return Err(err);
        }

        self.is_process_data_received = false;
        self.last_reset = None;
        let now = self.env.now_ms();

        if core::mem::take(&mut self.pending_reset_request) {
            self.enter_reset(ResetReason::LocalReset, ResetEvent::BySlave);
        } else if self.watchdog.is_running() && self.watchdog.expired(now) {
            self.enter_reset(ResetReason::WdExpired, ResetEvent::BySlave);
        }

        if self.try_recv() {
            match self.handle_incoming(now) {
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
                self.send(Command::ProcessData, inputs, self.connection_id);
            } else {
                let zeros = [0u8; FSOE_PROCESS_DATA_MAX_SIZE];
                self.send(
                    Command::FailSafeData,
                    &zeros[..self.config.connection.inputs_size],
                    self.connection_id,
                );
            }
        }

        outputs.fill(0);
        outputs[..self.last_outputs.len()].copy_from_slice(&self.last_outputs);

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
