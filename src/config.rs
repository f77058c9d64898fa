//! Static configuration and the bounds it is validated against at `init()`.

/// Largest safety process-data size (inputs or outputs) a connection may
/// carry, in bytes.
pub const FSOE_PROCESS_DATA_MAX_SIZE: usize = 126;

/// Largest application-parameters (`app_params`) block a connection may
/// carry, in bytes. The wire `SafePara` block adds `FSOE_SAFE_PARA_HEADER_SIZE`
/// bytes of header on top of this.
pub const FSOE_APPLICATION_PARAMETERS_MAX_SIZE: usize = 64;

/// Bytes reserved for `ConnData` (`ConnId` + `SlaveAddress`) in the
/// Connection state.
pub const CONN_DATA_SIZE: usize = 4;

/// Bytes in the `SafePara` header sent ahead of the application parameters:
/// `watchdog_size (2) | watchdog_ms (2) | app_params_size (2)`.
pub const FSOE_SAFE_PARA_HEADER_SIZE: usize = 6;

/// Largest `SafePara` block (header + application parameters) a connection
/// may carry, in bytes.
pub const FSOE_SAFE_PARA_MAX_SIZE: usize = FSOE_SAFE_PARA_HEADER_SIZE + FSOE_APPLICATION_PARAMETERS_MAX_SIZE;

fn valid_process_data_size(size: usize) -> bool {
    size == 1 || (size >= 2 && size <= FSOE_PROCESS_DATA_MAX_SIZE && size % 2 == 0)
}

/// Reasons a `MasterConfig`/`SlaveConfig` was rejected at construction time
/// (§4.9). Configuration errors never surface mid-connection: they are
/// caught before a state machine is ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `outputs_size`/`inputs_size` must be 1, or an even number up to
    /// `FSOE_PROCESS_DATA_MAX_SIZE`.
    InvalidProcessDataSize { field: &'static str, value: usize },
    /// `app_params_size` exceeds `FSOE_APPLICATION_PARAMETERS_MAX_SIZE`.
    AppParamsTooLarge { value: usize, max: usize },
    /// `connection_id` must be non-zero.
    InvalidConnectionId,
    /// `watchdog_timeout_ms` must be non-zero. For `MasterConfig` it must
    /// additionally fit the 16-bit `SafePara` wire field (1..=65535); a
    /// slave's watchdog is a purely local timeout never put on the wire, so
    /// `SlaveConfig` only enforces non-zero.
    InvalidWatchdogTimeout,
}

/// Configuration shared by both master and slave roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub slave_address: u16,
    pub outputs_size: usize,
    pub inputs_size: usize,
    pub app_params_size: usize,
}

impl ConnectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !valid_process_data_size(self.outputs_size) {
            return Err(ConfigError::InvalidProcessDataSize {
                field: "outputs_size",
                value: self.outputs_size,
            });
        }
        if !valid_process_data_size(self.inputs_size) {
            return Err(ConfigError::InvalidProcessDataSize {
                field: "inputs_size",
                value: self.inputs_size,
            });
        }
        if self.app_params_size > FSOE_APPLICATION_PARAMETERS_MAX_SIZE {
            return Err(ConfigError::AppParamsTooLarge {
                value: self.app_params_size,
                max: FSOE_APPLICATION_PARAMETERS_MAX_SIZE,
            });
        }
        Ok(())
    }
}

/// Configuration for an `FsoeMaster` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterConfig {
    pub connection: ConnectionConfig,
    pub connection_id: u16,
    pub watchdog_timeout_ms: u32,
}

impl MasterConfig {
    /// Validate and take ownership of this configuration. Failure here
    /// means no `FsoeMaster` is ever produced — there is no "invalid but
    /// constructed" instance to misuse.
    pub fn validate(self) -> Result<Self, ConfigError> {
        self.connection.validate()?;
        if self.connection_id == 0 {
            return Err(ConfigError::InvalidConnectionId);
        }
        if self.watchdog_timeout_ms == 0 || self.watchdog_timeout_ms > u16::MAX as u32 {
            return Err(ConfigError::InvalidWatchdogTimeout);
        }
        Ok(self)
    }
}

/// Configuration for an `FsoeSlave` (§6). The slave learns `connection_id`
/// and the watchdog timeout from the master during the handshake, so
/// neither is part of its static configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveConfig {
    pub connection: ConnectionConfig,
    /// How long the slave tolerates silence from the master before
    /// giving up on the connection and falling back to Reset. Set
    /// independently of the master's own watchdog timeout — each side
    /// only needs to bound its own wait.
    pub watchdog_timeout_ms: u32,
}

impl SlaveConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        self.connection.validate()?;
        if self.watchdog_timeout_ms == 0 {
            return Err(ConfigError::InvalidWatchdogTimeout);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConnectionConfig {
        ConnectionConfig {
            slave_address: 7,
            outputs_size: 4,
            inputs_size: 4,
            app_params_size: 8,
        }
    }

    #[test]
    fn accepts_size_one() {
        let mut c = base();
        c.outputs_size = 1;
        c.inputs_size = 1;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_odd_size_above_one() {
        let mut c = base();
        c.outputs_size = 3;
        assert_eq!(
            c.validate(),
            Err(ConfigError::InvalidProcessDataSize {
                field: "outputs_size",
                value: 3
            })
        );
    }

    #[test]
    fn rejects_oversized_process_data() {
        let mut c = base();
        c.inputs_size = FSOE_PROCESS_DATA_MAX_SIZE + 2;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_oversized_app_params() {
        let mut c = base();
        c.app_params_size = FSOE_APPLICATION_PARAMETERS_MAX_SIZE + 1;
        assert_eq!(
            c.validate(),
            Err(ConfigError::AppParamsTooLarge {
                value: FSOE_APPLICATION_PARAMETERS_MAX_SIZE + 1,
                max: FSOE_APPLICATION_PARAMETERS_MAX_SIZE
            })
        );
    }

    #[test]
    fn master_rejects_zero_connection_id() {
        let cfg = MasterConfig {
            connection: base(),
            connection_id: 0,
            watchdog_timeout_ms: 100,
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidConnectionId));
    }

    #[test]
    fn master_rejects_zero_watchdog() {
        let cfg = MasterConfig {
            connection: base(),
            connection_id: 1,
            watchdog_timeout_ms: 0,
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidWatchdogTimeout));
    }

    #[test]
    fn master_rejects_oversized_watchdog() {
        let cfg = MasterConfig {
            connection: base(),
            connection_id: 1,
            watchdog_timeout_ms: u16::MAX as u32 + 1,
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidWatchdogTimeout));
    }

    #[test]
    fn master_accepts_valid_config() {
        let cfg = MasterConfig {
            connection: base(),
            connection_id: 1,
            watchdog_timeout_ms: 50,
        };
        assert!(cfg.validate().is_ok());
    }
}
