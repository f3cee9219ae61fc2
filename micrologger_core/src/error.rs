use thiserror::Error;

/// Bus-level failures recorded on an `I2cLink`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum I2cError {
    /// The transaction timed out or exceeded the response budget; points at
    /// the bus itself rather than one device.
    #[error("bus damaged")]
    BusDamaged,
    #[error("failed to connect")]
    FailedConnect,
    #[error("failed to read")]
    FailedRead,
    #[error("failed to write")]
    FailedWrite,
    /// The write went through but read-back did not match.
    #[error("read-back check failed")]
    FailedCheck,
}

impl I2cError {
    /// Higher is worse. Used to report the worst of several devices.
    pub fn severity(self) -> u8 {
        match self {
            Self::FailedCheck => 1,
            Self::FailedRead => 2,
            Self::FailedWrite => 3,
            Self::FailedConnect => 4,
            Self::BusDamaged => 5,
        }
    }

    /// Every failure except a read-back mismatch tears the connection down.
    pub fn disconnects(self) -> bool {
        !matches!(self, Self::FailedCheck)
    }

    pub fn worst(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(x), Some(y)) => Some(if y.severity() > x.severity() { y } else { x }),
            (x, None) => x,
            (None, y) => y,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MotorError {
    /// Commanded on, but the decoder reports next to no rotation.
    #[error("motor not responding")]
    NoResponse,
    #[error("motor drive failed")]
    DriveFailed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OdError {
    #[error("signal saturated")]
    Saturated,
    #[error("gain optimization failed")]
    FailedGain,
    #[error("zero calibration failed")]
    FailedZero,
    #[error("reading failed")]
    FailedRead,
}

#[derive(Debug, Error, Clone)]
pub enum MicroLoggerError {
    #[error("i2c device 0x{address:02x}: {error}")]
    I2c { address: u8, error: I2cError },
    #[error("motor: {0}")]
    Motor(#[from] MotorError),
    #[error("optical density: {0}")]
    OpticalDensity(#[from] OdError),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("bus timeout")]
    Timeout,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("rejected: {0}")]
    Rejected(&'static str),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing i2c bus")]
    MissingBus,
    #[error("missing motor drive")]
    MissingDrive,
    #[error("missing speed decoder")]
    MissingDecoder,
    #[error("missing signal source")]
    MissingSignal,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_prefers_higher_severity() {
        use I2cError::*;
        assert_eq!(I2cError::worst(Some(FailedCheck), Some(BusDamaged)), Some(BusDamaged));
        assert_eq!(I2cError::worst(Some(FailedWrite), Some(FailedRead)), Some(FailedWrite));
        assert_eq!(I2cError::worst(None, Some(FailedRead)), Some(FailedRead));
        assert_eq!(I2cError::worst(None, None), None);
        assert!(!FailedCheck.disconnects());
        assert!(FailedConnect.disconnects());
    }
}
