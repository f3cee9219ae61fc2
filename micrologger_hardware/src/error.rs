use micrologger_traits::BusFault;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("i2c: {0}")]
    Bus(#[from] BusFault),
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("pwm error: {0}")]
    Pwm(String),
    #[error("adc error: {0}")]
    Adc(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
