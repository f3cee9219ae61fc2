//! Maps `Box<dyn Error>` from trait boundaries to typed `MicroLoggerError`.
//!
//! The traits in `micrologger_traits` use `Box<dyn Error + Send + Sync>` for
//! the PWM drive and the signal source; this module converts those to the
//! typed error enum, with an optional feature-gated path for
//! `micrologger_hardware::HwError` downcasting.

use crate::error::MicroLoggerError;

/// Map a trait-boundary error to a typed `MicroLoggerError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> MicroLoggerError {
    #[cfg(feature = "hardware-errors")]
    {
        use micrologger_hardware::HwError;
        use micrologger_traits::BusFault;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Bus(BusFault::Timeout) => MicroLoggerError::Timeout,
                other => MicroLoggerError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        MicroLoggerError::Timeout
    } else {
        MicroLoggerError::Hardware(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_message_heuristics() {
        let e = std::io::Error::other("adc timeout");
        assert!(matches!(map_hw_error(&e), MicroLoggerError::Timeout));
        let e = std::io::Error::other("pwm chip missing");
        assert!(matches!(map_hw_error(&e), MicroLoggerError::Hardware(m) if m.contains("pwm")));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn downcasts_hardware_errors() {
        let e = micrologger_hardware::HwError::Adc("no conversion".into());
        assert!(matches!(map_hw_error(&e), MicroLoggerError::HardwareFault(_)));
    }
}
