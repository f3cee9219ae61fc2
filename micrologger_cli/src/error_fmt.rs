//! Human-readable error descriptions and structured JSON error formatting.

use micrologger_core::error::{BuildError, I2cError, MicroLoggerError, MotorError, OdError};

fn i2c_text(address: u8, error: I2cError) -> String {
    let (causes, fix) = match error {
        I2cError::BusDamaged => (
            "A transaction timed out or ran over the response budget; the bus itself is likely faulty (loose SDA/SCL, missing pull-ups, a device holding the bus).",
            "Check the bus wiring and power, then run `micrologger self-check`.",
        ),
        I2cError::FailedConnect => (
            "The device did not acknowledge its address: not fitted, wrong address, or unpowered.",
            "Verify the [i2c] addresses in the config and the board population.",
        ),
        I2cError::FailedRead | I2cError::FailedWrite => (
            "The device stopped acknowledging mid-transfer.",
            "Reseat the device; the link reconnects on its own once the device answers again.",
        ),
        I2cError::FailedCheck => (
            "A register read back differently than written.",
            "Retry; persistent mismatches point at a marginal bus or a faulty part.",
        ),
    };
    format!("What happened: I2C device 0x{address:02x}: {error}.\nLikely causes: {causes}\nHow to fix: {fix}")
}

fn od_text(error: OdError) -> String {
    match error {
        OdError::Saturated => "What happened: The photometer signal saturated.\nLikely causes: Gain too high for the sample, or stray light reaching the detector.\nHow to fix: Re-run `micrologger optimize-gain` with a blank, or lower gain.target_ppt.".to_string(),
        OdError::FailedGain => "What happened: Gain optimization failed.\nLikely causes: The baseline is already above the target (ambient light, lid open) or the gain stage does not respond.\nHow to fix: Close the sample chamber, check the rheostats with `micrologger self-check`, or lower gain.target_ppt.".to_string(),
        OdError::FailedZero => "What happened: Zero calibration failed.\nLikely causes: A photometer device dropped off the bus during the sequence.\nHow to fix: Run `micrologger self-check`, then zero again with a blank.".to_string(),
        OdError::FailedRead => "What happened: The optical density reading failed.\nLikely causes: No valid zero reference, or a photometer device dropped off the bus.\nHow to fix: Zero the instrument with a blank (`micrologger zero`), then read again.".to_string(),
    }
}

fn motor_text(error: MotorError) -> String {
    match error {
        MotorError::NoResponse => "What happened: The stirrer motor is not turning.\nLikely causes: Stalled rotor, stir bar decoupled, or the speed sensor is not wired.\nHow to fix: Check the stir bar and the decoder pin (motor.decoder_pin), then start the stirrer again.".to_string(),
        MotorError::DriveFailed => "What happened: The motor drive rejected a command.\nLikely causes: PWM channel unavailable or insufficient permissions.\nHow to fix: Check motor.pwm_channel and that PWM is enabled on the board.".to_string(),
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingBus => {
                "What happened: No I2C bus was provided to the instrument.\nLikely causes: The bus failed to open or was not wired into the builder.\nHow to fix: Check i2c.bus in the config and that the I2C interface is enabled.".to_string()
            }
            BuildError::MissingDrive | BuildError::MissingDecoder => {
                "What happened: The stirrer motor was not provided to the instrument.\nLikely causes: Motor PWM or decoder failed to initialize.\nHow to fix: Check the [motor] section of the config.".to_string()
            }
            BuildError::MissingSignal => {
                "What happened: No photometer signal source was provided.\nLikely causes: The ADC failed to initialize.\nHow to fix: Check i2c.adc in the config.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/micrologger.toml for a sample."
            ),
        };
    }

    if let Some(me) = err.downcast_ref::<MicroLoggerError>() {
        return match me {
            MicroLoggerError::I2c { address, error } => i2c_text(*address, *error),
            MicroLoggerError::OpticalDensity(e) => od_text(*e),
            MicroLoggerError::Motor(e) => motor_text(*e),
            MicroLoggerError::Rejected(why) => format!(
                "What happened: The command was rejected ({why}).\nLikely causes: The setting conflicts with the current mode.\nHow to fix: Change the mode first (e.g. turn gain.automatic off for a manual gain)."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("timed out") {
        return format!(
            "What happened: {msg}.\nLikely causes: The sequence is waiting on the stirrer or a device that never settled.\nHow to fix: Check `micrologger health`, or raise --timeout-s."
        );
    }

    if lower.contains("open i2c bus") || lower.contains("open motor pwm") || lower.contains("open decoder pin") {
        return "What happened: Failed to initialize hardware.\nLikely causes: Interface disabled or insufficient permissions.\nHow to fix: Enable I2C/PWM on the board and make sure the process may access /dev/i2c-* and GPIO.".to_string();
    }

    if lower.contains("parse config") || lower.contains(" must be ") || lower.contains(" must differ ") {
        return format!(
            "What happened: Configuration is invalid or incomplete.\nLikely causes: {msg}.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Calibration CSV header special-case
    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'step,rpm'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable name of the error kind, used as `reason` in JSON output.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    match err.downcast_ref::<MicroLoggerError>() {
        Some(MicroLoggerError::OpticalDensity(e)) => match e {
            OdError::Saturated => "Saturated",
            OdError::FailedGain => "FailedGain",
            OdError::FailedZero => "FailedZero",
            OdError::FailedRead => "FailedRead",
        },
        Some(MicroLoggerError::I2c { .. }) => "I2c",
        Some(MicroLoggerError::Motor(_)) => "Motor",
        Some(MicroLoggerError::Rejected(_)) => "Rejected",
        _ if err.downcast_ref::<BuildError>().is_some() => "Build",
        _ => "Error",
    }
}

/// Map typed instrument failures to stable exit codes; everything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<MicroLoggerError>() {
        Some(MicroLoggerError::OpticalDensity(e)) => match e {
            OdError::Saturated => 3,
            OdError::FailedGain => 4,
            OdError::FailedZero => 5,
            OdError::FailedRead => 6,
        },
        Some(MicroLoggerError::I2c { .. }) => 7,
        Some(MicroLoggerError::Motor(_)) => 8,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    let reason = reason_name(err);
    let details = match err.downcast_ref::<MicroLoggerError>() {
        Some(MicroLoggerError::I2c { address, error }) => {
            Some(json!({ "address": format!("0x{address:02x}"), "error": error.to_string() }))
        }
        Some(MicroLoggerError::Motor(e)) => Some(json!({ "error": e.to_string() })),
        _ => None,
    };

    let obj = if let Some(d) = details {
        json!({ "reason": reason, "details": d, "message": msg })
    } else {
        json!({ "reason": reason, "message": msg })
    };
    obj.to_string()
}
