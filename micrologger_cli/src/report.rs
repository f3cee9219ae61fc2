//! Command output: one pretty line per result, or one JSON object per line
//! with `--json`.

use micrologger_core::{DeviceHealth, Health, LinkStatus};
use serde_json::{Value, json};

use crate::cli::JSON_MODE;

fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

fn emit(obj: &Value) {
    println!("{obj}");
}

fn opt_error<E: std::fmt::Display>(e: Option<E>) -> Value {
    e.map_or(Value::Null, |e| Value::String(e.to_string()))
}

fn od_json(h: &Health) -> Value {
    let zero = if h.zero.valid {
        json!({ "signal": h.zero.signal, "background": h.zero.background, "timestamp_ms": h.zero.timestamp_ms })
    } else {
        Value::Null
    };
    json!({
        "status": format!("{:?}", h.od_status),
        "error": opt_error(h.od_error),
        "gain_ohm": h.gain_ohm,
        "zero": zero,
        "reading": h.reading.map_or(Value::Null, |r| json!({
            "od": r.od,
            "transmittance": r.transmittance,
            "signal": r.signal,
            "background": r.background,
            "timestamp_ms": r.timestamp_ms,
        })),
        "next_read_ms": h.next_read_ms,
    })
}

fn stirrer_json(h: &Health) -> Value {
    json!({
        "state": format!("{:?}", h.stirrer_state),
        "event": h.stirrer_event.map(|e| format!("{e:?}")),
        "on": h.stirrer_on,
        "speed_rpm": h.speed_rpm,
        "measured_rpm": h.measured_rpm,
        "steps": h.motor_steps,
        "error": opt_error(h.motor_error),
        "restarts": h.restarts,
    })
}

fn device_json(d: &DeviceHealth) -> Value {
    json!({
        "name": d.name,
        "address": format!("0x{:02x}", d.address),
        "connected": d.status == LinkStatus::Connected,
        "error": opt_error(d.error),
        "connections": d.counters.connections,
        "reads": d.counters.reads,
        "writes": d.counters.writes,
        "errors": d.counters.errors,
    })
}

fn device_line(d: &DeviceHealth) -> String {
    let state = match (d.status, d.error) {
        (_, Some(e)) => format!("ERROR ({e})"),
        (LinkStatus::Connected, None) => "ok".to_string(),
        (LinkStatus::Disconnected, None) => "disconnected".to_string(),
    };
    format!("{:<12} 0x{:02x}  {state}", d.name, d.address)
}

/// Periodic line while `run` is going.
pub fn status(h: &Health) {
    if json_mode() {
        emit(&json!({
            "event": "status",
            "t_ms": h.now_ms,
            "stirrer": stirrer_json(h),
            "optical_density": od_json(h),
        }));
        return;
    }
    let od = h
        .reading
        .map_or_else(|| "-".to_string(), |r| format!("{:.3}", r.od));
    println!(
        "t={:>7.1}s stirrer={:?} {:.0}/{:.0} rpm od={} ({:?})",
        h.now_ms as f64 / 1000.0,
        h.stirrer_state,
        h.speed_rpm,
        h.measured_rpm,
        od,
        h.od_status
    );
}

pub fn stirrer(h: &Health) {
    if json_mode() {
        emit(&json!({ "event": "stirrer", "t_ms": h.now_ms, "stirrer": stirrer_json(h) }));
        return;
    }
    let event = h.stirrer_event.map_or_else(String::new, |e| format!(" [{e:?}]"));
    println!(
        "stirrer {:?}{event}: target {:.0} rpm, measured {:.0} rpm, {} steps",
        h.stirrer_state, h.speed_rpm, h.measured_rpm, h.motor_steps
    );
    if h.restarts > 0 {
        println!("restarts: {}", h.restarts);
    }
}

pub fn zero(h: &Health) {
    if json_mode() {
        emit(&json!({ "event": "zero", "t_ms": h.now_ms, "optical_density": od_json(h) }));
        return;
    }
    println!(
        "zero complete: signal {:.1}, background {:.1}, gain {:.0} ohm",
        h.zero.signal, h.zero.background, h.gain_ohm
    );
}

pub fn reading(h: &Health) {
    if json_mode() {
        emit(&json!({ "event": "reading", "t_ms": h.now_ms, "optical_density": od_json(h) }));
        return;
    }
    match h.reading {
        Some(r) => println!(
            "OD {:.3} (transmittance {:.3}; signal {:.1}, background {:.1})",
            r.od, r.transmittance, r.signal, r.background
        ),
        None => println!("no reading"),
    }
}

pub fn gain(h: &Health, steps: u16) {
    if json_mode() {
        emit(&json!({ "event": "gain", "t_ms": h.now_ms, "steps": steps, "optical_density": od_json(h) }));
        return;
    }
    println!("gain set to {:.0} ohm ({steps} steps)", h.gain_ohm);
}

pub fn devices(devices: &[DeviceHealth]) {
    if json_mode() {
        let list: Vec<Value> = devices.iter().map(device_json).collect();
        emit(&json!({ "event": "self_check", "devices": list }));
        return;
    }
    for d in devices {
        println!("{}", device_line(d));
    }
}

pub fn health(h: &Health) {
    if json_mode() {
        let list: Vec<Value> = h.devices.iter().map(device_json).collect();
        emit(&json!({
            "event": "health",
            "t_ms": h.now_ms,
            "stirrer": stirrer_json(h),
            "optical_density": od_json(h),
            "devices": list,
        }));
        return;
    }
    println!("stirrer:         {:?} ({:.0} rpm)", h.stirrer_state, h.speed_rpm);
    println!("photometer:      {:?}", h.od_status);
    println!("zero:            {}", if h.zero.valid { "valid" } else { "none" });
    for d in &h.devices {
        println!("{}", device_line(d));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micrologger_core::I2cError;
    use micrologger_core::i2c::LinkCounters;

    fn device(status: LinkStatus, error: Option<I2cError>) -> DeviceHealth {
        DeviceHealth {
            name: "gain-fine",
            address: 0x2F,
            status,
            error,
            counters: LinkCounters::default(),
        }
    }

    #[test]
    fn device_lines_name_the_fault() {
        let ok = device_line(&device(LinkStatus::Connected, None));
        assert!(ok.contains("0x2f") && ok.ends_with("ok"), "{ok}");
        let bad = device_line(&device(LinkStatus::Disconnected, Some(I2cError::FailedConnect)));
        assert!(bad.contains("ERROR (failed to connect)"), "{bad}");
    }

    #[test]
    fn device_json_is_flat() {
        let v = device_json(&device(LinkStatus::Connected, None));
        assert_eq!(v["address"], "0x2f");
        assert_eq!(v["connected"], true);
        assert!(v["error"].is_null());
    }
}
