//! Persisted settings, restored at boot and re-saved whenever they change.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StirrerState {
    /// Whether the stirrer should be turning.
    pub on: bool,
    pub setpoint_rpm: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub vortex_speed_rpm: f64,
    pub vortex_duration_s: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZeroState {
    pub signal: f64,
    pub background: f64,
    /// Milliseconds since the instrument epoch when the zero was taken.
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpticalDensityState {
    pub read_interval_s: u64,
    pub vortex: bool,
    pub stop_stirrer: bool,
    pub gain_automatic: bool,
    pub target_ppt: f64,
    pub gain_ohm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero: Option<ZeroState>,
}

/// Snapshot of every persist-flagged property. Absent tables leave the
/// configured values in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stirrer: Option<StirrerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optical_density: Option<OpticalDensityState>,
}

/// Load a persisted state file. A missing file is not an error.
pub fn load_state(path: &Path) -> eyre::Result<Option<PersistedState>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => eyre::bail!("read state {:?}: {}", path, e),
    };
    let state = toml::from_str::<PersistedState>(&text)
        .map_err(|e| eyre::eyre!("parse state {:?}: {}", path, e))?;
    Ok(Some(state))
}

/// Write the state to a sibling temp file, then rename it into place.
pub fn save_state(path: &Path, state: &PersistedState) -> eyre::Result<()> {
    let text = toml::to_string_pretty(state).map_err(|e| eyre::eyre!("encode state: {}", e))?;
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir).map_err(|e| eyre::eyre!("create {:?}: {}", dir, e))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text).map_err(|e| eyre::eyre!("write state {:?}: {}", tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| eyre::eyre!("replace state {:?}: {}", path, e))?;
    Ok(())
}
