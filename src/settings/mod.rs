//! Settings, types and defaults.
//!
//! Settings are stored as a RON file under `data/settings/` and are hot-reloadable
//! using the RON watcher utilities (see `ron::setup_ron_watcher`). Every field has
//! a serde default so a partial file is always valid.
use crate::chunk::decode::TerrainRgbDecoder;
use crate::chunk::StreamingConfig;
use crate::fetch::{FetchError, HttpFetchClient, SyntheticFetchClient, TerrainSource};
use bevy::prelude::{KeyCode, Resource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub mod loader;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsSettings {
    #[serde(default = "GraphicsSettings::default_vsync")]
    pub vsync: bool, // Enable vertical sync to cap FPS to the display refresh rate.
    #[serde(default = "GraphicsSettings::default_shadows")]
    pub shadows: bool, // Enable/disable directional light shadows
}

impl GraphicsSettings {
    fn default_vsync() -> bool { true }
    fn default_shadows() -> bool { true }
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self { vsync: Self::default_vsync(), shadows: Self::default_shadows() }
    }
}

/// Controls / input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlsSettings {
    #[serde(default = "ControlsSettings::default_keybinds")]
    pub keybinds: HashMap<String, String>, // Map of action names to key identifiers (editable by user)
}

impl ControlsSettings {
    fn default_keybinds() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("toggle_hud".to_string(), "F1".to_string());
        m.insert("toggle_grid".to_string(), "F2".to_string());
        m.insert("toggle_streaming_debug".to_string(), "F3".to_string());
        m.insert("pause_flight".to_string(), "Space".to_string());
        m
    }

    /// Key bound to `action`, falling back to `default` when unbound or unparseable.
    #[must_use]
    pub fn key_for(&self, action: &str, default: KeyCode) -> KeyCode {
        self.keybinds.get(action).and_then(|name| Settings::keycode_from_str(name)).unwrap_or(default)
    }
}

impl Default for ControlsSettings {
    fn default() -> Self {
        Self { keybinds: Self::default_keybinds() }
    }
}

/// Scripted camera flight used to drive the streamer in the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightSettings {
    #[serde(default = "FlightSettings::default_speed")]
    pub speed: f32, // Ground speed in meters per second.
    #[serde(default = "FlightSettings::default_altitude")]
    pub altitude: f32, // Camera height above the terrain datum in meters.
    #[serde(default = "FlightSettings::default_radius")]
    pub radius: f32, // Radius of the figure-eight flight path in meters.
}

impl FlightSettings {
    fn default_speed() -> f32 { 120.0 }
    fn default_altitude() -> f32 { 650.0 }
    fn default_radius() -> f32 { 4000.0 }
}

impl Default for FlightSettings {
    fn default() -> Self {
        Self { speed: Self::default_speed(), altitude: Self::default_altitude(), radius: Self::default_radius() }
    }
}

/// Where chunk payloads come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Synthetic,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default = "SourceSettings::default_kind")]
    pub kind: SourceKind, // Synthetic (local noise) or Http (remote tile endpoint). Restart to change.
    #[serde(default = "SourceSettings::default_endpoint")]
    pub endpoint: String, // URL template; {resolution}, {x} and {z} are substituted.
    #[serde(default = "SourceSettings::default_timeout_seconds")]
    pub timeout_seconds: f64, // Per-request timeout for the HTTP source.
    #[serde(default = "SourceSettings::default_warmup_requests")]
    pub warmup_requests: u32, // Synthetic source answers "not ready" this many times per chunk.
    #[serde(default = "SourceSettings::default_seed")]
    pub seed: u32, // Noise seed for the synthetic source.
    #[serde(default)]
    pub strict_resolution: bool, // Reject tiles whose size is not one of the band resolutions.
}

impl SourceSettings {
    fn default_kind() -> SourceKind { SourceKind::Synthetic }
    fn default_endpoint() -> String { "http://localhost:8080/terrain".to_string() }
    fn default_timeout_seconds() -> f64 { 10.0 }
    fn default_warmup_requests() -> u32 { 1 }
    fn default_seed() -> u32 { 12345 }

    /// Build the fetch client this section describes.
    ///
    /// # Errors
    /// Returns [`FetchError::Setup`] if the HTTP client cannot be started.
    pub fn build_client(&self, chunk_size: f32) -> Result<TerrainSource, FetchError> {
        Ok(match self.kind {
            SourceKind::Synthetic => {
                TerrainSource::Synthetic(SyntheticFetchClient::new(self.seed, chunk_size, self.warmup_requests))
            }
            SourceKind::Http => {
                let timeout = Duration::try_from_secs_f64(self.timeout_seconds)
                    .map_err(|e| FetchError::Setup(format!("timeout_seconds: {e}")))?;
                TerrainSource::Http(HttpFetchClient::new(self.endpoint.clone(), timeout)?)
            }
        })
    }

    /// Decoder matching this source and the band table in `streaming`.
    #[must_use]
    pub fn build_decoder(&self, streaming: &StreamingConfig) -> TerrainRgbDecoder {
        if self.strict_resolution {
            TerrainRgbDecoder::accepting(streaming.resolution_bands.iter().map(|b| b.resolution))
        } else {
            TerrainRgbDecoder::new()
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: Self::default_kind(),
            endpoint: Self::default_endpoint(),
            timeout_seconds: Self::default_timeout_seconds(),
            warmup_requests: Self::default_warmup_requests(),
            seed: Self::default_seed(),
            strict_resolution: false,
        }
    }
}

/// Top-level Settings
#[derive(Resource, Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub graphics: GraphicsSettings,
    #[serde(default)]
    pub controls: ControlsSettings,
    #[serde(default)]
    pub flight: FlightSettings,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub source: SourceSettings,
}

impl Settings {
    #[must_use]
    pub fn defaults() -> Self { Settings::default() }

    /// Convert a string key identifier (e.g., from `controls.keybinds`) into a `KeyCode` that
    /// can be used with Bevy's input system.
    ///
    /// # Arguments
    /// * `name` - The string key identifier to convert (e.g., "G", "Space", "F1").
    ///
    /// # Returns
    /// An `Option<KeyCode>` corresponding to the provided string, or `None` if the string
    /// does not match any known key.
    #[must_use]
    pub fn keycode_from_str(name: &str) -> Option<KeyCode> {
        let s = name.trim().to_ascii_uppercase();
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Some(match c {
                'A' => KeyCode::KeyA,
                'B' => KeyCode::KeyB,
                'C' => KeyCode::KeyC,
                'D' => KeyCode::KeyD,
                'E' => KeyCode::KeyE,
                'F' => KeyCode::KeyF,
                'G' => KeyCode::KeyG,
                'H' => KeyCode::KeyH,
                'I' => KeyCode::KeyI,
                'J' => KeyCode::KeyJ,
                'K' => KeyCode::KeyK,
                'L' => KeyCode::KeyL,
                'M' => KeyCode::KeyM,
                'N' => KeyCode::KeyN,
                'O' => KeyCode::KeyO,
                'P' => KeyCode::KeyP,
                'Q' => KeyCode::KeyQ,
                'R' => KeyCode::KeyR,
                'S' => KeyCode::KeyS,
                'T' => KeyCode::KeyT,
                'U' => KeyCode::KeyU,
                'V' => KeyCode::KeyV,
                'W' => KeyCode::KeyW,
                'X' => KeyCode::KeyX,
                'Y' => KeyCode::KeyY,
                'Z' => KeyCode::KeyZ,
                '0' => KeyCode::Digit0,
                '1' => KeyCode::Digit1,
                '2' => KeyCode::Digit2,
                '3' => KeyCode::Digit3,
                '4' => KeyCode::Digit4,
                '5' => KeyCode::Digit5,
                '6' => KeyCode::Digit6,
                '7' => KeyCode::Digit7,
                '8' => KeyCode::Digit8,
                '9' => KeyCode::Digit9,
                _ => return None,
            });
        }

        Some(match s.as_str() {
            // Function keys
            "F1" => KeyCode::F1,
            "F2" => KeyCode::F2,
            "F3" => KeyCode::F3,
            "F4" => KeyCode::F4,
            "F5" => KeyCode::F5,
            "F6" => KeyCode::F6,
            "F7" => KeyCode::F7,
            "F8" => KeyCode::F8,
            "F9" => KeyCode::F9,
            "F10" => KeyCode::F10,
            "F11" => KeyCode::F11,
            "F12" => KeyCode::F12,

            // Whitespace / control
            "ESC" | "ESCAPE" => KeyCode::Escape,
            "SPACE" => KeyCode::Space,
            "TAB" => KeyCode::Tab,
            "ENTER" | "RETURN" => KeyCode::Enter,
            "BACKSPACE" | "BACK" => KeyCode::Backspace,

            // Arrows / navigation
            "LEFT" | "ARROWLEFT" => KeyCode::ArrowLeft,
            "RIGHT" | "ARROWRIGHT" => KeyCode::ArrowRight,
            "UP" | "ARROWUP" => KeyCode::ArrowUp,
            "DOWN" | "ARROWDOWN" => KeyCode::ArrowDown,
            "HOME" => KeyCode::Home,
            "END" => KeyCode::End,
            "PAGEUP" => KeyCode::PageUp,
            "PAGEDOWN" => KeyCode::PageDown,

            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings: Settings = ::ron::from_str(
            "(streaming: (load_radius: 4, unload_radius: 6), source: (kind: Http, endpoint: \"http://tiles\"))",
        )
        .expect("parse");
        assert_eq!(settings.streaming.load_radius, 4);
        assert_eq!(settings.streaming.max_concurrent_fetches, 20);
        assert_eq!(settings.source.kind, SourceKind::Http);
        assert_eq!(settings.source.seed, 12345);
        assert!(settings.graphics.vsync);
    }

    #[test]
    fn keybinds_parse_and_fall_back() {
        assert_eq!(Settings::keycode_from_str("f1"), Some(KeyCode::F1));
        assert_eq!(Settings::keycode_from_str("g"), Some(KeyCode::KeyG));
        assert_eq!(Settings::keycode_from_str("Space"), Some(KeyCode::Space));
        assert_eq!(Settings::keycode_from_str("Hyper"), None);

        let mut controls = ControlsSettings::default();
        controls.keybinds.insert("toggle_hud".into(), "nonsense".into());
        assert_eq!(controls.key_for("toggle_hud", KeyCode::F1), KeyCode::F1);
        assert_eq!(controls.key_for("toggle_grid", KeyCode::KeyG), KeyCode::F2);
    }

    #[test]
    fn synthetic_source_builds_without_network() {
        let source = SourceSettings::default();
        assert!(matches!(source.build_client(256.0), Ok(TerrainSource::Synthetic(_))));
    }
}
