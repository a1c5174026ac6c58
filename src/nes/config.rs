// Configuration management
//
// Host-side knobs persisted as TOML next to the executable. Nothing here
// changes emulation semantics; it is the glue a frontend reads at startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default configuration file name.
const CONFIG_FILE: &str = "emulator_config.toml";

/// Frontend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub save_state: SaveStateConfig,
}

/// Video settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Integer window scale over the 256x240 frame.
    pub scale: u32,
    /// Enable VSync in the host window.
    pub vsync: bool,
}

/// Audio settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub enabled: bool,
    /// Output volume, 0.0-1.0.
    pub volume: f32,
    /// Slots in the handoff ring between the core and the audio thread.
    pub ring_slots: usize,
}

/// Save-state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveStateConfig {
    /// Number of save slots offered by the frontend.
    pub slots: u8,
    /// Directory state files are written to.
    pub directory: PathBuf,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            video: VideoConfig {
                scale: 3,
                vsync: true,
            },
            audio: AudioConfig {
                enabled: true,
                volume: 0.8,
                ring_slots: 4,
            },
            save_state: SaveStateConfig {
                slots: 10,
                directory: PathBuf::from("saves"),
            },
        }
    }
}

impl EmulatorConfig {
    /// Load from the default path, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load_or_default() -> EmulatorConfig {
        match EmulatorConfig::load(CONFIG_FILE) {
            Ok(config) => config,
            Err(error) => {
                log::info!("using default configuration: {}", error);
                EmulatorConfig::default()
            }
        }
    }

    /// Load from a specific path.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<EmulatorConfig> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Persist to the default path.
    pub fn save(&self) -> io::Result<()> {
        self.save_to(CONFIG_FILE)
    }

    /// Persist to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, text)
    }
}
