// Save states
//
// The on-disk format is the `NESSTATE\n` magic followed by one JSON
// document holding the per-subsystem snapshots in mapper, memory, PPU,
// controllers, APU, CPU order. Every snapshot is an explicit field schema;
// bank positions are rom offsets, never pointers, so a state file is
// position-independent.
//
// Loading validates each block against the inserted cartridge and the
// documented invariants. Any failure reinitialises every subsystem to
// power-on and reports the error; a half-loaded machine never runs.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use super::Nes;
use crate::apu::ApuState;
use crate::bus::MemoryState;
use crate::cartridge::MapperState;
use crate::cpu::CpuState;
use crate::frontend::Frontend;
use crate::input::JoypadsState;
use crate::ppu::PpuState;

/// File magic.
const MAGIC: &[u8; 9] = b"NESSTATE\n";

/// Errors surfaced by save/load.
#[derive(Debug)]
pub enum SaveStateError {
    /// I/O error against the reader/writer.
    Io(io::Error),
    /// Serialisation or deserialisation failure.
    Serialization(serde_json::Error),
    /// The file does not start with the `NESSTATE` magic.
    BadMagic,
    /// A snapshot failed validation against the inserted cartridge.
    Invalid(String),
}

impl std::fmt::Display for SaveStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveStateError::Io(e) => write!(f, "i/o error: {}", e),
            SaveStateError::Serialization(e) => write!(f, "serialization error: {}", e),
            SaveStateError::BadMagic => write!(f, "not a NESSTATE file"),
            SaveStateError::Invalid(msg) => write!(f, "invalid state: {}", msg),
        }
    }
}

impl std::error::Error for SaveStateError {}

impl From<io::Error> for SaveStateError {
    fn from(e: io::Error) -> Self {
        SaveStateError::Io(e)
    }
}

impl From<serde_json::Error> for SaveStateError {
    fn from(e: serde_json::Error) -> Self {
        SaveStateError::Serialization(e)
    }
}

/// The complete machine state. Field order fixes the block order in the
/// serialised document.
#[derive(Serialize, Deserialize)]
struct StateDocument {
    mapper: MapperState,
    memory: MemoryState,
    ppu: PpuState,
    joypads: JoypadsState,
    apu: ApuState,
    cpu: CpuState,
}

impl Nes {
    /// Serialise the machine state.
    pub fn save_state<W: Write>(&self, writer: &mut W) -> Result<(), SaveStateError> {
        writer.write_all(MAGIC)?;
        let document = StateDocument {
            mapper: self.bus.mapper.snapshot(),
            memory: self.bus.snapshot_memory(),
            ppu: self.bus.ppu.snapshot(),
            joypads: self.bus.joypads.snapshot(),
            apu: self.bus.apu.snapshot(),
            cpu: self.cpu.snapshot(),
        };
        serde_json::to_writer(writer, &document)?;
        Ok(())
    }

    /// Restore the machine state. On any failure every subsystem is
    /// reinitialised to power-on and the error returned.
    pub fn load_state<R: Read>(
        &mut self,
        reader: &mut R,
        fe: &mut dyn Frontend,
    ) -> Result<(), SaveStateError> {
        match self.try_load_state(reader) {
            Ok(()) => Ok(()),
            Err(error) => {
                fe.warning(format_args!("failed to load machine state: {}", error));
                log::warn!("state load failed, reinitialising: {}", error);
                self.power_on(fe);
                Err(error)
            }
        }
    }

    fn try_load_state<R: Read>(&mut self, reader: &mut R) -> Result<(), SaveStateError> {
        let mut magic = [0u8; MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SaveStateError::BadMagic);
        }
        let document: StateDocument = serde_json::from_reader(reader)?;

        self.bus
            .mapper
            .restore(document.mapper)
            .map_err(|e| SaveStateError::Invalid(e.to_string()))?;
        self.bus
            .restore_memory(document.memory)
            .map_err(SaveStateError::Invalid)?;
        self.bus
            .ppu
            .restore(document.ppu)
            .map_err(SaveStateError::Invalid)?;
        self.bus
            .joypads
            .restore(document.joypads)
            .map_err(SaveStateError::Invalid)?;
        self.bus
            .apu
            .restore(document.apu)
            .map_err(SaveStateError::Invalid)?;
        self.cpu.restore(document.cpu);
        Ok(())
    }
}
