// Cartridge module - ROM model, iNES loading and the mapper framework
//
// A `Rom` is the immutable image of an inserted cartridge: PRG/CHR bank
// payloads plus the handful of header facts (mapper, TV mode, mirroring,
// battery RAM, trainer) the simulation needs. It outlives every simulation
// component; mappers only ever adjust indices into it.
//
// # iNES 1.0 layout
//
// ```text
// 0-3   magic 'N','E','S',$1A
// 4     PRG bank count (16 KiB units)
// 5     CHR bank count (8 KiB units)
// 6     bit 0 mirroring (0=horizontal, 1=vertical)
//       bit 1 battery RAM present
//       bit 2 512-byte trainer follows the header
//       bit 3 four-screen mirroring (overrides bit 0)
//       bits 4-7 mapper id, low nibble
// 7     bits 4-7 mapper id, high nibble
// 8     reserved (normalised to zero)
// 9     bit 0 TV mode (0=NTSC, 1=PAL)
// 10-15 reserved (normalised to zero)
// ```

pub mod mappers;

use std::io::Read;

pub use mappers::{create_mapper, ChrLatches, Mapper, MapperState, RomWindow};

/// Size of one PRG bank (16 KiB).
pub const PRG_BANK_SIZE: usize = 16 * 1024;

/// Size of one CHR bank (8 KiB).
pub const CHR_BANK_SIZE: usize = 8 * 1024;

/// Size of the optional trainer blob.
pub const TRAINER_SIZE: usize = 512;

/// Cartridge mapper families recognised by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MapperKind {
    Axrom,
    Cnrom,
    Mmc1,
    Mmc2,
    Mmc3,
    Nrom,
    Unrom,
    /// The rom is still loadable; attempting to simulate it fails with
    /// [`RomError::UnknownMapper`].
    Unknown,
}

impl MapperKind {
    /// Human-readable mapper name.
    pub fn name(self) -> &'static str {
        match self {
            MapperKind::Axrom => "AxROM",
            MapperKind::Cnrom => "CNROM",
            MapperKind::Mmc1 => "MMC1",
            MapperKind::Mmc2 => "MMC2",
            MapperKind::Mmc3 => "MMC3",
            MapperKind::Nrom => "NROM",
            MapperKind::Unrom => "UNROM",
            MapperKind::Unknown => "unknown mapper",
        }
    }

    fn from_ines(id: u8) -> MapperKind {
        match id {
            0 => MapperKind::Nrom,
            1 => MapperKind::Mmc1,
            2 => MapperKind::Unrom,
            3 => MapperKind::Cnrom,
            4 => MapperKind::Mmc3,
            7 => MapperKind::Axrom,
            9 => MapperKind::Mmc2,
            _ => MapperKind::Unknown,
        }
    }
}

/// TV standard of the inserted cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TvMode {
    Ntsc,
    Pal,
}

/// Nametable arrangement.
///
/// `Single` only ever comes from a mapper (AxROM, MMC1); the iNES header can
/// express horizontal, vertical and four-screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Mirroring {
    Single,
    Horizontal,
    Vertical,
    FourScreen,
}

/// Errors surfaced while loading a cartridge or inserting it.
#[derive(Debug)]
pub enum RomError {
    /// The rom content is incoherent: bad magic, truncated payload, or a
    /// (PRG, CHR, mirroring) combination the selected mapper rejects.
    BadRom(String),
    /// The iNES mapper id is not one of the supported families.
    UnknownMapper(u8),
    /// The underlying reader failed.
    Io(std::io::Error),
}

impl std::fmt::Display for RomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RomError::BadRom(msg) => write!(f, "bad rom: {}", msg),
            RomError::UnknownMapper(id) => write!(f, "unknown mapper {}", id),
            RomError::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for RomError {}

impl From<std::io::Error> for RomError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            RomError::BadRom("truncated file".into())
        } else {
            RomError::Io(e)
        }
    }
}

/// Immutable image of a cartridge.
pub struct Rom {
    /// Number of 16 KiB PRG banks.
    pub prg_count: usize,
    /// Number of 8 KiB CHR banks. Zero means the cartridge carries CHR-RAM.
    pub chr_count: usize,
    /// Mapper family.
    pub mapper: MapperKind,
    /// Raw iNES mapper id, kept so header serialisation round-trips even
    /// for unknown mappers.
    pub ines_mapper: u8,
    /// TV standard.
    pub tv_mode: TvMode,
    /// Initial nametable mirroring.
    pub mirroring: Mirroring,
    /// Battery-backed static RAM present at $6000-$7FFF.
    pub sram: bool,
    /// PRG payload, `prg_count * 16 KiB`.
    pub prg: Vec<u8>,
    /// CHR payload, `chr_count * 8 KiB`. Empty when CHR-RAM is used.
    pub chr: Vec<u8>,
    /// Optional 512-byte trainer, copied into PRG-RAM at power-on.
    pub trainer: Option<Vec<u8>>,
}

impl Rom {
    /// Parse an iNES 1.0 image from a reader.
    pub fn from_ines_reader<R: Read>(r: &mut R) -> Result<Rom, RomError> {
        let mut header = [0u8; 16];
        r.read_exact(&mut header)?;
        let mut rom = Rom::from_header(&header)?;
        if rom.trainer.is_some() {
            let mut trainer = vec![0u8; TRAINER_SIZE];
            r.read_exact(&mut trainer)?;
            rom.trainer = Some(trainer);
        }
        r.read_exact(&mut rom.prg)?;
        r.read_exact(&mut rom.chr)?;
        log::info!(
            "loaded iNES image: {} PRG, {} CHR, {}",
            rom.prg_count,
            rom.chr_count,
            rom.mapper.name()
        );
        Ok(rom)
    }

    /// Parse an iNES 1.0 image already held in memory.
    pub fn from_ines_bytes(bytes: &[u8]) -> Result<Rom, RomError> {
        let mut cursor = bytes;
        Rom::from_ines_reader(&mut cursor)
    }

    /// Decode the 16-byte header and size the payload buffers.
    fn from_header(header: &[u8; 16]) -> Result<Rom, RomError> {
        if header[0] != b'N' || header[1] != b'E' || header[2] != b'S' || header[3] != 0x1A {
            return Err(RomError::BadRom("bad iNES magic".into()));
        }
        let prg_count = header[4] as usize;
        let chr_count = header[5] as usize;
        let mirroring = if header[6] & 0x08 != 0 {
            Mirroring::FourScreen
        } else if header[6] & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let sram = header[6] & 0x02 != 0;
        let trainer = if header[6] & 0x04 != 0 {
            Some(Vec::new())
        } else {
            None
        };
        let ines_mapper = (header[7] & 0xF0) | (header[6] >> 4);
        let tv_mode = if header[9] & 0x01 != 0 {
            TvMode::Pal
        } else {
            TvMode::Ntsc
        };
        Ok(Rom {
            prg_count,
            chr_count,
            mapper: MapperKind::from_ines(ines_mapper),
            ines_mapper,
            tv_mode,
            mirroring,
            sram,
            prg: vec![0u8; prg_count * PRG_BANK_SIZE],
            chr: vec![0u8; chr_count * CHR_BANK_SIZE],
            trainer,
        })
    }

    /// Re-serialise the iNES header. Reserved bytes come out as zero, so
    /// parse-then-serialise equals the input modulo that normalisation.
    pub fn header_bytes(&self) -> [u8; 16] {
        let mut header = [0u8; 16];
        header[0] = b'N';
        header[1] = b'E';
        header[2] = b'S';
        header[3] = 0x1A;
        header[4] = self.prg_count as u8;
        header[5] = self.chr_count as u8;
        let mut flags6 = self.ines_mapper << 4;
        match self.mirroring {
            Mirroring::Vertical => flags6 |= 0x01,
            Mirroring::FourScreen => flags6 |= 0x08,
            Mirroring::Horizontal | Mirroring::Single => {}
        }
        if self.sram {
            flags6 |= 0x02;
        }
        if self.trainer.is_some() {
            flags6 |= 0x04;
        }
        header[6] = flags6;
        header[7] = self.ines_mapper & 0xF0;
        if self.tv_mode == TvMode::Pal {
            header[9] = 0x01;
        }
        header
    }

    /// One 16 KiB PRG bank.
    pub fn prg_bank(&self, index: usize) -> &[u8] {
        &self.prg[index * PRG_BANK_SIZE..(index + 1) * PRG_BANK_SIZE]
    }

    /// Last 16 KiB PRG bank.
    pub fn last_prg_bank(&self) -> &[u8] {
        self.prg_bank(self.prg_count - 1)
    }
}

/// Build a blank in-memory rom for tests. PRG vectors and payloads are all
/// zero; callers poke in what they need.
#[doc(hidden)]
pub fn test_rom(mapper: MapperKind, prg_count: usize, chr_count: usize) -> Rom {
    Rom {
        prg_count,
        chr_count,
        mapper,
        ines_mapper: match mapper {
            MapperKind::Nrom => 0,
            MapperKind::Mmc1 => 1,
            MapperKind::Unrom => 2,
            MapperKind::Cnrom => 3,
            MapperKind::Mmc3 => 4,
            MapperKind::Axrom => 7,
            MapperKind::Mmc2 => 9,
            MapperKind::Unknown => 255,
        },
        tv_mode: TvMode::Ntsc,
        mirroring: Mirroring::Horizontal,
        sram: false,
        prg: vec![0u8; prg_count * PRG_BANK_SIZE],
        chr: vec![0u8; chr_count * CHR_BANK_SIZE],
        trainer: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_image(prg: u8, chr: u8, flags6: u8, flags7: u8, flags9: u8) -> Vec<u8> {
        let mut image = vec![b'N', b'E', b'S', 0x1A, prg, chr, flags6, flags7];
        image.extend_from_slice(&[0, flags9, 0, 0, 0, 0, 0, 0]);
        if flags6 & 0x04 != 0 {
            image.extend_from_slice(&[0xAA; TRAINER_SIZE]);
        }
        image.extend(std::iter::repeat(0x11).take(prg as usize * PRG_BANK_SIZE));
        image.extend(std::iter::repeat(0x22).take(chr as usize * CHR_BANK_SIZE));
        image
    }

    #[test]
    fn test_parse_basic_nrom() {
        let image = build_image(1, 1, 0x00, 0x00, 0x00);
        let rom = Rom::from_ines_bytes(&image).expect("valid image");
        assert_eq!(rom.prg_count, 1);
        assert_eq!(rom.chr_count, 1);
        assert_eq!(rom.mapper, MapperKind::Nrom);
        assert_eq!(rom.mirroring, Mirroring::Horizontal);
        assert_eq!(rom.tv_mode, TvMode::Ntsc);
        assert!(!rom.sram);
        assert!(rom.trainer.is_none());
        assert_eq!(rom.prg.len(), PRG_BANK_SIZE);
        assert_eq!(rom.prg[0], 0x11);
        assert_eq!(rom.chr[0], 0x22);
    }

    #[test]
    fn test_parse_flags() {
        // Vertical mirroring, battery, PAL, mapper 4 (MMC3)
        let image = build_image(2, 2, 0x43, 0x00, 0x01);
        let rom = Rom::from_ines_bytes(&image).expect("valid image");
        assert_eq!(rom.mapper, MapperKind::Mmc3);
        assert_eq!(rom.ines_mapper, 4);
        assert_eq!(rom.mirroring, Mirroring::Vertical);
        assert_eq!(rom.tv_mode, TvMode::Pal);
        assert!(rom.sram);
    }

    #[test]
    fn test_four_screen_overrides_mirroring_bit() {
        let image = build_image(1, 1, 0x09, 0x00, 0x00);
        let rom = Rom::from_ines_bytes(&image).expect("valid image");
        assert_eq!(rom.mirroring, Mirroring::FourScreen);
    }

    #[test]
    fn test_trainer_is_read() {
        let image = build_image(1, 0, 0x04, 0x00, 0x00);
        let rom = Rom::from_ines_bytes(&image).expect("valid image");
        let trainer = rom.trainer.expect("trainer present");
        assert_eq!(trainer.len(), TRAINER_SIZE);
        assert!(trainer.iter().all(|&b| b == 0xAA));
        // The PRG payload must still line up after the trainer
        assert!(rom.prg.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut image = build_image(1, 1, 0x00, 0x00, 0x00);
        image[3] = 0x00;
        assert!(matches!(
            Rom::from_ines_bytes(&image),
            Err(RomError::BadRom(_))
        ));
    }

    #[test]
    fn test_truncated_image_rejected() {
        let image = build_image(2, 1, 0x00, 0x00, 0x00);
        assert!(matches!(
            Rom::from_ines_bytes(&image[..image.len() - 100]),
            Err(RomError::BadRom(_))
        ));
    }

    #[test]
    fn test_unknown_mapper_still_loads() {
        // Mapper 66 is not in the supported set
        let image = build_image(1, 1, 0x20, 0x40, 0x00);
        let rom = Rom::from_ines_bytes(&image).expect("rom must load");
        assert_eq!(rom.ines_mapper, 0x42);
        assert_eq!(rom.mapper, MapperKind::Unknown);
    }

    #[test]
    fn test_header_round_trip() {
        for flags6 in [0x00u8, 0x01, 0x02, 0x03, 0x12, 0x96] {
            let image = build_image(2, 1, flags6, 0x00, 0x01);
            let rom = Rom::from_ines_bytes(&image).expect("valid image");
            assert_eq!(
                rom.header_bytes(),
                image[..16],
                "header must round-trip for flags6={:#04x}",
                flags6
            );
        }
    }

    #[test]
    fn test_header_round_trip_normalises_reserved() {
        let mut image = build_image(1, 1, 0x00, 0x00, 0x00);
        image[8] = 0x77;
        image[12] = 0x33;
        let rom = Rom::from_ines_bytes(&image).expect("valid image");
        let out = rom.header_bytes();
        assert_eq!(out[8], 0, "reserved bytes are normalised to zero");
        assert_eq!(out[12], 0);
        assert_eq!(out[..8], image[..8]);
    }

    #[test]
    fn test_mapper_names() {
        assert_eq!(MapperKind::Mmc1.name(), "MMC1");
        assert_eq!(MapperKind::Unknown.name(), "unknown mapper");
    }
}
