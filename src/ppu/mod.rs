// PPU module - Picture Processing Unit
//
// The PPU accumulates master-clock debt as the CPU hands it cycles and only
// runs its scanline machine when the debt reaches the next event boundary
// (frame end, or the MMC3 counter clock when that mapper is inserted).
// Every register access first forces the machine to catch up, so a write
// landing mid-scanline takes effect exactly where the raster is. Whole
// scanlines are the rendering unit; the one place that needs finer grain,
// the sprite-zero hit, is probed incrementally as the debt grows.
//
// Scanline numbering follows the machine: -1 is the VBlank gap, 0 the
// pre-render dummy line, 1-240 the visible lines, 241 the idle tail line.
// On NTSC the pre-render line loses one dot on odd frames while rendering
// is enabled.
//
// ## Register Map
//
// | Address | Name      | Access | Description                |
// |---------|-----------|--------|----------------------------|
// | $2000   | PPUCTRL   | Write  | NMI enable, pattern bases  |
// | $2001   | PPUMASK   | Write  | Rendering toggles, emphasis|
// | $2002   | PPUSTATUS | Read   | VBlank, sprite 0, overflow |
// | $2003   | OAMADDR   | Write  | OAM pointer                |
// | $2004   | OAMDATA   | R/W    | OAM access                 |
// | $2005   | PPUSCROLL | Write 2x | Scroll latch             |
// | $2006   | PPUADDR   | Write 2x | VRAM address latch       |
// | $2007   | PPUDATA   | R/W    | VRAM access (buffered)     |

pub mod palette;
mod rendering;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::cartridge::{ChrLatches, Mapper, MapperKind, TvMode};
use crate::frontend::Frontend;

pub use palette::{palette_lookup, Color, PALETTE_SIZE};

/// Visible frame width in pixels.
pub const FRAME_WIDTH: usize = 256;

/// Visible frame height in pixels.
pub const FRAME_HEIGHT: usize = 240;

/// Frame buffer length.
pub const FRAME_PIXELS: usize = FRAME_WIDTH * FRAME_HEIGHT;

bitflags! {
    /// $2000 PPUCTRL.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PpuCtrl: u8 {
        const NAMETABLE_X = 0x01;
        const NAMETABLE_Y = 0x02;
        const INCREMENT_32 = 0x04;
        const SPRITE_TABLE = 0x08;
        const BACKGROUND_TABLE = 0x10;
        const SPRITE_SIZE_16 = 0x20;
        const MASTER_SLAVE = 0x40;
        const NMI_ENABLE = 0x80;
    }
}

bitflags! {
    /// $2001 PPUMASK.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PpuMask: u8 {
        const GREYSCALE = 0x01;
        const SHOW_BACKGROUND_LEFT = 0x02;
        const SHOW_SPRITES_LEFT = 0x04;
        const SHOW_BACKGROUND = 0x08;
        const SHOW_SPRITES = 0x10;
        const EMPHASIZE_RED = 0x20;
        const EMPHASIZE_GREEN = 0x40;
        const EMPHASIZE_BLUE = 0x80;
    }
}

/// Picture Processing Unit state.
pub struct Ppu {
    // ========================================
    // Registers
    // ========================================
    pub(crate) ctrl: PpuCtrl,
    pub(crate) mask: PpuMask,
    /// Bit 7 VBlank, bit 6 sprite-zero hit, bit 5 sprite overflow.
    pub(crate) status: u8,
    pub(crate) oam_addr: u8,

    // Latched scroll state (the "temporary" counter set), written through
    // $2000/$2005/$2006 via the shared write toggle
    pub(crate) reg_fv: u8, // fine Y
    pub(crate) reg_v: u8,  // vertical nametable bit
    pub(crate) reg_h: u8,  // horizontal nametable bit
    pub(crate) reg_vt: u8, // coarse Y
    pub(crate) reg_ht: u8, // coarse X
    pub(crate) reg_fh: u8, // fine X
    pub(crate) write_latch: bool,

    // Current counters feeding the fetch logic
    pub(crate) cnt_fv: u8,
    pub(crate) cnt_v: u8,
    pub(crate) cnt_h: u8,
    pub(crate) cnt_vt: u8,
    pub(crate) cnt_ht: u8,

    /// Delayed $2007 read buffer.
    pub(crate) read_buffer: u8,

    // ========================================
    // Memory owned by the PPU
    // ========================================
    /// Palette RAM; entry 0 of each background palette mirrors into the
    /// sprite side.
    pub(crate) palettes: [u8; 32],
    /// Object Attribute Memory, 64 sprites x 4 bytes.
    pub(crate) oam: [u8; 256],

    // ========================================
    // Scanline rendering state
    // ========================================
    /// Next line to draw: -1 VBlank gap, 0 dummy, 1-240 visible, 241 idle.
    pub(crate) sline: i32,
    /// Sub-step of the line: 0 render, 1 evaluation, 2 scroll/preload.
    pub(crate) sline_step: u8,
    /// 9-bit colour indices, one frame.
    pub(crate) frame: Vec<u16>,
    pub(crate) fb_pos: usize,
    /// Background pattern pipeline, two tiles deep.
    pub(crate) p0: u16,
    pub(crate) p1: u16,
    /// Attribute bits for the two pipelined tiles.
    pub(crate) atr: [u8; 2],
    /// Sprites accepted for the next line, 4 bytes each: tile, x,
    /// attributes, row-within-sprite.
    pub(crate) stm: [u8; 32],
    pub(crate) scounter: usize,
    /// Sprite height latched at evaluation time.
    pub(crate) size16: bool,
    /// Background colours of the line being drawn.
    pub(crate) pf: [u8; 256],
    /// Sprite colours of the line being drawn.
    pub(crate) obj: [u8; 256],
    /// Sprite priority: true puts the sprite behind the background.
    pub(crate) obj_behind: [bool; 256],
    /// Columns where sprite 0 has opaque pixels this line.
    pub(crate) s0c_pos: [u16; 8],
    pub(crate) s0c_n: usize,
    /// Sprite 0 is among the sprites of the current line.
    pub(crate) s0c_flag: bool,
    /// Pixels already exposed to the sprite-zero probe this line.
    pub(crate) current_pos: usize,
    /// An NMI has been produced (or suppressed) for this VBlank.
    pub(crate) nmi_occurred: bool,
    /// Pending NMI line to the CPU, drained by the orchestrator.
    pub(crate) nmi_pending: bool,

    // ========================================
    // Clock-debt bookkeeping (master clocks)
    // ========================================
    pub(crate) tv_mode: TvMode,
    pub(crate) ppu_to_cc: i64,
    pub(crate) cpu_to_cc: i64,
    /// Master clocks pending execution.
    pub(crate) ccs: i64,
    /// Master clocks until the end of the current frame.
    pub(crate) ccs_to_end: i64,
    pub(crate) cc_per_line: i64,
    pub(crate) cc_per_frame: i64,
    pub(crate) cc_per_vblank: i64,
    /// Clocks to finish sub-step 0 / sub-steps 0+1 of a line.
    pub(crate) cc_line_s0: i64,
    pub(crate) cc_line_s1: i64,
    pub(crate) odd_frame: bool,

    // ========================================
    // Mapper couplings
    // ========================================
    pub(crate) mmc2_enabled: bool,
    pub(crate) mmc3_enabled: bool,
    /// Master clocks from frame start to the first MMC3 counter clock.
    pub(crate) mmc3_cc_first: i64,
    /// Master clocks until the next forced run for the MMC3 counter.
    pub(crate) mmc3_cc_to_end: i64,
    /// CHR latch snapshot slots used around sprite rendering and the
    /// sprite-zero probe.
    pub(crate) mmc2_latches: [ChrLatches; 2],
}

/// Serialisable snapshot of the PPU.
#[derive(Debug, Serialize, Deserialize)]
pub struct PpuState {
    pub tv_mode: TvMode,
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub reg_fv: u8,
    pub reg_v: u8,
    pub reg_h: u8,
    pub reg_vt: u8,
    pub reg_ht: u8,
    pub reg_fh: u8,
    pub write_latch: bool,
    pub cnt_fv: u8,
    pub cnt_v: u8,
    pub cnt_h: u8,
    pub cnt_vt: u8,
    pub cnt_ht: u8,
    pub read_buffer: u8,
    pub palettes: Vec<u8>,
    pub oam: Vec<u8>,
    pub sline: i32,
    pub sline_step: u8,
    pub frame: Vec<u16>,
    pub fb_pos: usize,
    pub p0: u16,
    pub p1: u16,
    pub atr: [u8; 2],
    pub stm: Vec<u8>,
    pub scounter: usize,
    pub size16: bool,
    pub pf: Vec<u8>,
    pub obj: Vec<u8>,
    pub obj_behind: Vec<bool>,
    pub s0c_pos: [u16; 8],
    pub s0c_n: usize,
    pub s0c_flag: bool,
    pub current_pos: usize,
    pub nmi_occurred: bool,
    pub nmi_pending: bool,
    pub ccs: i64,
    pub ccs_to_end: i64,
    pub odd_frame: bool,
    pub mmc2_enabled: bool,
    pub mmc3_enabled: bool,
    pub mmc3_cc_to_end: i64,
    pub mmc2_latches: [ChrLatches; 2],
}

impl Ppu {
    pub fn new(tv_mode: TvMode, mapper_kind: MapperKind) -> Ppu {
        let pal = tv_mode == TvMode::Pal;
        let ppu_to_cc: i64 = if pal { 5 } else { 4 };
        let cpu_to_cc: i64 = if pal { 16 } else { 12 };
        let cc_per_line = 341 * ppu_to_cc;
        let (lines, vblank_lines) = if pal { (312, 70) } else { (262, 20) };
        let cc_per_frame = cc_per_line * lines;
        let cc_per_vblank = cc_per_line * vblank_lines;
        let mmc3_enabled = mapper_kind == MapperKind::Mmc3;
        // The first MMC3 clock lands at the end of sub-step 1 of the first
        // visible line, past the VBlank gap and the dummy line
        let mmc3_cc_first = cc_per_line * (1 + vblank_lines) + 256 * ppu_to_cc;
        let mut ppu = Ppu {
            ctrl: PpuCtrl::empty(),
            mask: PpuMask::empty(),
            status: 0xE0,
            oam_addr: 0,
            reg_fv: 0,
            reg_v: 0,
            reg_h: 0,
            reg_vt: 0,
            reg_ht: 0,
            reg_fh: 0,
            write_latch: false,
            cnt_fv: 0,
            cnt_v: 0,
            cnt_h: 0,
            cnt_vt: 0,
            cnt_ht: 0,
            read_buffer: 0,
            palettes: [0; 32],
            oam: [0; 256],
            sline: -1,
            sline_step: 0,
            frame: vec![0; FRAME_PIXELS],
            fb_pos: 0,
            p0: 0,
            p1: 0,
            atr: [0; 2],
            stm: [0; 32],
            scounter: 0,
            size16: false,
            pf: [0; 256],
            obj: [0; 256],
            obj_behind: [false; 256],
            s0c_pos: [0; 8],
            s0c_n: 0,
            s0c_flag: false,
            current_pos: 0,
            nmi_occurred: true,
            nmi_pending: false,
            tv_mode,
            ppu_to_cc,
            cpu_to_cc,
            ccs: 0,
            ccs_to_end: cc_per_frame,
            cc_per_line,
            cc_per_frame,
            cc_per_vblank,
            cc_line_s0: 240 * ppu_to_cc,
            cc_line_s1: 256 * ppu_to_cc,
            odd_frame: false,
            mmc2_enabled: mapper_kind == MapperKind::Mmc2,
            mmc3_enabled,
            mmc3_cc_first,
            mmc3_cc_to_end: mmc3_cc_first,
            mmc2_latches: [ChrLatches::default(); 2],
        };
        ppu.power_on();
        ppu
    }

    /// Reinitialise everything to the power-on state.
    pub fn power_on(&mut self) {
        self.ctrl = PpuCtrl::empty();
        self.mask = PpuMask::empty();
        self.status = 0xE0;
        self.oam_addr = 0;
        self.reg_fv = 0;
        self.reg_v = 0;
        self.reg_h = 0;
        self.reg_vt = 0;
        self.reg_ht = 0;
        self.reg_fh = 0;
        self.write_latch = false;
        self.cnt_fv = 0;
        self.cnt_v = 0;
        self.cnt_h = 0;
        self.cnt_vt = 0;
        self.cnt_ht = 0;
        self.read_buffer = 0;
        self.palettes = [0; 32];
        self.oam = [0; 256];
        self.sline = -1;
        self.sline_step = 0;
        self.frame.fill(0);
        self.fb_pos = 0;
        self.p0 = 0;
        self.p1 = 0;
        self.atr = [0; 2];
        self.stm = [0; 32];
        self.scounter = 0;
        self.size16 = false;
        self.pf = [0; 256];
        self.obj = [0; 256];
        self.obj_behind = [false; 256];
        self.s0c_pos = [0; 8];
        self.s0c_n = 0;
        self.s0c_flag = false;
        self.current_pos = 0;
        self.nmi_occurred = true;
        self.nmi_pending = false;
        self.ccs = 0;
        self.ccs_to_end = self.cc_per_frame;
        self.odd_frame = false;
        self.mmc3_cc_to_end = self.mmc3_cc_first;
        self.mmc2_latches = [ChrLatches::default(); 2];
    }

    /// The RESET line: control/mask state and the scroll latches clear,
    /// everything else (VRAM, OAM, palettes, timing) survives.
    pub fn reset(&mut self) {
        self.ctrl = PpuCtrl::empty();
        self.mask = PpuMask::empty();
        self.reg_fv = 0;
        self.reg_vt = 0;
        self.reg_fh = 0;
        self.reg_ht = 0;
        self.write_latch = false;
        self.read_buffer = 0;
    }

    // ========================================
    // Derived register state
    // ========================================

    #[inline]
    pub(crate) fn show_background(&self) -> bool {
        self.mask.contains(PpuMask::SHOW_BACKGROUND)
    }

    #[inline]
    pub(crate) fn show_sprites(&self) -> bool {
        self.mask.contains(PpuMask::SHOW_SPRITES)
    }

    #[inline]
    pub(crate) fn rendering_enabled(&self) -> bool {
        self.show_background() || self.show_sprites()
    }

    #[inline]
    pub(crate) fn bg_pattern_base(&self) -> u16 {
        if self.ctrl.contains(PpuCtrl::BACKGROUND_TABLE) {
            0x1000
        } else {
            0x0000
        }
    }

    #[inline]
    pub(crate) fn sprite_pattern_base(&self) -> u16 {
        if self.ctrl.contains(PpuCtrl::SPRITE_TABLE) {
            0x1000
        } else {
            0x0000
        }
    }

    #[inline]
    pub(crate) fn sprite_size16(&self) -> bool {
        self.ctrl.contains(PpuCtrl::SPRITE_SIZE_16)
    }

    #[inline]
    pub(crate) fn pf_clipping(&self) -> bool {
        !self.mask.contains(PpuMask::SHOW_BACKGROUND_LEFT)
    }

    #[inline]
    pub(crate) fn obj_clipping(&self) -> bool {
        !self.mask.contains(PpuMask::SHOW_SPRITES_LEFT)
    }

    /// Mask applied to palette bytes; greyscale keeps only the luma rows.
    #[inline]
    pub(crate) fn grey_mask(&self) -> u8 {
        if self.mask.contains(PpuMask::GREYSCALE) {
            0x30
        } else {
            0x3F
        }
    }

    /// Emphasis bits positioned for the 9-bit frame-buffer index.
    #[inline]
    pub(crate) fn emphasis_bits(&self) -> u16 {
        ((self.mask.bits() & 0xE0) as u16) << 1
    }

    // ========================================
    // Clocking
    // ========================================

    /// Hand the PPU a finished CPU instruction's cycles. The scanline
    /// machine only actually runs when the debt reaches the next frame or
    /// MMC3 boundary.
    pub fn clock(&mut self, cpu_cycles: u32, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        self.ccs += cpu_cycles as i64 * self.cpu_to_cc;
        if self.ccs >= self.ccs_to_end
            || (self.mmc3_enabled && self.ccs >= self.mmc3_cc_to_end)
        {
            self.run(mapper, fe);
        }
    }

    /// Force the machine to consume its pending debt. Called before every
    /// register access and before any mapper reconfiguration so bank
    /// switches cannot retroactively affect drawn pixels.
    pub fn catch_up(&mut self, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        self.run(mapper, fe);
    }

    /// Drain the pending NMI line.
    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi_pending)
    }

    /// The last completed frame, 9-bit colour indices.
    pub fn frame_buffer(&self) -> &[u16] {
        &self.frame
    }

    // ========================================
    // Register operations ($2000-$2007)
    // ========================================

    /// $2000 write.
    pub fn write_ctrl(&mut self, data: u8, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        self.catch_up(mapper, fe);
        let old_nmi = self.ctrl.contains(PpuCtrl::NMI_ENABLE);
        self.ctrl = PpuCtrl::from_bits_retain(data);
        self.reg_h = data & 0x1;
        self.reg_v = (data >> 1) & 0x1;
        // Enabling NMI mid-VBlank retriggers unless status was read
        if self.ctrl.contains(PpuCtrl::NMI_ENABLE) && !old_nmi && self.nmi_occurred {
            self.nmi_pending = true;
        }
    }

    /// $2001 write.
    pub fn write_mask(&mut self, data: u8, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        self.catch_up(mapper, fe);
        self.mask = PpuMask::from_bits_retain(data);
    }

    /// $2002 read: returns the status byte, clears VBlank, resets the
    /// shared write toggle and the NMI race latch.
    pub fn read_status(&mut self, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) -> u8 {
        self.catch_up(mapper, fe);
        let value = self.status;
        self.write_latch = false;
        self.status &= 0x70;
        self.nmi_occurred = false;
        value
    }

    /// $2003 write.
    pub fn write_oam_addr(&mut self, data: u8) {
        self.oam_addr = data;
    }

    /// $2004 read.
    pub fn read_oam_data(&mut self) -> u8 {
        let value = self.oam[self.oam_addr as usize];
        self.oam_addr = self.oam_addr.wrapping_add(1);
        value
    }

    /// $2004 write. The unused attribute bits never store.
    pub fn write_oam_data(&mut self, data: u8, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        self.catch_up(mapper, fe);
        self.oam_write_masked(data);
    }

    /// OAM store shared with sprite DMA.
    pub(crate) fn oam_write_masked(&mut self, mut data: u8) {
        if self.oam_addr % 4 == 2 {
            data &= 0xE3;
        }
        self.oam[self.oam_addr as usize] = data;
        self.oam_addr = self.oam_addr.wrapping_add(1);
    }

    /// $2005 write pair: fine/coarse X first, fine/coarse Y second.
    pub fn write_scroll(&mut self, data: u8, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        self.catch_up(mapper, fe);
        if self.write_latch {
            self.reg_fv = data & 0x7;
            self.reg_vt = data >> 3;
        } else {
            self.reg_fh = data & 0x7;
            self.reg_ht = data >> 3;
        }
        self.write_latch = !self.write_latch;
    }

    /// $2006 write pair; the second write copies the latched counters
    /// into the live set.
    pub fn write_addr(&mut self, data: u8, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        self.catch_up(mapper, fe);
        if self.write_latch {
            self.reg_vt = (self.reg_vt & 0x18) | (data >> 5);
            self.reg_ht = data & 0x1F;
            self.update_counters();
        } else {
            self.reg_fv = (data & 0x30) >> 4;
            self.reg_v = (data & 0x8) >> 3;
            self.reg_h = (data & 0x4) >> 2;
            self.reg_vt = (self.reg_vt & 0x7) | ((data & 0x3) << 3);
        }
        self.write_latch = !self.write_latch;
    }

    /// The VRAM address the live counters currently spell.
    #[inline]
    pub(crate) fn vram_addr(&self) -> u16 {
        (self.cnt_ht as u16)
            | ((self.cnt_vt as u16) << 5)
            | ((self.cnt_h as u16) << 10)
            | ((self.cnt_v as u16) << 11)
            | ((self.cnt_fv as u16) << 12)
    }

    /// $2007 read. Non-palette reads come out of the delay buffer;
    /// palette reads bypass it but refill it from the nametable mirror
    /// underneath.
    pub fn read_data(&mut self, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) -> u8 {
        self.catch_up(mapper, fe);
        let addr = self.vram_addr() & 0x3FFF;
        let value;
        if addr < 0x3000 {
            value = self.read_buffer;
            self.read_buffer = mapper.read_vram(addr);
        } else if addr < 0x3F00 {
            value = self.read_buffer;
            self.read_buffer = mapper.read_vram(0x2000 | (addr & 0xFFF));
        } else {
            value = self.palettes[(addr & 0x1F) as usize] & self.grey_mask();
            self.read_buffer = mapper.read_vram(0x2C00 | (addr & 0x3FF));
        }
        self.increment_vram_addr();
        value
    }

    /// $2007 write.
    pub fn write_data(&mut self, data: u8, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        self.catch_up(mapper, fe);
        let addr = self.vram_addr() & 0x3FFF;
        if addr < 0x3000 {
            mapper.write_vram(addr, data);
        } else if addr < 0x3F00 {
            mapper.write_vram(0x2000 | (addr & 0xFFF), data);
        } else {
            let slot = (addr & 0x1F) as usize;
            self.palettes[slot] = data;
            if slot & 0x3 == 0 {
                // Background colour 0 mirrors between the two halves
                self.palettes[slot ^ 0x10] = data;
            }
        }
        self.increment_vram_addr();
    }

    /// Post-access address increment: +1 walks coarse X with full
    /// carries, +32 walks coarse Y.
    fn increment_vram_addr(&mut self) {
        if !self.ctrl.contains(PpuCtrl::INCREMENT_32) {
            self.cnt_ht += 1;
            if self.cnt_ht == 32 {
                self.cnt_ht = 0;
                self.carry_into_vt();
            }
        } else {
            self.carry_into_vt();
        }
    }

    fn carry_into_vt(&mut self) {
        self.cnt_vt += 1;
        if self.cnt_vt == 32 {
            self.cnt_vt = 0;
            if self.cnt_h == 0 {
                self.cnt_h = 1;
            } else {
                self.cnt_h = 0;
                if self.cnt_v == 0 {
                    self.cnt_v = 1;
                } else {
                    self.cnt_v = 0;
                    self.cnt_fv = (self.cnt_fv + 1) & 0x7;
                }
            }
        }
    }

    /// Copy the latched counter set into the live one.
    pub(crate) fn update_counters(&mut self) {
        self.cnt_fv = self.reg_fv;
        self.cnt_v = self.reg_v;
        self.cnt_h = self.reg_h;
        self.cnt_vt = self.reg_vt;
        self.cnt_ht = self.reg_ht;
    }

    // ========================================
    // Debug dumps
    // ========================================

    /// Copy of the full VRAM view as the PPU would read it.
    pub fn read_vram_dump(&self, mapper: &mut dyn Mapper, out: &mut [u8; 0x4000]) {
        for addr in 0..0x3000u16 {
            out[addr as usize] = mapper.read_vram(addr);
        }
        for addr in 0x3000..0x3F00u16 {
            out[addr as usize] = mapper.read_vram(0x2000 | (addr & 0xFFF));
        }
        for addr in 0x3F00..0x4000usize {
            out[addr] = self.palettes[addr & 0x1F];
        }
    }

    /// Copy of OAM.
    pub fn read_oam_dump(&self, out: &mut [u8; 256]) {
        out.copy_from_slice(&self.oam);
    }

    // ========================================
    // Snapshots
    // ========================================

    pub fn snapshot(&self) -> PpuState {
        PpuState {
            tv_mode: self.tv_mode,
            ctrl: self.ctrl.bits(),
            mask: self.mask.bits(),
            status: self.status,
            oam_addr: self.oam_addr,
            reg_fv: self.reg_fv,
            reg_v: self.reg_v,
            reg_h: self.reg_h,
            reg_vt: self.reg_vt,
            reg_ht: self.reg_ht,
            reg_fh: self.reg_fh,
            write_latch: self.write_latch,
            cnt_fv: self.cnt_fv,
            cnt_v: self.cnt_v,
            cnt_h: self.cnt_h,
            cnt_vt: self.cnt_vt,
            cnt_ht: self.cnt_ht,
            read_buffer: self.read_buffer,
            palettes: self.palettes.to_vec(),
            oam: self.oam.to_vec(),
            sline: self.sline,
            sline_step: self.sline_step,
            frame: self.frame.clone(),
            fb_pos: self.fb_pos,
            p0: self.p0,
            p1: self.p1,
            atr: self.atr,
            stm: self.stm.to_vec(),
            scounter: self.scounter,
            size16: self.size16,
            pf: self.pf.to_vec(),
            obj: self.obj.to_vec(),
            obj_behind: self.obj_behind.to_vec(),
            s0c_pos: self.s0c_pos,
            s0c_n: self.s0c_n,
            s0c_flag: self.s0c_flag,
            current_pos: self.current_pos,
            nmi_occurred: self.nmi_occurred,
            nmi_pending: self.nmi_pending,
            ccs: self.ccs,
            ccs_to_end: self.ccs_to_end,
            odd_frame: self.odd_frame,
            mmc2_enabled: self.mmc2_enabled,
            mmc3_enabled: self.mmc3_enabled,
            mmc3_cc_to_end: self.mmc3_cc_to_end,
            mmc2_latches: self.mmc2_latches,
        }
    }

    pub fn restore(&mut self, state: PpuState) -> Result<(), String> {
        if state.tv_mode != self.tv_mode {
            return Err("TV mode mismatch".into());
        }
        if state.mmc2_enabled != self.mmc2_enabled || state.mmc3_enabled != self.mmc3_enabled {
            return Err("mapper coupling mismatch".into());
        }
        if !(-1..=241).contains(&state.sline) || state.sline_step > 2 {
            return Err("scanline out of range".into());
        }
        if state.scounter > 8 || state.s0c_n >= 8 {
            return Err("sprite counters out of range".into());
        }
        if state.s0c_pos.iter().any(|&pos| pos >= 256) {
            return Err("sprite-zero column out of range".into());
        }
        if state.frame.len() != FRAME_PIXELS {
            return Err("frame buffer out of range".into());
        }
        // On a visible line the write position is pinned to the raster
        if (1..=240).contains(&state.sline) {
            let expected = (state.sline as usize - 1) * FRAME_WIDTH
                + if state.sline_step >= 1 { FRAME_WIDTH } else { 0 };
            if state.fb_pos != expected {
                return Err("frame buffer position out of step".into());
            }
        } else if state.fb_pos > FRAME_PIXELS {
            return Err("frame buffer out of range".into());
        }
        if state.reg_fv > 7
            || state.reg_fh > 7
            || state.reg_v > 1
            || state.reg_h > 1
            || state.reg_vt > 31
            || state.reg_ht > 31
            || state.cnt_fv > 7
            || state.cnt_v > 1
            || state.cnt_h > 1
            || state.cnt_vt > 31
            || state.cnt_ht > 31
        {
            return Err("scroll counters out of range".into());
        }
        if state.palettes.len() != 32 || state.oam.len() != 256 {
            return Err("palette or OAM size mismatch".into());
        }
        if state.stm.len() != 32
            || state.pf.len() != 256
            || state.obj.len() != 256
            || state.obj_behind.len() != 256
        {
            return Err("render buffer size mismatch".into());
        }

        self.ctrl = PpuCtrl::from_bits_retain(state.ctrl);
        self.mask = PpuMask::from_bits_retain(state.mask);
        self.status = state.status;
        self.oam_addr = state.oam_addr;
        self.reg_fv = state.reg_fv;
        self.reg_v = state.reg_v;
        self.reg_h = state.reg_h;
        self.reg_vt = state.reg_vt;
        self.reg_ht = state.reg_ht;
        self.reg_fh = state.reg_fh;
        self.write_latch = state.write_latch;
        self.cnt_fv = state.cnt_fv;
        self.cnt_v = state.cnt_v;
        self.cnt_h = state.cnt_h;
        self.cnt_vt = state.cnt_vt;
        self.cnt_ht = state.cnt_ht;
        self.read_buffer = state.read_buffer;
        for (slot, value) in self.palettes.iter_mut().zip(state.palettes.iter()) {
            *slot = value & 0x3F;
        }
        self.oam.copy_from_slice(&state.oam);
        self.sline = state.sline;
        self.sline_step = state.sline_step;
        self.frame = state.frame;
        self.fb_pos = state.fb_pos;
        self.p0 = state.p0;
        self.p1 = state.p1;
        self.atr = state.atr;
        self.stm.copy_from_slice(&state.stm);
        self.scounter = state.scounter;
        self.size16 = state.size16;
        self.pf.copy_from_slice(&state.pf);
        self.obj.copy_from_slice(&state.obj);
        self.obj_behind.copy_from_slice(&state.obj_behind);
        self.s0c_pos = state.s0c_pos;
        self.s0c_n = state.s0c_n;
        self.s0c_flag = state.s0c_flag;
        self.current_pos = state.current_pos;
        self.nmi_occurred = state.nmi_occurred;
        self.nmi_pending = state.nmi_pending;
        self.ccs = state.ccs;
        self.ccs_to_end = state.ccs_to_end;
        self.odd_frame = state.odd_frame;
        self.mmc3_cc_to_end = state.mmc3_cc_to_end;
        self.mmc2_latches = state.mmc2_latches;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::{create_mapper, test_rom};
    use crate::frontend::NullFrontend;

    fn ppu_and_mapper() -> (Ppu, Box<dyn Mapper>) {
        let rom = test_rom(MapperKind::Nrom, 1, 0);
        let mapper = create_mapper(rom).unwrap();
        (Ppu::new(TvMode::Ntsc, MapperKind::Nrom), mapper)
    }

    #[test]
    fn test_scroll_write_toggle() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_scroll(0x7D, mapper.as_mut(), &mut fe); // X: fine 5, coarse 15
        assert_eq!(ppu.reg_fh, 5);
        assert_eq!(ppu.reg_ht, 15);
        ppu.write_scroll(0x5E, mapper.as_mut(), &mut fe); // Y: fine 6, coarse 11
        assert_eq!(ppu.reg_fv, 6);
        assert_eq!(ppu.reg_vt, 11);
        assert!(!ppu.write_latch, "two writes complete the pair");
    }

    #[test]
    fn test_status_read_resets_toggle() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_scroll(0x10, mapper.as_mut(), &mut fe);
        assert!(ppu.write_latch);
        let _ = ppu.read_status(mapper.as_mut(), &mut fe);
        assert!(!ppu.write_latch, "$2002 read resets the shared toggle");
    }

    #[test]
    fn test_addr_write_pair_sets_counters() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_addr(0x21, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x08, mapper.as_mut(), &mut fe);
        assert_eq!(ppu.vram_addr() & 0x3FFF, 0x2108);
    }

    #[test]
    fn test_data_read_is_buffered() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        mapper.write_vram(0x0000, 0xAA);
        mapper.write_vram(0x0001, 0xBB);
        ppu.write_addr(0x00, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x00, mapper.as_mut(), &mut fe);
        let first = ppu.read_data(mapper.as_mut(), &mut fe);
        let second = ppu.read_data(mapper.as_mut(), &mut fe);
        let third = ppu.read_data(mapper.as_mut(), &mut fe);
        assert_eq!(first, 0x00, "first read returns the stale buffer");
        assert_eq!(second, 0xAA);
        assert_eq!(third, 0xBB);
    }

    #[test]
    fn test_palette_read_bypasses_buffer() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_addr(0x3F, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x01, mapper.as_mut(), &mut fe);
        ppu.write_data(0x2B, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x3F, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x01, mapper.as_mut(), &mut fe);
        assert_eq!(ppu.read_data(mapper.as_mut(), &mut fe), 0x2B);
    }

    #[test]
    fn test_palette_entry_zero_mirrors() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_addr(0x3F, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x00, mapper.as_mut(), &mut fe);
        ppu.write_data(0x21, mapper.as_mut(), &mut fe);
        assert_eq!(ppu.palettes[0x00], 0x21);
        assert_eq!(ppu.palettes[0x10], 0x21, "$3F00 mirrors at $3F10");
    }

    #[test]
    fn test_greyscale_masks_palette_reads() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_mask(0x01, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x3F, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x03, mapper.as_mut(), &mut fe);
        ppu.write_data(0x2B, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x3F, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x03, mapper.as_mut(), &mut fe);
        assert_eq!(
            ppu.read_data(mapper.as_mut(), &mut fe),
            0x20,
            "greyscale keeps only the luma row bits"
        );
    }

    #[test]
    fn test_oam_attribute_mask() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_oam_addr(0x02);
        ppu.write_oam_data(0xFF, mapper.as_mut(), &mut fe);
        ppu.write_oam_addr(0x02);
        assert_eq!(
            ppu.read_oam_data(),
            0xE3,
            "attribute bits 2-4 always read back zero"
        );
    }

    #[test]
    fn test_oam_round_trip_non_attribute() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_oam_addr(0x10);
        ppu.write_oam_data(0x55, mapper.as_mut(), &mut fe);
        ppu.write_oam_addr(0x10);
        assert_eq!(ppu.read_oam_data(), 0x55);
        assert_eq!(ppu.oam_addr, 0x11, "reads advance the pointer");
    }

    #[test]
    fn test_increment_32_mode() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_ctrl(0x04, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x20, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x00, mapper.as_mut(), &mut fe);
        let _ = ppu.read_data(mapper.as_mut(), &mut fe);
        assert_eq!(ppu.vram_addr() & 0x3FFF, 0x2020, "+32 walks coarse Y");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut fe = NullFrontend::new();
        ppu.write_ctrl(0x90, mapper.as_mut(), &mut fe);
        ppu.write_scroll(0x15, mapper.as_mut(), &mut fe);
        let state = ppu.snapshot();
        let mut other = Ppu::new(TvMode::Ntsc, MapperKind::Nrom);
        other.restore(state).expect("snapshot must restore");
        assert_eq!(other.ctrl.bits(), 0x90);
        assert_eq!(other.reg_fh, 5);
        assert!(other.write_latch);
    }

    #[test]
    fn test_restore_rejects_bad_scanline() {
        let (ppu, _) = ppu_and_mapper();
        let mut state = ppu.snapshot();
        state.sline = 300;
        let mut other = Ppu::new(TvMode::Ntsc, MapperKind::Nrom);
        assert!(other.restore(state).is_err());
    }
}
