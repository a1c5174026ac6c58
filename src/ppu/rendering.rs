// PPU scanline state machine
//
// A line is produced in three atomic sub-steps, each gated on the clock
// debt:
//
//   step 0 (dots 0-255)    render the 256 pixels: background from the
//                          two-tile pipeline, sprites from the previous
//                          line's evaluation, priority composition
//   step 1 (dots 256-319)  in-range evaluation for the next line, the
//                          sprite-zero test for this one, and the MMC3
//                          scanline clock
//   step 2 (dots 320-340)  vertical scroll increment, horizontal reload
//                          from the latched counters, first two tiles of
//                          the next line
//
// Because a register write can land mid-line while the line renders
// atomically, the sprite-zero probe runs incrementally: every time the
// caller adds clocks, the newly exposed pixel span is re-rendered into a
// scratch view and tested. With MMC2 inserted, the probe's pattern fetches
// run under a latch snapshot so they cannot flip a latch the real fetch
// order would not have flipped.

use super::Ppu;
use crate::cartridge::Mapper;
use crate::frontend::Frontend;

impl Ppu {
    /// Nametable base address spelled by the live nametable bits.
    #[inline]
    fn nametable_base(&self) -> u16 {
        0x2000 | ((((self.cnt_v as u16) << 1) | self.cnt_h as u16) << 10)
    }

    /// Attribute bits (palette select << 2) for the tile at the live
    /// counters.
    fn attribute_bits(&self, mapper: &mut dyn Mapper, nt: u16) -> u8 {
        let byte = mapper.read_vram(
            nt | 0x3C0 | (((self.cnt_vt as u16) & 0x1C) << 1) | ((self.cnt_ht as u16) >> 2),
        );
        let shift = ((self.cnt_vt & 0x2) | ((self.cnt_ht & 0x2) >> 1)) << 1;
        ((byte >> shift) & 0x3) << 2
    }

    /// Fetch one background tile into the pipeline and step coarse X.
    fn fetch_bg_tile(&mut self, mapper: &mut dyn Mapper) {
        let nt = self.nametable_base();
        let par = mapper.read_vram(nt | ((self.cnt_vt as u16) << 5) | self.cnt_ht as u16);
        self.atr[0] = self.atr[1];
        self.atr[1] = self.attribute_bits(mapper, nt);
        let row = self.bg_pattern_base() | ((par as u16) << 4) | self.cnt_fv as u16;
        self.p0 |= mapper.read_vram(row) as u16;
        self.p1 |= mapper.read_vram(row | 0x8) as u16;
        self.cnt_ht += 1;
        if self.cnt_ht == 32 {
            self.cnt_ht = 0;
            self.cnt_h ^= 1;
        }
    }

    /// Vertical scroll increment at the end of a line: fine Y carries into
    /// coarse Y, which wraps at 30 into the vertical nametable bit (a
    /// coarse Y poked past 29 wraps at 32 without flipping it).
    fn increment_vertical_scroll(&mut self) {
        self.cnt_fv += 1;
        if self.cnt_fv == 8 {
            self.cnt_fv = 0;
            self.cnt_vt += 1;
            if self.cnt_vt == 30 {
                self.cnt_vt = 0;
                self.cnt_v ^= 0x1;
            } else if self.cnt_vt == 32 {
                self.cnt_vt = 0;
            }
        }
    }

    /// Preload the first two tiles of the next line (step 2 tail).
    fn preload_background(&mut self, mapper: &mut dyn Mapper) {
        if !self.show_background() {
            return;
        }
        self.cnt_h = self.reg_h;
        self.cnt_ht = self.reg_ht;

        // Two fetches shift the pipeline full
        let nt = self.nametable_base();
        let par = mapper.read_vram(nt | ((self.cnt_vt as u16) << 5) | self.cnt_ht as u16);
        self.atr[0] = self.attribute_bits(mapper, nt);
        let row = self.bg_pattern_base() | ((par as u16) << 4) | self.cnt_fv as u16;
        self.p0 = (mapper.read_vram(row) as u16) << 8;
        self.p1 = (mapper.read_vram(row | 0x8) as u16) << 8;
        self.cnt_ht += 1;
        if self.cnt_ht == 32 {
            self.cnt_ht = 0;
            self.cnt_h ^= 1;
        }

        let nt = self.nametable_base();
        let par = mapper.read_vram(nt | ((self.cnt_vt as u16) << 5) | self.cnt_ht as u16);
        self.atr[1] = self.attribute_bits(mapper, nt);
        let row = self.bg_pattern_base() | ((par as u16) << 4) | self.cnt_fv as u16;
        self.p0 |= mapper.read_vram(row) as u16;
        self.p1 |= mapper.read_vram(row | 0x8) as u16;
        self.cnt_ht += 1;
        if self.cnt_ht == 32 {
            self.cnt_ht = 0;
            self.cnt_h ^= 1;
        }
    }

    // ========================================
    // Sprite evaluation
    // ========================================

    /// Line distance from a sprite's Y byte to `sline`, in 0..512.
    #[inline]
    fn sprite_line_diff(sline: i32, y: u8) -> i32 {
        (sline + (((y as i32) ^ 0xFF) | 0x100) + 1) & 0x1FF
    }

    fn insert_stm(&mut self, oam_index: usize, diff: i32, flip_mask: i32) {
        let base = self.scounter * 4;
        let attr = self.oam[oam_index + 2];
        self.stm[base] = self.oam[oam_index + 1];
        self.stm[base + 1] = self.oam[oam_index + 3];
        self.stm[base + 2] = attr & 0xEF;
        self.stm[base + 3] = if attr & 0x80 != 0 {
            (diff ^ flip_mask) as u8
        } else {
            diff as u8
        };
        self.scounter += 1;
    }

    /// In-range object evaluation: scan OAM for up to 8 sprites covering
    /// the next line, raise overflow when the budget fills, and remember
    /// whether sprite 0 made the cut.
    fn evaluate_sprites(&mut self, sline: i32) {
        self.scounter = 0;
        self.size16 = self.sprite_size16();
        let span = if self.size16 { 16 } else { 8 };
        let flip_mask = if self.size16 { 0xF } else { 0x7 };

        let diff = Self::sprite_line_diff(sline, self.oam[0]);
        self.s0c_flag = diff < span;
        if self.s0c_flag {
            self.insert_stm(0, diff, flip_mask);
        }
        let mut index = 4;
        while self.scounter < 8 && index < 256 {
            let diff = Self::sprite_line_diff(sline, self.oam[index]);
            if diff < span {
                self.insert_stm(index, diff, flip_mask);
            }
            index += 4;
        }
        if self.scounter == 8 {
            self.status |= 0x20;
        }
    }

    /// Pattern address of one evaluated sprite row.
    fn sprite_pattern_addr(&self, tile: u8, row: u8) -> u16 {
        if self.size16 {
            let table = if tile & 0x1 != 0 { 0x1000 } else { 0x0000 };
            table | (((tile & 0xFE) as u16) << 4) | (((row & 0x8) as u16) << 1) | (row & 0x7) as u16
        } else {
            self.sprite_pattern_base() | ((tile as u16) << 4) | row as u16
        }
    }

    /// Record the columns where sprite 0 has opaque pixels. A collision at
    /// x=255 is impossible by hardware rule.
    fn probe_sprite_zero(&mut self, mapper: &mut dyn Mapper) {
        self.s0c_n = 0;
        let tile = self.stm[0];
        let x0 = self.stm[1] as usize;
        let attr = self.stm[2];
        let row = self.stm[3];
        let addr = self.sprite_pattern_addr(tile, row);
        let mut b0 = mapper.read_vram(addr);
        let mut b1 = mapper.read_vram(addr | 0x8);
        let end = std::cmp::min(255, x0 + 8);
        let mut x = x0;
        if attr & 0x40 != 0 {
            if self.obj_clipping() {
                while x < end && x < 8 {
                    b1 >>= 1;
                    b0 >>= 1;
                    x += 1;
                }
            }
            while x < end {
                if ((b1 & 0x1) << 1) | (b0 & 0x1) != 0 {
                    self.s0c_pos[self.s0c_n] = x as u16;
                    self.s0c_n += 1;
                }
                b1 >>= 1;
                b0 >>= 1;
                x += 1;
            }
        } else {
            if self.obj_clipping() {
                while x < end && x < 8 {
                    b1 <<= 1;
                    b0 <<= 1;
                    x += 1;
                }
            }
            while x < end {
                if ((b1 & 0x80) >> 6) | ((b0 & 0x80) >> 7) != 0 {
                    self.s0c_pos[self.s0c_n] = x as u16;
                    self.s0c_n += 1;
                }
                b1 <<= 1;
                b0 <<= 1;
                x += 1;
            }
        }
    }

    fn save_chr_latches(&mut self, slot: usize, mapper: &mut dyn Mapper) {
        if self.mmc2_enabled {
            self.mmc2_latches[slot] = mapper.chr_latches();
        }
    }

    fn load_chr_latches(&mut self, slot: usize, mapper: &mut dyn Mapper) {
        if self.mmc2_enabled {
            mapper.set_chr_latches(self.mmc2_latches[slot]);
        }
    }

    /// Draw the evaluated sprites into the line buffers. VRAM is read in
    /// OAM order first (the order the hardware fetches, which MMC2
    /// latches depend on), then the painter runs back-to-front so lower
    /// OAM indices win ties.
    fn render_sprites(&mut self, mapper: &mut dyn Mapper) {
        if !self.show_sprites() {
            return;
        }

        self.save_chr_latches(0, mapper);

        let mut b0s = [0u8; 8];
        let mut b1s = [0u8; 8];
        for i in 0..self.scounter {
            let tile = self.stm[i * 4];
            let row = self.stm[i * 4 + 3];
            let addr = self.sprite_pattern_addr(tile, row);
            b0s[i] = mapper.read_vram(addr);
            b1s[i] = mapper.read_vram(addr | 0x8);
        }

        self.obj.fill(0);
        while self.scounter != 0 {
            self.scounter -= 1;
            let i = self.scounter;
            let x0 = self.stm[i * 4 + 1] as usize;
            let attr = self.stm[i * 4 + 2];
            let mut b0 = b0s[i];
            let mut b1 = b1s[i];
            let end = std::cmp::min(256, x0 + 8);
            let color_high = (attr & 0x3) << 2;
            let behind = attr & 0x20 != 0;
            if attr & 0x40 != 0 {
                for x in x0..end {
                    let color_low = ((b1 & 0x1) << 1) | (b0 & 0x1);
                    if color_low != 0 {
                        self.obj[x] = color_high | color_low;
                        self.obj_behind[x] = behind;
                    }
                    b1 >>= 1;
                    b0 >>= 1;
                }
            } else {
                for x in x0..end {
                    let color_low = ((b1 & 0x80) >> 6) | ((b0 & 0x80) >> 7);
                    if color_low != 0 {
                        self.obj[x] = color_high | color_low;
                        self.obj_behind[x] = behind;
                    }
                    b1 <<= 1;
                    b0 <<= 1;
                }
            }
        }

        self.save_chr_latches(1, mapper);

        // Candidate columns for the sprite-zero test, probed as if the
        // line had not been fetched yet
        self.s0c_n = 0;
        if self.status & 0x40 == 0 && self.s0c_flag {
            self.load_chr_latches(0, mapper);
            self.probe_sprite_zero(mapper);
            self.load_chr_latches(1, mapper);
        }

        if self.obj_clipping() {
            self.obj[..8].fill(0);
        }
    }

    // ========================================
    // Background rendering
    // ========================================

    /// Render the 256 background pixels of the current line, streaming
    /// tile fetches through the two-deep pipeline.
    fn render_background(&mut self, mapper: &mut dyn Mapper) {
        if !self.show_background() {
            return;
        }
        let mask = 0x8000u16 >> self.reg_fh;
        let shift = 15 - self.reg_fh as u16;
        let mut out = 0usize;
        for _ in 0..32 {
            let mut k = self.reg_fh as usize;
            for _ in 0..8 {
                let color = ((self.p0 & mask) >> shift) | (((self.p1 & mask) >> shift) << 1);
                self.pf[out] = color as u8 | self.atr[if k < 8 { 0 } else { 1 }];
                out += 1;
                k += 1;
                self.p0 <<= 1;
                self.p1 <<= 1;
            }
            self.fetch_bg_tile(mapper);
        }
        if self.pf_clipping() {
            self.pf[..8].fill(0);
        }
    }

    /// Re-render a slice of the line for the sprite-zero probe without
    /// touching the live fetch state. Pixels outside [begin, end) are
    /// cleared so they cannot collide.
    fn render_background_probe(&mut self, mapper: &mut dyn Mapper, begin: usize, end: usize) {
        let mask = 0x8000u16 >> self.reg_fh;
        let shift = 15 - self.reg_fh as u16;
        let mut p0 = self.p0;
        let mut p1 = self.p1;
        // Fine and coarse Y are constant within a line; only the
        // horizontal pair advances
        let (fv, v, vt) = (self.cnt_fv, self.cnt_v, self.cnt_vt);
        let mut h = self.cnt_h;
        let mut ht = self.cnt_ht;
        let mut out = 0usize;
        for _ in 0..32 {
            for _ in 0..8 {
                self.pf[out] = (((p0 & mask) >> shift) | (((p1 & mask) >> shift) << 1)) as u8;
                out += 1;
                p0 <<= 1;
                p1 <<= 1;
            }
            let nt = 0x2000 | ((((v as u16) << 1) | h as u16) << 10);
            let par = mapper.read_vram(nt | ((vt as u16) << 5) | ht as u16);
            let row = self.bg_pattern_base() | ((par as u16) << 4) | fv as u16;
            p0 |= mapper.read_vram(row) as u16;
            p1 |= mapper.read_vram(row | 0x8) as u16;
            ht += 1;
            if ht == 32 {
                ht = 0;
                h ^= 1;
            }
        }
        if self.pf_clipping() {
            self.pf[..8].fill(0);
        }
        self.pf[..begin].fill(0);
        self.pf[end..].fill(0);
    }

    /// Test the recorded sprite-zero columns against the background line.
    fn sprite_zero_test(&mut self) {
        for i in 0..self.s0c_n {
            if self.pf[self.s0c_pos[i] as usize] & 0x3 != 0 {
                self.status |= 0x40;
                break;
            }
        }
    }

    /// Compose background and sprites into the frame buffer.
    fn compose_line(&mut self) {
        let emphasis = self.emphasis_bits();
        let grey = self.grey_mask();
        let show_bg = self.show_background();
        let show_obj = self.show_sprites();
        for i in 0..256 {
            let color = if show_bg {
                let mut color_pf = self.pf[i];
                if color_pf & 0x3 == 0 {
                    color_pf = 0;
                }
                if show_obj {
                    let color_obj = self.obj[i];
                    if (!self.obj_behind[i] || color_pf == 0) && color_obj != 0 {
                        self.palettes[(0x10 | color_obj) as usize]
                    } else {
                        self.palettes[color_pf as usize]
                    }
                } else {
                    self.palettes[color_pf as usize]
                }
            } else if show_obj {
                let color_obj = self.obj[i];
                if color_obj != 0 {
                    self.palettes[(0x10 | color_obj) as usize]
                } else {
                    self.palettes[0]
                }
            } else {
                self.palettes[0]
            };
            self.frame[self.fb_pos] = (color & grey) as u16 | emphasis;
            self.fb_pos += 1;
        }
    }

    // ========================================
    // The three line sub-steps
    // ========================================

    fn line_step0(&mut self, mapper: &mut dyn Mapper) {
        self.render_background(mapper);
        self.render_sprites(mapper);
        self.compose_line();
    }

    fn line_step1(&mut self, mapper: &mut dyn Mapper) {
        self.evaluate_sprites(self.sline);
        if self.show_background() && self.show_sprites() {
            self.sprite_zero_test();
        }
        if self.mmc3_enabled && self.rendering_enabled() {
            mapper.clock_scanline();
        }
    }

    fn line_step2(&mut self, mapper: &mut dyn Mapper) {
        if self.rendering_enabled() {
            self.increment_vertical_scroll();
        }
        self.preload_background(mapper);
    }

    /// Dummy versions for the pre-render line: no pixels, but the fetch
    /// counters and sprite evaluation behave as if it were visible.
    fn dummy_step0(&mut self) {
        if self.show_background() {
            // The skipped fetches still walk one full line of coarse X
            self.cnt_h ^= 0x1;
        }
        if self.show_sprites() {
            self.evaluate_sprites(0);
        }
    }

    // ========================================
    // Incremental sprite-zero probe
    // ========================================

    /// Called whenever the budget runs out mid-line: if sprite 0 can still
    /// hit on the pixels newly exposed since the last probe, render just
    /// that span and test it.
    fn sprite_zero_catch_up(&mut self, mapper: &mut dyn Mapper) {
        if !self.s0c_flag || self.status & 0x40 != 0 || self.current_pos >= 256 {
            return;
        }

        let old_pos = self.current_pos;
        self.current_pos = std::cmp::min((self.ccs / self.ppu_to_cc) as usize, 256);
        if old_pos == self.current_pos {
            return;
        }
        if !(self.show_background() && self.show_sprites()) {
            return;
        }

        self.save_chr_latches(0, mapper);
        if self.sline_step == 0 {
            self.probe_sprite_zero(mapper);
        }
        let in_span = self.s0c_n != 0
            && (self.s0c_pos[0] as usize) < self.current_pos
            && (self.s0c_pos[self.s0c_n - 1] as usize) >= old_pos;
        if in_span {
            if self.sline_step == 0 {
                self.render_background_probe(mapper, old_pos, self.current_pos);
            }
            self.sprite_zero_test();
        }
        self.load_chr_latches(0, mapper);
    }

    // ========================================
    // The frame loop
    // ========================================

    /// Advance through the scanlines while the budget lasts. Returns true
    /// when the budget ran out mid-frame.
    fn run_lines(&mut self, mapper: &mut dyn Mapper) -> bool {
        // Pre-render dummy line; one dot shorter on NTSC odd frames while
        // rendering is on
        if self.sline == 0 {
            let cost = if self.odd_frame && self.tv_mode == crate::cartridge::TvMode::Ntsc {
                self.cc_per_line - self.ppu_to_cc
            } else {
                self.cc_per_line
            };
            if self.ccs < cost {
                return true;
            }
            self.dummy_step0();
            self.current_pos = 0;
            if self.rendering_enabled() {
                self.update_counters();
            }
            self.line_step2(mapper);
            self.ccs -= cost;
            self.ccs_to_end -= cost;
            if self.mmc3_enabled {
                self.mmc3_cc_to_end -= cost;
            }
            self.sline += 1;
        }

        while self.sline < 241 {
            if self.sline_step == 0 {
                if self.ccs < self.cc_line_s0 {
                    self.sprite_zero_catch_up(mapper);
                    return true;
                }
                self.line_step0(mapper);
                self.sline_step = 1;
            }
            if self.sline_step == 1 {
                if self.ccs < self.cc_line_s1 {
                    self.sprite_zero_catch_up(mapper);
                    return true;
                }
                self.line_step1(mapper);
                self.sline_step = 2;
                self.current_pos = 0;
            }
            if self.ccs < self.cc_per_line {
                return true;
            }
            self.line_step2(mapper);
            self.sline_step = 0;
            self.ccs -= self.cc_per_line;
            self.ccs_to_end -= self.cc_per_line;
            if self.mmc3_enabled {
                self.mmc3_cc_to_end -= self.cc_per_line + self.cc_line_s1;
            }
            self.sline += 1;
        }

        // Line 241 does nothing at all
        if self.ccs < self.cc_per_line {
            return true;
        }
        self.ccs -= self.cc_per_line;
        self.ccs_to_end -= self.cc_per_line;
        self.sline += 1;
        false
    }

    /// Consume the pending clock debt.
    pub(crate) fn run(&mut self, mapper: &mut dyn Mapper, fe: &mut dyn Frontend) {
        while self.ccs >= self.ppu_to_cc {
            // Burn through the VBlank gap in one gulp
            if self.sline == -1 {
                if self.ccs < self.cc_per_vblank {
                    return;
                }
                self.ccs -= self.cc_per_vblank;
                self.ccs_to_end -= self.cc_per_vblank;
                if self.mmc3_enabled {
                    self.mmc3_cc_to_end -= self.cc_per_vblank;
                }
                self.fb_pos = 0;
                if self.rendering_enabled() {
                    self.status &= 0x0F;
                } else {
                    self.status &= 0x1F;
                }
                self.nmi_occurred = false;
                self.sline = 0;
            }

            if self.run_lines(mapper) {
                return;
            }

            // Frame complete
            if self.sline == 242 {
                self.ccs_to_end = self.cc_per_frame;
                self.odd_frame = !self.odd_frame;
                if self.odd_frame && self.tv_mode == crate::cartridge::TvMode::Ntsc {
                    self.ccs_to_end -= self.ppu_to_cc;
                }
                if self.mmc3_enabled {
                    self.mmc3_cc_to_end = self.mmc3_cc_first;
                    if self.odd_frame && self.tv_mode == crate::cartridge::TvMode::Ntsc {
                        self.mmc3_cc_to_end -= self.ppu_to_cc;
                    }
                }

                self.status |= 0x90;
                fe.update_screen(&self.frame);

                if self.ctrl.contains(super::PpuCtrl::NMI_ENABLE) && !self.nmi_occurred {
                    self.nmi_pending = true;
                }
                self.nmi_occurred = true;

                self.sline = -1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Ppu, PpuCtrl};
    use crate::cartridge::{create_mapper, test_rom, Mapper, MapperKind, TvMode};
    use crate::frontend::NullFrontend;

    fn setup() -> (Ppu, Box<dyn Mapper>, NullFrontend) {
        let rom = test_rom(MapperKind::Nrom, 1, 0);
        let mapper = create_mapper(rom).unwrap();
        (
            Ppu::new(TvMode::Ntsc, MapperKind::Nrom),
            mapper,
            NullFrontend::new(),
        )
    }

    fn run_one_frame(ppu: &mut Ppu, mapper: &mut dyn Mapper, fe: &mut NullFrontend) {
        let before = fe.frames;
        while fe.frames == before {
            ppu.clock(100, mapper, fe);
        }
    }

    #[test]
    fn test_frame_produces_update_screen() {
        let (mut ppu, mut mapper, mut fe) = setup();
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        assert_eq!(fe.frames, 1);
    }

    #[test]
    fn test_vblank_flag_rises_and_status_read_clears_it() {
        let (mut ppu, mut mapper, mut fe) = setup();
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        let status = ppu.read_status(mapper.as_mut(), &mut fe);
        assert_ne!(status & 0x80, 0, "VBlank flag set at frame end");
        let status = ppu.read_status(mapper.as_mut(), &mut fe);
        assert_eq!(status & 0x80, 0, "reading $2002 clears it");
    }

    #[test]
    fn test_nmi_fires_when_enabled() {
        let (mut ppu, mut mapper, mut fe) = setup();
        ppu.write_ctrl(0x80, mapper.as_mut(), &mut fe);
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        assert!(ppu.take_nmi(), "NMI line raised at VBlank start");
        assert!(!ppu.take_nmi(), "the line is a pulse, not a level");
    }

    #[test]
    fn test_no_nmi_when_disabled() {
        let (mut ppu, mut mapper, mut fe) = setup();
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        assert!(!ppu.take_nmi());
    }

    #[test]
    fn test_ctrl_write_retriggers_nmi_during_vblank() {
        let (mut ppu, mut mapper, mut fe) = setup();
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        // VBlank in progress, NMI disabled; enabling it now retriggers
        ppu.write_ctrl(0x80, mapper.as_mut(), &mut fe);
        assert!(ppu.take_nmi());
        // But not after status was read
        ppu.write_ctrl(0x00, mapper.as_mut(), &mut fe);
        let _ = ppu.read_status(mapper.as_mut(), &mut fe);
        ppu.write_ctrl(0x80, mapper.as_mut(), &mut fe);
        assert!(!ppu.take_nmi());
    }

    #[test]
    fn test_background_pixels_reach_frame_buffer() {
        let (mut ppu, mut mapper, mut fe) = setup();
        // Solid tile 0: plane 0 all ones
        for row in 0..8 {
            mapper.write_vram(row, 0xFF);
        }
        // Palette: universal colour $0F, colour 1 of palette 0 = $21
        ppu.write_addr(0x3F, mapper.as_mut(), &mut fe);
        ppu.write_addr(0x00, mapper.as_mut(), &mut fe);
        ppu.write_data(0x0F, mapper.as_mut(), &mut fe);
        ppu.write_data(0x21, mapper.as_mut(), &mut fe);
        // Enable background, no clipping
        ppu.write_mask(0x0A, mapper.as_mut(), &mut fe);
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        // Nametable bytes default to 0 -> tile 0 everywhere -> colour 1
        let line = &ppu.frame_buffer()[128 * 256..128 * 256 + 8];
        assert!(
            line.iter().all(|&px| px == 0x21),
            "line renders palette colour $21, got {:?}",
            line
        );
    }

    #[test]
    fn test_sprite_zero_hit_fires_on_overlap() {
        let (mut ppu, mut mapper, mut fe) = setup();
        for row in 0..8 {
            mapper.write_vram(row, 0xFF); // tile 0, plane 0 solid
        }
        // Sprite 0 at x=8, sprite line y+1 rule puts Y byte at 9 for
        // line 10
        ppu.write_oam_addr(0x00);
        ppu.write_oam_data(9, mapper.as_mut(), &mut fe); // Y
        ppu.write_oam_data(0, mapper.as_mut(), &mut fe); // tile
        ppu.write_oam_data(0, mapper.as_mut(), &mut fe); // attributes
        ppu.write_oam_data(8, mapper.as_mut(), &mut fe); // X
        ppu.write_mask(0x1E, mapper.as_mut(), &mut fe); // both on, no clip
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        let status = ppu.read_status(mapper.as_mut(), &mut fe);
        assert_ne!(status & 0x40, 0, "sprite-zero hit recorded");
    }

    #[test]
    fn test_sprite_zero_hit_requires_both_layers() {
        let (mut ppu, mut mapper, mut fe) = setup();
        for row in 0..8 {
            mapper.write_vram(row, 0xFF);
        }
        ppu.write_oam_addr(0x00);
        ppu.write_oam_data(9, mapper.as_mut(), &mut fe);
        ppu.write_oam_data(0, mapper.as_mut(), &mut fe);
        ppu.write_oam_data(0, mapper.as_mut(), &mut fe);
        ppu.write_oam_data(8, mapper.as_mut(), &mut fe);
        ppu.write_mask(0x16, mapper.as_mut(), &mut fe); // sprites only
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        let status = ppu.read_status(mapper.as_mut(), &mut fe);
        assert_eq!(status & 0x40, 0, "no hit without the background layer");
    }

    #[test]
    fn test_sprite_zero_left_clipping() {
        let (mut ppu, mut mapper, mut fe) = setup();
        for row in 0..8 {
            mapper.write_vram(row, 0xFF);
        }
        // x=7 with left-edge clipping on: the one visible column span
        // 7..15 starts at 7, but columns < 8 are clipped for sprites
        // so only 8..15 remain -- the sprite pixels at 8..14 still hit.
        // Use x=0 so every sprite pixel is inside the clipped edge.
        ppu.write_oam_addr(0x00);
        ppu.write_oam_data(9, mapper.as_mut(), &mut fe);
        ppu.write_oam_data(0, mapper.as_mut(), &mut fe);
        ppu.write_oam_data(0, mapper.as_mut(), &mut fe);
        ppu.write_oam_data(0, mapper.as_mut(), &mut fe); // X = 0
        ppu.write_mask(0x18, mapper.as_mut(), &mut fe); // both on, clip left
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        let status = ppu.read_status(mapper.as_mut(), &mut fe);
        assert_eq!(
            status & 0x40,
            0,
            "a sprite wholly inside the clipped edge cannot hit"
        );
    }

    #[test]
    fn test_sprite_overflow_flag() {
        let (mut ppu, mut mapper, mut fe) = setup();
        // Nine sprites on line 10
        for sprite in 0..9u8 {
            ppu.write_oam_addr(sprite * 4);
            ppu.write_oam_data(9, mapper.as_mut(), &mut fe);
            ppu.write_oam_data(0, mapper.as_mut(), &mut fe);
            ppu.write_oam_data(0, mapper.as_mut(), &mut fe);
            ppu.write_oam_data(sprite * 16, mapper.as_mut(), &mut fe);
        }
        ppu.write_mask(0x18, mapper.as_mut(), &mut fe);
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        let status = ppu.read_status(mapper.as_mut(), &mut fe);
        assert_ne!(status & 0x20, 0, "ninth in-range sprite raises overflow");
    }

    #[test]
    fn test_odd_frames_run_one_dot_short_with_rendering() {
        let (mut ppu, mut mapper, mut fe) = setup();
        ppu.write_mask(0x08, mapper.as_mut(), &mut fe);
        // Two frames: the second is odd and loses one dot, so the pair
        // finishes within 2*frame cycles minus one PPU dot-time
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        run_one_frame(&mut ppu, mapper.as_mut(), &mut fe);
        assert_eq!(fe.frames, 2);
        assert!(!ppu.odd_frame, "two frames toggle parity twice");
    }

    #[test]
    fn test_ctrl_flags_decode() {
        let (mut ppu, mut mapper, mut fe) = setup();
        ppu.write_ctrl(0xBB, mapper.as_mut(), &mut fe);
        assert!(ppu.ctrl.contains(PpuCtrl::NMI_ENABLE));
        assert!(ppu.ctrl.contains(PpuCtrl::SPRITE_SIZE_16));
        assert_eq!(ppu.bg_pattern_base(), 0x1000);
        assert_eq!(ppu.sprite_pattern_base(), 0x1000);
        assert_eq!(ppu.reg_h, 1);
        assert_eq!(ppu.reg_v, 1);
    }
}
