//! Two-region append-only assembler with labels and a constant pool.
//!
//! The assembler is a single forward cursor over two byte buffers: the
//! **near** region holds the hot straight-line body of a block, the **far**
//! region collects cold paths (NaN fix-ups, software fallbacks) that are
//! reached only by forward conditional branches. `finalize` concatenates
//! near, far, and the 16-byte-aligned constant pool, then resolves every
//! recorded rel32 fixup in one pass. Previously emitted bytes are never
//! rewritten; an unresolved label at finalize is a programmer error and
//! panics.
//!
//! Instruction coverage is exactly what the vector floating-point emitter
//! needs: the SSE2/SSE3/SSE4.1 packed ops, their AVX three-operand forms,
//! FMA3, the AVX-512VL unsigned conversions, and enough scalar plumbing for
//! software-fallback calls.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::encoder::{Condition, Evex, OpcodeMap, Rex, SimdPrefix, Vex};
use super::registers::{Gpr, MemOperand, Xmm};

// =============================================================================
// Handles
// =============================================================================

/// A symbolic code offset, usable before it is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// An interned 16-byte constant-pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstId(u32);

/// The two code regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The hot, straight-line stream.
    Near,
    /// Out-of-line cold code, appended after the near body.
    Far,
}

/// A register-or-memory operand for vector instructions.
#[derive(Debug, Clone, Copy)]
pub enum XmmRm {
    /// Register direct.
    Reg(Xmm),
    /// Memory.
    Mem(MemOperand),
}

impl From<Xmm> for XmmRm {
    fn from(reg: Xmm) -> XmmRm {
        XmmRm::Reg(reg)
    }
}

impl From<MemOperand> for XmmRm {
    fn from(mem: MemOperand) -> XmmRm {
        XmmRm::Mem(mem)
    }
}

/// Packed-compare predicates (the `cmpps`/`cmppd` immediate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FpCompare {
    Equal = 0,
    LessThan = 1,
    LessEqual = 2,
    Unordered = 3,
    NotEqual = 4,
    Ordered = 7,
    /// Equal, or unordered (AVX extended predicate).
    EqualUnordered = 8,
}

// =============================================================================
// Fixups and the constant pool
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum FixupTarget {
    Label(Label),
    Const(ConstId),
}

/// A rel32 field awaiting resolution. `trailing` counts immediate bytes
/// emitted after the field, which shift the anchor the displacement is
/// relative to.
#[derive(Debug, Clone, Copy)]
struct Fixup {
    region: Region,
    offset: usize,
    trailing: u8,
    target: FixupTarget,
}

/// Interned read-only 16-byte constants, addressed RIP-relative.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<(u64, u64)>,
    interned: FxHashMap<(u64, u64), ConstId>,
}

impl ConstantPool {
    /// Intern a 16-byte constant given as (low, high) quadwords.
    pub fn intern(&mut self, lo: u64, hi: u64) -> ConstId {
        if let Some(&id) = self.interned.get(&(lo, hi)) {
            return id;
        }
        let id = ConstId(self.entries.len() as u32);
        self.entries.push((lo, hi));
        self.interned.insert((lo, hi), id);
        id
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no constants have been interned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Assembler
// =============================================================================

/// The forward assembler cursor.
pub struct Assembler {
    near: Vec<u8>,
    far: Vec<u8>,
    region: Region,
    labels: Vec<Option<(Region, usize)>>,
    fixups: SmallVec<[Fixup; 16]>,
    pool: ConstantPool,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// A fresh assembler positioned in the near region.
    pub fn new() -> Assembler {
        Assembler {
            near: Vec::with_capacity(256),
            far: Vec::new(),
            region: Region::Near,
            labels: Vec::new(),
            fixups: SmallVec::new(),
            pool: ConstantPool::default(),
        }
    }

    /// The current region.
    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Switch the cursor to the far region.
    pub fn switch_to_far(&mut self) {
        debug_assert_eq!(self.region, Region::Near, "already in the far region");
        self.region = Region::Far;
    }

    /// Switch the cursor back to the near region.
    pub fn switch_to_near(&mut self) {
        debug_assert_eq!(self.region, Region::Far, "already in the near region");
        self.region = Region::Near;
    }

    /// Create an unbound label.
    pub fn create_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Bind a label to the current cursor position.
    pub fn bind_label(&mut self, label: Label) {
        let offset = self.current().len();
        let slot = &mut self.labels[label.0 as usize];
        assert!(slot.is_none(), "label bound twice");
        *slot = Some((self.region, offset));
    }

    /// Intern a 16-byte constant and return a RIP-relative operand for it.
    pub fn const16(&mut self, lo: u64, hi: u64) -> MemOperand {
        MemOperand::Const(self.pool.intern(lo, hi))
    }

    /// Byte offset of the cursor within the current region.
    pub fn cursor_offset(&self) -> usize {
        match self.region {
            Region::Near => self.near.len(),
            Region::Far => self.far.len(),
        }
    }

    /// Concatenate near, far, and the constant pool, resolving all fixups.
    ///
    /// Panics if any referenced label was never bound.
    pub fn finalize(mut self) -> Vec<u8> {
        let near_len = self.near.len();
        let mut code = std::mem::take(&mut self.near);
        code.append(&mut self.far);
        if !self.pool.is_empty() {
            // int3 padding up to the pool alignment
            while code.len() % 16 != 0 {
                code.push(0xCC);
            }
        }
        let pool_base = code.len();
        for &(lo, hi) in &self.pool.entries {
            code.extend_from_slice(&lo.to_le_bytes());
            code.extend_from_slice(&hi.to_le_bytes());
        }

        for fixup in &self.fixups {
            let field = match fixup.region {
                Region::Near => fixup.offset,
                Region::Far => near_len + fixup.offset,
            };
            let target = match fixup.target {
                FixupTarget::Label(label) => {
                    let (region, offset) = self.labels[label.0 as usize]
                        .unwrap_or_else(|| panic!("unresolved label {label:?}"));
                    match region {
                        Region::Near => offset,
                        Region::Far => near_len + offset,
                    }
                }
                FixupTarget::Const(id) => pool_base + id.0 as usize * 16,
            };
            let anchor = field + 4 + fixup.trailing as usize;
            let disp = (target as i64 - anchor as i64) as i32;
            code[field..field + 4].copy_from_slice(&disp.to_le_bytes());
        }

        code
    }

    // =========================================================================
    // Raw emission
    // =========================================================================

    #[inline]
    fn current(&mut self) -> &mut Vec<u8> {
        match self.region {
            Region::Near => &mut self.near,
            Region::Far => &mut self.far,
        }
    }

    #[inline]
    fn emit8(&mut self, byte: u8) {
        self.current().push(byte);
    }

    #[inline]
    fn emit32(&mut self, value: u32) {
        self.current().extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn emit64(&mut self, value: u64) {
        self.current().extend_from_slice(&value.to_le_bytes());
    }

    /// ModRM with register-direct addressing.
    #[inline]
    fn modrm_reg(&mut self, reg: u8, rm: u8) {
        self.emit8(0b11 << 6 | (reg & 7) << 3 | (rm & 7));
    }

    /// ModRM (+ SIB + displacement) for a memory operand. `trailing` is the
    /// number of immediate bytes the caller emits after the displacement.
    fn modrm_mem(&mut self, reg: u8, mem: MemOperand, trailing: u8) {
        match mem {
            MemOperand::BaseDisp(base, disp) => {
                let base_enc = base.encoding() & 7;
                let needs_sib = base_enc == 4;
                let (mode, size) = if disp == 0 && base_enc != 5 {
                    (0b00, 0)
                } else if (-128..=127).contains(&disp) {
                    (0b01, 1)
                } else {
                    (0b10, 4)
                };
                self.emit8(mode << 6 | (reg & 7) << 3 | if needs_sib { 4 } else { base_enc });
                if needs_sib {
                    self.emit8(0b00 << 6 | 4 << 3 | base_enc);
                }
                match size {
                    1 => self.emit8(disp as u8),
                    4 => self.emit32(disp as u32),
                    _ => {}
                }
            }
            MemOperand::Const(id) => {
                self.emit8(0b00 << 6 | (reg & 7) << 3 | 0b101);
                let offset = self.cursor_offset();
                self.emit32(0);
                self.fixups.push(Fixup {
                    region: self.region,
                    offset,
                    trailing,
                    target: FixupTarget::Const(id),
                });
            }
        }
    }

    /// REX for a reg/rm pair, emitted only when needed.
    #[inline]
    fn rex(&mut self, w: bool, reg_ext: bool, rm_ext: bool) {
        let rex = Rex {
            w,
            r: reg_ext,
            x: false,
            b: rm_ext,
        };
        if rex.is_needed() {
            self.emit8(rex.byte());
        }
    }

    fn rm_ext(rm: &XmmRm) -> bool {
        match rm {
            XmmRm::Reg(x) => x.is_extended(),
            XmmRm::Mem(MemOperand::BaseDisp(base, _)) => base.is_extended(),
            XmmRm::Mem(MemOperand::Const(_)) => false,
        }
    }

    /// A legacy-encoded SSE op: optional mandatory prefix, 0F escape
    /// sequence, ModRM, optional trailing imm8.
    fn sse_op(
        &mut self,
        prefix: Option<u8>,
        opcode: &[u8],
        reg_enc: u8,
        reg_ext: bool,
        rm: XmmRm,
        imm: Option<u8>,
    ) {
        if let Some(p) = prefix {
            self.emit8(p);
        }
        self.rex(false, reg_ext, Self::rm_ext(&rm));
        for &byte in opcode {
            self.emit8(byte);
        }
        match rm {
            XmmRm::Reg(x) => self.modrm_reg(reg_enc, x.encoding()),
            XmmRm::Mem(mem) => self.modrm_mem(reg_enc, mem, imm.is_some() as u8),
        }
        if let Some(imm) = imm {
            self.emit8(imm);
        }
    }

    /// A VEX-encoded op with an optional non-destructive source.
    fn vex_op(
        &mut self,
        map: OpcodeMap,
        pp: SimdPrefix,
        w: bool,
        opcode: u8,
        reg_enc: u8,
        reg_ext: bool,
        vvvv: u8,
        rm: XmmRm,
        imm: Option<u8>,
    ) {
        let mut vex = Vex::new(map, pp);
        vex.w = w;
        vex.r = reg_ext;
        vex.b = Self::rm_ext(&rm);
        vex.vvvv = vvvv;
        let mut bytes = Vec::with_capacity(3);
        vex.encode(&mut bytes);
        for byte in bytes {
            self.emit8(byte);
        }
        self.emit8(opcode);
        match rm {
            XmmRm::Reg(x) => self.modrm_reg(reg_enc, x.encoding()),
            XmmRm::Mem(mem) => self.modrm_mem(reg_enc, mem, imm.is_some() as u8),
        }
        if let Some(imm) = imm {
            self.emit8(imm);
        }
    }

    /// An EVEX-encoded op (128-bit, unmasked).
    fn evex_op(
        &mut self,
        map: OpcodeMap,
        pp: SimdPrefix,
        w: bool,
        opcode: u8,
        dst: Xmm,
        src: Xmm,
    ) {
        let mut evex = Evex::new(map, pp, w);
        evex.r = dst.is_extended();
        evex.b = src.is_extended();
        let mut bytes = Vec::with_capacity(4);
        evex.encode(&mut bytes);
        for byte in bytes {
            self.emit8(byte);
        }
        self.emit8(opcode);
        self.modrm_reg(dst.encoding(), src.encoding());
    }

    // =========================================================================
    // SSE/SSE2 moves and bitwise ops
    // =========================================================================

    /// `movaps xmm, xmm/m128`
    pub fn movaps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x28], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `movaps m128, xmm`
    pub fn movaps_store(&mut self, dst: MemOperand, src: Xmm) {
        self.sse_op(
            None,
            &[0x0F, 0x29],
            src.encoding(),
            src.is_extended(),
            XmmRm::Mem(dst),
            None,
        );
    }

    /// `movdqa xmm, xmm/m128`
    pub fn movdqa(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x6F], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `andps xmm, xmm/m128`
    pub fn andps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x54], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `andnps xmm, xmm/m128`
    pub fn andnps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x55], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `andpd xmm, xmm/m128`
    pub fn andpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x54], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `orps xmm, xmm/m128`
    pub fn orps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x56], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `xorps xmm, xmm/m128`
    pub fn xorps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x57], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `pand xmm, xmm/m128`
    pub fn pand(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0xDB], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `por xmm, xmm/m128`
    pub fn por(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0xEB], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `pxor xmm, xmm/m128`
    pub fn pxor(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0xEF], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `pcmpeqw xmm, xmm/m128` (all-ones idiom when both operands match)
    pub fn pcmpeqw(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x75], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    // =========================================================================
    // SSE/SSE2/SSE3 packed arithmetic
    // =========================================================================

    /// `addps xmm, xmm/m128`
    pub fn addps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x58], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `addpd xmm, xmm/m128`
    pub fn addpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x58], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `subps xmm, xmm/m128`
    pub fn subps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x5C], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `subpd xmm, xmm/m128`
    pub fn subpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x5C], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `mulps xmm, xmm/m128`
    pub fn mulps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x59], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `mulpd xmm, xmm/m128`
    pub fn mulpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x59], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `divps xmm, xmm/m128`
    pub fn divps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x5E], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `divpd xmm, xmm/m128`
    pub fn divpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x5E], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `maxps xmm, xmm/m128`
    pub fn maxps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x5F], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `maxpd xmm, xmm/m128`
    pub fn maxpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x5F], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `minps xmm, xmm/m128`
    pub fn minps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x5D], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `minpd xmm, xmm/m128`
    pub fn minpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x5D], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `haddps xmm, xmm/m128` (SSE3)
    pub fn haddps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0xF2), &[0x0F, 0x7C], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `haddpd xmm, xmm/m128` (SSE3)
    pub fn haddpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x7C], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `cmpps xmm, xmm/m128, pred`
    pub fn cmpps(&mut self, dst: Xmm, src: impl Into<XmmRm>, pred: FpCompare) {
        self.sse_op(
            None,
            &[0x0F, 0xC2],
            dst.encoding(),
            dst.is_extended(),
            src.into(),
            Some(pred as u8),
        );
    }

    /// `cmppd xmm, xmm/m128, pred`
    pub fn cmppd(&mut self, dst: Xmm, src: impl Into<XmmRm>, pred: FpCompare) {
        self.sse_op(
            Some(0x66),
            &[0x0F, 0xC2],
            dst.encoding(),
            dst.is_extended(),
            src.into(),
            Some(pred as u8),
        );
    }

    // =========================================================================
    // Shuffles, packs, conversions
    // =========================================================================

    /// `punpckldq xmm, xmm/m128`
    pub fn punpckldq(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x62], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `punpcklqdq xmm, xmm/m128`
    pub fn punpcklqdq(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x6C], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `unpcklps xmm, xmm/m128`
    pub fn unpcklps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x14], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `unpcklpd xmm, xmm/m128`
    pub fn unpcklpd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(Some(0x66), &[0x0F, 0x14], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `movhlps xmm, xmm`
    pub fn movhlps(&mut self, dst: Xmm, src: Xmm) {
        self.sse_op(None, &[0x0F, 0x12], dst.encoding(), dst.is_extended(), XmmRm::Reg(src), None);
    }

    /// `pshufd xmm, xmm/m128, imm8`
    pub fn pshufd(&mut self, dst: Xmm, src: impl Into<XmmRm>, order: u8) {
        self.sse_op(
            Some(0x66),
            &[0x0F, 0x70],
            dst.encoding(),
            dst.is_extended(),
            src.into(),
            Some(order),
        );
    }

    /// `psrld xmm, imm8`
    pub fn psrld(&mut self, dst: Xmm, shift: u8) {
        self.emit8(0x66);
        self.rex(false, false, dst.is_extended());
        self.emit8(0x0F);
        self.emit8(0x72);
        self.modrm_reg(2, dst.encoding());
        self.emit8(shift);
    }

    /// `cvtdq2ps xmm, xmm/m128`
    pub fn cvtdq2ps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(None, &[0x0F, 0x5B], dst.encoding(), dst.is_extended(), src.into(), None);
    }

    /// `cvtsi2sd xmm, r64`
    pub fn cvtsi2sd(&mut self, dst: Xmm, src: Gpr) {
        self.emit8(0xF2);
        self.rex(true, dst.is_extended(), src.is_extended());
        self.emit8(0x0F);
        self.emit8(0x2A);
        self.modrm_reg(dst.encoding(), src.encoding());
    }

    /// `movq xmm, m64` (zeroes the upper lane)
    pub fn movq_load(&mut self, dst: Xmm, src: MemOperand) {
        self.sse_op(
            Some(0xF3),
            &[0x0F, 0x7E],
            dst.encoding(),
            dst.is_extended(),
            XmmRm::Mem(src),
            None,
        );
    }

    /// `movq m64, xmm`
    pub fn movq_store(&mut self, dst: MemOperand, src: Xmm) {
        self.sse_op(
            Some(0x66),
            &[0x0F, 0xD6],
            src.encoding(),
            src.is_extended(),
            XmmRm::Mem(dst),
            None,
        );
    }

    /// `movq r64, xmm`
    pub fn movq_to_gpr(&mut self, dst: Gpr, src: Xmm) {
        self.emit8(0x66);
        self.rex(true, src.is_extended(), dst.is_extended());
        self.emit8(0x0F);
        self.emit8(0x7E);
        self.modrm_reg(src.encoding(), dst.encoding());
    }

    /// `movq xmm, r64`
    pub fn movq_from_gpr(&mut self, dst: Xmm, src: Gpr) {
        self.emit8(0x66);
        self.rex(true, dst.is_extended(), src.is_extended());
        self.emit8(0x0F);
        self.emit8(0x6E);
        self.modrm_reg(dst.encoding(), src.encoding());
    }

    /// `pextrq r64, xmm, imm8` (SSE4.1)
    pub fn pextrq(&mut self, dst: Gpr, src: Xmm, lane: u8) {
        self.emit8(0x66);
        self.rex(true, src.is_extended(), dst.is_extended());
        self.emit8(0x0F);
        self.emit8(0x3A);
        self.emit8(0x16);
        self.modrm_reg(src.encoding(), dst.encoding());
        self.emit8(lane);
    }

    /// `movmskps r32, xmm`
    pub fn movmskps(&mut self, dst: Gpr, src: Xmm) {
        self.rex(false, dst.is_extended(), src.is_extended());
        self.emit8(0x0F);
        self.emit8(0x50);
        self.modrm_reg(dst.encoding(), src.encoding());
    }

    /// `ptest xmm, xmm/m128` (SSE4.1)
    pub fn ptest(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.sse_op(
            Some(0x66),
            &[0x0F, 0x38, 0x17],
            dst.encoding(),
            dst.is_extended(),
            src.into(),
            None,
        );
    }

    /// `roundps xmm, xmm/m128, imm8` (SSE4.1)
    pub fn roundps(&mut self, dst: Xmm, src: impl Into<XmmRm>, mode: u8) {
        self.sse_op(
            Some(0x66),
            &[0x0F, 0x3A, 0x08],
            dst.encoding(),
            dst.is_extended(),
            src.into(),
            Some(mode),
        );
    }

    /// `roundpd xmm, xmm/m128, imm8` (SSE4.1)
    pub fn roundpd(&mut self, dst: Xmm, src: impl Into<XmmRm>, mode: u8) {
        self.sse_op(
            Some(0x66),
            &[0x0F, 0x3A, 0x09],
            dst.encoding(),
            dst.is_extended(),
            src.into(),
            Some(mode),
        );
    }

    // =========================================================================
    // AVX (VEX-encoded) forms
    // =========================================================================

    /// `vmovaps xmm, xmm/m128`
    pub fn vmovaps(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.vex_op(
            OpcodeMap::M0F,
            SimdPrefix::None,
            false,
            0x28,
            dst.encoding(),
            dst.is_extended(),
            0,
            src.into(),
            None,
        );
    }

    /// `vmovapd xmm, xmm/m128`
    pub fn vmovapd(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.vex_op(
            OpcodeMap::M0F,
            SimdPrefix::P66,
            false,
            0x28,
            dst.encoding(),
            dst.is_extended(),
            0,
            src.into(),
            None,
        );
    }

    fn vex_three(
        &mut self,
        pp: SimdPrefix,
        opcode: u8,
        dst: Xmm,
        src1: Xmm,
        src2: XmmRm,
        imm: Option<u8>,
    ) {
        self.vex_op(
            OpcodeMap::M0F,
            pp,
            false,
            opcode,
            dst.encoding(),
            dst.is_extended(),
            src1.encoding(),
            src2,
            imm,
        );
    }

    /// `vaddps xmm, xmm, xmm/m128`
    pub fn vaddps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::None, 0x58, dst, src1, src2.into(), None);
    }

    /// `vaddpd xmm, xmm, xmm/m128`
    pub fn vaddpd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::P66, 0x58, dst, src1, src2.into(), None);
    }

    /// `vsubpd xmm, xmm, xmm/m128`
    pub fn vsubpd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::P66, 0x5C, dst, src1, src2.into(), None);
    }

    /// `vmaxps xmm, xmm, xmm/m128`
    pub fn vmaxps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::None, 0x5F, dst, src1, src2.into(), None);
    }

    /// `vmaxpd xmm, xmm, xmm/m128`
    pub fn vmaxpd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::P66, 0x5F, dst, src1, src2.into(), None);
    }

    /// `vminps xmm, xmm, xmm/m128`
    pub fn vminps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::None, 0x5D, dst, src1, src2.into(), None);
    }

    /// `vminpd xmm, xmm, xmm/m128`
    pub fn vminpd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::P66, 0x5D, dst, src1, src2.into(), None);
    }

    /// `vandps xmm, xmm, xmm/m128`
    pub fn vandps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::None, 0x54, dst, src1, src2.into(), None);
    }

    /// `vandpd xmm, xmm, xmm/m128`
    pub fn vandpd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::P66, 0x54, dst, src1, src2.into(), None);
    }

    /// `vorps xmm, xmm, xmm/m128`
    pub fn vorps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::None, 0x56, dst, src1, src2.into(), None);
    }

    /// `vorpd xmm, xmm, xmm/m128`
    pub fn vorpd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::P66, 0x56, dst, src1, src2.into(), None);
    }

    /// `vcmpps xmm, xmm, xmm/m128, pred`
    pub fn vcmpps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>, pred: FpCompare) {
        self.vex_three(SimdPrefix::None, 0xC2, dst, src1, src2.into(), Some(pred as u8));
    }

    /// `vcmppd xmm, xmm, xmm/m128, pred`
    pub fn vcmppd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>, pred: FpCompare) {
        self.vex_three(SimdPrefix::P66, 0xC2, dst, src1, src2.into(), Some(pred as u8));
    }

    /// `vhaddpd xmm, xmm, xmm/m128`
    pub fn vhaddpd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::P66, 0x7C, dst, src1, src2.into(), None);
    }

    /// `vunpcklps xmm, xmm, xmm/m128`
    pub fn vunpcklps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_three(SimdPrefix::None, 0x14, dst, src1, src2.into(), None);
    }

    /// `vblendvps xmm, xmm, xmm/m128, xmm`
    pub fn vblendvps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>, mask: Xmm) {
        self.vex_op(
            OpcodeMap::M0F3A,
            SimdPrefix::P66,
            false,
            0x4A,
            dst.encoding(),
            dst.is_extended(),
            src1.encoding(),
            src2.into(),
            Some(mask.encoding() << 4),
        );
    }

    /// `vblendvpd xmm, xmm, xmm/m128, xmm`
    pub fn vblendvpd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>, mask: Xmm) {
        self.vex_op(
            OpcodeMap::M0F3A,
            SimdPrefix::P66,
            false,
            0x4B,
            dst.encoding(),
            dst.is_extended(),
            src1.encoding(),
            src2.into(),
            Some(mask.encoding() << 4),
        );
    }

    /// `vpblendw xmm, xmm, xmm/m128, imm8`
    pub fn vpblendw(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>, lanes: u8) {
        self.vex_op(
            OpcodeMap::M0F3A,
            SimdPrefix::P66,
            false,
            0x0E,
            dst.encoding(),
            dst.is_extended(),
            src1.encoding(),
            src2.into(),
            Some(lanes),
        );
    }

    /// `vpermilps xmm, xmm/m128, imm8`
    pub fn vpermilps(&mut self, dst: Xmm, src: impl Into<XmmRm>, order: u8) {
        self.vex_op(
            OpcodeMap::M0F3A,
            SimdPrefix::P66,
            false,
            0x04,
            dst.encoding(),
            dst.is_extended(),
            0,
            src.into(),
            Some(order),
        );
    }

    /// `vpsrld xmm, xmm, imm8`
    pub fn vpsrld(&mut self, dst: Xmm, src: Xmm, shift: u8) {
        // Shift-by-immediate uses vvvv as the destination.
        self.vex_op(
            OpcodeMap::M0F,
            SimdPrefix::P66,
            false,
            0x72,
            2,
            false,
            dst.encoding(),
            XmmRm::Reg(src),
            Some(shift),
        );
    }

    /// `vptest xmm, xmm/m128` (AVX)
    pub fn vptest(&mut self, dst: Xmm, src: impl Into<XmmRm>) {
        self.vex_op(
            OpcodeMap::M0F38,
            SimdPrefix::P66,
            false,
            0x17,
            dst.encoding(),
            dst.is_extended(),
            0,
            src.into(),
            None,
        );
    }

    /// `vfmadd231ps xmm, xmm, xmm/m128`: `dst = dst + src1 × src2`
    pub fn vfmadd231ps(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_op(
            OpcodeMap::M0F38,
            SimdPrefix::P66,
            false,
            0xB8,
            dst.encoding(),
            dst.is_extended(),
            src1.encoding(),
            src2.into(),
            None,
        );
    }

    /// `vfmadd231pd xmm, xmm, xmm/m128`: `dst = dst + src1 × src2`
    pub fn vfmadd231pd(&mut self, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
        self.vex_op(
            OpcodeMap::M0F38,
            SimdPrefix::P66,
            true,
            0xB8,
            dst.encoding(),
            dst.is_extended(),
            src1.encoding(),
            src2.into(),
            None,
        );
    }

    // =========================================================================
    // AVX-512VL conversions
    // =========================================================================

    /// `vcvtqq2pd xmm, xmm` (AVX-512VL+DQ)
    pub fn vcvtqq2pd(&mut self, dst: Xmm, src: Xmm) {
        self.evex_op(OpcodeMap::M0F, SimdPrefix::PF3, true, 0xE6, dst, src);
    }

    /// `vcvtudq2ps xmm, xmm` (AVX-512VL)
    pub fn vcvtudq2ps(&mut self, dst: Xmm, src: Xmm) {
        self.evex_op(OpcodeMap::M0F, SimdPrefix::PF2, false, 0x7A, dst, src);
    }

    /// `vcvtuqq2pd xmm, xmm` (AVX-512VL+DQ)
    pub fn vcvtuqq2pd(&mut self, dst: Xmm, src: Xmm) {
        self.evex_op(OpcodeMap::M0F, SimdPrefix::PF3, true, 0x7A, dst, src);
    }

    // =========================================================================
    // Scalar plumbing
    // =========================================================================

    /// `mov r64, r64`
    pub fn mov_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(true, dst.is_extended(), src.is_extended());
        self.emit8(0x8B);
        self.modrm_reg(dst.encoding(), src.encoding());
    }

    /// `mov r64, imm64`
    pub fn mov_ri64(&mut self, dst: Gpr, imm: u64) {
        self.rex(true, false, dst.is_extended());
        self.emit8(0xB8 + (dst.encoding() & 7));
        self.emit64(imm);
    }

    /// `mov r32, imm32` (zero-extends into the full register)
    pub fn mov_ri32(&mut self, dst: Gpr, imm: u32) {
        self.rex(false, false, dst.is_extended());
        self.emit8(0xB8 + (dst.encoding() & 7));
        self.emit32(imm);
    }

    /// `mov r64, [mem]`
    pub fn mov_load(&mut self, dst: Gpr, mem: MemOperand) {
        self.rex(true, dst.is_extended(), Self::rm_ext(&XmmRm::Mem(mem)));
        self.emit8(0x8B);
        self.modrm_mem(dst.encoding(), mem, 0);
    }

    /// `mov [mem], r64`
    pub fn mov_store(&mut self, mem: MemOperand, src: Gpr) {
        self.rex(true, src.is_extended(), Self::rm_ext(&XmmRm::Mem(mem)));
        self.emit8(0x89);
        self.modrm_mem(src.encoding(), mem, 0);
    }

    /// `mov qword [mem], imm32` (sign-extended)
    pub fn mov_store_imm32(&mut self, mem: MemOperand, imm: i32) {
        self.rex(true, false, Self::rm_ext(&XmmRm::Mem(mem)));
        self.emit8(0xC7);
        self.modrm_mem(0, mem, 4);
        self.emit32(imm as u32);
    }

    /// `mov dword [mem], imm32`
    pub fn mov32_store_imm(&mut self, mem: MemOperand, imm: u32) {
        self.rex(false, false, Self::rm_ext(&XmmRm::Mem(mem)));
        self.emit8(0xC7);
        self.modrm_mem(0, mem, 4);
        self.emit32(imm);
    }

    /// `stmxcsr m32`
    pub fn stmxcsr(&mut self, mem: MemOperand) {
        self.rex(false, false, Self::rm_ext(&XmmRm::Mem(mem)));
        self.emit8(0x0F);
        self.emit8(0xAE);
        self.modrm_mem(3, mem, 0);
    }

    /// `ldmxcsr m32`
    pub fn ldmxcsr(&mut self, mem: MemOperand) {
        self.rex(false, false, Self::rm_ext(&XmmRm::Mem(mem)));
        self.emit8(0x0F);
        self.emit8(0xAE);
        self.modrm_mem(2, mem, 0);
    }

    /// `lea r64, [mem]`
    pub fn lea(&mut self, dst: Gpr, mem: MemOperand) {
        self.rex(true, dst.is_extended(), Self::rm_ext(&XmmRm::Mem(mem)));
        self.emit8(0x8D);
        self.modrm_mem(dst.encoding(), mem, 0);
    }

    /// `add r64, imm`
    pub fn add_ri(&mut self, dst: Gpr, imm: i32) {
        self.alu_ri(0, dst, imm);
    }

    /// `sub r64, imm`
    pub fn sub_ri(&mut self, dst: Gpr, imm: i32) {
        self.alu_ri(5, dst, imm);
    }

    fn alu_ri(&mut self, ext: u8, dst: Gpr, imm: i32) {
        self.rex(true, false, dst.is_extended());
        if (-128..=127).contains(&imm) {
            self.emit8(0x83);
            self.modrm_reg(ext, dst.encoding());
            self.emit8(imm as u8);
        } else {
            self.emit8(0x81);
            self.modrm_reg(ext, dst.encoding());
            self.emit32(imm as u32);
        }
    }

    /// `cmp r32, imm`
    pub fn cmp_ri32(&mut self, dst: Gpr, imm: i32) {
        self.rex(false, false, dst.is_extended());
        if (-128..=127).contains(&imm) {
            self.emit8(0x83);
            self.modrm_reg(7, dst.encoding());
            self.emit8(imm as u8);
        } else {
            self.emit8(0x81);
            self.modrm_reg(7, dst.encoding());
            self.emit32(imm as u32);
        }
    }

    /// `push r64`
    pub fn push(&mut self, reg: Gpr) {
        self.rex(false, false, reg.is_extended());
        self.emit8(0x50 + (reg.encoding() & 7));
    }

    /// `pop r64`
    pub fn pop(&mut self, reg: Gpr) {
        self.rex(false, false, reg.is_extended());
        self.emit8(0x58 + (reg.encoding() & 7));
    }

    /// `call r64`
    pub fn call_reg(&mut self, reg: Gpr) {
        self.rex(false, false, reg.is_extended());
        self.emit8(0xFF);
        self.modrm_reg(2, reg.encoding());
    }

    /// `ret`
    pub fn ret(&mut self) {
        self.emit8(0xC3);
    }

    /// `jmp label` (always rel32)
    pub fn jmp_label(&mut self, label: Label) {
        self.emit8(0xE9);
        let offset = self.cursor_offset();
        self.emit32(0);
        self.fixups.push(Fixup {
            region: self.region,
            offset,
            trailing: 0,
            target: FixupTarget::Label(label),
        });
    }

    /// `jcc label` (always rel32)
    pub fn jcc_label(&mut self, cond: Condition, label: Label) {
        self.emit8(0x0F);
        self.emit8(0x80 + cond.encoding());
        let offset = self.cursor_offset();
        self.emit32(0);
        self.fixups.push(Fixup {
            region: self.region,
            offset,
            trailing: 0,
            target: FixupTarget::Label(label),
        });
    }

    /// `jnz label`
    pub fn jnz_label(&mut self, label: Label) {
        self.jcc_label(Condition::NotEqual, label);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut asm = Assembler::new();
        f(&mut asm);
        asm.finalize()
    }

    #[test]
    fn test_movaps_reg_reg() {
        // movaps xmm0, xmm1 = 0F 28 C1
        assert_eq!(assemble(|a| a.movaps(Xmm::Xmm0, Xmm::Xmm1)), [0x0F, 0x28, 0xC1]);
        // Extended registers pick up REX bits: movaps xmm8, xmm1 = 44 0F 28 C1
        assert_eq!(
            assemble(|a| a.movaps(Xmm::Xmm8, Xmm::Xmm1)),
            [0x44, 0x0F, 0x28, 0xC1]
        );
    }

    #[test]
    fn test_packed_arithmetic() {
        // addps xmm1, xmm2 = 0F 58 CA
        assert_eq!(assemble(|a| a.addps(Xmm::Xmm1, Xmm::Xmm2)), [0x0F, 0x58, 0xCA]);
        // addpd xmm1, xmm2 = 66 0F 58 CA
        assert_eq!(
            assemble(|a| a.addpd(Xmm::Xmm1, Xmm::Xmm2)),
            [0x66, 0x0F, 0x58, 0xCA]
        );
        // haddps xmm0, xmm1 = F2 0F 7C C1
        assert_eq!(
            assemble(|a| a.haddps(Xmm::Xmm0, Xmm::Xmm1)),
            [0xF2, 0x0F, 0x7C, 0xC1]
        );
    }

    #[test]
    fn test_cmpps_immediate() {
        // cmpunordps xmm0, xmm0 = 0F C2 C0 03
        assert_eq!(
            assemble(|a| a.cmpps(Xmm::Xmm0, Xmm::Xmm0, FpCompare::Unordered)),
            [0x0F, 0xC2, 0xC0, 0x03]
        );
    }

    #[test]
    fn test_memory_operands() {
        // movaps xmm0, [rsp+8] = 0F 28 44 24 08 (SIB required for rsp)
        assert_eq!(
            assemble(|a| a.movaps(Xmm::Xmm0, MemOperand::BaseDisp(Gpr::Rsp, 8))),
            [0x0F, 0x28, 0x44, 0x24, 0x08]
        );
        // movaps [r15+0x100], xmm2 = 41 0F 29 97 00 01 00 00
        assert_eq!(
            assemble(|a| a.movaps_store(MemOperand::BaseDisp(Gpr::R15, 0x100), Xmm::Xmm2)),
            [0x41, 0x0F, 0x29, 0x97, 0x00, 0x01, 0x00, 0x00]
        );
        // [rbp] forces a disp8 of zero: mov rax, [rbp] = 48 8B 45 00
        assert_eq!(
            assemble(|a| a.mov_load(Gpr::Rax, MemOperand::base(Gpr::Rbp))),
            [0x48, 0x8B, 0x45, 0x00]
        );
    }

    #[test]
    fn test_scalar_plumbing() {
        // mov rax, imm64 = 48 B8 ..
        let code = assemble(|a| a.mov_ri64(Gpr::Rax, 0x1122_3344_5566_7788));
        assert_eq!(code[..2], [0x48, 0xB8]);
        assert_eq!(code[2..10], 0x1122_3344_5566_7788u64.to_le_bytes());

        // sub rsp, 0x28 = 48 83 EC 28
        assert_eq!(assemble(|a| a.sub_ri(Gpr::Rsp, 0x28)), [0x48, 0x83, 0xEC, 0x28]);
        // add rsp, 0x1000 takes the imm32 form = 48 81 C4 00 10 00 00
        assert_eq!(
            assemble(|a| a.add_ri(Gpr::Rsp, 0x1000)),
            [0x48, 0x81, 0xC4, 0x00, 0x10, 0x00, 0x00]
        );
        // lea rdi, [rsp+0x20] = 48 8D 7C 24 20
        assert_eq!(
            assemble(|a| a.lea(Gpr::Rdi, MemOperand::BaseDisp(Gpr::Rsp, 0x20))),
            [0x48, 0x8D, 0x7C, 0x24, 0x20]
        );
        // push r12 / pop r12 = 41 54 / 41 5C
        assert_eq!(assemble(|a| a.push(Gpr::R12)), [0x41, 0x54]);
        assert_eq!(assemble(|a| a.pop(Gpr::R12)), [0x41, 0x5C]);
        // call rax = FF D0
        assert_eq!(assemble(|a| a.call_reg(Gpr::Rax)), [0xFF, 0xD0]);
    }

    #[test]
    fn test_vex_three_operand() {
        // vaddps xmm1, xmm2, xmm3 = C5 E8 58 CB
        assert_eq!(
            assemble(|a| a.vaddps(Xmm::Xmm1, Xmm::Xmm2, Xmm::Xmm3)),
            [0xC5, 0xE8, 0x58, 0xCB]
        );
        // vcmpps xmm0, xmm1, xmm2, 8 (eq_uq) = C5 F0 C2 C2 08
        assert_eq!(
            assemble(|a| a.vcmpps(Xmm::Xmm0, Xmm::Xmm1, Xmm::Xmm2, FpCompare::EqualUnordered)),
            [0xC5, 0xF0, 0xC2, 0xC2, 0x08]
        );
    }

    #[test]
    fn test_fma() {
        // vfmadd231ps xmm0, xmm1, xmm2 = C4 E2 71 B8 C2
        assert_eq!(
            assemble(|a| a.vfmadd231ps(Xmm::Xmm0, Xmm::Xmm1, Xmm::Xmm2)),
            [0xC4, 0xE2, 0x71, 0xB8, 0xC2]
        );
        // vfmadd231pd xmm0, xmm1, xmm2 = C4 E2 F1 B8 C2 (W=1)
        assert_eq!(
            assemble(|a| a.vfmadd231pd(Xmm::Xmm0, Xmm::Xmm1, Xmm::Xmm2)),
            [0xC4, 0xE2, 0xF1, 0xB8, 0xC2]
        );
    }

    #[test]
    fn test_blendv() {
        // vblendvps xmm1, xmm2, xmm3, xmm4 = C4 E3 69 4A CB 40
        assert_eq!(
            assemble(|a| a.vblendvps(Xmm::Xmm1, Xmm::Xmm2, Xmm::Xmm3, Xmm::Xmm4)),
            [0xC4, 0xE3, 0x69, 0x4A, 0xCB, 0x40]
        );
    }

    #[test]
    fn test_evex_conversions() {
        // vcvtudq2ps xmm0, xmm1 = 62 F1 7F 08 7A C1
        assert_eq!(
            assemble(|a| a.vcvtudq2ps(Xmm::Xmm0, Xmm::Xmm1)),
            [0x62, 0xF1, 0x7F, 0x08, 0x7A, 0xC1]
        );
        // vcvtqq2pd xmm0, xmm1 = 62 F1 FE 08 E6 C1
        assert_eq!(
            assemble(|a| a.vcvtqq2pd(Xmm::Xmm0, Xmm::Xmm1)),
            [0x62, 0xF1, 0xFE, 0x08, 0xE6, 0xC1]
        );
    }

    #[test]
    fn test_label_forward_backward() {
        // jmp forward over a ret, then bind.
        let mut asm = Assembler::new();
        let skip = asm.create_label();
        asm.jmp_label(skip); // 5 bytes
        asm.ret(); // 1 byte
        asm.bind_label(skip);
        asm.ret();
        let code = asm.finalize();
        // E9 01 00 00 00 C3 C3
        assert_eq!(code[..5], [0xE9, 0x01, 0x00, 0x00, 0x00]);

        // Backward: bind, emit, jump back.
        let mut asm = Assembler::new();
        let top = asm.create_label();
        asm.bind_label(top);
        asm.jmp_label(top);
        let code = asm.finalize();
        // Displacement is -5 (back to the start of the jmp).
        assert_eq!(code, [0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_near_far_regions() {
        // A jnz into the far region and a jmp back, exactly the NaN-handler
        // shape: the far code lands after the near code in the final image.
        let mut asm = Assembler::new();
        let cold = asm.create_label();
        let resume = asm.create_label();
        asm.jnz_label(cold); // near: 6 bytes
        asm.bind_label(resume);
        asm.ret(); // near: 1 byte

        asm.switch_to_far();
        asm.bind_label(cold); // far offset 0 -> final offset 7
        asm.jmp_label(resume);
        asm.switch_to_near();

        let code = asm.finalize();
        // jnz rel32 = 0F 85 01 00 00 00 (target 7, anchor 6)
        assert_eq!(code[..6], [0x0F, 0x85, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(code[6], 0xC3);
        // far jmp back to offset 6: E9 disp where disp = 6 - 12 = -6
        assert_eq!(code[7..12], [0xE9, 0xFA, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_constant_pool_rip_addressing() {
        let mut asm = Assembler::new();
        let mask = asm.const16(0x7FC0_0000_7FC0_0000, 0x7FC0_0000_7FC0_0000);
        asm.andps(Xmm::Xmm0, mask);
        asm.ret();
        let code = asm.finalize();
        // andps xmm0, [rip+disp] = 0F 54 05 <disp32>; ret; pad; pool.
        assert_eq!(code[..3], [0x0F, 0x54, 0x05]);
        let disp = i32::from_le_bytes(code[3..7].try_into().unwrap());
        let anchor = 7;
        let target = (anchor as i64 + disp as i64) as usize;
        assert_eq!(target % 16, 0);
        assert_eq!(&code[target..target + 8], &0x7FC0_0000_7FC0_0000u64.to_le_bytes());
    }

    #[test]
    fn test_constant_pool_interns() {
        let mut asm = Assembler::new();
        let a = asm.const16(1, 2);
        let b = asm.const16(1, 2);
        let c = asm.const16(3, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_trailing_immediate_shifts_rip_anchor() {
        // cmpps xmm0, [rip+disp], imm: the displacement is relative to the
        // end of the instruction including the trailing immediate.
        let mut asm = Assembler::new();
        let zero = asm.const16(0, 0);
        asm.cmpps(Xmm::Xmm0, zero, FpCompare::Equal);
        asm.ret();
        let code = asm.finalize();
        // 0F C2 05 <disp32> 00 C3 ...
        assert_eq!(code[..3], [0x0F, 0xC2, 0x05]);
        let disp = i32::from_le_bytes(code[3..7].try_into().unwrap());
        assert_eq!(code[7], 0x00); // predicate immediate
        let anchor = 8; // end of instruction
        let target = (anchor as i64 + disp as i64) as usize;
        assert_eq!(target % 16, 0);
        assert_eq!(&code[target..target + 8], &0u64.to_le_bytes());
    }

    #[test]
    #[should_panic(expected = "unresolved label")]
    fn test_unresolved_label_panics() {
        let mut asm = Assembler::new();
        let label = asm.create_label();
        asm.jmp_label(label);
        asm.finalize();
    }

    #[test]
    fn test_sse41_and_round() {
        // ptest xmm0, xmm1 = 66 0F 38 17 C1
        assert_eq!(
            assemble(|a| a.ptest(Xmm::Xmm0, Xmm::Xmm1)),
            [0x66, 0x0F, 0x38, 0x17, 0xC1]
        );
        // roundps xmm0, xmm1, 0b00 = 66 0F 3A 08 C1 00
        assert_eq!(
            assemble(|a| a.roundps(Xmm::Xmm0, Xmm::Xmm1, 0)),
            [0x66, 0x0F, 0x3A, 0x08, 0xC1, 0x00]
        );
    }

    #[test]
    fn test_movq_and_pextrq() {
        // movq rax, xmm0 = 66 48 0F 7E C0
        assert_eq!(
            assemble(|a| a.movq_to_gpr(Gpr::Rax, Xmm::Xmm0)),
            [0x66, 0x48, 0x0F, 0x7E, 0xC0]
        );
        // movq xmm0, rax = 66 48 0F 6E C0
        assert_eq!(
            assemble(|a| a.movq_from_gpr(Xmm::Xmm0, Gpr::Rax)),
            [0x66, 0x48, 0x0F, 0x6E, 0xC0]
        );
        // pextrq rax, xmm0, 1 = 66 48 0F 3A 16 C0 01
        assert_eq!(
            assemble(|a| a.pextrq(Gpr::Rax, Xmm::Xmm0, 1)),
            [0x66, 0x48, 0x0F, 0x3A, 0x16, 0xC0, 0x01]
        );
        // cvtsi2sd xmm0, rax = F2 48 0F 2A C0
        assert_eq!(
            assemble(|a| a.cvtsi2sd(Xmm::Xmm0, Gpr::Rax)),
            [0xF2, 0x48, 0x0F, 0x2A, 0xC0]
        );
    }

    #[test]
    fn test_psrld_forms() {
        // psrld xmm1, 16 = 66 0F 72 D1 10
        assert_eq!(assemble(|a| a.psrld(Xmm::Xmm1, 16)), [0x66, 0x0F, 0x72, 0xD1, 0x10]);
        // vpsrld xmm1, xmm2, 16 = C5 F1 72 D2 10
        assert_eq!(
            assemble(|a| a.vpsrld(Xmm::Xmm1, Xmm::Xmm2, 16)),
            [0xC5, 0xF1, 0x72, 0xD2, 0x10]
        );
    }
}
