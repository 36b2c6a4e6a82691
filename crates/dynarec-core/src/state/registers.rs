/// Number of architecturally visible general-purpose registers (`R0..R15`).
pub const GENERAL_REGISTER_COUNT: usize = 16;
/// Number of single-precision floating-point registers (`FR0..FR15`).
pub const FLOAT_REGISTER_COUNT: usize = 16;

/// `SR` bit for the T (test/carry) flag.
pub const SR_T: u32 = 1 << 0;
/// `SR` bit for saturation on multiply-accumulate.
pub const SR_S: u32 = 1 << 1;
/// `SR` interrupt mask field (bits 4..7).
pub const SR_IMASK: u32 = 0xF << 4;
/// `SR` bit Q used by step division.
pub const SR_Q: u32 = 1 << 8;
/// `SR` bit M used by step division.
pub const SR_M: u32 = 1 << 9;
/// `SR` bit for FPU disabled.
pub const SR_FD: u32 = 1 << 15;
/// `SR` bit for exception/interrupt block.
pub const SR_BL: u32 = 1 << 28;
/// `SR` bit selecting the privileged register bank.
pub const SR_RB: u32 = 1 << 29;
/// `SR` bit for privileged mode.
pub const SR_MD: u32 = 1 << 30;
/// Mask of architecturally active `SR` bits.
pub const SR_ACTIVE_MASK: u32 =
    SR_T | SR_S | SR_IMASK | SR_Q | SR_M | SR_FD | SR_BL | SR_RB | SR_MD;
/// `SR` value loaded by power-on and manual reset.
pub const SR_RESET_VALUE: u32 = SR_MD | SR_RB | SR_BL | SR_IMASK;

/// Architecturally visible general-purpose register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum GeneralRegister {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl GeneralRegister {
    /// Ordered list of all architectural general-purpose registers.
    pub const ALL: [Self; GENERAL_REGISTER_COUNT] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::R13,
        Self::R14,
        Self::R15,
    ];

    /// Returns the array index for this register (`0..=15`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes a 4-bit register field (`nnnn`/`mmmm`) into a register.
    #[must_use]
    pub const fn from_u4(bits: u8) -> Option<Self> {
        if bits < 16 {
            Some(Self::ALL[bits as usize])
        } else {
            None
        }
    }

    /// Extracts the register field at `shift` from an opcode word.
    #[must_use]
    pub const fn from_opcode(opcode: u16, shift: u32) -> Self {
        Self::ALL[((opcode >> shift) & 0xF) as usize]
    }
}

/// Register file of the emulated 32-bit RISC core.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    gpr: [u32; GENERAL_REGISTER_COUNT],
    fpr: [f32; FLOAT_REGISTER_COUNT],
    pc: u32,
    sr: u32,
    fpscr: u32,
    spc: u32,
    ssr: u32,
    sgr: u32,
    vbr: u32,
    expevt: u32,
}

impl RegisterFile {
    /// Reads a general-purpose register.
    #[must_use]
    pub const fn gpr(&self, reg: GeneralRegister) -> u32 {
        self.gpr[reg.index()]
    }

    /// Writes a general-purpose register.
    pub const fn set_gpr(&mut self, reg: GeneralRegister, value: u32) {
        self.gpr[reg.index()] = value;
    }

    /// Reads floating-point register `FRn`; `n` is taken modulo 16.
    #[must_use]
    pub const fn fpr(&self, n: usize) -> f32 {
        self.fpr[n % FLOAT_REGISTER_COUNT]
    }

    /// Writes floating-point register `FRn`; `n` is taken modulo 16.
    pub const fn set_fpr(&mut self, n: usize, value: f32) {
        self.fpr[n % FLOAT_REGISTER_COUNT] = value;
    }

    /// Reads the `PC` register.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// Writes the `PC` register.
    pub const fn set_pc(&mut self, value: u32) {
        self.pc = value;
    }

    /// Reads the `SR` register.
    #[must_use]
    pub const fn sr(&self) -> u32 {
        self.sr
    }

    /// Writes the `SR` register. Reserved bits read back as zero.
    pub const fn set_sr(&mut self, value: u32) {
        self.sr = value & SR_ACTIVE_MASK;
    }

    /// Returns `true` when every bit of `flag` is set in `SR`.
    #[must_use]
    pub const fn sr_flag_is_set(&self, flag: u32) -> bool {
        flag != 0 && (self.sr & flag) == flag
    }

    /// Sets or clears an active `SR` bit (or field).
    pub const fn set_sr_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.sr |= flag & SR_ACTIVE_MASK;
        } else {
            self.sr &= !(flag & SR_ACTIVE_MASK);
        }
    }

    /// Reads the `FPSCR` register.
    #[must_use]
    pub const fn fpscr(&self) -> u32 {
        self.fpscr
    }

    /// Writes the `FPSCR` register.
    pub const fn set_fpscr(&mut self, value: u32) {
        self.fpscr = value;
    }

    /// Reads the saved program counter.
    #[must_use]
    pub const fn spc(&self) -> u32 {
        self.spc
    }

    /// Writes the saved program counter.
    pub const fn set_spc(&mut self, value: u32) {
        self.spc = value;
    }

    /// Reads the saved status register.
    #[must_use]
    pub const fn ssr(&self) -> u32 {
        self.ssr
    }

    /// Writes the saved status register.
    pub const fn set_ssr(&mut self, value: u32) {
        self.ssr = value;
    }

    /// Reads the saved general register (`R15` at exception entry).
    #[must_use]
    pub const fn sgr(&self) -> u32 {
        self.sgr
    }

    /// Writes the saved general register.
    pub const fn set_sgr(&mut self, value: u32) {
        self.sgr = value;
    }

    /// Reads the vector base register.
    #[must_use]
    pub const fn vbr(&self) -> u32 {
        self.vbr
    }

    /// Writes the vector base register.
    pub const fn set_vbr(&mut self, value: u32) {
        self.vbr = value;
    }

    /// Reads the exception event register.
    #[must_use]
    pub const fn expevt(&self) -> u32 {
        self.expevt
    }

    /// Writes the exception event register.
    pub const fn set_expevt(&mut self, value: u32) {
        self.expevt = value;
    }
}

#[cfg(test)]
mod tests {
    use super::{
        GeneralRegister, RegisterFile, GENERAL_REGISTER_COUNT, SR_ACTIVE_MASK, SR_BL, SR_FD,
        SR_IMASK, SR_M, SR_MD, SR_Q, SR_RB, SR_S, SR_T,
    };

    #[test]
    fn register_count_and_decode_match_architecture() {
        assert_eq!(GENERAL_REGISTER_COUNT, 16);

        for bits in 0_u8..16 {
            let reg = GeneralRegister::from_u4(bits).expect("valid 4-bit register encoding");
            assert_eq!(reg.index(), usize::from(bits));
        }

        assert!(GeneralRegister::from_u4(16).is_none());
    }

    #[test]
    fn opcode_field_extraction_masks_to_four_bits() {
        assert_eq!(GeneralRegister::from_opcode(0x7A05, 8), GeneralRegister::R10);
        assert_eq!(GeneralRegister::from_opcode(0xF3C0, 4), GeneralRegister::R12);
    }

    #[test]
    fn general_register_file_tracks_each_register_independently() {
        let mut regs = RegisterFile::default();

        for (offset, reg) in (0_u32..).zip(GeneralRegister::ALL.iter().copied()) {
            regs.set_gpr(reg, 0x8C00_0000 + offset);
        }

        for (offset, reg) in (0_u32..).zip(GeneralRegister::ALL.iter().copied()) {
            assert_eq!(regs.gpr(reg), 0x8C00_0000 + offset);
        }
    }

    #[test]
    fn float_register_index_wraps() {
        let mut regs = RegisterFile::default();
        regs.set_fpr(3, 1.5);
        assert!((regs.fpr(19) - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn sr_only_stores_active_architectural_bits() {
        let mut regs = RegisterFile::default();
        regs.set_sr(u32::MAX);

        assert_eq!(regs.sr(), SR_ACTIVE_MASK);
    }

    #[test]
    fn sr_individual_bits_can_be_set_and_cleared() {
        let mut regs = RegisterFile::default();
        let flags = [SR_T, SR_S, SR_IMASK, SR_Q, SR_M, SR_FD, SR_BL, SR_RB, SR_MD];

        for flag in flags {
            regs.set_sr_flag(flag, true);
            assert!(regs.sr_flag_is_set(flag));
        }

        for flag in flags {
            regs.set_sr_flag(flag, false);
            assert!(!regs.sr_flag_is_set(flag));
        }

        assert_eq!(regs.sr(), 0);
    }

    #[test]
    fn exception_bookkeeping_registers_are_readable() {
        let mut regs = RegisterFile::default();

        regs.set_spc(0x8C01_0000);
        regs.set_ssr(0x4000_00F0);
        regs.set_sgr(0x8CFF_FFFC);
        regs.set_vbr(0x8C00_0000);
        regs.set_expevt(0x180);
        regs.set_fpscr(0x0004_0001);

        assert_eq!(regs.spc(), 0x8C01_0000);
        assert_eq!(regs.ssr(), 0x4000_00F0);
        assert_eq!(regs.sgr(), 0x8CFF_FFFC);
        assert_eq!(regs.vbr(), 0x8C00_0000);
        assert_eq!(regs.expevt(), 0x180);
        assert_eq!(regs.fpscr(), 0x0004_0001);
    }
}
