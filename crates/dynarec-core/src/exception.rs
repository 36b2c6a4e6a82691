use thiserror::Error;

use crate::state::{GeneralRegister, ProcessorContext, RESET_VECTOR, SR_BL, SR_MD, SR_RB};

/// Offset from `VBR` of the general exception handler.
pub const VECTOR_OFFSET_GENERAL: u32 = 0x100;
/// Offset from `VBR` of the TLB-miss handler.
pub const VECTOR_OFFSET_TLB_MISS: u32 = 0x400;

/// Exception classes used for statistics and entry-vector selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExceptionClass {
    /// Power-on or manual reset.
    Reset,
    /// Address-translation miss or protection violation.
    Tlb,
    /// Misaligned or privileged data access.
    AddressError,
    /// Floating-point unit exception or FPU-disabled use.
    Fpu,
    /// Unconditional software trap.
    Trap,
    /// Undecodable instruction, in or out of a delay slot.
    Instruction,
    /// User break controller match.
    Debug,
}

/// Processor exception kinds with their stable `EXPEVT` event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum ExceptionKind {
    /// Power-on reset.
    #[error("power-on reset")]
    PowerOnReset = 0x000,
    /// Manual reset.
    #[error("manual reset")]
    ManualReset = 0x020,
    /// TLB miss on a read or fetch.
    #[error("tlb miss on read")]
    TlbMissRead = 0x040,
    /// TLB miss on a write.
    #[error("tlb miss on write")]
    TlbMissWrite = 0x060,
    /// First write to a clean page.
    #[error("initial page write")]
    InitialPageWrite = 0x080,
    /// TLB protection violation on a read or fetch.
    #[error("tlb protection violation on read")]
    TlbProtectionRead = 0x0A0,
    /// TLB protection violation on a write.
    #[error("tlb protection violation on write")]
    TlbProtectionWrite = 0x0C0,
    /// Address error on a read or fetch.
    #[error("address error on read")]
    AddressErrorRead = 0x0E0,
    /// Address error on a write.
    #[error("address error on write")]
    AddressErrorWrite = 0x100,
    /// Floating-point exception enabled in `FPSCR`.
    #[error("floating-point exception")]
    FpuException = 0x120,
    /// `TRAPA` software trap.
    #[error("unconditional trap")]
    Trapa = 0x160,
    /// Undecodable instruction.
    #[error("illegal instruction")]
    IllegalInstruction = 0x180,
    /// Undecodable instruction in a delay slot.
    #[error("illegal instruction in delay slot")]
    SlotIllegalInstruction = 0x1A0,
    /// User break.
    #[error("user break")]
    UserBreak = 0x1E0,
    /// Floating-point instruction while `SR.FD` is set.
    #[error("fpu disabled")]
    FpuDisabled = 0x800,
    /// Floating-point instruction in a delay slot while `SR.FD` is set.
    #[error("fpu disabled in delay slot")]
    SlotFpuDisabled = 0x820,
}

impl ExceptionKind {
    /// Returns the stable `EXPEVT` event code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts an `EXPEVT` event code back into an exception kind.
    #[must_use]
    pub const fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x000 => Some(Self::PowerOnReset),
            0x020 => Some(Self::ManualReset),
            0x040 => Some(Self::TlbMissRead),
            0x060 => Some(Self::TlbMissWrite),
            0x080 => Some(Self::InitialPageWrite),
            0x0A0 => Some(Self::TlbProtectionRead),
            0x0C0 => Some(Self::TlbProtectionWrite),
            0x0E0 => Some(Self::AddressErrorRead),
            0x100 => Some(Self::AddressErrorWrite),
            0x120 => Some(Self::FpuException),
            0x160 => Some(Self::Trapa),
            0x180 => Some(Self::IllegalInstruction),
            0x1A0 => Some(Self::SlotIllegalInstruction),
            0x1E0 => Some(Self::UserBreak),
            0x800 => Some(Self::FpuDisabled),
            0x820 => Some(Self::SlotFpuDisabled),
            _ => None,
        }
    }

    /// Returns the class of this exception kind.
    #[must_use]
    pub const fn class(self) -> ExceptionClass {
        match self {
            Self::PowerOnReset | Self::ManualReset => ExceptionClass::Reset,
            Self::TlbMissRead
            | Self::TlbMissWrite
            | Self::InitialPageWrite
            | Self::TlbProtectionRead
            | Self::TlbProtectionWrite => ExceptionClass::Tlb,
            Self::AddressErrorRead | Self::AddressErrorWrite => ExceptionClass::AddressError,
            Self::FpuException | Self::FpuDisabled | Self::SlotFpuDisabled => ExceptionClass::Fpu,
            Self::Trapa => ExceptionClass::Trap,
            Self::IllegalInstruction | Self::SlotIllegalInstruction => ExceptionClass::Instruction,
            Self::UserBreak => ExceptionClass::Debug,
        }
    }

    /// Returns `true` for exceptions raised by the floating-point unit or its
    /// enable bit.
    #[must_use]
    pub const fn is_fpu(self) -> bool {
        matches!(self.class(), ExceptionClass::Fpu)
    }

    /// TLB misses are vectored to `VBR + 0x400` instead of the general handler.
    #[must_use]
    pub const fn is_tlb_miss(self) -> bool {
        matches!(self, Self::TlbMissRead | Self::TlbMissWrite)
    }

    /// Maps a kind raised by a delay-slot instruction to its slot variant.
    #[must_use]
    pub const fn in_delay_slot(self) -> Self {
        match self {
            Self::IllegalInstruction => Self::SlotIllegalInstruction,
            Self::FpuDisabled => Self::SlotFpuDisabled,
            other => other,
        }
    }
}

/// A raised processor exception: faulting address plus kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("{kind} at pc {epc:#010x}")]
pub struct CpuException {
    /// Address of the instruction that raised the exception.
    pub epc: u32,
    /// Exception kind.
    pub kind: ExceptionKind,
}

impl CpuException {
    /// Creates an exception record.
    #[must_use]
    pub const fn new(epc: u32, kind: ExceptionKind) -> Self {
        Self { epc, kind }
    }
}

/// Conditions the dispatch loop cannot recover from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    /// The memory subsystem has nothing mapped at the fetch address.
    #[error("instruction fetch from unmapped address {addr:#010x}")]
    UnmappedFetch {
        /// Fetch address.
        addr: u32,
    },
    /// The system/interrupt update step failed.
    #[error("system update failed: {reason}")]
    SystemUpdate {
        /// Collaborator-provided description.
        reason: String,
    },
    /// Any other unexpected host-side failure.
    #[error("host failure: {reason}")]
    Host {
        /// Collaborator-provided description.
        reason: String,
    },
}

/// Outcome of a failed fetch or semantics dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecFault {
    /// Recoverable processor exception handled by the dispatcher.
    #[error(transparent)]
    Exception(#[from] CpuException),
    /// Unrecoverable condition that ends the dispatch loop.
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl ExecFault {
    /// Shorthand for raising a processor exception.
    #[must_use]
    pub const fn raise(epc: u32, kind: ExceptionKind) -> Self {
        Self::Exception(CpuException::new(epc, kind))
    }
}

/// Standard exception entry: saves `PC`/`SR`/`R15`, records the event code,
/// enters privileged mode with exceptions blocked and jumps to the vector.
pub fn enter_standard_exception(ctx: &mut ProcessorContext, exception: CpuException) {
    let regs = &mut ctx.regs;
    regs.set_spc(exception.epc);
    regs.set_ssr(regs.sr());
    regs.set_sgr(regs.gpr(GeneralRegister::R15));
    regs.set_expevt(u32::from(exception.kind.as_u16()));
    regs.set_sr_flag(SR_MD | SR_BL | SR_RB, true);

    let target = if exception.kind.class() == ExceptionClass::Reset {
        RESET_VECTOR
    } else if exception.kind.is_tlb_miss() {
        regs.vbr().wrapping_add(VECTOR_OFFSET_TLB_MISS)
    } else {
        regs.vbr().wrapping_add(VECTOR_OFFSET_GENERAL)
    };
    regs.set_pc(target);
}

#[cfg(test)]
mod tests {
    use super::{
        enter_standard_exception, CpuException, ExceptionClass, ExceptionKind, ExecFault,
        FatalError, VECTOR_OFFSET_GENERAL, VECTOR_OFFSET_TLB_MISS,
    };
    use crate::state::{GeneralRegister, ProcessorContext, RESET_VECTOR, SR_BL, SR_MD, SR_RB, SR_T};

    const ALL_CODES: [u16; 16] = [
        0x000, 0x020, 0x040, 0x060, 0x080, 0x0A0, 0x0C0, 0x0E0, 0x100, 0x120, 0x160, 0x180, 0x1A0,
        0x1E0, 0x800, 0x820,
    ];

    #[test]
    fn stable_code_roundtrip_is_bijective_for_defined_values() {
        for code in ALL_CODES {
            let kind = ExceptionKind::from_u16(code).expect("defined event code");
            assert_eq!(kind.as_u16(), code);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(ExceptionKind::from_u16(0x140).is_none());
        assert!(ExceptionKind::from_u16(0xFFFF).is_none());
    }

    #[test]
    fn class_mapping_matches_taxonomy() {
        assert_eq!(ExceptionKind::ManualReset.class(), ExceptionClass::Reset);
        assert_eq!(ExceptionKind::InitialPageWrite.class(), ExceptionClass::Tlb);
        assert_eq!(
            ExceptionKind::AddressErrorWrite.class(),
            ExceptionClass::AddressError
        );
        assert_eq!(ExceptionKind::FpuDisabled.class(), ExceptionClass::Fpu);
        assert_eq!(ExceptionKind::SlotFpuDisabled.class(), ExceptionClass::Fpu);
        assert_eq!(ExceptionKind::Trapa.class(), ExceptionClass::Trap);
        assert_eq!(
            ExceptionKind::SlotIllegalInstruction.class(),
            ExceptionClass::Instruction
        );
        assert_eq!(ExceptionKind::UserBreak.class(), ExceptionClass::Debug);
        assert!(ExceptionKind::FpuException.is_fpu());
        assert!(!ExceptionKind::Trapa.is_fpu());
    }

    #[test]
    fn delay_slot_mapping_only_touches_slot_sensitive_kinds() {
        assert_eq!(
            ExceptionKind::IllegalInstruction.in_delay_slot(),
            ExceptionKind::SlotIllegalInstruction
        );
        assert_eq!(
            ExceptionKind::FpuDisabled.in_delay_slot(),
            ExceptionKind::SlotFpuDisabled
        );
        assert_eq!(
            ExceptionKind::AddressErrorRead.in_delay_slot(),
            ExceptionKind::AddressErrorRead
        );
    }

    #[test]
    fn display_includes_kind_and_address() {
        let ex = CpuException::new(0x8C00_0010, ExceptionKind::FpuDisabled);
        assert_eq!(ex.to_string(), "fpu disabled at pc 0x8c000010");

        let fatal: ExecFault = FatalError::UnmappedFetch { addr: 0x1000 }.into();
        assert_eq!(
            fatal.to_string(),
            "instruction fetch from unmapped address 0x00001000"
        );
    }

    #[test]
    fn standard_entry_saves_state_and_vectors_general_handler() {
        let mut ctx = ProcessorContext::default();
        ctx.regs.set_vbr(0x8C00_0000);
        ctx.regs.set_sr(SR_T);
        ctx.regs.set_gpr(GeneralRegister::R15, 0x8CFF_FF00);
        ctx.set_pc(0x8C01_0002);

        enter_standard_exception(&mut ctx, CpuException::new(0x8C01_0000, ExceptionKind::Trapa));

        assert_eq!(ctx.regs.spc(), 0x8C01_0000);
        assert_eq!(ctx.regs.ssr(), SR_T);
        assert_eq!(ctx.regs.sgr(), 0x8CFF_FF00);
        assert_eq!(ctx.regs.expevt(), 0x160);
        assert!(ctx.regs.sr_flag_is_set(SR_MD | SR_BL | SR_RB));
        assert!(ctx.regs.sr_flag_is_set(SR_T));
        assert_eq!(ctx.pc(), 0x8C00_0000 + VECTOR_OFFSET_GENERAL);
    }

    #[test]
    fn standard_entry_vectors_tlb_miss_and_reset() {
        let mut ctx = ProcessorContext::default();
        ctx.regs.set_vbr(0x8C00_0000);

        enter_standard_exception(&mut ctx, CpuException::new(0, ExceptionKind::TlbMissWrite));
        assert_eq!(ctx.pc(), 0x8C00_0000 + VECTOR_OFFSET_TLB_MISS);

        enter_standard_exception(&mut ctx, CpuException::new(0, ExceptionKind::ManualReset));
        assert_eq!(ctx.pc(), RESET_VECTOR);
    }
}
