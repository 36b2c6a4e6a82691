//! Processor context shared between the driver and the active backend.

/// Register file types and `SR` bit layout.
pub mod registers;

pub use registers::{
    GeneralRegister, RegisterFile, FLOAT_REGISTER_COUNT, GENERAL_REGISTER_COUNT, SR_ACTIVE_MASK,
    SR_BL, SR_FD, SR_IMASK, SR_M, SR_MD, SR_Q, SR_RB, SR_RESET_VALUE, SR_S, SR_T,
};

/// Guest address the core resumes at after power-on or manual reset.
pub const RESET_VECTOR: u32 = 0xA000_0000;

/// Mutable state of one emulated processor.
///
/// Owned by the driver and lent to the active backend for each call. The
/// cycle counter is signed: the dispatch loop runs a timeslice until it drops
/// to zero or below.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProcessorContext {
    /// Architectural register file.
    pub regs: RegisterFile,
    /// Remaining cycle budget of the current timeslice.
    pub cycle_counter: i32,
    /// Cleared by halt instructions or host requests to end the dispatch loop.
    pub running: bool,
}

impl ProcessorContext {
    /// Creates a context positioned at the reset vector with the given budget.
    #[must_use]
    pub fn with_budget(cycle_counter: i32) -> Self {
        let mut ctx = Self::default();
        ctx.reset();
        ctx.cycle_counter = cycle_counter;
        ctx
    }

    /// Reads the program counter.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.regs.pc()
    }

    /// Writes the program counter.
    pub const fn set_pc(&mut self, value: u32) {
        self.regs.set_pc(value);
    }

    /// Returns `true` when `SR.FD` disables floating-point instructions.
    #[must_use]
    pub const fn fpu_disabled(&self) -> bool {
        self.regs.sr_flag_is_set(SR_FD)
    }

    /// Applies reset semantics: registers cleared, `SR` privileged with
    /// exceptions blocked, `PC` at [`RESET_VECTOR`].
    ///
    /// The cycle counter and running flag are left to the driver.
    pub fn reset(&mut self) {
        self.regs = RegisterFile::default();
        self.regs.set_sr(SR_RESET_VALUE);
        self.regs.set_pc(RESET_VECTOR);
    }
}
