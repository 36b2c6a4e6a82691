//! Instruction-semantics seam between the execution core and the guest ISA.
//!
//! The per-opcode side effects are supplied by the embedding emulator. This
//! module defines the trait the core dispatches through, a table container
//! shaped like the usual opcode-indexed handler/descriptor pair, and the
//! delay-slot helper branch semantics call into.

use thiserror::Error;

use crate::api::SystemBus;
use crate::exception::{enter_standard_exception, CpuException, ExceptionKind, ExecFault};
use crate::state::ProcessorContext;
use crate::timing::INSTRUCTION_BYTES;

/// Number of distinct 16-bit opcode words.
pub const OPCODE_SPACE: usize = 1 << 16;

/// Instruction semantics and exception entry shared by every backend.
///
/// Implementations must not read `PC` expecting the address of the current
/// instruction: the dispatcher has already advanced it past the opcode.
pub trait InstructionSet {
    /// Returns `true` when `opcode` executes on the floating-point unit.
    fn is_floating_point(&self, opcode: u16) -> bool;

    /// Applies the side effects of `opcode` to the processor.
    ///
    /// # Errors
    ///
    /// Returns [`ExecFault::Exception`] for processor exceptions and
    /// [`ExecFault::Fatal`] for conditions the core cannot recover from.
    fn execute(
        &self,
        ctx: &mut ProcessorContext,
        bus: &mut dyn SystemBus,
        opcode: u16,
    ) -> Result<(), ExecFault>;

    /// Per-opcode cycle cost; `None` falls back to the configured flat cost.
    fn cycle_cost(&self, _opcode: u16) -> Option<u32> {
        None
    }

    /// Rewrites `PC` and status for a raised exception.
    fn enter_exception(&self, ctx: &mut ProcessorContext, exception: CpuException) {
        enter_standard_exception(ctx, exception);
    }
}

/// Executes the delay-slot instruction following a delayed branch.
///
/// Called from branch semantics while `PC` points at the slot. Advances `PC`
/// past the slot, rejects floating-point slot opcodes while `SR.FD` is set and
/// rewrites exceptions raised in the slot so they report the branch address
/// with their slot-specific kind. The caller sets the branch target after this
/// returns.
///
/// # Errors
///
/// Propagates the slot instruction's fault after slot adjustment.
pub fn execute_delay_slot(
    isa: &dyn InstructionSet,
    ctx: &mut ProcessorContext,
    bus: &mut dyn SystemBus,
) -> Result<(), ExecFault> {
    let addr = ctx.pc();
    let branch_addr = addr.wrapping_sub(INSTRUCTION_BYTES);
    ctx.set_pc(addr.wrapping_add(INSTRUCTION_BYTES));

    let result = match bus.read_opcode(addr) {
        Ok(opcode) if ctx.fpu_disabled() && isa.is_floating_point(opcode) => {
            Err(ExecFault::raise(addr, ExceptionKind::FpuDisabled))
        }
        Ok(opcode) => isa.execute(ctx, bus, opcode),
        Err(fault) => Err(fault),
    };

    result.map_err(|fault| match fault {
        ExecFault::Exception(ex) => {
            ExecFault::raise(branch_addr, ex.kind.in_delay_slot())
        }
        fatal @ ExecFault::Fatal(_) => fatal,
    })
}

/// Arguments handed to an [`OpHandler`].
pub struct OpContext<'a> {
    /// Processor state to mutate.
    pub ctx: &'a mut ProcessorContext,
    /// Memory and peripherals.
    pub bus: &'a mut dyn SystemBus,
    /// Instruction set the handler belongs to, for delay slots.
    pub isa: &'a dyn InstructionSet,
}

impl OpContext<'_> {
    /// Address of the instruction being executed.
    #[must_use]
    pub const fn current_pc(&self) -> u32 {
        self.ctx.pc().wrapping_sub(INSTRUCTION_BYTES)
    }

    /// Runs the delay slot at `PC`; see [`execute_delay_slot`].
    ///
    /// # Errors
    ///
    /// Propagates the slot instruction's fault.
    pub fn execute_delay_slot(&mut self) -> Result<(), ExecFault> {
        execute_delay_slot(self.isa, self.ctx, self.bus)
    }

    /// Builds an exception raised by the current instruction.
    #[must_use]
    pub const fn raise(&self, kind: ExceptionKind) -> ExecFault {
        ExecFault::raise(self.current_pc(), kind)
    }
}

/// Semantics function stored in an [`OpcodeTable`].
pub type OpHandler = fn(&mut OpContext<'_>, u16) -> Result<(), ExecFault>;

/// Static description of an opcode family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpcodeInfo {
    /// Mnemonic used in logs.
    pub name: &'static str,
    /// Executes on the floating-point unit.
    pub floating_point: bool,
    /// Per-opcode cost overriding the flat cost.
    pub cycles: Option<u32>,
}

impl OpcodeInfo {
    /// Describes an integer opcode with the flat cost.
    #[must_use]
    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            floating_point: false,
            cycles: None,
        }
    }

    /// Describes a floating-point opcode with the flat cost.
    #[must_use]
    pub const fn floating_point(name: &'static str) -> Self {
        Self {
            name,
            floating_point: true,
            cycles: None,
        }
    }

    /// Overrides the cycle cost.
    #[must_use]
    pub const fn with_cycles(self, cycles: u32) -> Self {
        Self {
            cycles: Some(cycles),
            ..self
        }
    }
}

const UNKNOWN_OPCODE: OpcodeInfo = OpcodeInfo::integer("unknown");

fn illegal_instruction(op: &mut OpContext<'_>, _opcode: u16) -> Result<(), ExecFault> {
    Err(op.raise(ExceptionKind::IllegalInstruction))
}

/// Error returned for malformed opcode pattern strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Patterns describe exactly sixteen bits.
    #[error("opcode pattern must have 16 bit positions, got {0}")]
    Length(usize),
    /// Only `0`, `1`, ASCII letters and `_` separators are accepted.
    #[error("invalid character {0:?} in opcode pattern")]
    InvalidCharacter(char),
}

/// Parses a pattern such as `"0111_nnnn_iiii_iiii"` into `(mask, value)`.
///
/// `0`/`1` are fixed bits, ASCII letters are operand fields and `_` is
/// ignored.
///
/// # Errors
///
/// Returns [`PatternError`] for wrong lengths or unknown characters.
pub fn parse_pattern(pattern: &str) -> Result<(u16, u16), PatternError> {
    let mut mask = 0_u16;
    let mut value = 0_u16;
    let mut bits = 0_usize;

    for ch in pattern.chars().filter(|ch| *ch != '_') {
        if bits == 16 {
            return Err(PatternError::Length(pattern.chars().filter(|c| *c != '_').count()));
        }
        mask <<= 1;
        value <<= 1;
        match ch {
            '0' => mask |= 1,
            '1' => {
                mask |= 1;
                value |= 1;
            }
            c if c.is_ascii_alphabetic() => {}
            other => return Err(PatternError::InvalidCharacter(other)),
        }
        bits += 1;
    }

    if bits == 16 {
        Ok((mask, value))
    } else {
        Err(PatternError::Length(bits))
    }
}

#[derive(Clone, Copy)]
struct TableEntry {
    info: OpcodeInfo,
    handler: OpHandler,
}

/// Opcode-indexed handler table with per-opcode descriptors.
///
/// Every opcode starts out raising [`ExceptionKind::IllegalInstruction`].
pub struct OpcodeTable {
    entries: Box<[TableEntry]>,
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpcodeTable {
    /// Creates a table where every opcode is illegal.
    #[must_use]
    pub fn new() -> Self {
        let entry = TableEntry {
            info: UNKNOWN_OPCODE,
            handler: illegal_instruction,
        };
        Self {
            entries: vec![entry; OPCODE_SPACE].into_boxed_slice(),
        }
    }

    /// Assigns `handler` to every opcode with `opcode & mask == value`.
    ///
    /// Later registrations override earlier ones. Returns the number of
    /// opcodes assigned.
    pub fn register(&mut self, mask: u16, value: u16, info: OpcodeInfo, handler: OpHandler) -> usize {
        let mut assigned = 0;
        for (opcode, entry) in (0_u16..=u16::MAX).zip(self.entries.iter_mut()) {
            if opcode & mask == value & mask {
                *entry = TableEntry { info, handler };
                assigned += 1;
            }
        }
        assigned
    }

    /// Registers a handler by bit pattern; see [`parse_pattern`].
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for malformed patterns; the table is
    /// unchanged.
    pub fn register_pattern(
        &mut self,
        pattern: &str,
        info: OpcodeInfo,
        handler: OpHandler,
    ) -> Result<usize, PatternError> {
        let (mask, value) = parse_pattern(pattern)?;
        Ok(self.register(mask, value, info, handler))
    }

    /// Builder-style [`Self::register_pattern`].
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for malformed patterns.
    pub fn with(
        mut self,
        pattern: &str,
        info: OpcodeInfo,
        handler: OpHandler,
    ) -> Result<Self, PatternError> {
        self.register_pattern(pattern, info, handler)?;
        Ok(self)
    }

    /// Returns the descriptor of `opcode`.
    #[must_use]
    pub fn info(&self, opcode: u16) -> OpcodeInfo {
        self.entries[usize::from(opcode)].info
    }
}

impl InstructionSet for OpcodeTable {
    fn is_floating_point(&self, opcode: u16) -> bool {
        self.info(opcode).floating_point
    }

    fn execute(
        &self,
        ctx: &mut ProcessorContext,
        bus: &mut dyn SystemBus,
        opcode: u16,
    ) -> Result<(), ExecFault> {
        let handler = self.entries[usize::from(opcode)].handler;
        let mut op = OpContext {
            ctx,
            bus,
            isa: self,
        };
        handler(&mut op, opcode)
    }

    fn cycle_cost(&self, opcode: u16) -> Option<u32> {
        self.info(opcode).cycles
    }
}
