//! Intermediate-representation payload carried by decoded blocks.
//!
//! The decoder and optimizer producing these operations live outside this
//! crate. Backends only read them, and only strategies that translate IR
//! consult them at all.

use crate::state::{GeneralRegister, ProcessorContext};

/// IR operation kinds emitted by the block decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum IrOpKind {
    Mov32,
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Not,
    Neg,
    Shl,
    Shr,
    Sar,
    ReadMem,
    WriteMem,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fsqrt,
    Jcond,
    Jdyn,
    Sync,
    /// Interpreter fallback for one guest opcode.
    Ifb,
}

impl IrOpKind {
    /// Returns `true` for operations on the floating-point unit.
    #[must_use]
    pub const fn is_floating_point(self) -> bool {
        matches!(
            self,
            Self::Fadd | Self::Fsub | Self::Fmul | Self::Fdiv | Self::Fsqrt
        )
    }
}

/// Operand of an IR operation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum IrParam {
    /// Unused operand slot.
    #[default]
    Null,
    /// General-purpose register.
    Reg(GeneralRegister),
    /// Floating-point register index.
    FloatReg(u8),
    /// Immediate value.
    Imm(u32),
}

impl IrParam {
    /// Returns `true` when the slot carries an operand.
    #[must_use]
    pub const fn is_some(self) -> bool {
        !matches!(self, Self::Null)
    }
}

/// One IR operation with up to one destination and two sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrOp {
    /// Operation kind.
    pub kind: IrOpKind,
    /// Destination operand.
    pub rd: IrParam,
    /// First source operand.
    pub rs1: IrParam,
    /// Second source operand.
    pub rs2: IrParam,
    /// Guest opcode this operation was decoded from (for `Ifb`).
    pub guest_opcode: u16,
}

impl IrOp {
    /// Creates an operation with every operand slot empty.
    #[must_use]
    pub const fn new(kind: IrOpKind) -> Self {
        Self {
            kind,
            rd: IrParam::Null,
            rs1: IrParam::Null,
            rs2: IrParam::Null,
            guest_opcode: 0,
        }
    }

    /// Creates an interpreter-fallback operation for a guest opcode.
    #[must_use]
    pub const fn fallback(guest_opcode: u16) -> Self {
        Self {
            guest_opcode,
            ..Self::new(IrOpKind::Ifb)
        }
    }

    /// Iterates the populated source operands.
    pub fn sources(&self) -> impl Iterator<Item = IrParam> {
        [self.rs1, self.rs2].into_iter().filter(|param| param.is_some())
    }
}

/// How a parameter is passed to a canonical implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalParamType {
    /// 32-bit integer argument.
    U32,
    /// 32-bit integer return value.
    U32Rv,
    /// Low half of a 64-bit return value.
    U64RvL,
    /// High half of a 64-bit return value.
    U64RvH,
    /// Single-precision argument.
    F32,
    /// Single-precision return value.
    F32Rv,
    /// Pointer argument.
    Ptr,
    /// The processor context itself.
    Context,
}

/// Canonical (non-inlined) implementation of an IR operation.
pub type CanonicalFn = fn(&mut ProcessorContext, &IrOp);
