/// Fixed cycle-cost forms charged by the interpreter-fallback core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleCostKind {
    /// Approximate flat cost of one interpreted instruction.
    Instruction,
    /// Pipeline drain penalty charged once per raised exception.
    ExceptionDrain,
    /// Budget replenished at every timeslice rollover.
    Timeslice,
}

/// Single source-of-truth cycle-cost table for the interpreter timing model.
pub const CYCLE_COST_TABLE: &[(CycleCostKind, u32)] = &[
    (CycleCostKind::Instruction, 1),
    (CycleCostKind::ExceptionDrain, 5),
    (CycleCostKind::Timeslice, 448),
];

/// Looks up the cycle cost for a cycle-cost kind.
#[must_use]
pub fn cycle_cost(kind: CycleCostKind) -> Option<u32> {
    CYCLE_COST_TABLE
        .iter()
        .find_map(|(entry_kind, cycles)| (*entry_kind == kind).then_some(*cycles))
}

/// Width in bytes of one guest opcode word.
pub const INSTRUCTION_BYTES: u32 = 2;
