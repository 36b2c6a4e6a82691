//! Block descriptors handed to `compile` and the units it produces.

use crate::code_buffer::EntryPoint;
use crate::ir::IrOp;
use crate::timing::INSTRUCTION_BYTES;

/// A decoded basic block awaiting compilation.
///
/// Produced by the external decoder. Backends write only [`Self::code`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockDescriptor {
    /// Guest address of the first instruction.
    pub addr: u32,
    /// Number of guest opcodes in the block.
    pub opcode_count: u32,
    /// Decoded intermediate representation.
    pub ir: Vec<IrOp>,
    /// Entry reference written by `compile`; `None` until compiled or when
    /// compilation was skipped.
    pub code: Option<EntryPoint>,
}

impl BlockDescriptor {
    /// Creates an empty, uncompiled descriptor at `addr`.
    #[must_use]
    pub const fn new(addr: u32) -> Self {
        Self {
            addr,
            opcode_count: 0,
            ir: Vec::new(),
            code: None,
        }
    }

    /// Size in bytes of the guest code the block covers.
    #[must_use]
    pub const fn guest_len(&self) -> u32 {
        self.opcode_count.saturating_mul(INSTRUCTION_BYTES)
    }

    /// Returns `true` once a backend has written a valid entry reference.
    #[must_use]
    pub const fn is_compiled(&self) -> bool {
        self.code.is_some()
    }
}

/// Result of compiling one basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompiledUnit {
    /// Entry reference inside the code buffer.
    pub entry: EntryPoint,
    /// Guest address the unit was compiled from.
    pub guest_addr: u32,
    /// Bytes reserved in the code buffer.
    pub size: u32,
}

impl CompiledUnit {
    /// Addressable identity of the unit, used for registry lookups.
    #[must_use]
    pub const fn identity(&self) -> u32 {
        self.entry.offset()
    }

    /// Returns `true` when the two units' reserved regions overlap.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        let a_start = self.entry.offset();
        let b_start = other.entry.offset();
        self.entry.generation() == other.entry.generation()
            && a_start < b_start.saturating_add(other.size)
            && b_start < a_start.saturating_add(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockDescriptor, CompiledUnit};
    use crate::CodeBuffer;

    #[test]
    fn new_descriptor_is_uncompiled() {
        let block = BlockDescriptor::new(0x8C01_0000);
        assert!(!block.is_compiled());
        assert_eq!(block.guest_len(), 0);
    }

    #[test]
    fn guest_len_counts_two_bytes_per_opcode() {
        let block = BlockDescriptor {
            opcode_count: 7,
            ..BlockDescriptor::new(0)
        };
        assert_eq!(block.guest_len(), 14);
    }

    #[test]
    fn adjacent_units_do_not_overlap() {
        let mut buffer = CodeBuffer::new(16);
        let a = CompiledUnit {
            entry: buffer.allocate(4).expect("space"),
            guest_addr: 0,
            size: 4,
        };
        let b = CompiledUnit {
            entry: buffer.allocate(4).expect("space"),
            guest_addr: 2,
            size: 4,
        };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a));
        assert_ne!(a.identity(), b.identity());
    }
}
