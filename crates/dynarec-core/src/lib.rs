//! Backend contract and interpreter-fallback execution core for a dynamic
//! recompiler.

/// Cycle-cost table and instruction width.
pub mod timing;
pub use timing::{cycle_cost, CycleCostKind, CYCLE_COST_TABLE, INSTRUCTION_BYTES};

/// Processor context and register file.
pub mod state;
pub use state::{
    GeneralRegister, ProcessorContext, RegisterFile, FLOAT_REGISTER_COUNT, GENERAL_REGISTER_COUNT,
    RESET_VECTOR, SR_ACTIVE_MASK, SR_BL, SR_FD, SR_IMASK, SR_M, SR_MD, SR_Q, SR_RB,
    SR_RESET_VALUE, SR_S, SR_T,
};

/// Processor exception taxonomy and fatal error types.
pub mod exception;
pub use exception::{
    enter_standard_exception, CpuException, ExceptionClass, ExceptionKind, ExecFault, FatalError,
    VECTOR_OFFSET_GENERAL, VECTOR_OFFSET_TLB_MISS,
};

/// Append-only code arena.
pub mod code_buffer;
pub use code_buffer::{CodeBuffer, CodeBufferError, EntryPoint};

/// IR payload and canonical-call parameter types.
pub mod ir;
pub use ir::{CanonicalFn, CanonicalParamType, IrOp, IrOpKind, IrParam};

/// Block descriptors and compiled units.
pub mod block;
pub use block::{BlockDescriptor, CompiledUnit};

/// Host-facing configuration, bus trait and loop results.
pub mod api;
pub use api::{
    ConfigError, DynarecConfig, LoopError, LoopStats, SystemBus, DEFAULT_CODE_BUFFER_BYTES,
    DEFAULT_MILESTONE_INTERVAL, DEFAULT_UNIT_PLACEHOLDER_BYTES,
};

/// Instruction-semantics seam, opcode table and delay-slot helper.
pub mod isa;
pub use isa::{
    execute_delay_slot, parse_pattern, InstructionSet, OpContext, OpHandler, OpcodeInfo,
    OpcodeTable, PatternError, OPCODE_SPACE,
};

/// Exception dispatcher.
pub mod dispatch;
pub use dispatch::ExceptionDispatcher;

/// Backend contract, backend slot and the interpreter strategy.
pub mod backend;
pub use backend::interpreter::{InterpreterBackend, INTERPRETER_BACKEND_NAME};
pub use backend::{emit_canonical_call, Backend, BackendSlot, HostContext, SlotError};

/// Session driver.
pub mod driver;
pub use driver::Session;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tracing_subscriber as _;
