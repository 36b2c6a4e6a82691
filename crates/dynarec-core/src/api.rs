//! Host-facing contracts for embedding the execution core.

use thiserror::Error;

use crate::exception::{CpuException, ExecFault, FatalError};
use crate::state::ProcessorContext;
use crate::timing::{cycle_cost, CycleCostKind};

/// Default code buffer size allocated by the session driver (4 MiB).
pub const DEFAULT_CODE_BUFFER_BYTES: u32 = 4 * 1024 * 1024;

/// Default placeholder reserved per compiled unit by non-emitting strategies.
pub const DEFAULT_UNIT_PLACEHOLDER_BYTES: u32 = 4;

/// Default instruction interval between dispatch-loop progress events.
pub const DEFAULT_MILESTONE_INTERVAL: u64 = 2_000_000;

fn table_cycles(kind: CycleCostKind) -> i32 {
    cycle_cost(kind)
        .and_then(|cycles| i32::try_from(cycles).ok())
        .unwrap_or(1)
}

/// Session-wide configuration for a backend and its dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DynarecConfig {
    /// Budget added to the cycle counter at every timeslice rollover.
    pub timeslice_cycles: i32,
    /// Flat cost charged per instruction unless the instruction set reports
    /// its own.
    pub cycles_per_instruction: i32,
    /// Penalty charged once per raised processor exception.
    pub exception_drain_cycles: i32,
    /// Bytes reserved per compiled unit by strategies that emit no code.
    pub unit_placeholder_bytes: u32,
    /// Capacity of the code buffer the session allocates.
    pub code_buffer_bytes: u32,
    /// Forwarded to `compile`: compiled units must validate their source.
    pub smc_checks: bool,
    /// Forwarded to `compile`: strategies may optimize translated blocks.
    pub optimise: bool,
    /// Emit a progress event every this many instructions; `0` disables.
    pub milestone_interval: u64,
}

impl Default for DynarecConfig {
    fn default() -> Self {
        Self {
            timeslice_cycles: table_cycles(CycleCostKind::Timeslice),
            cycles_per_instruction: table_cycles(CycleCostKind::Instruction),
            exception_drain_cycles: table_cycles(CycleCostKind::ExceptionDrain),
            unit_placeholder_bytes: DEFAULT_UNIT_PLACEHOLDER_BYTES,
            code_buffer_bytes: DEFAULT_CODE_BUFFER_BYTES,
            smc_checks: false,
            optimise: true,
            milestone_interval: DEFAULT_MILESTONE_INTERVAL,
        }
    }
}

impl DynarecConfig {
    /// Checks the timing model and placeholder size for values the dispatch
    /// loop cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.timeslice_cycles <= 0 {
            return Err(ConfigError::NonPositiveTimeslice(self.timeslice_cycles));
        }
        if self.cycles_per_instruction <= 0 {
            return Err(ConfigError::NonPositiveCost {
                field: "cycles_per_instruction",
                value: self.cycles_per_instruction,
            });
        }
        if self.exception_drain_cycles <= 0 {
            return Err(ConfigError::NonPositiveCost {
                field: "exception_drain_cycles",
                value: self.exception_drain_cycles,
            });
        }
        if self.unit_placeholder_bytes == 0 {
            return Err(ConfigError::ZeroPlaceholder);
        }
        Ok(())
    }
}

/// Rejected configuration values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    /// Timeslice must replenish a positive budget.
    #[error("timeslice must be positive, got {0}")]
    NonPositiveTimeslice(i32),
    /// Every instruction and exception must consume budget, otherwise the
    /// timeslice never ends.
    #[error("{field} must be positive, got {value}")]
    NonPositiveCost {
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: i32,
    },
    /// Zero-sized units would alias each other's entry address.
    #[error("unit placeholder must reserve at least one byte")]
    ZeroPlaceholder,
}

/// Memory and peripheral collaborators the dispatch loop calls into.
pub trait SystemBus {
    /// Reads the 16-bit opcode word at a guest address.
    ///
    /// # Errors
    ///
    /// Returns [`ExecFault::Exception`] for guest-visible fetch faults
    /// (address errors, TLB misses) and [`ExecFault::Fatal`] when nothing
    /// backs the address.
    fn read_opcode(&mut self, addr: u32) -> Result<u16, ExecFault>;

    /// Services scheduled events and pending interrupts once per timeslice.
    ///
    /// May rewrite `PC`/`SR` to deliver an interrupt and may clear
    /// [`ProcessorContext::running`].
    ///
    /// # Errors
    ///
    /// Returns [`FatalError`] when the peripheral scheduler cannot continue.
    fn update_system(&mut self, ctx: &mut ProcessorContext) -> Result<(), FatalError>;
}

/// Counters collected over one `run_loop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LoopStats {
    /// Instructions that completed without raising.
    pub instructions: u64,
    /// Timeslice rollovers, equal to system-update calls.
    pub timeslices: u64,
    /// Processor exceptions handled by the dispatcher.
    pub exceptions: u64,
    /// Most recent handled exception.
    pub last_exception: Option<CpuException>,
}

impl LoopStats {
    /// Records a completed instruction.
    pub const fn record_instruction(&mut self) {
        self.instructions = self.instructions.saturating_add(1);
    }

    /// Records a timeslice rollover.
    pub const fn record_timeslice(&mut self) {
        self.timeslices = self.timeslices.saturating_add(1);
    }

    /// Records a handled exception.
    pub const fn record_exception(&mut self, exception: CpuException) {
        self.exceptions = self.exceptions.saturating_add(1);
        self.last_exception = Some(exception);
    }
}

/// Ways a dispatch loop can end other than a normal halt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    /// The backend was asked to run before `initialize`.
    #[error("backend used before initialize")]
    Unbound,
    /// An unrecoverable condition ended the loop; `running` was forced false.
    #[error("dispatch loop aborted: {cause}")]
    Aborted {
        /// Condition that ended the loop.
        cause: FatalError,
        /// Counters collected up to the abort.
        stats: LoopStats,
    },
}
