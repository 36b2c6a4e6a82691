//! Interpreter-fallback strategy.
//!
//! Satisfies the backend contract without generating host code: `compile`
//! only reserves a placeholder so every block gets a distinct entry, and
//! `run_loop` fetches and dispatches one guest opcode at a time through the
//! shared [`InstructionSet`].

use std::sync::Arc;

use crate::api::{DynarecConfig, LoopError, LoopStats, SystemBus};
use crate::backend::{Backend, HostContext};
use crate::block::{BlockDescriptor, CompiledUnit};
use crate::code_buffer::CodeBuffer;
use crate::dispatch::ExceptionDispatcher;
use crate::exception::{ExceptionKind, ExecFault, FatalError};
use crate::ir::{CanonicalFn, CanonicalParamType, IrOp, IrParam};
use crate::isa::InstructionSet;
use crate::state::ProcessorContext;
use crate::timing::INSTRUCTION_BYTES;

/// Name reported by [`InterpreterBackend`].
pub const INTERPRETER_BACKEND_NAME: &str = "interpreter";

const LOUD_LOOP_ENTRIES: u64 = 5;
const LOOP_ENTRY_LOG_STRIDE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    buffer_id: u64,
}

/// Backend that executes guest code one opcode at a time.
pub struct InterpreterBackend {
    isa: Arc<dyn InstructionSet>,
    timeslice_cycles: i32,
    cycles_per_instruction: i32,
    unit_placeholder_bytes: u32,
    milestone_interval: u64,
    dispatcher: ExceptionDispatcher,
    binding: Option<Binding>,
    loop_entries: u64,
}

impl InterpreterBackend {
    /// Creates an unbound interpreter delegating semantics to `isa`.
    #[must_use]
    pub fn new(isa: Arc<dyn InstructionSet>, config: &DynarecConfig) -> Self {
        Self {
            isa,
            timeslice_cycles: config.timeslice_cycles,
            cycles_per_instruction: config.cycles_per_instruction.max(1),
            unit_placeholder_bytes: config.unit_placeholder_bytes,
            milestone_interval: config.milestone_interval,
            dispatcher: ExceptionDispatcher::new(config.exception_drain_cycles.max(1)),
            binding: None,
            loop_entries: 0,
        }
    }

    /// Shared instruction semantics.
    #[must_use]
    pub const fn isa(&self) -> &Arc<dyn InstructionSet> {
        &self.isa
    }

    /// Returns `true` once `initialize` has been called.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Number of `run_loop` entries since creation.
    #[must_use]
    pub const fn loop_entries(&self) -> u64 {
        self.loop_entries
    }

    /// Never zero, so every timeslice reaches its rollover.
    fn instruction_cost(&self, opcode: u16) -> i32 {
        match self.isa.cycle_cost(opcode) {
            Some(0) | None => self.cycles_per_instruction,
            Some(cycles) => i32::try_from(cycles).unwrap_or(i32::MAX),
        }
    }

    /// Fetches, decodes and executes the opcode at `PC`; returns its cost.
    fn step(&self, ctx: &mut ProcessorContext, bus: &mut dyn SystemBus) -> Result<i32, ExecFault> {
        let addr = ctx.pc();
        let opcode = bus.read_opcode(addr)?;
        ctx.set_pc(addr.wrapping_add(INSTRUCTION_BYTES));

        if ctx.fpu_disabled() && self.isa.is_floating_point(opcode) {
            return Err(ExecFault::raise(addr, ExceptionKind::FpuDisabled));
        }

        self.isa.execute(ctx, bus, opcode)?;
        Ok(self.instruction_cost(opcode))
    }

    /// Runs instructions until the budget is exhausted. At least one
    /// instruction executes before the budget is checked.
    fn run_timeslice(
        &self,
        ctx: &mut ProcessorContext,
        bus: &mut dyn SystemBus,
        stats: &mut LoopStats,
    ) -> Result<(), ExecFault> {
        loop {
            let cost = self.step(ctx, bus)?;
            ctx.cycle_counter = ctx.cycle_counter.saturating_sub(cost);
            stats.record_instruction();

            if self.milestone_interval != 0 && stats.instructions % self.milestone_interval == 0 {
                tracing::trace!(
                    instructions = stats.instructions,
                    "dispatch loop milestone at pc {:#010x}",
                    ctx.pc()
                );
            }

            if ctx.cycle_counter <= 0 {
                return Ok(());
            }
        }
    }

    fn dispatch(
        &self,
        ctx: &mut ProcessorContext,
        bus: &mut dyn SystemBus,
        stats: &mut LoopStats,
    ) -> Result<(), FatalError> {
        while ctx.running {
            match self.run_timeslice(ctx, bus, stats) {
                Ok(()) => {
                    ctx.cycle_counter = ctx.cycle_counter.saturating_add(self.timeslice_cycles);
                    stats.record_timeslice();
                    bus.update_system(ctx)?;
                }
                Err(ExecFault::Exception(exception)) => {
                    self.dispatcher.dispatch(&*self.isa, ctx, exception, stats);
                }
                Err(ExecFault::Fatal(cause)) => return Err(cause),
            }
        }
        Ok(())
    }
}

impl Backend for InterpreterBackend {
    fn name(&self) -> &'static str {
        INTERPRETER_BACKEND_NAME
    }

    fn initialize(&mut self, ctx: &ProcessorContext, buffer: &CodeBuffer) {
        self.binding = Some(Binding {
            buffer_id: buffer.id(),
        });
        tracing::info!(
            backend = INTERPRETER_BACKEND_NAME,
            buffer_id = buffer.id(),
            buffer_capacity = buffer.capacity(),
            "backend bound, processor at {:#010x}",
            ctx.pc()
        );
    }

    fn compile(
        &mut self,
        buffer: &mut CodeBuffer,
        block: &mut BlockDescriptor,
        _smc_checks: bool,
        _optimise: bool,
    ) -> Option<CompiledUnit> {
        block.code = None;

        let Some(binding) = self.binding else {
            tracing::error!("compile of block {:#010x} on unbound backend", block.addr);
            return None;
        };
        if binding.buffer_id != buffer.id() {
            tracing::error!(
                bound = binding.buffer_id,
                given = buffer.id(),
                "compile called with a code buffer other than the bound one"
            );
            return None;
        }

        let size = self.unit_placeholder_bytes;
        match buffer.allocate(size) {
            Ok(entry) => {
                block.code = Some(entry);
                Some(CompiledUnit {
                    entry,
                    guest_addr: block.addr,
                    size,
                })
            }
            Err(err) => {
                tracing::debug!(%err, "skipping block {:#010x}", block.addr);
                None
            }
        }
    }

    fn run_loop(
        &mut self,
        ctx: &mut ProcessorContext,
        bus: &mut dyn SystemBus,
    ) -> Result<LoopStats, LoopError> {
        if self.binding.is_none() {
            tracing::error!("run_loop on unbound backend");
            return Err(LoopError::Unbound);
        }

        self.loop_entries = self.loop_entries.saturating_add(1);
        if self.loop_entries <= LOUD_LOOP_ENTRIES || self.loop_entries % LOOP_ENTRY_LOG_STRIDE == 0 {
            tracing::debug!(
                entry = self.loop_entries,
                cycle_counter = ctx.cycle_counter,
                "entering dispatch loop at {:#010x}",
                ctx.pc()
            );
        }

        let mut stats = LoopStats::default();
        match self.dispatch(ctx, bus, &mut stats) {
            Ok(()) => {
                tracing::debug!(
                    instructions = stats.instructions,
                    timeslices = stats.timeslices,
                    exceptions = stats.exceptions,
                    "dispatch loop halted at {:#010x}",
                    ctx.pc()
                );
                Ok(stats)
            }
            Err(cause) => {
                ctx.running = false;
                tracing::error!(
                    %cause,
                    instructions = stats.instructions,
                    "abnormal exit from dispatch loop at {:#010x}",
                    ctx.pc()
                );
                Err(LoopError::Aborted { cause, stats })
            }
        }
    }

    fn handle_fault(&mut self, host: &mut HostContext) {
        tracing::trace!("ignoring host fault at {:#x}", host.pc);
    }

    fn rewrite_fault(&mut self, _host: &mut HostContext, _fault_address: usize) -> bool {
        false
    }

    fn on_buffer_reset(&mut self) {
        tracing::debug!(backend = INTERPRETER_BACKEND_NAME, "code buffer reset");
    }

    fn canon_start(&mut self, _op: &IrOp) {}

    fn canon_param(&mut self, _op: &IrOp, _param: IrParam, _ty: CanonicalParamType) {}

    fn canon_call(&mut self, _op: &IrOp, _function: CanonicalFn) {}

    fn canon_finish(&mut self, _op: &IrOp) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::InterpreterBackend;
    use crate::isa::{OpContext, OpcodeInfo, OpcodeTable};
    use crate::{
        Backend, BlockDescriptor, CodeBuffer, DynarecConfig, ExecFault, FatalError, HostContext,
        LoopError, ProcessorContext, SystemBus,
    };

    struct Flat(u16);

    impl SystemBus for Flat {
        fn read_opcode(&mut self, _addr: u32) -> Result<u16, ExecFault> {
            Ok(self.0)
        }

        fn update_system(&mut self, ctx: &mut ProcessorContext) -> Result<(), FatalError> {
            ctx.running = false;
            Ok(())
        }
    }

    fn nop(_op: &mut OpContext<'_>, _opcode: u16) -> Result<(), ExecFault> {
        Ok(())
    }

    fn backend(config: &DynarecConfig) -> InterpreterBackend {
        let mut table = OpcodeTable::new();
        table.register(0xFFFF, 0x0009, OpcodeInfo::integer("nop"), nop);
        table.register(0xFFFF, 0x000B, OpcodeInfo::integer("slow").with_cycles(3), nop);
        table.register(0xFFFF, 0x0019, OpcodeInfo::integer("free").with_cycles(0), nop);
        table.register(0xFFFF, 0x0029, OpcodeInfo::integer("huge").with_cycles(u32::MAX), nop);
        InterpreterBackend::new(Arc::new(table), config)
    }

    #[test]
    fn unbound_backend_refuses_to_run_or_compile() {
        let config = DynarecConfig::default();
        let mut interp = backend(&config);
        let mut ctx = ProcessorContext::with_budget(10);
        ctx.running = true;
        let snapshot = ctx.clone();
        let mut buffer = CodeBuffer::new(16);
        let mut block = BlockDescriptor::new(0x100);

        assert_eq!(interp.run_loop(&mut ctx, &mut Flat(0x0009)), Err(LoopError::Unbound));
        assert_eq!(ctx, snapshot);
        assert!(interp.compile(&mut buffer, &mut block, false, true).is_none());
        assert_eq!(buffer.cursor(), 0);
        assert!(!block.is_compiled());
    }

    #[rstest]
    #[case::smaller(16)]
    #[case::same_capacity(64)]
    fn compile_rejects_foreign_buffer(#[case] other_capacity: u32) {
        let config = DynarecConfig::default();
        let mut interp = backend(&config);
        let ctx = ProcessorContext::default();
        let mut bound = CodeBuffer::new(64);
        interp.initialize(&ctx, &bound);

        let mut other = CodeBuffer::new(other_capacity);
        let mut block = BlockDescriptor::new(0);

        assert!(interp.compile(&mut other, &mut block, false, false).is_none());
        assert_eq!(other.cursor(), 0);
        assert!(!block.is_compiled());

        assert!(interp.compile(&mut bound, &mut block, false, false).is_some());
        assert_eq!(bound.cursor(), 4);
    }

    #[rstest]
    #[case(0x0009, 3, 100)]
    #[case(0x000B, 1, 100)]
    #[case::zero_cost_charges_flat_cost(0x0019, 3, 100)]
    #[case::oversized_cost_saturates(0x0029, 1, 3 - i32::MAX + 100)]
    fn per_opcode_cost_overrides_flat_cost(
        #[case] opcode: u16,
        #[case] expected_instructions: u64,
        #[case] expected_counter: i32,
    ) {
        let config = DynarecConfig {
            timeslice_cycles: 100,
            ..DynarecConfig::default()
        };
        let mut interp = backend(&config);
        let mut ctx = ProcessorContext::with_budget(3);
        ctx.running = true;
        interp.initialize(&ctx, &CodeBuffer::new(16));

        let stats = interp.run_loop(&mut ctx, &mut Flat(opcode)).expect("halts");

        assert_eq!(stats.instructions, expected_instructions);
        assert_eq!(stats.timeslices, 1);
        assert_eq!(ctx.cycle_counter, expected_counter);
    }

    #[test]
    fn loop_entries_are_counted() {
        let config = DynarecConfig::default();
        let mut interp = backend(&config);
        let mut ctx = ProcessorContext::with_budget(1);
        interp.initialize(&ctx, &CodeBuffer::new(16));

        for _ in 0..12 {
            ctx.running = true;
            interp.run_loop(&mut ctx, &mut Flat(0x0009)).expect("halts");
        }

        assert_eq!(interp.loop_entries(), 12);
    }

    #[test]
    fn fault_hooks_decline() {
        let config = DynarecConfig::default();
        let mut interp = backend(&config);
        let mut host = HostContext { pc: 0x1000, sp: 0x2000 };

        interp.handle_fault(&mut host);
        assert!(!interp.rewrite_fault(&mut host, 0xdead));
        assert_eq!(host, HostContext { pc: 0x1000, sp: 0x2000 });
    }
}
