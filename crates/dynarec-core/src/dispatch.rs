//! Exception dispatcher: the second state of the dispatch loop.

use crate::api::LoopStats;
use crate::exception::CpuException;
use crate::isa::InstructionSet;
use crate::state::ProcessorContext;

/// Converts raised processor exceptions into exception entry plus a cycle
/// penalty, then hands control back to normal dispatch.
///
/// The dispatcher never retries the faulting instruction and never halts the
/// processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionDispatcher {
    drain_cycles: i32,
}

impl ExceptionDispatcher {
    /// Creates a dispatcher charging `drain_cycles` per exception.
    #[must_use]
    pub const fn new(drain_cycles: i32) -> Self {
        Self { drain_cycles }
    }

    /// Cycles charged per handled exception.
    #[must_use]
    pub const fn drain_cycles(&self) -> i32 {
        self.drain_cycles
    }

    /// Enters the exception and charges the drain penalty exactly once.
    pub fn dispatch(
        &self,
        isa: &dyn InstructionSet,
        ctx: &mut ProcessorContext,
        exception: CpuException,
        stats: &mut LoopStats,
    ) {
        isa.enter_exception(ctx, exception);
        ctx.cycle_counter = ctx.cycle_counter.saturating_sub(self.drain_cycles);
        stats.record_exception(exception);

        tracing::trace!(
            kind = %exception.kind,
            cycle_counter = ctx.cycle_counter,
            "exception at {:#010x} entered handler at {:#010x}",
            exception.epc,
            ctx.pc()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::ExceptionDispatcher;
    use crate::{
        CpuException, ExceptionKind, ExecFault, InstructionSet, LoopStats, ProcessorContext,
        SystemBus,
    };

    struct FixedVector;

    impl InstructionSet for FixedVector {
        fn is_floating_point(&self, _opcode: u16) -> bool {
            false
        }

        fn execute(
            &self,
            _ctx: &mut ProcessorContext,
            _bus: &mut dyn SystemBus,
            _opcode: u16,
        ) -> Result<(), ExecFault> {
            Ok(())
        }

        fn enter_exception(&self, ctx: &mut ProcessorContext, exception: CpuException) {
            ctx.set_pc(0x600 + u32::from(exception.kind.as_u16()));
        }
    }

    #[test]
    fn dispatch_enters_exception_and_charges_drain_once() {
        let dispatcher = ExceptionDispatcher::new(5);
        let mut ctx = ProcessorContext::with_budget(20);
        let mut stats = LoopStats::default();
        let exception = CpuException::new(0x8C00_0000, ExceptionKind::Trapa);

        dispatcher.dispatch(&FixedVector, &mut ctx, exception, &mut stats);

        assert_eq!(ctx.pc(), 0x760);
        assert_eq!(ctx.cycle_counter, 15);
        assert_eq!(stats.exceptions, 1);
        assert_eq!(stats.last_exception, Some(exception));
    }

    #[test]
    fn drain_can_push_budget_below_zero() {
        let dispatcher = ExceptionDispatcher::new(5);
        let mut ctx = ProcessorContext::with_budget(2);
        let mut stats = LoopStats::default();

        dispatcher.dispatch(
            &FixedVector,
            &mut ctx,
            CpuException::new(0, ExceptionKind::UserBreak),
            &mut stats,
        );

        assert_eq!(ctx.cycle_counter, -3);
    }

    #[test]
    fn dispatch_leaves_running_flag_alone() {
        let dispatcher = ExceptionDispatcher::new(0);
        let mut ctx = ProcessorContext::with_budget(1);
        ctx.running = true;
        let mut stats = LoopStats::default();

        dispatcher.dispatch(
            &FixedVector,
            &mut ctx,
            CpuException::new(0, ExceptionKind::IllegalInstruction),
            &mut stats,
        );

        assert!(ctx.running);
        assert_eq!(ctx.cycle_counter, 1);
    }
}
