//! Pluggable compilation/execution strategies and the slot that holds the
//! selected one.

/// Interpreter-fallback strategy.
pub mod interpreter;

use std::fmt;

use thiserror::Error;

use crate::api::{LoopError, LoopStats, SystemBus};
use crate::block::{BlockDescriptor, CompiledUnit};
use crate::code_buffer::CodeBuffer;
use crate::ir::{CanonicalFn, CanonicalParamType, IrOp, IrParam};
use crate::state::ProcessorContext;

/// Host register state captured when a memory access in generated code
/// faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HostContext {
    /// Host program counter at the faulting access.
    pub pc: usize,
    /// Host stack pointer at the faulting access.
    pub sp: usize,
}

/// Contract every compilation/execution strategy implements.
///
/// The driver serializes every call: `compile`, buffer resets and `run_loop`
/// never overlap. Contract violations are logged and ignored, never panics.
pub trait Backend {
    /// Short name used in logs and slot errors.
    fn name(&self) -> &'static str;

    /// Binds the backend to the session's context and code buffer.
    fn initialize(&mut self, ctx: &ProcessorContext, buffer: &CodeBuffer);

    /// Compiles `block`, writing its entry reference into `block.code`.
    ///
    /// Returns `None` and leaves `block.code` unset when the block is
    /// skipped, for example because the buffer is full.
    fn compile(
        &mut self,
        buffer: &mut CodeBuffer,
        block: &mut BlockDescriptor,
        smc_checks: bool,
        optimise: bool,
    ) -> Option<CompiledUnit>;

    /// Runs the processor until it halts.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Unbound`] before `initialize` and
    /// [`LoopError::Aborted`] after an abnormal exit, in which case
    /// `ctx.running` is `false`.
    fn run_loop(
        &mut self,
        ctx: &mut ProcessorContext,
        bus: &mut dyn SystemBus,
    ) -> Result<LoopStats, LoopError>;

    /// Handles a host fault raised by generated code.
    fn handle_fault(&mut self, host: &mut HostContext);

    /// Attempts to patch the faulting access at `fault_address`. Returns
    /// `true` when the host context was rewritten and execution may resume.
    fn rewrite_fault(&mut self, host: &mut HostContext, fault_address: usize) -> bool;

    /// Drops side caches tied to the code buffer after it was reset.
    fn on_buffer_reset(&mut self);

    /// Begins emission of a canonical call for `op`.
    fn canon_start(&mut self, op: &IrOp);

    /// Emits one parameter of the pending canonical call.
    fn canon_param(&mut self, op: &IrOp, param: IrParam, ty: CanonicalParamType);

    /// Emits the call to the canonical implementation.
    fn canon_call(&mut self, op: &IrOp, function: CanonicalFn);

    /// Completes the pending canonical call.
    fn canon_finish(&mut self, op: &IrOp);
}

/// Drives the canonical-call protocol: start, each parameter in order, call,
/// finish.
pub fn emit_canonical_call(
    backend: &mut dyn Backend,
    op: &IrOp,
    params: &[(IrParam, CanonicalParamType)],
    function: CanonicalFn,
) {
    backend.canon_start(op);
    for &(param, ty) in params {
        backend.canon_param(op, param, ty);
    }
    backend.canon_call(op, function);
    backend.canon_finish(op);
}

/// Error returned when a backend cannot be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SlotError {
    /// A backend was already selected for this session.
    #[error("backend {active} already selected, refusing {rejected}")]
    AlreadySelected {
        /// Name of the installed backend.
        active: &'static str,
        /// Name of the backend that was refused.
        rejected: &'static str,
    },
}

/// Holds the single backend selected for a session.
#[derive(Default)]
pub struct BackendSlot {
    active: Option<Box<dyn Backend>>,
}

impl fmt::Debug for BackendSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSlot")
            .field("active", &self.name())
            .finish()
    }
}

impl BackendSlot {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Selects `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::AlreadySelected`] and drops `backend` when the
    /// slot is occupied.
    pub fn install(&mut self, backend: Box<dyn Backend>) -> Result<(), SlotError> {
        if let Some(active) = &self.active {
            return Err(SlotError::AlreadySelected {
                active: active.name(),
                rejected: backend.name(),
            });
        }
        tracing::debug!(backend = backend.name(), "backend selected");
        self.active = Some(backend);
        Ok(())
    }

    /// Selects the backend built by `make` only when the slot is empty.
    /// Returns `true` when it was installed.
    pub fn install_if_empty(&mut self, make: impl FnOnce() -> Box<dyn Backend>) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.install(make()).is_ok()
    }

    /// Returns `true` once a backend is installed.
    #[must_use]
    pub const fn is_selected(&self) -> bool {
        self.active.is_some()
    }

    /// Name of the installed backend.
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        self.active.as_ref().map(|backend| backend.name())
    }

    /// Borrows the installed backend.
    #[must_use]
    pub fn active(&self) -> Option<&(dyn Backend + 'static)> {
        self.active.as_deref()
    }

    /// Mutably borrows the installed backend.
    #[must_use]
    pub fn active_mut(&mut self) -> Option<&mut (dyn Backend + 'static)> {
        self.active.as_deref_mut()
    }

    /// Removes and returns the installed backend, leaving the slot empty.
    pub fn teardown(&mut self) -> Option<Box<dyn Backend>> {
        let backend = self.active.take();
        if let Some(backend) = &backend {
            tracing::debug!(backend = backend.name(), "backend released");
        }
        backend
    }
}

#[cfg(test)]
mod tests {
    use super::{emit_canonical_call, Backend, BackendSlot, HostContext, SlotError};
    use crate::{
        BlockDescriptor, CanonicalParamType, CodeBuffer, CompiledUnit, IrOp, IrOpKind, IrParam,
        LoopError, LoopStats, ProcessorContext, SystemBus,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Start,
        Param(CanonicalParamType),
        Call,
        Finish,
    }

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        calls: Vec<Call>,
    }

    impl Backend for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn initialize(&mut self, _ctx: &ProcessorContext, _buffer: &CodeBuffer) {}

        fn compile(
            &mut self,
            _buffer: &mut CodeBuffer,
            _block: &mut BlockDescriptor,
            _smc_checks: bool,
            _optimise: bool,
        ) -> Option<CompiledUnit> {
            None
        }

        fn run_loop(
            &mut self,
            _ctx: &mut ProcessorContext,
            _bus: &mut dyn SystemBus,
        ) -> Result<LoopStats, LoopError> {
            Err(LoopError::Unbound)
        }

        fn handle_fault(&mut self, _host: &mut HostContext) {}

        fn rewrite_fault(&mut self, _host: &mut HostContext, _fault_address: usize) -> bool {
            false
        }

        fn on_buffer_reset(&mut self) {}

        fn canon_start(&mut self, _op: &IrOp) {
            self.calls.push(Call::Start);
        }

        fn canon_param(&mut self, _op: &IrOp, _param: IrParam, ty: CanonicalParamType) {
            self.calls.push(Call::Param(ty));
        }

        fn canon_call(&mut self, _op: &IrOp, _function: crate::CanonicalFn) {
            self.calls.push(Call::Call);
        }

        fn canon_finish(&mut self, _op: &IrOp) {
            self.calls.push(Call::Finish);
        }
    }

    fn recorder(name: &'static str) -> Box<dyn Backend> {
        Box::new(Recorder {
            name,
            calls: Vec::new(),
        })
    }

    fn noop(_ctx: &mut ProcessorContext, _op: &IrOp) {}

    #[test]
    fn canonical_call_protocol_order() {
        let mut backend = Recorder::default();
        let op = IrOp::new(IrOpKind::Fsqrt);

        emit_canonical_call(
            &mut backend,
            &op,
            &[
                (IrParam::FloatReg(1), CanonicalParamType::F32),
                (IrParam::FloatReg(0), CanonicalParamType::F32Rv),
            ],
            noop,
        );

        assert_eq!(
            backend.calls,
            vec![
                Call::Start,
                Call::Param(CanonicalParamType::F32),
                Call::Param(CanonicalParamType::F32Rv),
                Call::Call,
                Call::Finish,
            ]
        );
    }

    #[test]
    fn slot_accepts_exactly_one_backend() {
        let mut slot = BackendSlot::new();
        assert!(!slot.is_selected());

        slot.install(recorder("first")).expect("empty slot");
        let err = slot.install(recorder("second")).expect_err("occupied slot");

        assert_eq!(
            err,
            SlotError::AlreadySelected {
                active: "first",
                rejected: "second",
            }
        );
        assert_eq!(slot.name(), Some("first"));
    }

    #[test]
    fn install_if_empty_defers_to_existing_backend() {
        let mut slot = BackendSlot::new();
        assert!(slot.install_if_empty(|| recorder("fallback")));
        assert!(!slot.install_if_empty(|| recorder("late")));
        assert_eq!(slot.active().map(Backend::name), Some("fallback"));
    }

    #[test]
    fn teardown_empties_slot() {
        let mut slot = BackendSlot::new();
        slot.install(recorder("only")).expect("empty slot");

        let backend = slot.teardown().expect("installed backend");

        assert_eq!(backend.name(), "only");
        assert!(!slot.is_selected());
        assert!(slot.active_mut().is_none());
        assert_eq!(format!("{slot:?}"), "BackendSlot { active: None }");
    }
}
