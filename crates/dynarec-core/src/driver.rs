//! Session driver owning the processor, code buffer and selected backend.

use std::sync::Arc;

use crate::api::{ConfigError, DynarecConfig, LoopError, LoopStats, SystemBus};
use crate::backend::interpreter::InterpreterBackend;
use crate::backend::{Backend, BackendSlot, HostContext};
use crate::block::{BlockDescriptor, CompiledUnit};
use crate::code_buffer::CodeBuffer;
use crate::isa::InstructionSet;
use crate::state::ProcessorContext;

/// One emulated processor with its code buffer and backend.
///
/// Serializes every backend call through `&mut self`, so compilation, buffer
/// resets and the dispatch loop never overlap.
#[derive(Debug)]
pub struct Session {
    config: DynarecConfig,
    ctx: ProcessorContext,
    buffer: CodeBuffer,
    slot: BackendSlot,
}

impl Session {
    /// Validates `config`, allocates the code buffer, resets the processor
    /// and binds `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` fails validation.
    pub fn new(config: DynarecConfig, backend: Box<dyn Backend>) -> Result<Self, ConfigError> {
        config.validate()?;

        let ctx = ProcessorContext::with_budget(config.timeslice_cycles);
        let buffer = CodeBuffer::new(config.code_buffer_bytes);
        let mut slot = BackendSlot::new();
        slot.install_if_empty(|| backend);
        if let Some(active) = slot.active_mut() {
            active.initialize(&ctx, &buffer);
        }

        Ok(Self {
            config,
            ctx,
            buffer,
            slot,
        })
    }

    /// Creates a session running on the interpreter fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` fails validation.
    pub fn with_interpreter(
        config: DynarecConfig,
        isa: Arc<dyn InstructionSet>,
    ) -> Result<Self, ConfigError> {
        let backend = InterpreterBackend::new(isa, &config);
        Self::new(config, Box::new(backend))
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &DynarecConfig {
        &self.config
    }

    /// Processor state.
    #[must_use]
    pub const fn context(&self) -> &ProcessorContext {
        &self.ctx
    }

    /// Mutable processor state, for loaders and debuggers between runs.
    pub const fn context_mut(&mut self) -> &mut ProcessorContext {
        &mut self.ctx
    }

    /// Code buffer compiled units live in.
    #[must_use]
    pub const fn code_buffer(&self) -> &CodeBuffer {
        &self.buffer
    }

    /// Name of the selected backend.
    #[must_use]
    pub fn backend_name(&self) -> Option<&'static str> {
        self.slot.name()
    }

    /// Compiles `block` with the session's `smc_checks`/`optimise` settings.
    pub fn compile(&mut self, block: &mut BlockDescriptor) -> Option<CompiledUnit> {
        let backend = self.slot.active_mut()?;
        backend.compile(
            &mut self.buffer,
            block,
            self.config.smc_checks,
            self.config.optimise,
        )
    }

    /// Clears the code buffer and tells the backend to drop its side caches.
    /// Every previously compiled unit becomes stale.
    pub fn reset_code_buffer(&mut self) {
        tracing::debug!(
            used = self.buffer.cursor(),
            generation = self.buffer.generation(),
            "resetting code buffer"
        );
        self.buffer.reset();
        if let Some(backend) = self.slot.active_mut() {
            backend.on_buffer_reset();
        }
    }

    /// Marks the processor running and enters the backend's dispatch loop
    /// until it halts.
    ///
    /// # Errors
    ///
    /// Propagates [`LoopError`] from the backend.
    pub fn run(&mut self, bus: &mut dyn SystemBus) -> Result<LoopStats, LoopError> {
        let backend = self.slot.active_mut().ok_or(LoopError::Unbound)?;
        self.ctx.running = true;
        backend.run_loop(&mut self.ctx, bus)
    }

    /// Clears the running flag; the dispatch loop stops at its next
    /// timeslice boundary.
    pub const fn request_halt(&mut self) {
        self.ctx.running = false;
    }

    /// Routes a host fault from generated code to the backend: first as a
    /// rewrite attempt, then to the generic handler. Returns `true` when the
    /// fault was rewritten.
    pub fn handle_host_fault(&mut self, host: &mut HostContext, fault_address: usize) -> bool {
        let Some(backend) = self.slot.active_mut() else {
            return false;
        };
        if backend.rewrite_fault(host, fault_address) {
            return true;
        }
        backend.handle_fault(host);
        false
    }

    /// Releases the backend and returns the processor state and code buffer.
    #[must_use]
    pub fn teardown(mut self) -> (ProcessorContext, CodeBuffer) {
        self.slot.teardown();
        (self.ctx, self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Session;
    use crate::isa::OpcodeTable;
    use crate::{BlockDescriptor, ConfigError, DynarecConfig, RESET_VECTOR};

    fn session(config: DynarecConfig) -> Result<Session, ConfigError> {
        Session::with_interpreter(config, Arc::new(OpcodeTable::new()))
    }

    #[test]
    fn new_session_is_reset_and_bound() {
        let session = session(DynarecConfig {
            code_buffer_bytes: 64,
            ..DynarecConfig::default()
        })
        .expect("valid config");

        assert_eq!(session.backend_name(), Some("interpreter"));
        assert_eq!(session.context().pc(), RESET_VECTOR);
        assert_eq!(session.context().cycle_counter, 448);
        assert!(!session.context().running);
        assert_eq!(session.code_buffer().capacity(), 64);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = session(DynarecConfig {
            timeslice_cycles: -1,
            ..DynarecConfig::default()
        })
        .expect_err("negative timeslice");
        assert_eq!(err, ConfigError::NonPositiveTimeslice(-1));
    }

    #[test]
    fn zero_instruction_cost_is_rejected() {
        let err = session(DynarecConfig {
            cycles_per_instruction: 0,
            ..DynarecConfig::default()
        })
        .expect_err("zero cost never exhausts the budget");
        assert_eq!(
            err,
            ConfigError::NonPositiveCost {
                field: "cycles_per_instruction",
                value: 0,
            }
        );
    }

    #[test]
    fn reset_code_buffer_invalidates_units() {
        let mut session = session(DynarecConfig {
            code_buffer_bytes: 8,
            ..DynarecConfig::default()
        })
        .expect("valid config");
        let mut block = BlockDescriptor::new(0x8C00_0000);

        let unit = session.compile(&mut block).expect("space for unit");
        assert!(session.code_buffer().is_live(unit.entry));

        session.reset_code_buffer();

        assert!(!session.code_buffer().is_live(unit.entry));
        assert_eq!(session.code_buffer().free_space(), 8);
    }

    #[test]
    fn teardown_returns_state() {
        let mut session = session(DynarecConfig::default()).expect("valid config");
        session.context_mut().cycle_counter = 7;
        session.request_halt();

        let (ctx, buffer) = session.teardown();

        assert_eq!(ctx.cycle_counter, 7);
        assert_eq!(buffer.cursor(), 0);
    }
}
