//! Deterministic dispatch fingerprint used for cross-host comparison.
//!
//! Runs a fixed workload through the interpreter backend, compiling a block
//! descriptor per timeslice, and hashes the architectural state, loop
//! statistics and code buffer cursor after every run.

#![allow(clippy::pedantic)]

use std::sync::Arc;

use dynarec_core::{
    BlockDescriptor, CpuException, DynarecConfig, ExceptionKind, ExecFault, FatalError,
    GeneralRegister, OpContext, OpHandler, OpcodeInfo, OpcodeTable, ProcessorContext, Session,
    SystemBus,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;
use tracing_subscriber::EnvFilter;

const PROGRAM_BASE: u32 = 0x8C01_0000;
const RUNS: u32 = 64;

fn nop(_op: &mut OpContext<'_>, _opcode: u16) -> Result<(), ExecFault> {
    Ok(())
}

fn add_imm(op: &mut OpContext<'_>, opcode: u16) -> Result<(), ExecFault> {
    let rn = GeneralRegister::from_opcode(opcode, 8);
    let imm = i32::from(opcode as u8 as i8) as u32;
    let value = op.ctx.regs.gpr(rn).wrapping_add(imm);
    op.ctx.regs.set_gpr(rn, value);
    Ok(())
}

fn xor(op: &mut OpContext<'_>, opcode: u16) -> Result<(), ExecFault> {
    let rn = GeneralRegister::from_opcode(opcode, 8);
    let rm = GeneralRegister::from_opcode(opcode, 4);
    let value = op.ctx.regs.gpr(rn) ^ op.ctx.regs.gpr(rm).rotate_left(7);
    op.ctx.regs.set_gpr(rn, value);
    Ok(())
}

fn trapa(op: &mut OpContext<'_>, _opcode: u16) -> Result<(), ExecFault> {
    Err(op.raise(ExceptionKind::Trapa))
}

fn isa() -> OpcodeTable {
    let ops: [(&str, OpcodeInfo, OpHandler); 4] = [
        ("0000_0000_0000_1001", OpcodeInfo::integer("nop"), nop),
        ("0111_nnnn_iiii_iiii", OpcodeInfo::integer("add #imm,Rn"), add_imm),
        ("0010_nnnn_mmmm_1010", OpcodeInfo::integer("xor Rm,Rn").with_cycles(2), xor),
        ("1100_0011_iiii_iiii", OpcodeInfo::integer("trapa"), trapa),
    ];
    let mut table = OpcodeTable::new();
    for (pattern, info, handler) in ops {
        if let Err(err) = table.register_pattern(pattern, info, handler) {
            panic!("bad opcode pattern {pattern}: {err}");
        }
    }
    table
}

/// Straight-line program; fetches past its end read as NOP and the system
/// update rewinds `PC` once it has run off the end.
struct Rom {
    words: Vec<u16>,
}

impl SystemBus for Rom {
    fn read_opcode(&mut self, addr: u32) -> Result<u16, ExecFault> {
        let index = (addr.wrapping_sub(PROGRAM_BASE) / 2) as usize;
        Ok(self.words.get(index).copied().unwrap_or(0x0009))
    }

    fn update_system(&mut self, ctx: &mut ProcessorContext) -> Result<(), FatalError> {
        ctx.running = false;
        if ctx.pc().wrapping_sub(PROGRAM_BASE) >= 0x100 {
            ctx.set_pc(PROGRAM_BASE);
        }
        Ok(())
    }
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn hash_context(hash: &mut u64, ctx: &ProcessorContext) {
    for reg in GeneralRegister::ALL {
        hash_bytes(hash, &ctx.regs.gpr(reg).to_le_bytes());
    }
    for value in [
        ctx.regs.pc(),
        ctx.regs.sr(),
        ctx.regs.spc(),
        ctx.regs.ssr(),
        ctx.regs.expevt(),
    ] {
        hash_bytes(hash, &value.to_le_bytes());
    }
    hash_bytes(hash, &ctx.cycle_counter.to_le_bytes());
}

fn hash_exception(hash: &mut u64, exception: Option<CpuException>) {
    if let Some(exception) = exception {
        hash_bytes(hash, &exception.epc.to_le_bytes());
        hash_bytes(hash, &exception.kind.as_u16().to_le_bytes());
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = DynarecConfig {
        timeslice_cycles: 97,
        code_buffer_bytes: 128,
        ..DynarecConfig::default()
    };
    let mut session = match Session::with_interpreter(config, Arc::new(isa())) {
        Ok(session) => session,
        Err(err) => panic!("invalid config: {err}"),
    };
    session.context_mut().set_pc(PROGRAM_BASE);
    session.context_mut().regs.set_vbr(PROGRAM_BASE - 0x100);

    let mut rom = Rom {
        words: vec![0x7105, 0x721F, 0x212A, 0x7381, 0x232A, 0xC301, 0x7401, 0x243A],
    };

    let mut hash = 0xCBF2_9CE4_8422_2325_u64;
    for run in 0..RUNS {
        let mut block = BlockDescriptor::new(session.context().pc());
        if session.compile(&mut block).is_none() {
            session.reset_code_buffer();
        }

        match session.run(&mut rom) {
            Ok(stats) => {
                hash_bytes(&mut hash, &stats.instructions.to_le_bytes());
                hash_bytes(&mut hash, &stats.exceptions.to_le_bytes());
                hash_exception(&mut hash, stats.last_exception);
            }
            Err(err) => panic!("run {run} failed: {err}"),
        }
        hash_context(&mut hash, session.context());
        hash_bytes(&mut hash, &session.code_buffer().cursor().to_le_bytes());
    }

    println!("{hash:016x}");
}
