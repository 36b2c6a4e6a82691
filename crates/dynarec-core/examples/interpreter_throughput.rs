//! Throughput harness for the interpreter-fallback dispatch loop.
//!
//! ## Usage
//!
//! ```sh
//! RUST_LOG=dynarec_core=debug cargo run -p dynarec-core --example interpreter_throughput
//! ```
//!
//! ## Metrics
//!
//! - Guest instructions per second
//! - Timeslices per second
//! - Emulated clock the host could sustain at one cycle per instruction
//!
//! The workload is a counted loop with a delayed branch, a trap every
//! iteration and an interrupt-style halt after a fixed number of timeslices.

#![allow(clippy::pedantic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use dynarec_core::{
    DynarecConfig, ExceptionKind, ExecFault, FatalError, GeneralRegister, LoopStats, OpContext,
    OpHandler, OpcodeInfo, OpcodeTable, ProcessorContext, Session, SystemBus,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;
use tracing_subscriber::EnvFilter;

const PROGRAM_BASE: u32 = 0x8C01_0000;
const VBR: u32 = 0x8C00_0000;
const TIMESLICES: u64 = 20_000;

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

fn bra(op: &mut OpContext<'_>, opcode: u16) -> Result<(), ExecFault> {
    let disp = (((opcode & 0x0FFF) << 4) as i16) >> 4;
    let target = op
        .ctx
        .pc()
        .wrapping_add(2)
        .wrapping_add((i32::from(disp) * 2) as u32);
    op.execute_delay_slot()?;
    op.ctx.set_pc(target);
    Ok(())
}

fn trapa(op: &mut OpContext<'_>, _opcode: u16) -> Result<(), ExecFault> {
    Err(op.raise(ExceptionKind::Trapa))
}

fn rte(op: &mut OpContext<'_>, _opcode: u16) -> Result<(), ExecFault> {
    let spc = op.ctx.regs.spc();
    let ssr = op.ctx.regs.ssr();
    op.execute_delay_slot()?;
    op.ctx.regs.set_sr(ssr);
    op.ctx.set_pc(spc.wrapping_add(2));
    Ok(())
}

fn isa() -> OpcodeTable {
    let ops: [(&str, OpcodeInfo, OpHandler); 5] = [
        ("0000_0000_0000_1001", OpcodeInfo::integer("nop"), nop),
        ("0000_0000_0010_1011", OpcodeInfo::integer("rte").with_cycles(5), rte),
        ("0111_nnnn_iiii_iiii", OpcodeInfo::integer("add #imm,Rn"), add_imm),
        ("1010_dddd_dddd_dddd", OpcodeInfo::integer("bra").with_cycles(2), bra),
        ("1100_0011_iiii_iiii", OpcodeInfo::integer("trapa").with_cycles(7), trapa),
    ];
    let mut table = OpcodeTable::new();
    for (pattern, info, handler) in ops {
        if let Err(err) = table.register_pattern(pattern, info, handler) {
            panic!("bad opcode pattern {pattern}: {err}");
        }
    }
    table
}

struct Memory {
    program: Vec<u16>,
    handler: Vec<u16>,
    updates: u64,
    limit: u64,
}

impl SystemBus for Memory {
    fn read_opcode(&mut self, addr: u32) -> Result<u16, ExecFault> {
        let fetch = |base: u32, words: &[u16]| {
            let index = addr.checked_sub(base)? / 2;
            words.get(index as usize).copied()
        };
        fetch(PROGRAM_BASE, &self.program)
            .or_else(|| fetch(VBR + 0x100, &self.handler))
            .ok_or(ExecFault::Fatal(FatalError::UnmappedFetch { addr }))
    }

    fn update_system(&mut self, ctx: &mut ProcessorContext) -> Result<(), FatalError> {
        self.updates += 1;
        if self.updates >= self.limit {
            ctx.running = false;
        }
        Ok(())
    }
}

fn report(stats: &LoopStats, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let ips = stats.instructions as f64 / secs;
    println!("instructions:        {}", stats.instructions);
    println!("exceptions:          {}", stats.exceptions);
    println!("timeslices:          {}", stats.timeslices);
    println!("elapsed:             {elapsed:?}");
    println!("instructions/sec:    {ips:.0}");
    println!("timeslices/sec:      {:.0}", stats.timeslices as f64 / secs);
    println!("sustainable clock:   {:.1} MHz", ips / 1_000_000.0);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = DynarecConfig::default();
    let mut session = match Session::with_interpreter(config, Arc::new(isa())) {
        Ok(session) => session,
        Err(err) => panic!("invalid config: {err}"),
    };
    session.context_mut().set_pc(PROGRAM_BASE);
    session.context_mut().regs.set_vbr(VBR);

    // loop: add #1,r0; add #1,r1; trapa #0; bra loop; add #-1,r2
    let mut memory = Memory {
        program: vec![0x7001, 0x7101, 0xC300, 0xAFFB, 0x72FF],
        handler: vec![0x7301, 0x002B, 0x0009],
        updates: 0,
        limit: TIMESLICES,
    };

    let started = Instant::now();
    match session.run(&mut memory) {
        Ok(stats) => report(&stats, started.elapsed()),
        Err(err) => eprintln!("run failed: {err}"),
    }
}
