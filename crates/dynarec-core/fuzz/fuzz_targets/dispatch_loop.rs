#![no_main]

use std::sync::Arc;

use dynarec_core::{
    BlockDescriptor, DynarecConfig, ExceptionKind, ExecFault, FatalError, GeneralRegister,
    LoopError, OpContext, OpHandler, OpcodeInfo, OpcodeTable, ProcessorContext, Session,
    SystemBus, SR_FD,
};
use libfuzzer_sys::fuzz_target;

const PROGRAM_BASE: u32 = 0x8C00_0000;

fn nop(_op: &mut OpContext<'_>, _opcode: u16) -> Result<(), ExecFault> {
    Ok(())
}

fn sleep(op: &mut OpContext<'_>, _opcode: u16) -> Result<(), ExecFault> {
    op.ctx.running = false;
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

fn fneg(op: &mut OpContext<'_>, opcode: u16) -> Result<(), ExecFault> {
    let n = usize::from((opcode >> 8) & 0xF);
    let value = op.ctx.regs.fpr(n);
    op.ctx.regs.set_fpr(n, -value);
    Ok(())
}

fn isa() -> OpcodeTable {
    let ops: [(&str, OpcodeInfo, OpHandler); 6] = [
        ("0000_0000_0000_1001", OpcodeInfo::integer("nop"), nop),
        ("0000_0000_0001_1011", OpcodeInfo::integer("sleep"), sleep),
        ("0111_nnnn_iiii_iiii", OpcodeInfo::integer("add #imm,Rn"), add_imm),
        ("1010_dddd_dddd_dddd", OpcodeInfo::integer("bra"), bra),
        ("1100_0011_iiii_iiii", OpcodeInfo::integer("trapa").with_cycles(3), trapa),
        ("1111_nnnn_0100_1101", OpcodeInfo::floating_point("fneg FRn"), fneg),
    ];
    let mut table = OpcodeTable::new();
    for (pattern, info, handler) in ops {
        let _ = table.register_pattern(pattern, info, handler);
    }
    table
}

/// Fuzz-provided memory image; unmapped fetches are fatal, the loop halts
/// after a bounded number of timeslices. Exception vectors stay unmapped so
/// trap loops abort instead of spinning.
struct FuzzBus {
    words: Vec<u16>,
    updates: u32,
    limit: u32,
}

impl SystemBus for FuzzBus {
    fn read_opcode(&mut self, addr: u32) -> Result<u16, ExecFault> {
        let index = (addr.wrapping_sub(PROGRAM_BASE) / 2) as usize;
        self.words
            .get(index)
            .copied()
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

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let timeslice = i32::from(data[0] % 64) + 1;
    let drain = i32::from(data[1] % 8) + 1;
    let fpu_disabled = data[2] & 1 != 0;
    let limit = u32::from(data[3] % 4) + 1;
    let words: Vec<u16> = data[4..]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    let config = DynarecConfig {
        timeslice_cycles: timeslice,
        exception_drain_cycles: drain,
        code_buffer_bytes: 64,
        ..DynarecConfig::default()
    };
    let Ok(mut session) = Session::with_interpreter(config, Arc::new(isa())) else {
        return;
    };
    session.context_mut().set_pc(PROGRAM_BASE);
    session.context_mut().regs.set_vbr(0);
    session.context_mut().regs.set_sr_flag(SR_FD, fpu_disabled);

    for (index, _) in words.iter().enumerate().take(32) {
        let mut block = BlockDescriptor::new(PROGRAM_BASE + 2 * index as u32);
        if session.compile(&mut block).is_none() {
            assert!(!block.is_compiled());
            session.reset_code_buffer();
        }
    }

    let mut bus = FuzzBus {
        words,
        updates: 0,
        limit,
    };
    match session.run(&mut bus) {
        Ok(stats) => {
            assert!(stats.timeslices <= u64::from(limit));
        }
        Err(LoopError::Aborted { .. }) => assert!(!session.context().running),
        Err(LoopError::Unbound) => unreachable!("session binds its backend"),
    }
});
