//! IR dump: human-readable text for a block's micro-ops.

use std::io::Write;

use crate::decode::{FmacSrc, IntOp, LowerInsn, UpperInsn};
use crate::flags::{FlagKind, MicroFlagInst};
use crate::ir::{BlockEnd, MicroIr};
use crate::op::MicroOp;
use crate::state::PipelineState;

fn fmac_src(ft: FmacSrc) -> String {
    match ft {
        FmacSrc::Vf(r) => format!("vf{r}"),
        FmacSrc::Q => "q".to_string(),
    }
}

pub fn fmt_upper(insn: &UpperInsn) -> String {
    match *insn {
        UpperInsn::Nop => "nop".to_string(),
        UpperInsn::Fmac {
            kind,
            fd,
            fs,
            ft,
            dest,
        } => {
            let name = kind.name();
            let d = dest.suffix();
            let t = fmac_src(ft);
            format!("{name}.{d} vf{fd}, vf{fs}, {t}")
        }
        UpperInsn::Abs { ft, fs, dest } => format!("abs.{} vf{ft}, vf{fs}", dest.suffix()),
        UpperInsn::Clip { fs, ft } => format!("clipw.xyz vf{fs}, vf{ft}w"),
    }
}

pub fn fmt_lower(insn: &LowerInsn) -> String {
    const LANE: [char; 4] = ['x', 'y', 'z', 'w'];
    match *insn {
        LowerInsn::Nop => "nop".to_string(),
        LowerInsn::Move { ft, fs, dest } => format!("move.{} vf{ft}, vf{fs}", dest.suffix()),
        LowerInsn::IntAlu { op, id, is, it } => {
            let name = match op {
                IntOp::Add => "iadd",
                IntOp::Sub => "isub",
                IntOp::And => "iand",
                IntOp::Or => "ior",
            };
            format!("{name} vi{id}, vi{is}, vi{it}")
        }
        LowerInsn::Iaddi { it, is, imm } => format!("iaddi vi{it}, vi{is}, {imm}"),
        LowerInsn::Div { fs, fsf, ft, ftf } => {
            let (s, t) = (LANE[fsf as usize & 3], LANE[ftf as usize & 3]);
            format!("div q, vf{fs}{s}, vf{ft}{t}")
        }
        LowerInsn::Sqrt { ft, ftf } => format!("sqrt q, vf{ft}{}", LANE[ftf as usize & 3]),
        LowerInsn::Esqrt { fs, fsf } => format!("esqrt p, vf{fs}{}", LANE[fsf as usize & 3]),
        LowerInsn::WaitQ => "waitq".to_string(),
        LowerInsn::WaitP => "waitp".to_string(),
        LowerInsn::Mfp { ft, dest } => format!("mfp.{} vf{ft}, p", dest.suffix()),
        LowerInsn::Fsand { it, imm } => format!("fsand vi{it}, $0x{imm:x}"),
        LowerInsn::Fmand { it, is } => format!("fmand vi{it}, vi{is}"),
        LowerInsn::Fcand { imm } => format!("fcand vi1, $0x{imm:x}"),
        LowerInsn::Xgkick { is } => format!("xgkick vi{is}"),
        LowerInsn::Branch {
            kind,
            is,
            it,
            target,
        } => {
            let name = kind.name();
            if kind.is_indirect() {
                format!("{name} vi{it}, vi{is}")
            } else {
                format!("{name} vi{it}, vi{is}, 0x{target:04x}")
            }
        }
    }
}

pub fn fmt_state(state: &PipelineState) -> String {
    let head = format!(
        "q={} p={} xg={} flags=0x{:02x} type={} exact=0x{:02x}",
        state.q, state.p, state.xgkick, state.flags, state.block_type, state.need_exact_match
    );
    let vf = state
        .vf
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_idle())
        .map(|(i, r)| format!(" vf{i}=[{},{},{},{}]", r.x, r.y, r.z, r.w));
    let vi = state
        .vi
        .iter()
        .enumerate()
        .filter(|(_, &c)| c != 0)
        .map(|(i, &c)| format!(" vi{i}={c}"));
    std::iter::once(head).chain(vf).chain(vi).collect()
}

fn fmt_flag(kind: FlagKind, f: &MicroFlagInst) -> String {
    let tag = &kind.name()[..1];
    if f.do_flag {
        format!(" {tag}[w{} r{}]", f.write, f.read)
    } else {
        format!(" {tag}[r{}]", f.read)
    }
}

fn fmt_op(op: &MicroOp) -> String {
    let mut buf = format!(
        " {:04x}: c{:<3} +{} {} | {}",
        op.pc,
        op.issue_cycle,
        op.stall,
        fmt_upper(&op.upper.insn),
        fmt_lower(&op.lower.insn)
    );
    for kind in FlagKind::ALL {
        buf.push_str(&fmt_flag(kind, op.flag(kind)));
    }
    if op.swap_ops {
        buf.push_str(" swap");
    }
    if op.backup_vf {
        buf.push_str(" backup");
    }
    if op.lower.no_write_vf {
        buf.push_str(" nowrite");
    }
    if op.is_bdelay {
        buf.push_str(" delay");
    }
    if op.upper.e_bit {
        buf.push_str(" ebit");
    }
    buf
}

/// Dump every micro-op of `ir` to the given writer.
pub fn dump_ir(ir: &MicroIr, w: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        w,
        " ---- block 0x{:04x} entry {}",
        ir.start_pc,
        fmt_state(ir.entry_state())
    )?;
    for op in ir.ops() {
        writeln!(w, "{}", fmt_op(op))?;
    }
    match ir.end {
        Some(BlockEnd::FallThrough { next_pc }) => writeln!(w, " end fallthrough 0x{next_pc:04x}")?,
        Some(BlockEnd::Branch {
            kind,
            target,
            fallthrough,
        }) => writeln!(
            w,
            " end {} 0x{target:04x} / 0x{fallthrough:04x}",
            kind.name()
        )?,
        Some(BlockEnd::Halt { next_pc }) => writeln!(w, " end halt 0x{next_pc:04x}")?,
        Some(BlockEnd::DelayedBranch { fallthrough }) => {
            writeln!(w, " end delayed-branch / 0x{fallthrough:04x}")?
        }
        None => writeln!(w, " end <open>")?,
    }
    writeln!(
        w,
        " exit {} cycles={}",
        fmt_state(ir.exit_state()),
        ir.cycles
    )
}

/// [`dump_ir`] into a string.
pub fn ir_to_string(ir: &MicroIr) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = dump_ir(ir, &mut out);
    String::from_utf8_lossy(&out).into_owned()
}
