// Register allocation invariants checked over real lowered functions rather
// than hand-built intervals. Every program is parsed, lowered, put into SSA
// form and optimized, then allocated with each target's register classes. The
// checks: every interval gets a location, intervals that are live at the same
// time never share a register or a spill slot (segments that only meet at a
// call site hand the register over there), only pool registers are handed
// out, no segment spans a call, and a segment that starts at a call (and so
// has to survive it) sits in a callee-saved register or on the stack.

//! Linear-scan allocator invariants over generated functions.

use typthon::codegen::reg_config;
use typthon::core::{Arch, OptLevel};
use typthon::frontend::parse;
use typthon::ir::build_program;
use typthon::opt::Pipeline;
use typthon::regalloc::{allocate, Location};
use typthon::ssa::construct_ssa;

const SOURCES: [&str; 3] = [
    "\
def g(x: int) -> int:
    return x * 2

def pressure(a: int, b: int, c: int) -> int:
    d = a + b
    e = b + c
    f = c + a
    h = d * e
    i = e * f
    j = f * d
    k = g(h)
    l = g(i + j)
    m = g(k + l)
    return a + b + c + d + e + f + h + i + j + k + l + m
",
    "\
def step(x: int) -> int:
    return x + 1

def loop(n: int) -> int:
    total = 0
    acc = 1
    i = 0
    while i < n:
        acc = step(acc) * 3
        if acc > 1000:
            acc = acc - 999
        total = total + acc + i
        i = i + 1
    return total + acc
",
    "\
def wide(a: int, b: int, c: int, d: int, e: int, f: int, g: int, h: int, i: int) -> int:
    s0 = a + b
    s1 = c + d
    s2 = e + f
    s3 = g + h
    s4 = i + a
    s5 = s0 * s1
    s6 = s2 * s3
    s7 = s4 * s0
    s8 = s5 + s6
    s9 = s7 + s8
    s10 = s9 * s1
    s11 = s10 + s2
    s12 = s11 * s3
    s13 = s12 + s4
    s14 = s13 * s5
    s15 = s14 + s6
    s16 = s15 * s7
    s17 = s16 + s8
    return s0 + s1 + s2 + s3 + s4 + s5 + s6 + s7 + s8 + s9 + s10 + s11 + s12 + s13 + s14 + s15 + s16 + s17
",
];

fn check_source(source: &str, arch: Arch, level: OptLevel) {
    let module = parse(source).expect("parses");
    let (program, failures) = build_program(&module);
    assert!(failures.is_empty(), "{:?}", failures);
    let config = reg_config(arch);

    for func in &program.functions {
        let mut func = func.clone();
        construct_ssa(&mut func).expect("ssa");
        Pipeline::for_level(level, &program.classes, None).run(&mut func);
        let alloc = allocate(&func, &config);
        let context = format!("{} on {} at {}", func.name, arch, level);

        for interval in &alloc.intervals {
            match interval.location {
                None => panic!("{}: {:?} has no location", context, interval),
                Some(Location::Reg(reg)) => {
                    assert!(config.is_allocatable(reg), "{}: {:?} outside the pool", context, reg);
                    if interval.crosses_call {
                        assert!(
                            config.is_callee_saved(reg),
                            "{}: {:?} survives a call in caller-saved {:?}",
                            context,
                            interval.key,
                            reg
                        );
                    }
                }
                Some(Location::Spill(slot)) => {
                    assert!(slot < alloc.spill_count, "{}: slot {} out of range", context, slot);
                }
            }
            for &call in &alloc.call_sites {
                assert!(
                    !(interval.start < call && call < interval.end),
                    "{}: {:?} spans the call at {}",
                    context,
                    interval,
                    call
                );
            }
        }

        for (i, a) in alloc.intervals.iter().enumerate() {
            for b in &alloc.intervals[i + 1..] {
                if a.key == b.key || !a.conflicts_with(b, &alloc.call_sites) {
                    continue;
                }
                assert_ne!(
                    a.location, b.location,
                    "{}: {:?} and {:?} share a location",
                    context, a, b
                );
            }
        }
    }
}

#[test]
fn test_allocation_invariants_on_every_target() {
    for source in SOURCES {
        for arch in [Arch::Amd64, Arch::Arm64, Arch::Riscv64] {
            for level in [OptLevel::O0, OptLevel::O2] {
                check_source(source, arch, level);
            }
        }
    }
}

#[test]
fn test_small_pool_spills() {
    // amd64 has six pool registers; the wide function needs more.
    let module = parse(SOURCES[2]).expect("parses");
    let (program, _) = build_program(&module);
    let mut func = program.functions[0].clone();
    construct_ssa(&mut func).expect("ssa");
    let alloc = allocate(&func, &reg_config(Arch::Amd64));
    assert!(alloc.spill_count > 0);
    assert_eq!(alloc.stack_size(), alloc.spill_count * 8);
}
