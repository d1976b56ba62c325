// End-to-end checks of the compilation pipeline through the public driver API.
// Each program is compiled for every target at every optimization level; the
// resulting module has to pass the target's assembly validator, keep its
// functions in source order and carry the per-target calling convention
// markers. Failing functions must be reported with their stage while the rest
// of the module still compiles.

//! Whole-pipeline tests across targets and optimization levels.

use typthon::codegen::validate_assembly;
use typthon::core::{Arch, CompileOptions, OptLevel, Stage};
use typthon::driver::compile_source;

const ARCHES: [Arch; 3] = [Arch::Amd64, Arch::Arm64, Arch::Riscv64];
const LEVELS: [OptLevel; 4] = [OptLevel::O0, OptLevel::O1, OptLevel::O2, OptLevel::O3];

const PROGRAM: &str = "\
class Counter:
    count: int
    step: int

    def __init__(self, start: int) -> None:
        self.count = start
        self.step = 1

    def bump(self) -> int:
        self.count = self.count + self.step
        return self.count

def fib(n: int) -> int:
    a = 0
    b = 1
    i = 0
    while i < n:
        t = a + b
        a = b
        b = t
        i = i + 1
    return a

def classify(x: int) -> int:
    if x < 0:
        return -1
    elif x == 0:
        return 0
    else:
        return 1

def sum_odd(n: int) -> int:
    total = 0
    for i in range(n):
        if i / 2 * 2 == i:
            continue
        total = total + i
    return total

def both(a: bool, b: bool) -> bool:
    return a and not b or b and not a

def count(n: int) -> int:
    c = Counter(n)
    c.bump()
    return c.bump()

def many(a: int, b: int, c: int, d: int, e: int, f: int, g: int, h: int, i: int, j: int) -> int:
    return a * b + c * d + e * f + g * h + i * j

def calls(x: int) -> int:
    y = fib(x)
    z = classify(y - 5)
    w = many(x, y, z, 1, 2, 3, 4, 5, 6, 7)
    return x + y + z + w

def main() -> int:
    return calls(10) + sum_odd(9) + count(4)
";

fn options(arch: Arch, level: OptLevel) -> CompileOptions {
    CompileOptions::new(arch)
        .with_opt_level(level)
        .with_jobs(2)
        .with_symbol_prefix("")
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_program_compiles_everywhere() {
    init_logging();
    for arch in ARCHES {
        for level in LEVELS {
            let outcome = compile_source(PROGRAM, &options(arch, level)).expect("parses");
            assert!(
                outcome.is_success(),
                "{} {}: {}",
                arch,
                level,
                outcome
                    .failures
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            if let Err(err) = validate_assembly(arch, &outcome.assembly) {
                panic!("{} {}: {}\n{}", arch, level, err, outcome.assembly);
            }
        }
    }
}

#[test]
fn test_functions_are_emitted_in_source_order() {
    init_logging();
    let outcome = compile_source(PROGRAM, &options(Arch::Amd64, OptLevel::O2)).expect("parses");
    let names: Vec<&str> = outcome.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "Counter___init__",
            "Counter_bump",
            "fib",
            "classify",
            "sum_odd",
            "both",
            "count",
            "many",
            "calls",
            "main"
        ]
    );
    let mut last = 0;
    for name in names {
        let at = outcome
            .assembly
            .find(&format!(".globl {}\n", name))
            .unwrap_or_else(|| panic!("{} missing", name));
        assert!(at >= last, "{} out of order", name);
        last = at;
    }
}

#[test]
fn test_calling_convention_markers() {
    init_logging();
    let markers: [(Arch, &[&str]); 3] = [
        (Arch::Amd64, &["pushq %rbp", "call fib", "call typthon_alloc", "16(%rbp)"]),
        (Arch::Arm64, &["stp x29, x30, [sp, #-16]!", "bl fib", "bl typthon_alloc", "[x29, #16]"]),
        (Arch::Riscv64, &["sd ra, 8(sp)", "call fib", "call typthon_alloc", "0(s0)"]),
    ];
    for (arch, expected) in markers {
        let outcome = compile_source(PROGRAM, &options(arch, OptLevel::O1)).expect("parses");
        for marker in expected {
            assert!(
                outcome.assembly.contains(marker),
                "{} output lacks {}",
                arch,
                marker
            );
        }
    }
}

#[test]
fn test_constant_program_folds_at_o1() {
    init_logging();
    let source = "def k() -> int:\n    x = 6 * 7\n    y = x - 2\n    return y * 1 + 0\n";
    let o0 = compile_source(source, &options(Arch::Amd64, OptLevel::O0)).expect("parses");
    let o1 = compile_source(source, &options(Arch::Amd64, OptLevel::O1)).expect("parses");
    assert!(o0.functions[0].ir.contains("mul"), "{}", o0.functions[0].ir);
    assert!(o1.functions[0].ir.contains("ret 40"), "{}", o1.functions[0].ir);
    assert!(o1.assembly.contains("$40"), "{}", o1.assembly);
}

#[test]
fn test_failing_functions_are_reported_with_stage() {
    init_logging();
    let source = "\
def ok(x: int) -> int:
    return x

def undefined() -> int:
    return nothing

def dynamic(o: int) -> int:
    return o.missing

def also_ok() -> int:
    return ok(2)
";
    for arch in ARCHES {
        let outcome = compile_source(source, &options(arch, OptLevel::O2)).expect("parses");
        let failed: Vec<(&str, Stage)> = outcome
            .failures
            .iter()
            .map(|f| (f.function.as_str(), f.stage))
            .collect();
        assert!(failed.contains(&("undefined", Stage::Build)), "{:?}", failed);
        assert!(failed.iter().any(|(name, _)| *name == "dynamic"), "{:?}", failed);
        let names: Vec<&str> = outcome.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["ok", "also_ok"]);
    }
}

#[test]
fn test_match_compiles_and_validates_everywhere() {
    init_logging();
    let source = "\
def pick(x: int) -> int:
    match x:
        case 0 | 1:
            return 10
        case n if n > 5:
            return n * 2
        case _:
            return -1
";
    for arch in ARCHES {
        for level in LEVELS {
            let outcome = compile_source(source, &options(arch, level)).expect("parses");
            assert!(outcome.is_success(), "{} {}: {:?}", arch, level, outcome.failures);
            validate_assembly(arch, &outcome.assembly)
                .unwrap_or_else(|e| panic!("{} {}: {}\n{}", arch, level, e, outcome.assembly));
            assert!(outcome.functions[0].ir.contains("match_"), "{}", outcome.functions[0].ir);
        }
    }
}
