//! Checks for the arm64 emitter's output.

use std::sync::LazyLock;

use regex::Regex;

use crate::codegen::validate::{AsmValidator, StackEffect, ValidationRule};

/// `[base]`, `[base, #imm]` or the pre-indexed `[base, #imm]!`.
static MEMORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([a-z0-9]+)(?:,\s*#(-?\d+))?\](!)?$").expect("memory operand pattern")
});

static IMMEDIATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(-?\d+)$").expect("immediate pattern"));

static SHIFT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^lsl\s+#(\d+)$").expect("shift pattern"));

static SYMBOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(:lo12:)?[A-Za-z_.$][\w.$]*(@PAGE|@PAGEOFF)?$").expect("symbol pattern")
});

const CALLEE_SAVED: [&str; 11] = [
    "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "x29",
];

const CONDITIONS: [&str; 6] = ["eq", "ne", "lt", "le", "gt", "ge"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Reg,
    Sp,
    Zero,
    Imm,
    Mem,
    Shift,
    Cond,
    Symbol,
    Bad,
}

fn is_register(name: &str) -> bool {
    let Some(digits) = name.strip_prefix('x') else {
        return false;
    };
    let canonical = digits == "0" || !digits.starts_with('0');
    canonical
        && digits.bytes().all(|b| b.is_ascii_digit())
        && digits.parse::<u8>().is_ok_and(|n| n <= 30)
}

fn classify(operand: &str) -> Kind {
    if operand == "sp" {
        Kind::Sp
    } else if operand == "xzr" {
        Kind::Zero
    } else if is_register(operand) {
        Kind::Reg
    } else if operand.starts_with('#') {
        Kind::Imm
    } else if operand.starts_with('[') {
        Kind::Mem
    } else if operand.starts_with("lsl") {
        Kind::Shift
    } else if CONDITIONS.contains(&operand) {
        Kind::Cond
    } else if SYMBOL.is_match(operand) {
        Kind::Symbol
    } else {
        Kind::Bad
    }
}

fn immediate(operand: &str) -> Option<i64> {
    IMMEDIATE
        .captures(operand)
        .and_then(|caps| caps[1].parse().ok())
}

fn is_gpr(kind: Kind) -> bool {
    matches!(kind, Kind::Reg | Kind::Zero)
}

fn operand_counts(mnemonic: &str) -> Option<&'static [usize]> {
    Some(match mnemonic {
        "ret" => &[0, 1],
        "b" | "bl" | "blr" | "br" => &[1],
        "mov" | "cmp" | "cset" | "ldr" | "str" | "adrp" | "cbz" | "cbnz" | "neg" => &[2],
        "movz" | "movk" | "movn" => &[2, 3],
        "add" | "sub" | "mul" | "sdiv" | "and" | "orr" | "eor" | "stp" => &[3],
        "ldp" => &[3, 4],
        _ => return None,
    })
}

pub struct Arm64Validator;

impl Arm64Validator {
    fn check_memory(
        &self,
        mnemonic: &str,
        operand: &str,
        issues: &mut Vec<(ValidationRule, String)>,
    ) {
        let Some(caps) = MEMORY.captures(operand) else {
            issues.push((ValidationRule::Addressing, format!("malformed address {}", operand)));
            return;
        };
        let base = &caps[1];
        if !matches!(classify(base), Kind::Reg | Kind::Sp) {
            issues.push((ValidationRule::Register, format!("bad base register {}", base)));
        }
        let offset: i64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let pair = matches!(mnemonic, "ldp" | "stp");
        let fits = if pair {
            (-512..=504).contains(&offset) && offset % 8 == 0
        } else if caps.get(3).is_some() {
            (-256..=255).contains(&offset)
        } else {
            (0..=32760).contains(&offset) && offset % 8 == 0 || (-256..=255).contains(&offset)
        };
        if !fits {
            issues.push((
                ValidationRule::ImmediateRange,
                format!("offset {} does not encode in {}", offset, mnemonic),
            ));
        }
    }
}

impl AsmValidator for Arm64Validator {
    fn comment_prefix(&self) -> &'static str {
        "//"
    }

    fn check(&self, mnemonic: &str, operands: &[&str]) -> Vec<(ValidationRule, String)> {
        let mut issues = Vec::new();
        let Some(counts) = operand_counts(mnemonic) else {
            issues.push((ValidationRule::Syntax, format!("unknown mnemonic {}", mnemonic)));
            return issues;
        };
        if !counts.contains(&operands.len()) {
            issues.push((
                ValidationRule::Syntax,
                format!("{} does not take {} operand(s)", mnemonic, operands.len()),
            ));
            return issues;
        }
        let kinds: Vec<Kind> = operands.iter().map(|op| classify(op)).collect();
        for (operand, kind) in operands.iter().zip(&kinds) {
            match kind {
                Kind::Bad => issues.push((
                    if operand.starts_with('x') || operand.starts_with('w') {
                        ValidationRule::Register
                    } else {
                        ValidationRule::Syntax
                    },
                    format!("malformed operand {}", operand),
                )),
                Kind::Imm if immediate(operand).is_none() => {
                    issues.push((ValidationRule::Syntax, format!("malformed immediate {}", operand)))
                }
                Kind::Mem => self.check_memory(mnemonic, operand, &mut issues),
                Kind::Shift => {
                    let ok = SHIFT
                        .captures(operand)
                        .and_then(|caps| caps[1].parse::<u32>().ok())
                        .is_some_and(|s| matches!(s, 0 | 16 | 32 | 48));
                    if !ok || !matches!(mnemonic, "movz" | "movk" | "movn") {
                        issues.push((ValidationRule::ImmediateRange, format!("bad shift {}", operand)));
                    }
                }
                _ => {}
            }
        }
        if !issues.is_empty() {
            return issues;
        }

        let imm = |i: usize| operands.get(i).and_then(|op| immediate(op));
        let mut range = |ok: bool, what: String| {
            if !ok {
                issues.push((ValidationRule::ImmediateRange, what));
            }
        };
        match mnemonic {
            "add" | "sub" => {
                if !matches!(kinds[0], Kind::Reg | Kind::Sp) || !matches!(kinds[1], Kind::Reg | Kind::Sp) {
                    return vec![(ValidationRule::Register, format!("bad operands for {}", mnemonic))];
                }
                match kinds[2] {
                    Kind::Imm => {
                        let v = imm(2).unwrap_or(-1);
                        range((0..=4095).contains(&v), format!("{} immediate {} out of range", mnemonic, v));
                    }
                    Kind::Reg => {}
                    Kind::Symbol if mnemonic == "add" && (operands[2].starts_with(":lo12:") || operands[2].ends_with("@PAGEOFF")) => {}
                    _ => return vec![(ValidationRule::Syntax, format!("bad third operand {}", operands[2]))],
                }
            }
            "cmp" => {
                if !is_gpr(kinds[0]) {
                    return vec![(ValidationRule::Register, "cmp needs a register".to_string())];
                }
                if kinds[1] == Kind::Imm {
                    let v = imm(1).unwrap_or(-1);
                    range((0..=4095).contains(&v), format!("cmp immediate {} out of range", v));
                } else if !is_gpr(kinds[1]) {
                    return vec![(ValidationRule::Syntax, "bad cmp operand".to_string())];
                }
            }
            "mov" => match (kinds[0], kinds[1]) {
                (Kind::Reg, Kind::Imm) => {
                    let v = imm(1).unwrap_or(i64::MAX);
                    range(
                        (0..=0xffff).contains(&v) || (0..=0xffff).contains(&!v),
                        format!("mov immediate {} needs movz/movk", v),
                    );
                }
                (Kind::Reg | Kind::Sp, Kind::Reg | Kind::Sp | Kind::Zero) => {}
                _ => return vec![(ValidationRule::Syntax, "bad mov operands".to_string())],
            },
            "movz" | "movk" | "movn" => {
                if kinds[0] != Kind::Reg || kinds[1] != Kind::Imm {
                    return vec![(ValidationRule::Syntax, format!("bad {} operands", mnemonic))];
                }
                let v = imm(1).unwrap_or(-1);
                range((0..=0xffff).contains(&v), format!("{} immediate {} exceeds 16 bits", mnemonic, v));
            }
            "mul" | "sdiv" | "and" | "orr" | "eor" => {
                if !kinds.iter().all(|k| is_gpr(*k)) {
                    return vec![(ValidationRule::Register, format!("{} takes registers only", mnemonic))];
                }
            }
            "cset" => {
                if kinds[0] != Kind::Reg || kinds[1] != Kind::Cond {
                    return vec![(ValidationRule::Syntax, "cset takes a register and a condition".to_string())];
                }
            }
            "ldr" | "str" => {
                if !is_gpr(kinds[0]) || kinds[1] != Kind::Mem {
                    return vec![(ValidationRule::Addressing, format!("{} takes a register and an address", mnemonic))];
                }
            }
            "ldp" | "stp" => {
                if !is_gpr(kinds[0]) || !is_gpr(kinds[1]) || kinds[2] != Kind::Mem {
                    return vec![(ValidationRule::Addressing, format!("bad {} operands", mnemonic))];
                }
                if operands.len() == 4 {
                    let v = imm(3).unwrap_or(i64::MAX);
                    range((-512..=504).contains(&v) && v % 8 == 0, format!("post-index {} out of range", v));
                }
            }
            "adrp" => {
                if kinds[0] != Kind::Reg || kinds[1] != Kind::Symbol || operands[1].starts_with(":lo12:") {
                    return vec![(ValidationRule::Syntax, "adrp takes a register and a symbol".to_string())];
                }
            }
            "b" | "bl" => {
                if kinds[0] != Kind::Symbol {
                    return vec![(ValidationRule::Syntax, format!("bad target {}", operands[0]))];
                }
            }
            "blr" | "br" => {
                if kinds[0] != Kind::Reg {
                    return vec![(ValidationRule::Register, format!("bad target register {}", operands[0]))];
                }
            }
            "cbz" | "cbnz" => {
                if kinds[0] != Kind::Reg || kinds[1] != Kind::Symbol {
                    return vec![(ValidationRule::Syntax, format!("bad {} operands", mnemonic))];
                }
            }
            _ => {}
        }
        issues
    }

    fn stack_effect(&self, mnemonic: &str, operands: &[&str]) -> StackEffect {
        match (mnemonic, operands) {
            ("stp" | "ldp", [_, _, address]) => match MEMORY.captures(address) {
                Some(caps) if &caps[1] == "sp" && caps.get(3).is_some() => {
                    let offset: i64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
                    StackEffect::Adjust(-offset)
                }
                _ => StackEffect::None,
            },
            ("ldp" | "stp", [_, _, "[sp]", post]) => {
                immediate(post).map_or(StackEffect::Unknown, |v| StackEffect::Adjust(-v))
            }
            ("sub", ["sp", "sp", amount]) => immediate(amount).map_or(StackEffect::Unknown, StackEffect::Adjust),
            ("add", ["sp", "sp", amount]) => {
                immediate(amount).map_or(StackEffect::Unknown, |v| StackEffect::Adjust(-v))
            }
            ("mov", ["x29", "sp"]) => StackEffect::FrameSet(0),
            ("add", ["x29", "sp", amount]) => immediate(amount).map_or(StackEffect::None, StackEffect::FrameSet),
            ("mov", ["sp", "x29"]) => StackEffect::SetFromFrame(0),
            ("sub", ["sp", "x29", amount]) => {
                immediate(amount).map_or(StackEffect::Unknown, |v| StackEffect::SetFromFrame(-v))
            }
            (_, ["sp", ..]) if !matches!(mnemonic, "cmp" | "str" | "stp") => StackEffect::Unknown,
            _ => StackEffect::None,
        }
    }

    fn is_return(&self, mnemonic: &str) -> bool {
        mnemonic == "ret"
    }

    fn is_barrier(&self, mnemonic: &str, _operands: &[&str]) -> bool {
        matches!(mnemonic, "ret" | "b" | "br")
    }

    fn branch_target<'t>(&self, mnemonic: &str, operands: &[&'t str]) -> Option<&'t str> {
        match mnemonic {
            "b" => operands.first().copied(),
            "cbz" | "cbnz" => operands.get(1).copied(),
            _ => None,
        }
    }

    fn written_registers(&self, mnemonic: &str, operands: &[&str]) -> Vec<String> {
        let written: &[&str] = match mnemonic {
            "mov" | "movz" | "movk" | "movn" | "add" | "sub" | "mul" | "sdiv" | "and" | "orr"
            | "eor" | "cset" | "ldr" | "adrp" | "neg" => &operands[..operands.len().min(1)],
            "ldp" => &operands[..operands.len().min(2)],
            "bl" | "blr" => &["x30"],
            _ => &[],
        };
        written
            .iter()
            .filter(|op| classify(op) == Kind::Reg)
            .map(|op| op.to_string())
            .collect()
    }

    fn saves(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)> {
        match (mnemonic, operands) {
            ("str", [src, address]) => vec![(src.to_string(), address.to_string())],
            ("stp", [first, second, address]) => {
                if address.ends_with('!') {
                    vec![(first.to_string(), "pair.0".to_string()), (second.to_string(), "pair.8".to_string())]
                } else {
                    vec![
                        (first.to_string(), format!("{}.0", address)),
                        (second.to_string(), format!("{}.8", address)),
                    ]
                }
            }
            _ => Vec::new(),
        }
    }

    fn restores(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)> {
        match (mnemonic, operands) {
            ("ldr", [dst, address]) => vec![(dst.to_string(), address.to_string())],
            ("ldp", [first, second, "[sp]", _]) => {
                vec![(first.to_string(), "pair.0".to_string()), (second.to_string(), "pair.8".to_string())]
            }
            ("ldp", [first, second, address]) => vec![
                (first.to_string(), format!("{}.0", address)),
                (second.to_string(), format!("{}.8", address)),
            ],
            _ => Vec::new(),
        }
    }

    fn callee_saved(&self) -> &'static [&'static str] {
        &CALLEE_SAVED
    }

    fn redundant_move(&self, mnemonic: &str, operands: &[&str]) -> bool {
        mnemonic == "mov" && operands.len() == 2 && operands[0] == operands[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::validate::validate;

    fn rules(body: &str) -> Vec<ValidationRule> {
        let text = format!(
            "    .globl f\n    .p2align 2\nf:\n    stp x29, x30, [sp, #-16]!\n    mov x29, sp\n    sub sp, sp, #32\n{}    mov sp, x29\n    ldp x29, x30, [sp], #16\n    ret\n",
            body
        );
        validate(&Arm64Validator, &text).into_iter().map(|i| i.rule).collect()
    }

    #[test]
    fn test_register_names() {
        assert!(is_register("x0") && is_register("x9") && is_register("x30"));
        assert!(!is_register("x31") && !is_register("x01") && !is_register("w0"));
    }

    #[test]
    fn test_frame_and_saves() {
        assert!(rules("    str x19, [sp, #8]\n    mov x19, #3\n    ldr x19, [sp, #8]\n").is_empty());
        assert_eq!(rules("    mov x20, #3\n"), vec![ValidationRule::CallingConvention]);
        assert_eq!(
            rules("    str x19, [sp]\n    mov x19, #3\n"),
            vec![ValidationRule::CallingConvention]
        );
    }

    #[test]
    fn test_immediate_ranges() {
        assert_eq!(rules("    add x9, x9, #4096\n"), vec![ValidationRule::ImmediateRange]);
        assert_eq!(rules("    mov x9, #70000\n"), vec![ValidationRule::ImmediateRange]);
        assert!(rules("    mov x9, #-5\n    movz x9, #1, lsl #32\n    movk x9, #65535\n").is_empty());
        assert_eq!(rules("    movk x9, #1, lsl #8\n"), vec![ValidationRule::ImmediateRange]);
        assert_eq!(rules("    ldr x9, [sp, #260]\n"), vec![ValidationRule::ImmediateRange]);
        assert!(rules("    ldr x9, [x10, #-12]\n").is_empty());
    }

    #[test]
    fn test_syntax_and_registers() {
        assert_eq!(rules("    mul x9, x9, #3\n"), vec![ValidationRule::Register]);
        assert_eq!(rules("    add x9, x31, x10\n"), vec![ValidationRule::Register]);
        assert_eq!(rules("    fmadd x9, x9, x9\n"), vec![ValidationRule::Syntax]);
        assert!(rules("    adrp x10, g\n    add x10, x10, :lo12:g\n    cmp x9, #3\n    cset x9, le\n").is_empty());
    }

    #[test]
    fn test_stack_imbalance() {
        let text = "    .globl f\nf:\n    sub sp, sp, #16\n    ret\n";
        let found: Vec<_> = validate(&Arm64Validator, text).into_iter().map(|i| i.rule).collect();
        assert_eq!(found, vec![ValidationRule::StackBalance]);
    }
}
