//! Checks for the riscv64 emitter's output.

use std::sync::LazyLock;

use regex::Regex;

use super::ABI_NAMES;
use crate::codegen::validate::{AsmValidator, StackEffect, ValidationRule};

/// `offset(base)` with an optional offset.
static MEMORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+)?\(([a-z0-9]+)\)$").expect("memory operand pattern"));

static IMMEDIATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+$").expect("immediate pattern"));

static SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_.$][\w.$]*$").expect("symbol pattern"));

const CALLEE_SAVED: [&str; 12] = [
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
];

/// ABI name of a register written either way, `None` if it is not one.
fn canonical(name: &str) -> Option<&'static str> {
    if name == "fp" {
        return Some("s0");
    }
    if let Some(abi) = ABI_NAMES.iter().find(|abi| **abi == name) {
        return Some(abi);
    }
    let digits = name.strip_prefix('x')?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = digits.parse().ok()?;
    ABI_NAMES.get(n).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Reg,
    Imm,
    Mem,
    Symbol,
}

fn classify(operand: &str) -> Option<Kind> {
    if canonical(operand).is_some() {
        Some(Kind::Reg)
    } else if IMMEDIATE.is_match(operand) {
        Some(Kind::Imm)
    } else if operand.ends_with(')') {
        Some(Kind::Mem)
    } else if SYMBOL.is_match(operand) {
        Some(Kind::Symbol)
    } else {
        None
    }
}

fn fits_12(value: i64) -> bool {
    (-2048..=2047).contains(&value)
}

/// Operand shapes accepted per mnemonic.
fn shape(mnemonic: &str) -> Option<&'static [Kind]> {
    use Kind::*;
    Some(match mnemonic {
        "ret" => &[],
        "j" | "call" | "tail" => &[Symbol],
        "jalr" | "jr" => &[Reg],
        "mv" | "seqz" | "snez" | "neg" => &[Reg, Reg],
        "li" | "lui" => &[Reg, Imm],
        "lla" | "la" | "beqz" | "bnez" => &[Reg, Symbol],
        "ld" | "sd" => &[Reg, Mem],
        "add" | "sub" | "mul" | "div" | "and" | "or" | "xor" | "slt" | "sltu" => &[Reg, Reg, Reg],
        "addi" | "addiw" | "andi" | "ori" | "xori" | "slti" | "sltiu" | "slli" | "srai" => {
            &[Reg, Reg, Imm]
        }
        _ => return None,
    })
}

pub struct Riscv64Validator;

impl AsmValidator for Riscv64Validator {
    fn comment_prefix(&self) -> &'static str {
        "#"
    }

    fn check(&self, mnemonic: &str, operands: &[&str]) -> Vec<(ValidationRule, String)> {
        let Some(expected) = shape(mnemonic) else {
            return vec![(ValidationRule::Syntax, format!("unknown mnemonic {}", mnemonic))];
        };
        if expected.len() != operands.len() {
            return vec![(
                ValidationRule::Syntax,
                format!("{} does not take {} operand(s)", mnemonic, operands.len()),
            )];
        }
        let mut issues = Vec::new();
        for (operand, want) in operands.iter().zip(expected) {
            let found = classify(operand);
            if found == Some(*want) {
                continue;
            }
            let rule = if *want == Kind::Reg || found == Some(Kind::Reg) {
                ValidationRule::Register
            } else if *want == Kind::Mem {
                ValidationRule::Addressing
            } else {
                ValidationRule::Syntax
            };
            issues.push((rule, format!("unexpected operand {} for {}", operand, mnemonic)));
        }
        if !issues.is_empty() {
            return issues;
        }

        match mnemonic {
            "ld" | "sd" => match MEMORY.captures(operands[1]) {
                Some(caps) => {
                    if canonical(&caps[2]).is_none() {
                        issues.push((ValidationRule::Register, format!("bad base register {}", &caps[2])));
                    }
                    let offset: i64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
                    if !fits_12(offset) {
                        issues.push((
                            ValidationRule::ImmediateRange,
                            format!("offset {} exceeds 12 bits", offset),
                        ));
                    }
                }
                None => issues.push((
                    ValidationRule::Addressing,
                    format!("malformed address {}", operands[1]),
                )),
            },
            "lui" => {
                let v: i64 = operands[1].parse().unwrap_or(-1);
                if !(0..=0xfffff).contains(&v) {
                    issues.push((ValidationRule::ImmediateRange, format!("lui immediate {} exceeds 20 bits", v)));
                }
            }
            "slli" | "srai" => {
                let v: i64 = operands[2].parse().unwrap_or(-1);
                if !(0..=63).contains(&v) {
                    issues.push((ValidationRule::ImmediateRange, format!("shift amount {} out of range", v)));
                }
            }
            "li" => {}
            _ => {
                if let Some(Kind::Imm) = expected.last() {
                    let v: i64 = operands[operands.len() - 1].parse().unwrap_or(i64::MAX);
                    if !fits_12(v) {
                        issues.push((
                            ValidationRule::ImmediateRange,
                            format!("{} immediate {} exceeds 12 bits", mnemonic, v),
                        ));
                    }
                }
            }
        }
        issues
    }

    fn stack_effect(&self, mnemonic: &str, operands: &[&str]) -> StackEffect {
        let dst = operands.first().and_then(|op| canonical(op));
        let src = operands.get(1).and_then(|op| canonical(op));
        let imm = operands.get(2).and_then(|op| op.parse::<i64>().ok());
        match (mnemonic, dst, src) {
            ("addi", Some("sp"), Some("sp")) => imm.map_or(StackEffect::Unknown, |v| StackEffect::Adjust(-v)),
            ("addi", Some("s0"), Some("sp")) => imm.map_or(StackEffect::None, StackEffect::FrameSet),
            ("mv", Some("s0"), Some("sp")) => StackEffect::FrameSet(0),
            ("addi", Some("sp"), Some("s0")) => imm.map_or(StackEffect::Unknown, StackEffect::SetFromFrame),
            ("mv", Some("sp"), Some("s0")) => StackEffect::SetFromFrame(0),
            (_, Some("sp"), _) if !matches!(mnemonic, "sd" | "beqz" | "bnez") => StackEffect::Unknown,
            _ => StackEffect::None,
        }
    }

    fn is_return(&self, mnemonic: &str) -> bool {
        mnemonic == "ret"
    }

    fn is_barrier(&self, mnemonic: &str, _operands: &[&str]) -> bool {
        matches!(mnemonic, "ret" | "j" | "jr" | "tail")
    }

    fn branch_target<'t>(&self, mnemonic: &str, operands: &[&'t str]) -> Option<&'t str> {
        match mnemonic {
            "j" => operands.first().copied(),
            "beqz" | "bnez" => operands.get(1).copied(),
            _ => None,
        }
    }

    fn written_registers(&self, mnemonic: &str, operands: &[&str]) -> Vec<String> {
        match mnemonic {
            "call" | "jalr" => vec!["ra".to_string()],
            "sd" | "j" | "jr" | "tail" | "beqz" | "bnez" | "ret" => Vec::new(),
            _ => operands
                .first()
                .and_then(|op| canonical(op))
                .filter(|name| *name != "zero")
                .map(|name| vec![name.to_string()])
                .unwrap_or_default(),
        }
    }

    fn saves(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)> {
        match (mnemonic, operands) {
            ("sd", [src, address]) => canonical(src)
                .map(|name| vec![(name.to_string(), address.to_string())])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn restores(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)> {
        match (mnemonic, operands) {
            ("ld", [dst, address]) => canonical(dst)
                .map(|name| vec![(name.to_string(), address.to_string())])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn callee_saved(&self) -> &'static [&'static str] {
        &CALLEE_SAVED
    }

    fn redundant_move(&self, mnemonic: &str, operands: &[&str]) -> bool {
        mnemonic == "mv" && operands.len() == 2 && canonical(operands[0]) == canonical(operands[1])
    }
}
