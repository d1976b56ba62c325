//! AT&T-syntax checks for the amd64 emitter's output.

use std::sync::LazyLock;

use regex::Regex;

use crate::codegen::validate::{AsmValidator, StackEffect, ValidationRule};

static MEMORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(-?\d+|[A-Za-z_.$][\w.$]*)?\((%[a-z0-9]+)(?:,\s*(%[a-z0-9]+)(?:,\s*([1248]))?)?\)$",
    )
    .expect("memory operand pattern")
});

static IMMEDIATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$(-?\d+)$").expect("immediate pattern"));

static SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_.$][\w.$]*$").expect("symbol pattern"));

const REGISTERS: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

const CALLEE_SAVED: [&str; 6] = ["rbx", "rbp", "r12", "r13", "r14", "r15"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Reg,
    Byte,
    Imm,
    Mem,
    Target,
    Indirect,
    Bad,
}

fn classify(operand: &str) -> Kind {
    if operand == "%al" {
        Kind::Byte
    } else if let Some(name) = operand.strip_prefix('%') {
        if REGISTERS.contains(&name) {
            Kind::Reg
        } else {
            Kind::Bad
        }
    } else if operand.starts_with('$') {
        Kind::Imm
    } else if operand.starts_with('*') {
        Kind::Indirect
    } else if operand.contains('(') {
        Kind::Mem
    } else if SYMBOL.is_match(operand) {
        Kind::Target
    } else {
        Kind::Bad
    }
}

fn register(operand: &str) -> Option<String> {
    match classify(operand) {
        Kind::Reg => operand.strip_prefix('%').map(str::to_string),
        Kind::Byte => Some("rax".to_string()),
        _ => None,
    }
}

fn immediate(operand: &str) -> Option<i64> {
    IMMEDIATE
        .captures(operand)
        .and_then(|caps| caps[1].parse().ok())
}

fn operand_count(mnemonic: &str) -> Option<usize> {
    Some(match mnemonic {
        "ret" | "cqto" => 0,
        "pushq" | "popq" | "negq" | "idivq" | "call" | "jmp" | "je" | "jne" | "sete" | "setne"
        | "setl" | "setle" | "setg" | "setge" => 1,
        "movq" | "movabsq" | "leaq" | "addq" | "subq" | "imulq" | "andq" | "orq" | "xorq"
        | "cmpq" | "testq" | "movzbq" => 2,
        _ => return None,
    })
}

pub struct Amd64Validator;

impl Amd64Validator {
    fn check_operand(&self, operand: &str, issues: &mut Vec<(ValidationRule, String)>) {
        match classify(operand) {
            Kind::Bad => issues.push((
                if operand.starts_with('%') {
                    ValidationRule::Register
                } else {
                    ValidationRule::Syntax
                },
                format!("malformed operand {}", operand),
            )),
            Kind::Imm if immediate(operand).is_none() => {
                issues.push((ValidationRule::Syntax, format!("malformed immediate {}", operand)))
            }
            Kind::Mem => match MEMORY.captures(operand) {
                None => issues.push((
                    ValidationRule::Addressing,
                    format!("malformed memory operand {}", operand),
                )),
                Some(caps) => {
                    let base = &caps[2];
                    let symbolic = caps
                        .get(1)
                        .is_some_and(|d| !d.as_str().starts_with(|c: char| c == '-' || c.is_ascii_digit()));
                    if base == "%rip" {
                        if !symbolic || caps.get(3).is_some() {
                            issues.push((
                                ValidationRule::Addressing,
                                format!("rip-relative operand {} needs a symbol and no index", operand),
                            ));
                        }
                    } else if classify(base) != Kind::Reg {
                        issues.push((ValidationRule::Register, format!("bad base register {}", base)));
                    } else if symbolic {
                        issues.push((
                            ValidationRule::Addressing,
                            format!("absolute symbol address {} is not position independent", operand),
                        ));
                    }
                    if let Some(index) = caps.get(3).map(|m| m.as_str()) {
                        if classify(index) != Kind::Reg || index == "%rsp" {
                            issues.push((ValidationRule::Register, format!("bad index register {}", index)));
                        }
                    }
                }
            },
            _ => {}
        }
    }
}

impl AsmValidator for Amd64Validator {
    fn comment_prefix(&self) -> &'static str {
        "#"
    }

    fn check(&self, mnemonic: &str, operands: &[&str]) -> Vec<(ValidationRule, String)> {
        let mut issues = Vec::new();
        let Some(expected) = operand_count(mnemonic) else {
            issues.push((ValidationRule::Syntax, format!("unknown mnemonic {}", mnemonic)));
            return issues;
        };
        if operands.len() != expected {
            issues.push((
                ValidationRule::Syntax,
                format!("{} takes {} operand(s), found {}", mnemonic, expected, operands.len()),
            ));
            return issues;
        }
        for operand in operands {
            self.check_operand(operand, &mut issues);
        }
        let kinds: Vec<Kind> = operands.iter().map(|op| classify(op)).collect();

        if kinds.iter().filter(|k| **k == Kind::Mem).count() > 1 {
            issues.push((ValidationRule::Addressing, "two memory operands".to_string()));
        }

        let byte_ok = match mnemonic {
            m if m.starts_with("set") => true,
            "movzbq" => kinds[0] == Kind::Byte,
            _ => false,
        };
        if !byte_ok && kinds.contains(&Kind::Byte) {
            issues.push((ValidationRule::Register, "%al in a 64-bit instruction".to_string()));
        }

        match mnemonic {
            m if m.starts_with("set") => {
                if kinds[0] != Kind::Byte {
                    issues.push((ValidationRule::Register, format!("{} needs a byte register", m)));
                }
            }
            "movzbq" => {
                if kinds[1] != Kind::Reg {
                    issues.push((ValidationRule::Syntax, "movzbq needs a register destination".to_string()));
                }
            }
            "call" | "jmp" | "je" | "jne" => {
                let ok = kinds[0] == Kind::Target || (mnemonic == "call" && kinds[0] == Kind::Indirect);
                if !ok {
                    issues.push((ValidationRule::Syntax, format!("bad target {}", operands[0])));
                }
                if kinds[0] == Kind::Indirect && classify(&operands[0][1..]) != Kind::Reg {
                    issues.push((ValidationRule::Register, format!("bad indirect target {}", operands[0])));
                }
            }
            "movabsq" => {
                if kinds[0] != Kind::Imm || kinds[1] != Kind::Reg {
                    issues.push((ValidationRule::Syntax, "movabsq takes $imm64, %reg".to_string()));
                }
            }
            "leaq" => {
                if kinds[0] != Kind::Mem || kinds[1] != Kind::Reg {
                    issues.push((ValidationRule::Addressing, "leaq takes mem, %reg".to_string()));
                }
            }
            "popq" | "negq" | "idivq" | "pushq" => {
                if kinds[0] != Kind::Reg {
                    issues.push((ValidationRule::Syntax, format!("{} takes a register", mnemonic)));
                }
            }
            _ => {}
        }

        if expected == 2 && mnemonic != "movabsq" {
            if kinds[1] == Kind::Imm {
                issues.push((ValidationRule::Syntax, "immediate destination".to_string()));
            }
            if let Some(value) = immediate(operands[0]) {
                if i32::try_from(value).is_err() {
                    issues.push((
                        ValidationRule::ImmediateRange,
                        format!("{} does not fit a sign-extended 32-bit immediate", value),
                    ));
                }
            }
        }
        issues
    }

    fn stack_effect(&self, mnemonic: &str, operands: &[&str]) -> StackEffect {
        match (mnemonic, operands) {
            ("pushq", _) => StackEffect::Adjust(8),
            ("popq", _) => StackEffect::Adjust(-8),
            ("subq", [amount, "%rsp"]) => immediate(amount).map_or(StackEffect::Unknown, StackEffect::Adjust),
            ("addq", [amount, "%rsp"]) => {
                immediate(amount).map_or(StackEffect::Unknown, |v| StackEffect::Adjust(-v))
            }
            ("movq", ["%rsp", "%rbp"]) => StackEffect::FrameSet(0),
            ("movq", ["%rbp", "%rsp"]) => StackEffect::SetFromFrame(0),
            (_, [.., "%rsp"]) if !matches!(mnemonic, "cmpq" | "testq") => StackEffect::Unknown,
            _ => StackEffect::None,
        }
    }

    fn is_return(&self, mnemonic: &str) -> bool {
        mnemonic == "ret"
    }

    fn is_barrier(&self, mnemonic: &str, _operands: &[&str]) -> bool {
        matches!(mnemonic, "ret" | "jmp")
    }

    fn branch_target<'t>(&self, mnemonic: &str, operands: &[&'t str]) -> Option<&'t str> {
        match mnemonic {
            "jmp" | "je" | "jne" => operands.first().copied(),
            _ => None,
        }
    }

    fn written_registers(&self, mnemonic: &str, operands: &[&str]) -> Vec<String> {
        match (mnemonic, operands) {
            ("cmpq" | "testq", _) | ("pushq" | "call" | "jmp" | "je" | "jne" | "ret", _) => Vec::new(),
            ("cqto", _) => vec!["rdx".to_string()],
            ("idivq", _) => vec!["rax".to_string(), "rdx".to_string()],
            (_, [.., dst]) => register(dst).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn saves(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)> {
        match (mnemonic, operands) {
            ("pushq", [src]) => register(src).map(|r| (r, "push".to_string())).into_iter().collect(),
            ("movq", [src, dst]) if classify(dst) == Kind::Mem => {
                register(src).map(|r| (r, dst.to_string())).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn restores(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)> {
        match (mnemonic, operands) {
            ("popq", [dst]) => register(dst).map(|r| (r, "push".to_string())).into_iter().collect(),
            ("movq", [src, dst]) if classify(src) == Kind::Mem => {
                register(dst).map(|r| (r, src.to_string())).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn callee_saved(&self) -> &'static [&'static str] {
        &CALLEE_SAVED
    }

    fn redundant_move(&self, mnemonic: &str, operands: &[&str]) -> bool {
        mnemonic == "movq" && operands.len() == 2 && operands[0] == operands[1]
    }
}
