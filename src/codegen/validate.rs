// Every emitted module is read back before it is handed to the assembler. The
// text is parsed line by line into labels, directives and instructions; the
// per-architecture validator checks each instruction in isolation (mnemonic,
// operand count, register names, addressing forms, immediate ranges) and
// describes its effect on the stack pointer, the frame pointer and the
// callee-saved registers. The generic walk here follows those effects through
// each function: the stack has to be balanced at every return, and every
// callee-saved register a function writes has to be saved before the first
// write and restored before every return.

//! Assembly validation shared by all targets.

use std::fmt;

use hashbrown::{HashMap, HashSet};

/// Category of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationRule {
    Syntax,
    Register,
    CallingConvention,
    StackBalance,
    Addressing,
    ImmediateRange,
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationRule::Syntax => "syntax",
            ValidationRule::Register => "register",
            ValidationRule::CallingConvention => "calling-convention",
            ValidationRule::StackBalance => "stack-balance",
            ValidationRule::Addressing => "addressing",
            ValidationRule::ImmediateRange => "immediate-range",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub rule: ValidationRule,
    /// 1-based line number in the checked text.
    pub line: usize,
    pub message: String,
    pub text: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: [{}] {}: `{}`",
            self.line,
            self.rule,
            self.message,
            self.text.trim()
        )
    }
}

/// One parsed source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'t> {
    Empty,
    Label(&'t str),
    Directive {
        name: &'t str,
        args: &'t str,
    },
    Instruction {
        mnemonic: &'t str,
        operands: Vec<&'t str>,
    },
}

/// Split an operand list on the commas outside of parentheses and brackets.
pub fn split_operands(text: &str) -> Vec<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let mut operands = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                operands.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    operands.push(text[start..].trim());
    operands
}

pub fn parse_line<'t>(line: &'t str, comment: &str) -> Line<'t> {
    let code = match line.find(comment) {
        Some(at) => &line[..at],
        None => line,
    };
    let code = code.trim();
    if code.is_empty() {
        return Line::Empty;
    }
    if let Some(label) = code.strip_suffix(':') {
        if !label.contains(char::is_whitespace) {
            return Line::Label(label);
        }
    }
    let (head, rest) = match code.find(char::is_whitespace) {
        Some(at) => (&code[..at], code[at..].trim()),
        None => (code, ""),
    };
    if head.starts_with('.') {
        Line::Directive {
            name: head,
            args: rest,
        }
    } else {
        Line::Instruction {
            mnemonic: head,
            operands: split_operands(rest),
        }
    }
}

/// How an instruction moves the stack pointer. Depths count bytes pushed
/// since function entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    None,
    /// The stack grows by this many bytes (negative to shrink).
    Adjust(i64),
    /// The frame pointer is set to `sp + k`.
    FrameSet(i64),
    /// The stack pointer is set to `fp + k`.
    SetFromFrame(i64),
    /// The stack pointer changes by an amount not visible in the text.
    Unknown,
}

/// Architecture-specific knowledge used by [`validate`].
pub trait AsmValidator {
    fn comment_prefix(&self) -> &'static str;

    /// Findings for one instruction in isolation.
    fn check(&self, mnemonic: &str, operands: &[&str]) -> Vec<(ValidationRule, String)>;

    fn stack_effect(&self, mnemonic: &str, operands: &[&str]) -> StackEffect;

    fn is_return(&self, mnemonic: &str) -> bool;

    /// Control never falls through to the next line.
    fn is_barrier(&self, mnemonic: &str, operands: &[&str]) -> bool;

    /// Local label a branch or jump transfers to.
    fn branch_target<'t>(&self, mnemonic: &str, operands: &[&'t str]) -> Option<&'t str>;

    /// Registers written, by canonical name.
    fn written_registers(&self, mnemonic: &str, operands: &[&str]) -> Vec<String>;

    /// Registers stored to memory, with a key naming the address.
    fn saves(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)>;

    /// Registers loaded from memory, with a key naming the address.
    fn restores(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)>;

    /// Callee-saved registers by canonical name, frame pointer included.
    fn callee_saved(&self) -> &'static [&'static str];

    /// Directives the emitters produce.
    fn known_directive(&self, name: &str) -> bool {
        matches!(
            name,
            ".text" | ".data" | ".section" | ".globl" | ".p2align" | ".align" | ".type" | ".size"
        )
    }

    /// Register-to-register move with equal operands.
    fn redundant_move(&self, _mnemonic: &str, _operands: &[&str]) -> bool {
        false
    }
}

/// Per-function walk state.
struct FunctionState {
    name: String,
    depth: Option<i64>,
    fp_depth: Option<i64>,
    body_depth: Option<i64>,
    after_barrier: bool,
    label_depths: HashMap<String, i64>,
    saved: HashMap<String, String>,
    written: HashSet<String>,
    restored: HashSet<String>,
    reported: HashSet<String>,
}

impl FunctionState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            depth: Some(0),
            fp_depth: None,
            body_depth: None,
            after_barrier: false,
            label_depths: HashMap::new(),
            saved: HashMap::new(),
            written: HashSet::new(),
            restored: HashSet::new(),
            reported: HashSet::new(),
        }
    }

    fn address_key(address: &str, depth: Option<i64>) -> String {
        match depth {
            Some(depth) => format!("{}@{}", address, depth),
            None => format!("{}@?", address),
        }
    }
}

fn valid_label(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

/// Check `text` and return every finding in line order.
pub fn validate(validator: &dyn AsmValidator, text: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut pending_global: Option<String> = None;
    let mut state: Option<FunctionState> = None;
    let callee_saved: HashSet<&str> = validator.callee_saved().iter().copied().collect();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let mut report = |rule: ValidationRule, message: String| {
            issues.push(ValidationIssue {
                rule,
                line,
                message,
                text: raw.to_string(),
            })
        };

        match parse_line(raw, validator.comment_prefix()) {
            Line::Empty => {}
            Line::Directive { name, args } => {
                if !validator.known_directive(name) {
                    report(ValidationRule::Syntax, format!("unknown directive {}", name));
                } else if name == ".globl" {
                    pending_global = Some(args.to_string());
                }
            }
            Line::Label(label) => {
                if !valid_label(label) {
                    report(ValidationRule::Syntax, format!("malformed label {}", label));
                    continue;
                }
                if pending_global.as_deref() == Some(label) {
                    pending_global = None;
                    state = Some(FunctionState::new(label));
                    continue;
                }
                let Some(fs) = state.as_mut() else {
                    continue;
                };
                if fs.body_depth.is_none() {
                    fs.body_depth = fs.depth;
                }
                if fs.after_barrier {
                    fs.depth = fs
                        .label_depths
                        .get(label)
                        .copied()
                        .or(fs.body_depth);
                    fs.after_barrier = false;
                } else if let (Some(known), Some(depth)) = (fs.label_depths.get(label), fs.depth) {
                    if *known != depth {
                        report(
                            ValidationRule::StackBalance,
                            format!("{} is reached with stack depths {} and {}", label, known, depth),
                        );
                    }
                }
                if let Some(depth) = fs.depth {
                    fs.label_depths.entry(label.to_string()).or_insert(depth);
                }
            }
            Line::Instruction { mnemonic, operands } => {
                for (rule, message) in validator.check(mnemonic, &operands) {
                    report(rule, message);
                }
                if validator.redundant_move(mnemonic, &operands) {
                    log::warn!("line {}: redundant move `{}`", line, raw.trim());
                }

                let Some(fs) = state.as_mut() else {
                    report(
                        ValidationRule::Syntax,
                        "instruction outside of any function".to_string(),
                    );
                    continue;
                };
                let before = fs.depth;

                // Saves are only saves while the register still holds the
                // caller's value.
                for (reg, address) in validator.saves(mnemonic, &operands) {
                    if callee_saved.contains(reg.as_str()) && !fs.written.contains(&reg) {
                        fs.saved.insert(reg, FunctionState::address_key(&address, before));
                    }
                }

                match validator.stack_effect(mnemonic, &operands) {
                    StackEffect::None => {}
                    StackEffect::Adjust(bytes) => fs.depth = fs.depth.map(|d| d + bytes),
                    StackEffect::FrameSet(k) => fs.fp_depth = fs.depth.map(|d| d - k),
                    StackEffect::SetFromFrame(k) => fs.depth = fs.fp_depth.map(|d| d - k),
                    StackEffect::Unknown => fs.depth = None,
                }
                if matches!(fs.depth, Some(d) if d < 0) {
                    report(
                        ValidationRule::StackBalance,
                        format!("stack pointer above the entry value in {}", fs.name),
                    );
                }

                for (reg, address) in validator.restores(mnemonic, &operands) {
                    let key = FunctionState::address_key(&address, fs.depth);
                    if fs.saved.get(&reg) == Some(&key) {
                        fs.restored.insert(reg);
                    }
                }

                for reg in validator.written_registers(mnemonic, &operands) {
                    if !callee_saved.contains(reg.as_str()) || fs.restored.contains(&reg) {
                        continue;
                    }
                    if !fs.saved.contains_key(&reg) && fs.reported.insert(reg.clone()) {
                        report(
                            ValidationRule::CallingConvention,
                            format!("{} writes callee-saved {} without saving it", fs.name, reg),
                        );
                    }
                    fs.written.insert(reg);
                }

                if let Some(target) = validator.branch_target(mnemonic, &operands) {
                    if let Some(depth) = fs.depth {
                        match fs.label_depths.get(target) {
                            Some(&known) if known != depth => report(
                                ValidationRule::StackBalance,
                                format!("{} is reached with stack depths {} and {}", target, known, depth),
                            ),
                            Some(_) => {}
                            None => {
                                fs.label_depths.insert(target.to_string(), depth);
                            }
                        }
                    }
                }

                if validator.is_return(mnemonic) {
                    if fs.depth != Some(0) {
                        let depth = fs
                            .depth
                            .map_or_else(|| "unknown".to_string(), |d| d.to_string());
                        report(
                            ValidationRule::StackBalance,
                            format!("{} returns with stack depth {}", fs.name, depth),
                        );
                    }
                    let mut missing: Vec<&String> = fs
                        .written
                        .iter()
                        .filter(|reg| fs.saved.contains_key(*reg) && !fs.restored.contains(*reg))
                        .collect();
                    missing.sort();
                    for reg in missing {
                        report(
                            ValidationRule::CallingConvention,
                            format!("{} returns without restoring {}", fs.name, reg),
                        );
                    }
                    fs.restored.clear();
                }

                fs.after_barrier = validator.is_barrier(mnemonic, &operands);
            }
        }
    }

    if let Some(name) = pending_global {
        issues.push(ValidationIssue {
            rule: ValidationRule::Syntax,
            line: text.lines().count(),
            message: format!("global {} is never defined", name),
            text: String::new(),
        });
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A toy target: `push r`, `pop r`, `set r, imm`, `copy d, s`,
    /// `store r, [addr]`, `load r, [addr]`, `jmp l`, `bnz r, l`, `ret`.
    /// Callee-saved registers are `s0` and `s1`.
    struct Toy;

    impl AsmValidator for Toy {
        fn comment_prefix(&self) -> &'static str {
            ";"
        }

        fn check(&self, mnemonic: &str, operands: &[&str]) -> Vec<(ValidationRule, String)> {
            let expected = match mnemonic {
                "ret" => 0,
                "push" | "pop" | "jmp" => 1,
                "set" | "copy" | "store" | "load" | "bnz" => 2,
                _ => return vec![(ValidationRule::Syntax, format!("unknown mnemonic {}", mnemonic))],
            };
            if operands.len() != expected {
                return vec![(ValidationRule::Syntax, "operand count".to_string())];
            }
            Vec::new()
        }

        fn stack_effect(&self, mnemonic: &str, _operands: &[&str]) -> StackEffect {
            match mnemonic {
                "push" => StackEffect::Adjust(8),
                "pop" => StackEffect::Adjust(-8),
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
                "jmp" => operands.first().copied(),
                "bnz" => operands.get(1).copied(),
                _ => None,
            }
        }

        fn written_registers(&self, mnemonic: &str, operands: &[&str]) -> Vec<String> {
            match mnemonic {
                "set" | "copy" | "load" | "pop" => vec![operands[0].to_string()],
                _ => Vec::new(),
            }
        }

        fn saves(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)> {
            match mnemonic {
                "push" => vec![(operands[0].to_string(), "push".to_string())],
                "store" => vec![(operands[0].to_string(), operands[1].to_string())],
                _ => Vec::new(),
            }
        }

        fn restores(&self, mnemonic: &str, operands: &[&str]) -> Vec<(String, String)> {
            match mnemonic {
                "pop" => vec![(operands[0].to_string(), "push".to_string())],
                "load" => vec![(operands[0].to_string(), operands[1].to_string())],
                _ => Vec::new(),
            }
        }

        fn callee_saved(&self) -> &'static [&'static str] {
            &["s0", "s1"]
        }

        fn redundant_move(&self, mnemonic: &str, operands: &[&str]) -> bool {
            mnemonic == "copy" && operands.first() == operands.get(1)
        }
    }

    fn rules(text: &str) -> Vec<ValidationRule> {
        validate(&Toy, text).into_iter().map(|i| i.rule).collect()
    }

    #[test]
    fn test_parse_line_forms() {
        assert_eq!(parse_line("   ; only a comment", ";"), Line::Empty);
        assert_eq!(parse_line(".Lf.entry:", ";"), Line::Label(".Lf.entry"));
        assert_eq!(
            parse_line("    .globl f", ";"),
            Line::Directive {
                name: ".globl",
                args: "f"
            }
        );
        assert_eq!(
            parse_line("    movq -8(%rbp, %rax), %rbx ; reload", ";"),
            Line::Instruction {
                mnemonic: "movq",
                operands: vec!["-8(%rbp, %rax)", "%rbx"],
            }
        );
        assert_eq!(split_operands("x0, [sp, #16]!"), vec!["x0", "[sp, #16]!"]);
    }

    #[test]
    fn test_balanced_function_passes() {
        let text = "    .text\n    .globl f\nf:\n    push s0\n    set s0, 1\n.Lf.entry:\n    bnz s0, .Lf.out\n    set s0, 2\n.Lf.out:\n    pop s0\n    ret\n";
        assert!(validate(&Toy, text).is_empty(), "{:?}", validate(&Toy, text));
    }

    #[test]
    fn test_unbalanced_return_is_reported() {
        let text = "    .globl f\nf:\n    push s0\n    ret\n";
        let issues = validate(&Toy, text);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].rule, ValidationRule::StackBalance);
        assert_eq!(issues[0].line, 4);
    }

    #[test]
    fn test_callee_saved_discipline() {
        assert_eq!(
            rules("    .globl f\nf:\n    set s1, 3\n    set s1, 4\n    ret\n"),
            vec![ValidationRule::CallingConvention]
        );
        assert_eq!(
            rules("    .globl f\nf:\n    store s1, [w0]\n    set s1, 3\n    ret\n"),
            vec![ValidationRule::CallingConvention]
        );
        assert!(rules(
            "    .globl f\nf:\n    store s1, [w0]\n    set s1, 3\n    load s1, [w0]\n    ret\n"
        )
        .is_empty());
    }

    #[test]
    fn test_label_after_barrier_takes_branch_depth() {
        let text = "    .globl f\nf:\n    push s0\n.Lf.a:\n    bnz s0, .Lf.c\n    jmp .Lf.b\n.Lf.c:\n    pop s0\n    ret\n.Lf.b:\n    pop s0\n    ret\n";
        assert!(validate(&Toy, text).is_empty(), "{:?}", validate(&Toy, text));
    }

    #[test]
    fn test_syntax_findings() {
        let text = "    .bogus\n    .globl f\nf:\n    frob s0\n9bad:\n    ret\n    .globl g\n";
        let found = rules(text);
        assert_eq!(found.iter().filter(|r| **r == ValidationRule::Syntax).count(), 4);
    }
}
