// A CompilationSession belongs to one worker of the driver's pool and lives for
// as long as that worker keeps pulling functions off the queue. The arena backs
// frame bookkeeping during emission; the statistics count what the worker
// lowered, allocated and emitted. Sessions are never shared between threads, so
// a RefCell is enough, and the driver folds every worker's SessionStats together
// after the pool drains.

//! Per-worker compilation sessions and their statistics.

use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

pub struct CompilationSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
    /// Function the worker is emitting, for log context.
    function: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            function: RefCell::new(None),
        }
    }

    /// Scratch arena for emission-time data such as frame layouts.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    pub fn set_current_function(&self, name: &str) {
        *self.function.borrow_mut() = Some(name.to_string());
    }

    pub fn current_function(&self) -> Option<String> {
        self.function.borrow().clone()
    }

    pub fn record_function_compiled(&self, name: &str, asm_lines: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_compiled += 1;
        stats.total_asm_lines += asm_lines;
        if asm_lines > stats.largest_function_lines {
            stats.largest_function_lines = asm_lines;
            stats.largest_function_name = name.to_string();
        }
    }

    /// Count one lowered IR instruction under its kind name.
    pub fn record_instruction_compiled(&self, kind: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_compiled += 1;
        *stats.instruction_counts.entry(kind.to_string()).or_default() += 1;
    }

    pub fn record_phi_moves(&self, count: usize) {
        self.stats.borrow_mut().phi_moves_resolved += count;
    }

    pub fn record_allocation(&self, registers: usize, spills: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.registers_allocated += registers;
        stats.spills_generated += spills;
    }

    pub fn record_call_site(&self, target: &str) {
        self.stats.borrow_mut().total_calls += 1;
        if let Some(caller) = self.function.borrow().as_deref() {
            log::trace!("{} calls {}", caller, target);
        }
    }

    /// Snapshot of the counters so far.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Counters reported by `typthon compile --stats`.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub functions_compiled: usize,
    pub total_asm_lines: usize,
    pub instructions_compiled: usize,
    /// Lowered instructions keyed by IR kind.
    pub instruction_counts: HashMap<String, usize>,
    /// Longest function so far, in assembly lines.
    pub largest_function_lines: usize,
    pub largest_function_name: String,
    /// Moves emitted on edges into phi-carrying blocks.
    pub phi_moves_resolved: usize,
    /// Intervals that received a register.
    pub registers_allocated: usize,
    /// Intervals that went to the stack.
    pub spills_generated: usize,
    pub total_calls: usize,
}

impl SessionStats {
    /// Fold another worker's statistics into these.
    pub fn merge(&mut self, other: &SessionStats) {
        self.functions_compiled += other.functions_compiled;
        self.total_asm_lines += other.total_asm_lines;
        self.instructions_compiled += other.instructions_compiled;
        for (kind, count) in &other.instruction_counts {
            *self.instruction_counts.entry(kind.clone()).or_insert(0) += count;
        }
        if other.largest_function_lines > self.largest_function_lines {
            self.largest_function_lines = other.largest_function_lines;
            self.largest_function_name = other.largest_function_name.clone();
        }
        self.phi_moves_resolved += other.phi_moves_resolved;
        self.registers_allocated += other.registers_allocated;
        self.spills_generated += other.spills_generated;
        self.total_calls += other.total_calls;
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Instructions compiled: {}", self.instructions_compiled)?;
        writeln!(f, "  Assembly lines: {}", self.total_asm_lines)?;
        writeln!(f, "  Phi moves resolved: {}", self.phi_moves_resolved)?;
        writeln!(f, "  Registers allocated: {}", self.registers_allocated)?;
        writeln!(f, "  Spills generated: {}", self.spills_generated)?;
        writeln!(f, "  Call sites: {}", self.total_calls)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} lines)",
                self.largest_function_name, self.largest_function_lines
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

            for (kind, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", kind, count)?;
            }
        }

        Ok(())
    }
}
