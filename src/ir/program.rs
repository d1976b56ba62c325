//! Program, function and block containers, plus the class table.

use std::collections::{BTreeMap, BTreeSet};

use super::inst::{Inst, Phi, Terminator};
use super::types::{Type, Value, ValueKey};

/// Size of the runtime object header preceding attribute storage.
pub const OBJECT_HEADER_SIZE: i32 = 16;

/// Word size of every attribute, capture and spill slot.
pub const WORD_SIZE: i32 = 8;

/// A whole compilation unit.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub classes: ClassTable,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// One class declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub bases: Vec<String>,
    /// Attributes declared directly on this class, in declaration order.
    pub attrs: Vec<(String, Type)>,
    /// Methods declared directly on this class.
    pub methods: Vec<String>,
}

/// Read-only class table shared by every function compilation.
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: BTreeMap<String, ClassInfo>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class: ClassInfo) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }

    /// Full attribute layout, base-class attributes first. Cyclic or missing
    /// bases are ignored.
    pub fn layout(&self, name: &str) -> Vec<(String, Type)> {
        let mut out = Vec::new();
        let mut visiting = BTreeSet::new();
        self.collect_layout(name, &mut out, &mut visiting);
        out
    }

    fn collect_layout(
        &self,
        name: &str,
        out: &mut Vec<(String, Type)>,
        visiting: &mut BTreeSet<String>,
    ) {
        if !visiting.insert(name.to_string()) {
            return;
        }
        let Some(class) = self.classes.get(name) else {
            return;
        };
        for base in &class.bases {
            self.collect_layout(base, out, visiting);
        }
        for (attr, ty) in &class.attrs {
            if !out.iter().any(|(existing, _)| existing == attr) {
                out.push((attr.clone(), ty.clone()));
            }
        }
    }

    /// Byte offset of an attribute from the object base.
    pub fn attr_offset(&self, class: &str, attr: &str) -> Option<i32> {
        self.layout(class)
            .iter()
            .position(|(name, _)| name == attr)
            .map(|k| OBJECT_HEADER_SIZE + WORD_SIZE * k as i32)
    }

    pub fn attr_type(&self, class: &str, attr: &str) -> Option<Type> {
        self.layout(class)
            .into_iter()
            .find(|(name, _)| name == attr)
            .map(|(_, ty)| ty)
    }

    /// Allocation size of an instance including the header.
    pub fn object_size(&self, class: &str) -> i64 {
        (OBJECT_HEADER_SIZE + WORD_SIZE * self.layout(class).len() as i32) as i64
    }

    /// Symbol implementing `method` for `class`: the class itself first, then
    /// its bases depth-first.
    pub fn resolve_method(&self, class: &str, method: &str) -> Option<String> {
        let mut visiting = BTreeSet::new();
        self.resolve_method_in(class, method, &mut visiting)
    }

    fn resolve_method_in(
        &self,
        class: &str,
        method: &str,
        visiting: &mut BTreeSet<String>,
    ) -> Option<String> {
        if !visiting.insert(class.to_string()) {
            return None;
        }
        let info = self.classes.get(class)?;
        if info.methods.iter().any(|m| m == method) {
            return Some(method_symbol(class, method));
        }
        info.bases
            .iter()
            .find_map(|base| self.resolve_method_in(base, method, visiting))
    }
}

/// Symbol name of a method lowered to a free function.
pub fn method_symbol(class: &str, method: &str) -> String {
    format!("{}_{}", class, method)
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// Facts recorded by the optimizer for later stages. None of them change
/// what the code generators emit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionHints {
    pub inline_candidate: bool,
    /// Hot and inlinable according to the profile.
    pub hot: bool,
    /// Allocations that never escape the function.
    pub non_escaping: BTreeSet<u32>,
    /// Loop headers whose bodies are pure arithmetic/memory.
    pub vectorizable_loops: Vec<String>,
    /// Loop headers that were unrolled.
    pub unrolled_loops: Vec<String>,
    /// Blocks the profile reports as hot loops.
    pub hot_blocks: Vec<String>,
}

/// A function in block form.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub blocks: Vec<Block>,
    pub hints: FunctionHints,
    next_temp: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            blocks: Vec::new(),
            hints: FunctionHints::default(),
            next_temp: 0,
        }
    }

    /// Allocate a fresh temporary.
    pub fn new_temp(&mut self, ty: Type) -> Value {
        let id = self.next_temp;
        self.next_temp += 1;
        Value::Temp { id, ty }
    }

    /// Make sure future temporaries do not collide with `id`.
    pub fn reserve_temp(&mut self, id: u32) {
        self.next_temp = self.next_temp.max(id + 1);
    }

    pub fn temp_count(&self) -> u32 {
        self.next_temp
    }

    pub fn param_value(&self, index: usize) -> Option<Value> {
        self.params
            .get(index)
            .map(|p| Value::param(index as u32, p.name.clone(), p.ty.clone()))
    }

    pub fn entry(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn block(&self, label: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn block_mut(&mut self, label: &str) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.label == label)
    }

    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }

    /// Number of places each value is read, counting phi incomings and
    /// terminators.
    pub fn use_counts(&self) -> hashbrown::HashMap<ValueKey, usize> {
        let mut counts = hashbrown::HashMap::new();
        for block in &self.blocks {
            let phi_uses = block.phis.iter().flat_map(|p| p.incoming.iter().map(|(_, v)| v));
            let inst_uses = block.insts.iter().flat_map(|i| i.uses());
            for value in phi_uses.chain(inst_uses).chain(block.term.uses()) {
                if let Some(key) = value.key() {
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Replace every read of `key` with `replacement`.
    pub fn replace_uses(&mut self, key: ValueKey, replacement: &Value) {
        for block in &mut self.blocks {
            for phi in &mut block.phis {
                for (_, value) in &mut phi.incoming {
                    if value.key() == Some(key) {
                        *value = replacement.clone();
                    }
                }
            }
            for inst in &mut block.insts {
                for value in inst.uses_mut() {
                    if value.key() == Some(key) {
                        *value = replacement.clone();
                    }
                }
            }
            for value in block.term.uses_mut() {
                if value.key() == Some(key) {
                    *value = replacement.clone();
                }
            }
        }
    }
}

/// A basic block.
#[derive(Debug, Clone)]
pub struct Block {
    pub label: String,
    pub phis: Vec<Phi>,
    pub insts: Vec<Inst>,
    pub term: Terminator,
    /// Derived by the CFG pass.
    pub preds: Vec<String>,
    /// Derived by the CFG pass.
    pub succs: Vec<String>,
}

impl Block {
    pub fn new(label: impl Into<String>, term: Terminator) -> Self {
        Self {
            label: label.into(),
            phis: Vec::new(),
            insts: Vec::new(),
            term,
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shapes() -> ClassTable {
        let mut table = ClassTable::new();
        table.insert(ClassInfo {
            name: "Shape".to_string(),
            bases: vec![],
            attrs: vec![("id".to_string(), Type::Int)],
            methods: vec!["area".to_string(), "describe".to_string()],
        });
        table.insert(ClassInfo {
            name: "Rect".to_string(),
            bases: vec!["Shape".to_string()],
            attrs: vec![("w".to_string(), Type::Int), ("h".to_string(), Type::Int)],
            methods: vec!["area".to_string()],
        });
        table
    }

    #[test]
    fn test_layout_puts_base_attributes_first() {
        let table = shapes();
        assert_eq!(table.attr_offset("Rect", "id"), Some(16));
        assert_eq!(table.attr_offset("Rect", "w"), Some(24));
        assert_eq!(table.attr_offset("Rect", "h"), Some(32));
        assert_eq!(table.attr_offset("Rect", "missing"), None);
        assert_eq!(table.object_size("Rect"), 40);
    }

    #[test]
    fn test_method_resolution_walks_bases() {
        let table = shapes();
        assert_eq!(table.resolve_method("Rect", "area").as_deref(), Some("Rect_area"));
        assert_eq!(
            table.resolve_method("Rect", "describe").as_deref(),
            Some("Shape_describe")
        );
        assert_eq!(table.resolve_method("Rect", "volume"), None);
    }

    #[test]
    fn test_cyclic_bases_terminate() {
        let mut table = ClassTable::new();
        table.insert(ClassInfo {
            name: "A".to_string(),
            bases: vec!["B".to_string()],
            attrs: vec![("a".to_string(), Type::Int)],
            methods: vec![],
        });
        table.insert(ClassInfo {
            name: "B".to_string(),
            bases: vec!["A".to_string()],
            attrs: vec![("b".to_string(), Type::Int)],
            methods: vec![],
        });
        assert_eq!(table.layout("A").len(), 2);
        assert_eq!(table.resolve_method("A", "nothing"), None);
    }

    #[test]
    fn test_replace_uses_and_counts() {
        let mut func = Function::new("f", vec![], Type::Int);
        let t0 = func.new_temp(Type::Int);
        let t1 = func.new_temp(Type::Int);
        let mut block = Block::new("entry", Terminator::Return(Some(t1.clone())));
        block.insts.push(Inst::BinOp {
            dest: t1.clone(),
            op: crate::ir::BinaryOp::Add,
            lhs: t0.clone(),
            rhs: t0.clone(),
        });
        func.blocks.push(block);

        let counts = func.use_counts();
        assert_eq!(counts.get(&ValueKey::Temp(0)), Some(&2));

        func.replace_uses(ValueKey::Temp(0), &Value::int(4));
        assert_eq!(func.use_counts().get(&ValueKey::Temp(0)), None);
    }
}
