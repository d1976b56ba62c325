//! Profile-guided marks and block layout.
//!
//! Profiles are JSON files produced by an instrumented run:
//!
//! ```json
//! { "functions": { "main": { "name": "main", "calls": 1, "total_cycles": 900, "inlinable": false } },
//!   "hotspots": [ { "function": "main", "block": "for_body_0", "count": 800, "percent": 42.5 } ] }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{CompileError, CompileResult};
use crate::ir::{Block, Function};

use super::Pass;

/// Call count above which an inlinable function is hot.
pub const HOT_CALL_THRESHOLD: u64 = 1000;

/// Hotspot share above which a block counts as a hot loop.
pub const HOT_LOOP_PERCENT: f64 = 10.0;

/// Hotspot share above which a block is moved forward in the layout.
pub const HOT_BLOCK_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub functions: HashMap<String, FunctionProfile>,
    #[serde(default)]
    pub hotspots: Vec<Hotspot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionProfile {
    pub name: String,
    #[serde(default)]
    pub calls: u64,
    #[serde(default)]
    pub total_cycles: u64,
    #[serde(default)]
    pub inlinable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub function: String,
    pub block: String,
    #[serde(default)]
    pub count: u64,
    pub percent: f64,
}

impl Profile {
    pub fn hotspots_for<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a Hotspot> + 'a {
        self.hotspots.iter().filter(move |h| h.function == function)
    }
}

/// Read and parse a profile.
pub fn read_profile(path: &Path) -> CompileResult<Profile> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|err| CompileError::Profile {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Read a profile, logging a warning and returning `None` when it cannot be
/// used.
pub fn load_profile(path: &Path) -> Option<Profile> {
    match read_profile(path) {
        Ok(profile) => {
            log::info!(
                "Loaded profile {} ({} functions, {} hotspots)",
                path.display(),
                profile.functions.len(),
                profile.hotspots.len()
            );
            Some(profile)
        }
        Err(err) => {
            log::warn!("Skipping profile-guided optimization: {}", err);
            None
        }
    }
}

pub struct ProfileGuided<'a> {
    profile: &'a Profile,
}

impl<'a> ProfileGuided<'a> {
    pub fn new(profile: &'a Profile) -> Self {
        Self { profile }
    }
}

impl Pass for ProfileGuided<'_> {
    fn name(&self) -> &'static str {
        "pgo"
    }

    fn run(&self, func: &mut Function) -> bool {
        if let Some(stats) = self.profile.functions.get(&func.name) {
            func.hints.hot = stats.calls > HOT_CALL_THRESHOLD && stats.inlinable;
            if func.hints.hot {
                log::debug!("{} is hot ({} calls)", func.name, stats.calls);
            }
        }

        let name = func.name.clone();
        let mut hotspots: Vec<&Hotspot> = self
            .profile
            .hotspots_for(&name)
            .filter(|h| func.block(&h.block).is_some())
            .collect();

        func.hints.hot_blocks = hotspots
            .iter()
            .filter(|h| h.percent > HOT_LOOP_PERCENT)
            .map(|h| h.block.clone())
            .collect();

        hotspots.retain(|h| h.percent > HOT_BLOCK_PERCENT);
        hotspots.sort_by(|a, b| b.percent.total_cmp(&a.percent));
        reorder_blocks(func, hotspots.iter().map(|h| h.block.as_str()))
    }
}

/// Move `hot` blocks (in order) right after the entry; the rest keep their
/// relative order. Returns whether the layout changed.
fn reorder_blocks<'h>(func: &mut Function, hot: impl Iterator<Item = &'h str>) -> bool {
    if func.blocks.len() < 3 {
        return false;
    }
    let mut order: Vec<usize> = vec![0];
    for label in hot {
        if let Some(index) = func.block_index(label) {
            if !order.contains(&index) {
                order.push(index);
            }
        }
    }
    for index in 1..func.blocks.len() {
        if !order.contains(&index) {
            order.push(index);
        }
    }
    if order.iter().enumerate().all(|(pos, &index)| pos == index) {
        return false;
    }

    let mut slots: Vec<Option<Block>> = func.blocks.drain(..).map(Some).collect();
    func.blocks = order.iter().filter_map(|&i| slots[i].take()).collect();
    log::debug!(
        "{}: profile layout {:?}",
        func.name,
        func.blocks.iter().map(|b| b.label.as_str()).collect::<Vec<_>>()
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::ssa_function;

    fn profile() -> Profile {
        serde_json::from_str(
            r#"{
                "functions": { "f": { "name": "f", "calls": 5000, "total_cycles": 1, "inlinable": true } },
                "hotspots": [
                    { "function": "f", "block": "if_else_0", "count": 10, "percent": 7.5 },
                    { "function": "f", "block": "if_merge_0", "count": 90, "percent": 60.0 },
                    { "function": "f", "block": "entry", "count": 90, "percent": 99.0 },
                    { "function": "g", "block": "if_then_0", "count": 90, "percent": 80.0 }
                ]
            }"#,
        )
        .expect("profile json")
    }

    fn diamond() -> Function {
        ssa_function(
            "def f(x: int) -> int:\n    if x > 0:\n        y = 1\n    else:\n        y = 2\n    return y\n",
            "f",
        )
    }

    #[test]
    fn test_layout_and_marks() {
        let profile = profile();
        let mut func = diamond();
        assert!(ProfileGuided::new(&profile).run(&mut func));
        let labels: Vec<&str> = func.blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["entry", "if_merge_0", "if_else_0", "if_then_0"]);
        assert!(func.hints.hot);
        assert_eq!(func.hints.hot_blocks, vec!["if_merge_0".to_string(), "entry".to_string()]);
    }

    #[test]
    fn test_cold_function_is_unchanged() {
        let profile = Profile::default();
        let mut func = diamond();
        assert!(!ProfileGuided::new(&profile).run(&mut func));
        assert!(!func.hints.hot);
    }

    #[test]
    fn test_missing_fields_default() {
        let profile: Profile =
            serde_json::from_str(r#"{ "functions": { "f": { "name": "f" } } }"#).expect("json");
        assert_eq!(profile.functions["f"].calls, 0);
        assert!(profile.hotspots.is_empty());
    }
}
