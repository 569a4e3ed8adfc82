//! Shared per-function lowering context. Threaded through `expr.rs`, `binops.rs`,
//! `helpers.rs`, and `functions.rs` — the four components that cooperate to lower one BPF
//! program function's body (SPEC_FULL §4.6–§4.8).

use std::collections::{HashMap, HashSet};

use crate::ir::{Function, Module, Value};
use crate::maps::MapTable;
use crate::structs::StructTable;
use crate::types::IrType;

/// A local variable's binding: its stack slot, its semantic type, and — if it is a struct
/// instance — the struct descriptor's name (SPEC_FULL §3 "Local symbol").
#[derive(Debug, Clone)]
pub struct LocalSymbol {
    pub ptr: Value,
    pub ty: IrType,
    pub struct_name: Option<String>,
}

pub struct FnCtx<'a> {
    pub module: &'a mut Module,
    pub func: &'a mut Function,
    pub block: usize,
    pub locals: HashMap<String, LocalSymbol>,
    pub struct_table: &'a StructTable,
    pub map_table: &'a MapTable,
    pub global_names: &'a HashSet<String>,
}

impl<'a> FnCtx<'a> {
    /// Symbol resolution order: local → map → struct → global (SPEC_FULL §3 invariant).
    /// Only locals and maps are directly usable as lowering-time values here; struct/global
    /// membership is consulted by callers that need to know a name's *kind*, not its value.
    pub fn resolve_local(&self, name: &str) -> Option<&LocalSymbol> {
        self.locals.get(name)
    }

    pub fn is_map(&self, name: &str) -> bool {
        self.map_table.contains_key(name)
    }

    pub fn is_struct(&self, name: &str) -> bool {
        self.struct_table.contains_key(name)
    }
}
