//! Map pass (SPEC_FULL §4.4). Grounded on `original_source/pythonbpf/maps/maps_pass.py` and
//! `maps.py`. Carries the full kernel `bpf_map_type` vocabulary (SPEC_FULL §3) even though only
//! hash, perf-event-array, and ring-buf have registered processors, so the registry can grow
//! without renumbering.

use std::collections::HashMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use once_cell::sync::Lazy;

use crate::ast::{DeclKind, Expr, Stmt};
use crate::debuginfo::DebugInfoGenerator;
use crate::decorators::{Classification, Classified};
use crate::error::{Error, Result};
use crate::ir::{Global, Initializer, Linkage, Module};
use crate::registry::Registry;
use crate::types::IrType;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum BpfMapType {
    Unspec = 0,
    Hash = 1,
    Array = 2,
    ProgArray = 3,
    PerfEventArray = 4,
    PercpuHash = 5,
    PercpuArray = 6,
    StackTrace = 7,
    CgroupArray = 8,
    LruHash = 9,
    LruPercpuHash = 10,
    LpmTrie = 11,
    ArrayOfMaps = 12,
    HashOfMaps = 13,
    Devmap = 14,
    Sockmap = 15,
    Cpumap = 16,
    Xskmap = 17,
    Sockhash = 18,
    CgroupStorage = 19,
    ReuseportSockarray = 20,
    PercpuCgroupStorage = 21,
    Queue = 22,
    Stack = 23,
    SkStorage = 24,
    DevmapHash = 25,
    StructOps = 26,
    Ringbuf = 27,
    InodeStorage = 28,
    TaskStorage = 29,
    BloomFilter = 30,
    UserRingbuf = 31,
    CgrpStorage = 32,
}

/// Parameters accumulated by a map-kind processor (SPEC_FULL §4.4). Field names mirror the
/// constructor-argument vocabulary the source surface uses for each kind.
#[derive(Debug, Clone, Default)]
pub struct MapParams {
    pub kind: Option<BpfMapType>,
    pub key: Option<String>,
    pub value: Option<String>,
    pub key_size: Option<String>,
    pub value_size: Option<String>,
    pub max_entries: Option<i64>,
}

pub struct MapDescriptor {
    pub name: String,
    pub kind: BpfMapType,
}

pub type MapTable = HashMap<String, MapDescriptor>;

type Processor = fn(&str, &[Expr], &[crate::ast::Keyword]) -> MapParams;

static MAP_PROCESSORS: Lazy<Registry<Processor>> = Lazy::new(|| {
    Registry::from_entries([
        ("HashMap", process_hash_map as Processor),
        ("PerfEventArray", process_perf_event_map as Processor),
        ("RingBuf", process_ringbuf_map as Processor),
    ])
});

fn int_arg(e: &Expr) -> Option<i64> {
    match e {
        Expr::Int { value, .. } => Some(*value),
        _ => None,
    }
}

fn name_arg(e: &Expr) -> Option<String> {
    match e {
        Expr::Name { id, .. } => Some(id.clone()),
        _ => None,
    }
}

fn process_hash_map(_name: &str, args: &[Expr], keywords: &[crate::ast::Keyword]) -> MapParams {
    let mut params = MapParams {
        kind: Some(BpfMapType::Hash),
        ..Default::default()
    };
    if let Some(v) = args.first().and_then(name_arg) {
        params.key = Some(v);
    }
    if let Some(v) = args.get(1).and_then(name_arg) {
        params.value = Some(v);
    }
    if let Some(v) = args.get(2).and_then(int_arg) {
        params.max_entries = Some(v);
    }
    for kw in keywords {
        match kw.name.as_str() {
            "key" => params.key = name_arg(&kw.value).or(params.key.take()),
            "value" => params.value = name_arg(&kw.value).or(params.value.take()),
            "max_entries" => params.max_entries = int_arg(&kw.value).or(params.max_entries),
            _ => {}
        }
    }
    params
}

fn process_perf_event_map(_name: &str, args: &[Expr], keywords: &[crate::ast::Keyword]) -> MapParams {
    let mut params = MapParams {
        kind: Some(BpfMapType::PerfEventArray),
        ..Default::default()
    };
    if let Some(v) = args.first().and_then(name_arg) {
        params.key_size = Some(v);
    }
    if let Some(v) = args.get(1).and_then(name_arg) {
        params.value_size = Some(v);
    }
    for kw in keywords {
        match kw.name.as_str() {
            "key_size" => params.key_size = name_arg(&kw.value).or(params.key_size.take()),
            "value_size" => params.value_size = name_arg(&kw.value).or(params.value_size.take()),
            _ => {}
        }
    }
    params
}

fn process_ringbuf_map(_name: &str, args: &[Expr], keywords: &[crate::ast::Keyword]) -> MapParams {
    let mut params = MapParams {
        kind: Some(BpfMapType::Ringbuf),
        ..Default::default()
    };
    if let Some(v) = args.first().and_then(int_arg) {
        params.max_entries = Some(v);
    }
    for kw in keywords {
        if kw.name == "max_entries" {
            params.max_entries = int_arg(&kw.value).or(params.max_entries);
        }
    }
    params
}

/// Number of logical slots in the aggregate: one pointer-sized slot per attribute present.
fn slot_count(params: &MapParams) -> usize {
    [
        params.key.is_some(),
        params.value.is_some(),
        params.key_size.is_some(),
        params.value_size.is_some(),
        params.max_entries.is_some(),
    ]
    .into_iter()
    .filter(|b| *b)
    .count()
    .max(1)
}

pub fn run(classified: &[Classified<'_>], module: &mut Module) -> Result<MapTable> {
    let mut table = MapTable::new();
    for c in classified {
        if c.kind != Classification::Map {
            continue;
        }
        let func = match &c.decl.kind {
            DeclKind::Function(f) => f,
            _ => continue,
        };
        let map_name = func.name.clone();
        log::info!("registered map {}", map_name);

        let return_expr = func
            .body
            .iter()
            .find_map(|s| match s {
                Stmt::Return { value: Some(v), .. } => Some(v),
                _ => None,
            })
            .ok_or_else(|| Error::semantic(c.decl.span, "map must have a return statement"))?;

        let (ctor_name, args, keywords) = match return_expr {
            Expr::Call { func, args, keywords, .. } => match func.as_ref() {
                Expr::Name { id, .. } => (id.clone(), args, keywords),
                _ => return Err(Error::semantic(c.decl.span, "map must return a map constructor call")),
            },
            _ => return Err(Error::semantic(c.decl.span, "map must return a map constructor call")),
        };

        let params = match MAP_PROCESSORS.get(ctor_name.as_str()) {
            Some(processor) => processor(&map_name, args, keywords),
            None => {
                log::warn!("unknown map type {}, defaulting to HashMap", ctor_name);
                process_hash_map(&map_name, args, keywords)
            }
        };

        let kind = params.kind.unwrap_or(BpfMapType::Unspec);
        let global = build_map_global(&map_name, &params);
        let dbg_id = build_map_debug_info(module, &map_name, &params, kind);
        let mut global = global;
        global.dbg_metadata = Some(dbg_id);
        module.globals.push(global);

        table.insert(map_name.clone(), MapDescriptor { name: map_name, kind });
    }
    Ok(table)
}

fn build_map_global(name: &str, params: &MapParams) -> Global {
    let n = slot_count(params);
    let ty = IrType::Array(Box::new(IrType::OpaquePtr), n as u32);
    Global {
        name: name.to_string(),
        ty,
        linkage: Linkage::DsoLocal,
        section: Some(".maps".to_string()),
        align: 8,
        initializer: Initializer::Zero,
        is_constant: false,
        dbg_metadata: None,
    }
}

fn build_map_debug_info(module: &mut Module, name: &str, params: &MapParams, kind: BpfMapType) -> u32 {
    let mut gen = DebugInfoGenerator::new(module);
    let uint_ty = gen.uint_type();
    let ulong_ty = gen.uint64_type();

    let kind_value: u32 = kind.into();
    let type_array = gen.array_type(uint_ty, kind_value as u64);
    let type_ptr = gen.pointer_type(type_array, 64);

    let mut members = Vec::new();
    if params.kind.is_some() {
        members.push(gen.struct_member("type", type_ptr, 0));
    }
    let mut cursor = 64u64;
    if let Some(max_entries) = params.max_entries {
        let arr = gen.array_type(uint_ty, max_entries as u64);
        let ptr = gen.pointer_type(arr, 64);
        members.push(gen.struct_member("max_entries", ptr, cursor));
        cursor += 64;
    }
    for (field, present) in [
        ("key", params.key.is_some()),
        ("value", params.value.is_some()),
        ("key_size", params.key_size.is_some()),
        ("value_size", params.value_size.is_some()),
    ] {
        if present {
            let member = gen.struct_member(field, ulong_ty, cursor);
            members.push(member);
            cursor += 64;
        }
    }

    let struct_ty = gen.struct_type(&members, 64 * members.len() as u64, true);
    gen.global_var(name, struct_ty, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_processor_reads_positional_args() {
        let args = vec![
            Expr::Name {
                span: Default::default(),
                id: "c_uint64".to_string(),
            },
            Expr::Name {
                span: Default::default(),
                id: "c_uint64".to_string(),
            },
            Expr::Int {
                span: Default::default(),
                value: 3,
            },
        ];
        let params = process_hash_map("last", &args, &[]);
        assert_eq!(params.max_entries, Some(3));
        assert_eq!(params.kind, Some(BpfMapType::Hash));
    }

    #[test]
    fn map_type_discriminants_match_kernel_abi() {
        assert_eq!(u32::from(BpfMapType::Hash), 1);
        assert_eq!(u32::from(BpfMapType::Ringbuf), 27);
        assert_eq!(u32::from(BpfMapType::PerfEventArray), 4);
    }
}
