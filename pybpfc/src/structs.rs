//! Struct pass (SPEC_FULL §4.3). Grounded on
//! `original_source/pythonbpf/structs/structs_pass.py` and `struct_type.py`.

use std::collections::HashMap;

use crate::ast::{ClassDef, TypeAnnotation};
use crate::decorators::Classified;
use crate::error::Result;
use crate::types::{deduce_type, IrType};

/// A struct descriptor: ordered fields, and the total size computed with natural alignment and
/// trailing pad to a multiple of 8 (SPEC_FULL §3, invariant 4).
#[derive(Debug, Clone)]
pub struct StructDescriptor {
    pub name: String,
    pub fields: Vec<(String, IrType)>,
    pub size: u32,
}

impl StructDescriptor {
    /// Zero-based field index by declaration order (SPEC_FULL §9 "never rely on any
    /// source-language attribute ordering property").
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn field_type(&self, name: &str) -> Option<&IrType> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// The byte offset of a field, recomputed by replaying the same padding walk used to
    /// compute `size` (kept as a pure function of `fields` rather than cached, since fields
    /// never change after construction).
    pub fn field_offset(&self, name: &str) -> Option<u32> {
        let mut offset = 0u32;
        for (fname, ty) in &self.fields {
            let align = ty.align();
            offset = pad_to(offset, align);
            if fname == name {
                return Some(offset);
            }
            offset += ty.size().unwrap_or(8);
        }
        None
    }
}

fn pad_to(offset: u32, align: u32) -> u32 {
    if align == 0 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

pub type StructTable = HashMap<String, StructDescriptor>;

pub fn run(classified: &[Classified<'_>]) -> Result<StructTable> {
    let mut table = StructTable::new();
    for c in classified {
        if c.kind != crate::decorators::Classification::Struct {
            continue;
        }
        if let crate::ast::DeclKind::Class(class_def) = &c.decl.kind {
            let descriptor = build_struct(class_def)?;
            log::info!("registered struct {}", descriptor.name);
            table.insert(descriptor.name.clone(), descriptor);
        }
    }
    Ok(table)
}

fn build_struct(class_def: &ClassDef) -> Result<StructDescriptor> {
    let mut fields = Vec::with_capacity(class_def.fields.len());
    for field in &class_def.fields {
        let ty = match &field.annotation {
            TypeAnnotation::Str(n) => IrType::Array(Box::new(IrType::I8), *n),
            TypeAnnotation::Name(name) => deduce_type(name, field.span)?,
        };
        fields.push((field.name.clone(), ty));
    }

    let mut offset = 0u32;
    for (_, ty) in &fields {
        let align = ty.align();
        offset = pad_to(offset, align);
        offset += ty.size().unwrap_or(8);
    }
    let size = pad_to(offset, 8);

    Ok(StructDescriptor {
        name: class_def.name.clone(),
        fields,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_data_t_layout() {
        let class_def = ClassDef {
            name: "data_t".to_string(),
            fields: vec![
                field("pid", TypeAnnotation::Name("c_uint64".to_string())),
                field("ts", TypeAnnotation::Name("c_uint64".to_string())),
                field("comm", TypeAnnotation::Str(16)),
            ],
        };
        let descriptor = build_struct(&class_def).unwrap();
        assert_eq!(descriptor.size, 32);
        assert_eq!(descriptor.field_offset("pid"), Some(0));
        assert_eq!(descriptor.field_offset("ts"), Some(8));
        assert_eq!(descriptor.field_offset("comm"), Some(16));
    }

    fn field(name: &str, annotation: TypeAnnotation) -> crate::ast::FieldDecl {
        crate::ast::FieldDecl {
            span: crate::error::Span::default(),
            name: name.to_string(),
            annotation,
        }
    }
}
