//! Type descriptor and type deducer (SPEC_FULL §3, §4.2). Grounded on
//! `original_source/pythonbpf/type_deducer.py`'s `ctypes_to_ir`.

use crate::error::{Error, Result, Span};

/// An IR type descriptor. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Int(u32),
    /// A floating-point type of width 32 (`float`) or 64 (`double`). SPEC_FULL §3 lists these
    /// among the primitive widths; no spec operation currently lowers a float-typed value, so
    /// this variant exists for type-deduction completeness rather than arithmetic support.
    Float(u32),
    Ptr(Box<IrType>),
    /// An opaque pointer with no pointee type recorded (BPF helper ABI casts routinely need
    /// this rather than a typed pointer).
    OpaquePtr,
    Array(Box<IrType>, u32),
    Struct(String),
}

impl IrType {
    pub const I1: IrType = IrType::Int(1);
    pub const I8: IrType = IrType::Int(8);
    pub const I32: IrType = IrType::Int(32);
    pub const I64: IrType = IrType::Int(64);

    pub fn ptr_to(self) -> IrType {
        IrType::Ptr(Box::new(self))
    }

    pub fn byte_ptr() -> IrType {
        IrType::I8.ptr_to()
    }

    /// Size in bytes, where knowable without a struct table lookup.
    pub fn size(&self) -> Option<u32> {
        match self {
            IrType::Int(bits) | IrType::Float(bits) => Some((*bits).div_ceil(8).max(1)),
            IrType::Ptr(_) | IrType::OpaquePtr => Some(8),
            IrType::Array(elem, n) => elem.size().map(|s| s * n),
            IrType::Struct(_) => None,
        }
    }

    /// Natural alignment in bytes.
    pub fn align(&self) -> u32 {
        match self {
            IrType::Int(bits) | IrType::Float(bits) => {
                (*bits).div_ceil(8).max(1).next_power_of_two().min(8)
            }
            IrType::Ptr(_) | IrType::OpaquePtr => 8,
            IrType::Array(elem, _) => elem.align(),
            IrType::Struct(_) => 8,
        }
    }

    pub fn llvm_name(&self) -> String {
        match self {
            IrType::Int(bits) => format!("i{}", bits),
            IrType::Float(32) => "float".to_string(),
            IrType::Float(bits) => {
                debug_assert_eq!(*bits, 64, "only 32/64-bit floats are recognized");
                "double".to_string()
            }
            IrType::Ptr(_) | IrType::OpaquePtr => "ptr".to_string(),
            IrType::Array(elem, n) => format!("[{} x {}]", n, elem.llvm_name()),
            IrType::Struct(name) => format!("%struct.{}", name),
        }
    }
}

/// Maps a finite vocabulary of source-level type names to IR types (SPEC_FULL §4.2). Pure
/// function, no state.
pub fn deduce_type(name: &str, span: Span) -> Result<IrType> {
    match name {
        "c_int8" | "c_uint8" | "c_char" => Ok(IrType::I8),
        "c_int16" | "c_uint16" => Ok(IrType::Int(16)),
        "c_int32" | "c_uint32" => Ok(IrType::I32),
        "c_int64" | "c_uint64" | "c_long" | "c_ulong" => Ok(IrType::I64),
        "c_bool" => Ok(IrType::I1),
        "c_float" => Ok(IrType::Float(32)),
        "c_double" => Ok(IrType::Float(64)),
        // Pointer-to-void: BPF pointer width, represented as a 64-bit integer per SPEC_FULL
        // §4.2 rather than a typed pointer, matching the reference implementation's treatment
        // of the probe-context parameter.
        "c_void_p" => Ok(IrType::I64),
        "str" => Ok(IrType::byte_ptr()),
        other => Err(Error::ty(span, format!("unsupported type name `{}`", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduces_known_names() {
        assert_eq!(
            deduce_type("c_int64", Span::default()).unwrap(),
            IrType::I64
        );
        assert_eq!(
            deduce_type("c_void_p", Span::default()).unwrap(),
            IrType::I64
        );
    }

    #[test]
    fn deduces_float_types() {
        assert_eq!(deduce_type("c_float", Span::default()).unwrap(), IrType::Float(32));
        assert_eq!(deduce_type("c_double", Span::default()).unwrap(), IrType::Float(64));
        assert_eq!(IrType::Float(32).llvm_name(), "float");
        assert_eq!(IrType::Float(64).llvm_name(), "double");
    }

    #[test]
    fn rejects_unknown_name() {
        assert!(deduce_type("totally_bogus", Span::default()).is_err());
    }

    #[test]
    fn struct_size_is_a_multiple_of_eight_by_construction() {
        assert_eq!(IrType::I64.size(), Some(8));
        assert_eq!(IrType::Array(Box::new(IrType::I8), 16).size(), Some(16));
    }
}
