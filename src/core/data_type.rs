//! Type model for data variables and the type library.
//!
//! Types are plain values. Named types live in the metadata store; other
//! types point at them through `DataType::NamedReference`, which the store
//! resolves on lookup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A member of a structure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructMember {
    pub name: String,
    pub offset: u64,
    pub ty: DataType,
}

/// A member of an enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

/// A function parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionParam {
    pub name: Option<String>,
    pub ty: DataType,
}

/// A data type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Void,
    Bool,
    Integer {
        width: u64,
        signed: bool,
    },
    Float {
        width: u64,
    },
    Pointer {
        target: Box<DataType>,
        width: u64,
    },
    Array {
        element: Box<DataType>,
        count: u64,
    },
    Structure {
        name: Option<String>,
        members: Vec<StructMember>,
        width: u64,
    },
    Enumeration {
        name: Option<String>,
        members: Vec<EnumMember>,
        width: u64,
    },
    Function {
        ret: Box<DataType>,
        params: Vec<FunctionParam>,
        variadic: bool,
    },
    /// Reference to a type stored by name
    NamedReference {
        name: String,
        width: u64,
    },
}

impl DataType {
    pub fn int(width: u64, signed: bool) -> Self {
        DataType::Integer { width, signed }
    }

    pub fn float(width: u64) -> Self {
        DataType::Float { width }
    }

    pub fn pointer(target: DataType, width: u64) -> Self {
        DataType::Pointer {
            target: Box::new(target),
            width,
        }
    }

    pub fn array(element: DataType, count: u64) -> Self {
        DataType::Array {
            element: Box::new(element),
            count,
        }
    }

    pub fn named(name: impl Into<String>, width: u64) -> Self {
        DataType::NamedReference {
            name: name.into(),
            width,
        }
    }

    /// Structure with members laid out back to back.
    pub fn packed_struct(name: Option<String>, fields: Vec<(String, DataType)>) -> Self {
        let mut offset = 0;
        let mut members = Vec::with_capacity(fields.len());
        for (field_name, ty) in fields {
            let w = ty.width();
            members.push(StructMember {
                name: field_name,
                offset,
                ty,
            });
            offset += w;
        }
        DataType::Structure {
            name,
            members,
            width: offset,
        }
    }

    /// Width in bytes.
    pub fn width(&self) -> u64 {
        match self {
            DataType::Void | DataType::Function { .. } => 0,
            DataType::Bool => 1,
            DataType::Integer { width, .. }
            | DataType::Float { width }
            | DataType::Pointer { width, .. }
            | DataType::Structure { width, .. }
            | DataType::Enumeration { width, .. }
            | DataType::NamedReference { width, .. } => *width,
            DataType::Array { element, count } => element.width().saturating_mul(*count),
        }
    }

    pub fn is_named_reference(&self) -> bool {
        matches!(self, DataType::NamedReference { .. })
    }

    /// True when `name` is referenced anywhere inside this type.
    pub fn references_name(&self, name: &str) -> bool {
        match self {
            DataType::NamedReference { name: n, .. } => n == name,
            DataType::Pointer { target, .. } => target.references_name(name),
            DataType::Array { element, .. } => element.references_name(name),
            DataType::Structure { members, .. } => {
                members.iter().any(|m| m.ty.references_name(name))
            }
            DataType::Function { ret, params, .. } => {
                ret.references_name(name) || params.iter().any(|p| p.ty.references_name(name))
            }
            _ => false,
        }
    }
}

fn int_name(width: u64, signed: bool) -> String {
    let prefix = if signed { "int" } else { "uint" };
    format!("{}{}_t", prefix, width * 8)
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Void => write!(f, "void"),
            DataType::Bool => write!(f, "bool"),
            DataType::Integer { width, signed } => {
                if *width == 1 && *signed {
                    write!(f, "char")
                } else {
                    write!(f, "{}", int_name(*width, *signed))
                }
            }
            DataType::Float { width } => match width {
                4 => write!(f, "float"),
                8 => write!(f, "double"),
                10 => write!(f, "long double"),
                w => write!(f, "float{}", w * 8),
            },
            DataType::Pointer { target, .. } => write!(f, "{}*", target),
            DataType::Array { element, count } => write!(f, "{}[{:#x}]", element, count),
            DataType::Structure { name, members, .. } => match name {
                Some(n) => write!(f, "struct {}", n),
                None => {
                    write!(f, "struct {{ ")?;
                    for m in members {
                        write!(f, "{} {}; ", m.ty, m.name)?;
                    }
                    write!(f, "}}")
                }
            },
            DataType::Enumeration { name, .. } => match name {
                Some(n) => write!(f, "enum {}", n),
                None => write!(f, "enum"),
            },
            DataType::Function {
                ret,
                params,
                variadic,
            } => {
                write!(f, "{} (", ret)?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match &p.name {
                        Some(n) => write!(f, "{} {}", p.ty, n)?,
                        None => write!(f, "{}", p.ty)?,
                    }
                }
                if *variadic {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            DataType::NamedReference { name, .. } => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(DataType::int(4, true).width(), 4);
        assert_eq!(DataType::array(DataType::int(2, false), 8).width(), 16);
        assert_eq!(DataType::pointer(DataType::Void, 8).width(), 8);
        let s = DataType::packed_struct(
            Some("hdr".into()),
            vec![
                ("magic".into(), DataType::int(4, false)),
                ("flags".into(), DataType::int(2, false)),
            ],
        );
        assert_eq!(s.width(), 6);
    }

    #[test]
    fn test_rendering() {
        assert_eq!(DataType::int(1, true).to_string(), "char");
        assert_eq!(DataType::int(4, false).to_string(), "uint32_t");
        assert_eq!(
            DataType::pointer(DataType::named("FILE", 0x94), 8).to_string(),
            "FILE*"
        );
        assert_eq!(
            DataType::array(DataType::int(1, false), 16).to_string(),
            "uint8_t[0x10]"
        );
        let func = DataType::Function {
            ret: Box::new(DataType::int(4, true)),
            params: vec![FunctionParam {
                name: Some("fmt".into()),
                ty: DataType::pointer(DataType::int(1, true), 8),
            }],
            variadic: true,
        };
        assert_eq!(func.to_string(), "int32_t (char* fmt, ...)");
    }

    #[test]
    fn test_references_name() {
        let t = DataType::array(DataType::pointer(DataType::named("node", 16), 8), 4);
        assert!(t.references_name("node"));
        assert!(!t.references_name("leaf"));
    }
}
