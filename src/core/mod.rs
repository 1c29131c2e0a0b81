//! Core records shared by every subsystem of the address space.
//!
//! These are plain values: segments and sections describe the mapping,
//! the rest are metadata facts the store hands out by copy.

pub mod address_range;
pub mod binary;
pub mod data_type;
pub mod function;
pub mod instruction;
pub mod reference;
pub mod section;
pub mod segment;
pub mod string_literal;
pub mod symbol;
pub mod tag;
pub mod variable;

pub use address_range::AddressRange;
pub use binary::Endianness;
pub use data_type::{DataType, EnumMember, FunctionParam, StructMember};
pub use function::{BasicBlock, BlockEdge, EdgeKind, Function};
pub use instruction::{
    BranchInfo, BranchKind, InstructionInfo, InstructionTextToken, TokenKind,
};
pub use reference::{Xref, XrefKind};
pub use section::{Section, SectionSemantics};
pub use segment::{Segment, SegmentFlags, SegmentId};
pub use string_literal::{StringKind, StringReference};
pub use symbol::{QualifiedName, Symbol, SymbolBinding, SymbolKind};
pub use tag::{Tag, TagReference, TagType, TagTypeKind};
pub use variable::DataVariable;
