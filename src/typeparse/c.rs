//! A parser for the subset of C declarations used in type libraries.
//!
//! Supported: primitive and `<stdint.h>` names, `const`/`volatile`
//! qualifiers (ignored), pointers, fixed arrays, `struct` and `enum`
//! references and bodies, typedefs, function prototypes and function
//! pointers. Unions, bitfields and initializers are rejected.

use std::collections::HashMap;

use crate::core::{DataType, EnumMember, FunctionParam, QualifiedName, StructMember};
use crate::error::{Result, VspaceError};

use super::lexer::{tokenize, Spanned, Token};
use super::{TypeParser, TypeParserResult};

const IGNORED_QUALIFIERS: &[&str] = &[
    "const", "volatile", "restrict", "static", "extern", "inline", "register",
];

/// C declaration parser for one pointer width.
#[derive(Debug, Clone)]
pub struct CTypeParser {
    address_size: u64,
    known: HashMap<String, u64>,
}

impl CTypeParser {
    pub fn new(address_size: usize) -> Self {
        Self {
            address_size: address_size as u64,
            known: HashMap::new(),
        }
    }

    /// Widths of named types the parsed text may refer to.
    pub fn with_types(mut self, types: impl IntoIterator<Item = (String, DataType)>) -> Self {
        for (name, ty) in types {
            self.known.insert(name, ty.width());
        }
        self
    }

    fn parser(&self, text: &str) -> Result<Parser> {
        Ok(Parser {
            tokens: tokenize(text)?,
            pos: 0,
            end: text.len(),
            address_size: self.address_size,
            known: self.known.clone(),
            types: Vec::new(),
        })
    }
}

impl TypeParser for CTypeParser {
    fn parse_type_string(&self, text: &str) -> Result<(DataType, QualifiedName)> {
        let mut p = self.parser(text)?;
        let spec = p.specifiers(false)?;
        let (ty, name) = p.declarator(spec.ty)?;
        p.eat(';');
        if !p.at_end() {
            return Err(p.error("unexpected trailing input"));
        }
        let name = match name.or_else(|| tag_name(&ty)) {
            Some(name) => name,
            None => return Err(p.error("declaration has no name")),
        };
        Ok((ty, qualified(&name)?))
    }

    fn parse_types_from_string(&self, text: &str) -> Result<TypeParserResult> {
        let mut p = self.parser(text)?;
        let mut variables = Vec::new();
        let mut functions = Vec::new();
        while !p.at_end() {
            if p.eat(';') {
                continue;
            }
            let spec = p.specifiers(true)?;
            if p.eat(';') {
                continue;
            }
            loop {
                let (ty, name) = p.declarator(spec.ty.clone())?;
                let Some(name) = name else {
                    return Err(p.error("declaration has no name"));
                };
                let name = qualified(&name)?;
                if spec.typedef {
                    p.known.insert(name.to_string(), ty.width());
                    p.types.push((name, ty));
                } else if matches!(ty, DataType::Function { .. }) {
                    functions.push((name, ty));
                } else {
                    variables.push((name, ty));
                }
                if p.eat(',') {
                    continue;
                }
                p.expect(';')?;
                break;
            }
        }
        Ok(TypeParserResult {
            types: p.types,
            variables,
            functions,
        })
    }
}

fn qualified(name: &str) -> Result<QualifiedName> {
    QualifiedName::parse(name).map_err(|e| VspaceError::Parse {
        message: e.to_string(),
    })
}

fn tag_name(ty: &DataType) -> Option<String> {
    match ty {
        DataType::Structure { name, .. } | DataType::Enumeration { name, .. } => name.clone(),
        DataType::NamedReference { name, .. } => Some(name.clone()),
        _ => None,
    }
}

/// Natural alignment, capped at 8.
fn align_of(ty: &DataType) -> u64 {
    match ty {
        DataType::Structure { members, .. } => {
            members.iter().map(|m| align_of(&m.ty)).max().unwrap_or(1)
        }
        DataType::Array { element, .. } => align_of(element),
        DataType::Void | DataType::Function { .. } => 1,
        other => {
            let w = other.width().clamp(1, 8);
            1 << (63 - w.leading_zeros())
        }
    }
}

fn stdint(name: &str, address_size: u64) -> Option<DataType> {
    let ty = match name {
        "int8_t" => DataType::int(1, true),
        "uint8_t" => DataType::int(1, false),
        "int16_t" => DataType::int(2, true),
        "uint16_t" | "char16_t" => DataType::int(2, false),
        "int32_t" => DataType::int(4, true),
        "uint32_t" | "char32_t" => DataType::int(4, false),
        "int64_t" => DataType::int(8, true),
        "uint64_t" => DataType::int(8, false),
        "size_t" | "uintptr_t" => DataType::int(address_size, false),
        "ssize_t" | "intptr_t" | "ptrdiff_t" => DataType::int(address_size, true),
        _ => return None,
    };
    Some(ty)
}

#[derive(Debug, Clone, PartialEq)]
enum Base {
    Void,
    Bool,
    Char,
    Int,
    Float,
    Double,
    Resolved(DataType),
}

struct Specifiers {
    ty: DataType,
    typedef: bool,
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    address_size: u64,
    known: HashMap<String, u64>,
    /// Typedefs and tagged definitions in source order
    types: Vec<(QualifiedName, DataType)>,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn error(&self, what: &str) -> VspaceError {
        let offset = self.tokens.get(self.pos).map_or(self.end, |s| s.offset);
        VspaceError::Parse {
            message: format!("{} at offset {}", what, offset),
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn ident(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Some(name)
            }
            _ => None,
        }
    }

    fn number(&mut self) -> Result<i64> {
        let negative = self.eat('-');
        match self.peek() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.pos += 1;
                let value = i64::try_from(n).map_err(|_| self.error("number out of range"))?;
                Ok(if negative { -value } else { value })
            }
            _ => Err(self.error("expected a number")),
        }
    }

    fn skip_qualifiers(&mut self) {
        while let Some(Token::Ident(name)) = self.peek() {
            if !IGNORED_QUALIFIERS.contains(&name.as_str()) {
                break;
            }
            self.pos += 1;
        }
    }

    fn named(&self, name: String) -> DataType {
        let width = self.known.get(&name).copied().unwrap_or(0);
        DataType::named(name, width)
    }

    fn specifiers(&mut self, allow_typedef: bool) -> Result<Specifiers> {
        let mut typedef = false;
        let mut signed: Option<bool> = None;
        let mut short = 0u32;
        let mut long = 0u32;
        let mut base: Option<Base> = None;

        while let Some(Token::Ident(word)) = self.peek() {
            let word = word.clone();
            let has_modifiers = signed.is_some() || short > 0 || long > 0;
            match word.as_str() {
                "typedef" if allow_typedef => typedef = true,
                "typedef" => return Err(self.error("typedef not allowed here")),
                w if IGNORED_QUALIFIERS.contains(&w) => {}
                "signed" => signed = Some(true),
                "unsigned" => signed = Some(false),
                "short" => short += 1,
                "long" => long += 1,
                "void" | "bool" | "_Bool" | "char" | "int" | "float" | "double" => {
                    if base.is_some() {
                        return Err(self.error("conflicting type specifiers"));
                    }
                    base = Some(match word.as_str() {
                        "void" => Base::Void,
                        "bool" | "_Bool" => Base::Bool,
                        "char" => Base::Char,
                        "int" => Base::Int,
                        "float" => Base::Float,
                        _ => Base::Double,
                    });
                }
                "union" => return Err(self.error("unions are not supported")),
                "struct" | "enum" => {
                    if base.is_some() || has_modifiers {
                        return Err(self.error("conflicting type specifiers"));
                    }
                    self.pos += 1;
                    let ty = if word == "struct" {
                        self.struct_specifier()?
                    } else {
                        self.enum_specifier()?
                    };
                    base = Some(Base::Resolved(ty));
                    continue;
                }
                _ if base.is_none() && !has_modifiers => {
                    let ty = stdint(&word, self.address_size)
                        .unwrap_or_else(|| self.named(word.clone()));
                    base = Some(Base::Resolved(ty));
                }
                // declarator name
                _ => break,
            }
            self.pos += 1;
        }

        let ty = self.resolve(base, signed, short, long)?;
        Ok(Specifiers { ty, typedef })
    }

    fn resolve(
        &self,
        base: Option<Base>,
        signed: Option<bool>,
        short: u32,
        long: u32,
    ) -> Result<DataType> {
        let has_modifiers = signed.is_some() || short > 0 || long > 0;
        let conflict = || self.error("conflicting type specifiers");
        match base {
            Some(Base::Resolved(ty)) if !has_modifiers => Ok(ty),
            Some(Base::Void) if !has_modifiers => Ok(DataType::Void),
            Some(Base::Bool) if !has_modifiers => Ok(DataType::Bool),
            Some(Base::Float) if !has_modifiers => Ok(DataType::float(4)),
            Some(Base::Double) if signed.is_none() && short == 0 => {
                Ok(DataType::float(if long > 0 { 16 } else { 8 }))
            }
            Some(Base::Char) if short == 0 && long == 0 => {
                Ok(DataType::int(1, signed.unwrap_or(true)))
            }
            Some(Base::Int) => self.integer(signed, short, long),
            None if has_modifiers => self.integer(signed, short, long),
            None => Err(self.error("expected a type")),
            _ => Err(conflict()),
        }
    }

    fn integer(&self, signed: Option<bool>, short: u32, long: u32) -> Result<DataType> {
        let width = match (short, long) {
            (0, 0) => 4,
            (_, 0) => 2,
            (0, 1) if self.address_size >= 8 => 8,
            (0, 1) => 4,
            (0, _) => 8,
            _ => return Err(self.error("conflicting type specifiers")),
        };
        Ok(DataType::int(width, signed.unwrap_or(true)))
    }

    fn struct_specifier(&mut self) -> Result<DataType> {
        let tag = self.ident();
        if !self.eat('{') {
            return match tag {
                Some(tag) => Ok(self.named(tag)),
                None => Err(self.error("expected a struct name or body")),
            };
        }
        let mut members = Vec::new();
        let mut offset = 0u64;
        let mut align = 1u64;
        while !self.eat('}') {
            if self.at_end() {
                return Err(self.error("unterminated struct body"));
            }
            let spec = self.specifiers(false)?;
            loop {
                let (ty, name) = self.declarator(spec.ty.clone())?;
                let Some(name) = name else {
                    return Err(self.error("struct member has no name"));
                };
                let a = align_of(&ty);
                offset = offset.next_multiple_of(a);
                align = align.max(a);
                let width = ty.width();
                members.push(StructMember { name, offset, ty });
                offset += width;
                if !self.eat(',') {
                    break;
                }
            }
            self.expect(';')?;
        }
        let ty = DataType::Structure {
            name: tag.clone(),
            members,
            width: offset.next_multiple_of(align),
        };
        self.define(tag, &ty)?;
        Ok(ty)
    }

    fn enum_specifier(&mut self) -> Result<DataType> {
        let tag = self.ident();
        if !self.eat('{') {
            return match tag {
                Some(tag) => Ok(self.named(tag)),
                None => Err(self.error("expected an enum name or body")),
            };
        }
        let mut members = Vec::new();
        let mut next = 0i64;
        while !self.eat('}') {
            let Some(name) = self.ident() else {
                return Err(self.error("expected an enumerator"));
            };
            if self.eat('=') {
                next = self.number()?;
            }
            members.push(EnumMember { name, value: next });
            next = next.wrapping_add(1);
            if !self.eat(',') {
                self.expect('}')?;
                break;
            }
        }
        let ty = DataType::Enumeration {
            name: tag.clone(),
            members,
            width: 4,
        };
        self.define(tag, &ty)?;
        Ok(ty)
    }

    fn define(&mut self, tag: Option<String>, ty: &DataType) -> Result<()> {
        if let Some(tag) = tag {
            self.known.insert(tag.clone(), ty.width());
            self.types.push((qualified(&tag)?, ty.clone()));
        }
        Ok(())
    }

    /// Pointers, an optional name, then array and parameter suffixes.
    fn declarator(&mut self, base: DataType) -> Result<(DataType, Option<String>)> {
        let mut ty = base;
        while self.eat('*') {
            self.skip_qualifiers();
            ty = DataType::pointer(ty, self.address_size);
        }

        // (*name)(params) or (*name)[n]
        let mut outer_pointers = 0;
        let name = if self.peek() == Some(&Token::Punct('('))
            && self.peek_at(1) == Some(&Token::Punct('*'))
        {
            self.pos += 1;
            while self.eat('*') {
                self.skip_qualifiers();
                outer_pointers += 1;
            }
            let name = self.ident();
            self.expect(')')?;
            name
        } else {
            self.ident()
        };

        let mut dims = Vec::new();
        let mut params = None;
        loop {
            if self.eat('[') {
                let count = if self.eat(']') {
                    0
                } else {
                    let n = self.number()?;
                    self.expect(']')?;
                    u64::try_from(n).map_err(|_| self.error("negative array size"))?
                };
                dims.push(count);
            } else if params.is_none() && dims.is_empty() && self.eat('(') {
                params = Some(self.params()?);
            } else {
                break;
            }
        }

        if let Some((params, variadic)) = params {
            ty = DataType::Function {
                ret: Box::new(ty),
                params,
                variadic,
            };
        }
        for count in dims.into_iter().rev() {
            ty = DataType::array(ty, count);
        }
        for _ in 0..outer_pointers {
            ty = DataType::pointer(ty, self.address_size);
        }
        if self.peek() == Some(&Token::Punct('=')) {
            return Err(self.error("initializers are not supported"));
        }
        Ok((ty, name))
    }

    fn params(&mut self) -> Result<(Vec<FunctionParam>, bool)> {
        let mut params = Vec::new();
        if self.eat(')') {
            return Ok((params, false));
        }
        if self.peek() == Some(&Token::Ident("void".into()))
            && self.peek_at(1) == Some(&Token::Punct(')'))
        {
            self.pos += 2;
            return Ok((params, false));
        }
        loop {
            if self.peek() == Some(&Token::Ellipsis) {
                self.pos += 1;
                self.expect(')')?;
                return Ok((params, true));
            }
            let spec = self.specifiers(false)?;
            let (ty, name) = self.declarator(spec.ty)?;
            params.push(FunctionParam { name, ty });
            if self.eat(')') {
                return Ok((params, false));
            }
            self.expect(',')?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CTypeParser {
        CTypeParser::new(8)
    }

    #[test]
    fn test_parse_primitive_declarations() {
        let p = parser();
        let (ty, name) = p.parse_type_string("unsigned long long counter").unwrap();
        assert_eq!(ty, DataType::int(8, false));
        assert_eq!(name.to_string(), "counter");

        let (ty, _) = p.parse_type_string("const char *names[4];").unwrap();
        assert_eq!(ty, DataType::array(DataType::pointer(DataType::int(1, true), 8), 4));

        let (ty, _) = p.parse_type_string("short s").unwrap();
        assert_eq!(ty, DataType::int(2, true));
        let (ty, _) = p.parse_type_string("uint16_t w").unwrap();
        assert_eq!(ty, DataType::int(2, false));
        let (ty, _) = CTypeParser::new(4).parse_type_string("size_t n").unwrap();
        assert_eq!(ty, DataType::int(4, false));
    }

    #[test]
    fn test_struct_layout_is_naturally_aligned() {
        let (ty, name) = parser()
            .parse_type_string("struct header { uint8_t tag; uint32_t len; uint16_t flags; }")
            .unwrap();
        assert_eq!(name.to_string(), "header");
        let DataType::Structure { members, width, .. } = ty else {
            panic!("expected a structure");
        };
        let offsets: Vec<u64> = members.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(width, 12);
    }

    #[test]
    fn test_function_prototype_and_pointer() {
        let p = parser();
        let (ty, name) = p.parse_type_string("int printf(const char *fmt, ...)").unwrap();
        assert_eq!(name.to_string(), "printf");
        let DataType::Function { params, variadic, .. } = ty else {
            panic!("expected a function");
        };
        assert!(variadic);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name.as_deref(), Some("fmt"));

        let (ty, name) = p.parse_type_string("void (*handler)(int)").unwrap();
        assert_eq!(name.to_string(), "handler");
        assert_eq!(ty.width(), 8);
        assert!(matches!(ty, DataType::Pointer { ref target, .. } if matches!(**target, DataType::Function { .. })));
    }

    #[test]
    fn test_parse_types_from_string_sorts_declarations() {
        let text = r#"
            enum color { RED, GREEN = 5, BLUE };
            typedef struct point { int x; int y; } point_t;
            point_t origin;
            struct point *make_point(int x, int y);
            unsigned int counter, limit;
        "#;
        let result = parser().parse_types_from_string(text).unwrap();
        let type_names: Vec<String> = result.types.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(type_names, vec!["color", "point", "point_t"]);
        let DataType::Enumeration { members, .. } = &result.types[0].1 else {
            panic!("expected an enum");
        };
        let values: Vec<i64> = members.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![0, 5, 6]);

        let vars: Vec<String> = result.variables.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(vars, vec!["origin", "counter", "limit"]);
        assert_eq!(result.variables[0].1, DataType::named("point_t", 8));
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].0.to_string(), "make_point");
    }

    #[test]
    fn test_known_types_give_reference_widths() {
        let p = parser().with_types(vec![("Elf64_Ehdr".to_string(), DataType::array(DataType::int(1, false), 64))]);
        let (ty, _) = p.parse_type_string("Elf64_Ehdr hdr").unwrap();
        assert_eq!(ty, DataType::named("Elf64_Ehdr", 64));
        let (ty, _) = p.parse_type_string("struct unknown u").unwrap();
        assert_eq!(ty, DataType::named("unknown", 0));
    }

    #[test]
    fn test_malformed_input_is_a_parse_error() {
        let p = parser();
        for text in [
            "",
            "int",
            "int x y",
            "struct { int a; } ",
            "union u { int a; } v",
            "int a[",
            "long short x",
            "int x = 5",
            "typedef int t",
        ] {
            assert!(
                matches!(p.parse_type_string(text), Err(VspaceError::Parse { .. })),
                "accepted {:?}",
                text
            );
        }
        assert!(matches!(
            p.parse_types_from_string("int x"),
            Err(VspaceError::Parse { .. })
        ));
    }
}
