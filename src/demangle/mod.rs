//! Demangler helpers used to derive symbol display names.
//!
//! Rust (legacy and v0), Itanium C++ and MSVC names are recognized by their
//! prefix; anything else is returned unchanged by callers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Rust,
    Itanium,
    Msvc,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemangleResult {
    pub original: String,
    pub demangled: String,
    /// Demangled name without parameter list or hash suffix
    pub short: String,
    pub flavor: SymbolFlavor,
}

fn looks_msvc(s: &str) -> bool {
    s.starts_with('?') && s.contains('@')
}

pub fn detect_flavor(s: &str) -> SymbolFlavor {
    if rustc_demangle::try_demangle(s).is_ok() {
        return SymbolFlavor::Rust;
    }
    if s.starts_with("_Z") || s.starts_with("__Z") {
        return SymbolFlavor::Itanium;
    }
    if looks_msvc(s) {
        return SymbolFlavor::Msvc;
    }
    SymbolFlavor::Unknown
}

/// Strip a trailing top-level parameter list: `ns::f(int)` becomes `ns::f`.
fn strip_params(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().rev() {
        match b {
            b')' => depth += 1,
            b'(' => {
                depth -= 1;
                if depth == 0 && i > 0 {
                    return name[..i].trim_end().to_string();
                }
            }
            _ => {}
        }
    }
    name.to_string()
}

/// Attempt to demangle a single symbol. Returns None when not recognized.
pub fn demangle_one(s: &str) -> Option<DemangleResult> {
    if let Ok(dm) = rustc_demangle::try_demangle(s) {
        return Some(DemangleResult {
            original: s.to_string(),
            demangled: dm.to_string(),
            short: format!("{:#}", dm),
            flavor: SymbolFlavor::Rust,
        });
    }
    if s.starts_with("_Z") || s.starts_with("__Z") {
        let candidate = if s.starts_with("__Z") { &s[1..] } else { s };
        if let Ok(sym) = cpp_demangle::Symbol::new(candidate) {
            let out = sym.to_string();
            return Some(DemangleResult {
                original: s.to_string(),
                short: strip_params(&out),
                demangled: out,
                flavor: SymbolFlavor::Itanium,
            });
        }
    }
    if looks_msvc(s) {
        if let Ok(out) = msvc_demangler::demangle(s, msvc_demangler::DemangleFlags::COMPLETE) {
            let without_params = strip_params(&out);
            let short = without_params
                .rsplit(' ')
                .next()
                .unwrap_or(without_params.as_str())
                .to_string();
            return Some(DemangleResult {
                original: s.to_string(),
                demangled: out,
                short,
                flavor: SymbolFlavor::Msvc,
            });
        }
    }
    None
}
