//! Built-in type substitution for the C back end.
//!
//! Source type names that are not user types or classes go through a
//! fixed table; names missing from the table are already valid C and
//! pass through unchanged.

/// Source name -> C spelling.
const BUILTINS: &[(&str, &str)] = &[
    ("string", "char *"),
    ("uint", "unsigned int"),
    ("byte", "unsigned char"),
];

/// C types whose value can be used as a process exit status.
const NATIVE_INTEGERS: &[&str] = &[
    "int",
    "long",
    "short",
    "char",
    "unsigned int",
    "unsigned long",
    "unsigned short",
    "unsigned char",
    "int32_t",
    "int64_t",
    "uint8_t",
    "uint32_t",
];

/// Maps a builtin source type name to its C spelling.
pub fn builtin(name: &str) -> Option<&'static str> {
    BUILTINS
        .iter()
        .find(|(source, _)| *source == name)
        .map(|(_, c)| *c)
}

/// Appends `depth` pointer levels to a C type.
pub fn pointer_to(base: &str, depth: usize) -> String {
    let mut out = String::from(base);
    for _ in 0..depth {
        if out.ends_with('*') {
            out.push('*');
        } else {
            out.push_str(" *");
        }
    }
    out
}

pub fn is_native_integer(c_type: &str) -> bool {
    NATIVE_INTEGERS.contains(&c_type.trim())
}
