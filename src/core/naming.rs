//! Automatic, process-wide unique names for modules and optimizers.

use std::collections::BTreeMap;

use parking_lot::Mutex;

static NAME_COUNTERS: Mutex<BTreeMap<String, usize>> = parking_lot::const_mutex(BTreeMap::new());

/// `CamelCase` / `kebab-case` / spaced text to `snake_case`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let next_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            let boundary = match prev {
                Some(p) => p.is_lowercase() || p.is_ascii_digit() || (p.is_uppercase() && next_lower),
                None => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c == ' ' || c == '/' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

/// Return `prefix` on first use, then `prefix_1`, `prefix_2`, ...
pub fn uniquify(prefix: &str) -> String {
    let mut counters = NAME_COUNTERS.lock();
    let count = counters.entry(prefix.to_string()).or_insert(0);
    let name = if *count == 0 {
        prefix.to_string()
    } else {
        format!("{}_{}", prefix, count)
    };
    *count += 1;
    name
}

/// Unique snake_case name derived from a type or display name.
pub fn auto_name(prefix: &str) -> String {
    uniquify(&to_snake_case(prefix))
}

/// Forget all issued names.
pub fn reset_uids() {
    NAME_COUNTERS.lock().clear();
}
