//! Defensive coercion for store payloads.
//!
//! The store gives no schema guarantee; every numeric field crossing the
//! boundary goes through a finite-or-fallback guard instead of a direct
//! cast.

use serde_json::Value;

pub fn i64_or(value: Option<&Value>, fallback: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                v
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() {
                    f as i64
                } else {
                    fallback
                }
            } else {
                fallback
            }
        }
        _ => fallback,
    }
}

pub fn u64_or(value: Option<&Value>, fallback: u64) -> u64 {
    let v = i64_or(value, fallback.min(i64::MAX as u64) as i64);
    if v < 0 {
        fallback
    } else {
        v as u64
    }
}

pub fn u32_or(value: Option<&Value>, fallback: u32) -> u32 {
    u64_or(value, fallback as u64).min(u32::MAX as u64) as u32
}

pub fn bool_or(value: Option<&Value>, fallback: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        _ => fallback,
    }
}

pub fn str_or(value: Option<&Value>, fallback: &str) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        _ => fallback.to_string(),
    }
}

pub fn field<'a>(value: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    value.and_then(|v| v.get(key))
}

pub fn i64_field(value: Option<&Value>, key: &str, fallback: i64) -> i64 {
    i64_or(field(value, key), fallback)
}

pub fn u64_field(value: Option<&Value>, key: &str, fallback: u64) -> u64 {
    u64_or(field(value, key), fallback)
}

pub fn u32_field(value: Option<&Value>, key: &str, fallback: u32) -> u32 {
    u32_or(field(value, key), fallback)
}

pub fn bool_field(value: Option<&Value>, key: &str, fallback: bool) -> bool {
    bool_or(field(value, key), fallback)
}

pub fn str_field(value: Option<&Value>, key: &str, fallback: &str) -> String {
    str_or(field(value, key), fallback)
}

pub fn opt_str_field(value: Option<&Value>, key: &str) -> Option<String> {
    match field(value, key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
