//! Conversion helpers from raw Janet values to display text and [`Value`].
//!
//! Every function here reads runtime memory and must run on the thread that
//! owns the interpreter, before the runtime gets a chance to collect the
//! value being read.

use crate::runtime::value::Value;
use evil_janet::{Janet, JanetKV};
use indexmap::IndexMap;
use std::ffi::CStr;
use std::ptr;

fn kind(value: Janet) -> evil_janet::JanetType {
    // SAFETY: janet_type only inspects the tag bits.
    unsafe { evil_janet::janet_type(value) }
}

/// Contents of a string, symbol, keyword or buffer.
fn bytes(value: Janet) -> String {
    let mut data: *const u8 = ptr::null();
    let mut len: i32 = 0;
    // SAFETY: out-pointers are valid; the view borrows runtime memory that
    // is copied before returning.
    let ok = unsafe { evil_janet::janet_bytes_view(value, &mut data, &mut len) };
    if ok == 0 || data.is_null() || len <= 0 {
        return String::new();
    }
    let slice = unsafe { std::slice::from_raw_parts(data, len as usize) };
    String::from_utf8_lossy(slice).into_owned()
}

/// Elements of a tuple or array.
fn items(value: Janet) -> Vec<Janet> {
    let mut data: *const Janet = ptr::null();
    let mut len: i32 = 0;
    // SAFETY: as in `bytes`; elements are copied out.
    let ok = unsafe { evil_janet::janet_indexed_view(value, &mut data, &mut len) };
    if ok == 0 || data.is_null() || len <= 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec()
}

/// Occupied slots of a table or struct.
fn entries(value: Janet) -> Vec<(Janet, Janet)> {
    let mut data: *const JanetKV = ptr::null();
    let mut len: i32 = 0;
    let mut cap: i32 = 0;
    // SAFETY: as in `bytes`; slots are copied out.
    let ok =
        unsafe { evil_janet::janet_dictionary_view(value, &mut data, &mut len, &mut cap) };
    if ok == 0 || data.is_null() || cap <= 0 {
        return Vec::new();
    }
    let slots = unsafe { std::slice::from_raw_parts(data, cap as usize) };
    slots
        .iter()
        // empty and tombstoned slots have a nil key
        .filter(|kv| kind(kv.key) != evil_janet::JanetType_JANET_NIL)
        .map(|kv| (kv.key, kv.value))
        .collect()
}

/// The runtime's own stringification (`janet_to_string`).
pub(crate) fn describe(value: Janet) -> String {
    // SAFETY: janet_to_string returns a NUL-terminated runtime string.
    let text = unsafe { evil_janet::janet_to_string(value) };
    if text.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(text.cast()) }
        .to_string_lossy()
        .into_owned()
}

/// Render a value as the VM's evaluated text.
///
/// Numbers, functions and anything not listed below use the runtime's
/// own formatting, which prints integral numbers without a decimal point
/// and named functions as `<function NAME>`.
pub(crate) fn render(value: Janet) -> String {
    match kind(value) {
        evil_janet::JanetType_JANET_NIL => "nil".to_string(),
        evil_janet::JanetType_JANET_BOOLEAN => {
            // SAFETY: tag checked above.
            let truthy = unsafe { evil_janet::janet_unwrap_boolean(value) } != 0;
            truthy.to_string()
        }
        evil_janet::JanetType_JANET_STRING | evil_janet::JanetType_JANET_SYMBOL => bytes(value),
        evil_janet::JanetType_JANET_KEYWORD => format!(":{}", bytes(value)),
        evil_janet::JanetType_JANET_TUPLE | evil_janet::JanetType_JANET_ARRAY => {
            let parts: Vec<String> = items(value).into_iter().map(render).collect();
            format!("({})", parts.join(" "))
        }
        _ => describe(value),
    }
}

/// Convert a value into the native [`Value`] model.
///
/// Composite values are walked eagerly; cycles are not detected. Types
/// without a native counterpart (functions, fibers, buffers, abstracts)
/// fall back to their rendered text.
pub(crate) fn to_value(value: Janet) -> Value {
    match kind(value) {
        evil_janet::JanetType_JANET_NIL => Value::Nil,
        evil_janet::JanetType_JANET_BOOLEAN => {
            // SAFETY: tag checked above.
            Value::Bool(unsafe { evil_janet::janet_unwrap_boolean(value) } != 0)
        }
        evil_janet::JanetType_JANET_NUMBER => {
            // SAFETY: tag checked above.
            Value::Number(unsafe { evil_janet::janet_unwrap_number(value) })
        }
        evil_janet::JanetType_JANET_STRING | evil_janet::JanetType_JANET_SYMBOL => {
            Value::String(bytes(value))
        }
        evil_janet::JanetType_JANET_KEYWORD => Value::String(format!(":{}", bytes(value))),
        evil_janet::JanetType_JANET_TUPLE | evil_janet::JanetType_JANET_ARRAY => {
            Value::Sequence(items(value).into_iter().map(to_value).collect())
        }
        evil_janet::JanetType_JANET_TABLE | evil_janet::JanetType_JANET_STRUCT => {
            let mut map = IndexMap::new();
            for (key, val) in entries(value) {
                map.insert(to_key(key), to_value(val));
            }
            Value::Map(map)
        }
        _ => Value::String(render(value)),
    }
}

/// Keyword keys lose their `:` so `{:a 1}` reads as `{"a" 1}`.
fn to_key(key: Janet) -> Value {
    if kind(key) == evil_janet::JanetType_JANET_KEYWORD {
        Value::String(bytes(key))
    } else {
        to_value(key)
    }
}
