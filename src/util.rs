use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}

/// `call_<name>_<millis>_<rand>`; unique enough within one conversation.
pub(crate) fn generated_call_id(tool_name: &str) -> String {
    let millis = unix_now_millis();
    let mut out = String::with_capacity(tool_name.len() + 40);
    out.push_str("call_");
    out.push_str(tool_name);
    out.push('_');
    push_u64_decimal(&mut out, millis);
    out.push('_');
    push_u64_hex_16(&mut out, fastrand::u64(..));
    out
}

/// Parse tool-call argument text, falling back to an empty object.
pub(crate) fn parse_arguments_or_empty(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Map::new()),
    }
}

/// Parse tool-call argument text only when it is a complete JSON object.
pub(crate) fn parse_complete_object(arguments: &str) -> Option<Value> {
    let trimmed = arguments.trim_end();
    if !trimmed.ends_with('}') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Truncate at a char boundary not past `max_bytes`.
pub(crate) fn truncate_utf8(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, mut n: u64) {
    if n == 0 {
        out.push('0');
        return;
    }

    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + ((n % 10) as u8);
        n /= 10;
    }
    let digits = std::str::from_utf8(&buf[i..]).unwrap_or("0");
    out.push_str(digits);
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}
