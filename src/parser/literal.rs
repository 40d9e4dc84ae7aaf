//! Decoding of C/C++ string-literal tokens into the bytes they denote.
//!
//! Fingerprints are computed over decoded bytes, so `"\101BC"`, `"A\102C"` and
//! `"ABC"` all land on the same key.

/// Decode one literal token, including its encoding prefix and quotes.
///
/// Accepts `"..."`, `L"..."`, `u"..."`, `U"..."`, `u8"..."` and the C++ raw
/// forms `R"d(...)d"` with the same prefixes. Anything unrecognized is
/// treated as a bare body.
pub fn decode_literal(raw: &[u8]) -> Vec<u8> {
    let token = strip_encoding_prefix(raw);

    if let Some(rest) = token.strip_prefix(b"R\"") {
        return decode_raw(rest).to_vec();
    }

    match token.strip_prefix(b"\"") {
        Some(rest) => unescape(rest.strip_suffix(b"\"").unwrap_or(rest)),
        None => unescape(token),
    }
}

/// Resolve escape sequences in a literal body (the text between the quotes).
pub fn unescape(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let n = body.len();
    let mut i = 0;

    while i < n {
        let b = body[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        if i + 1 >= n {
            out.push(b'\\');
            break;
        }

        let c = body[i + 1];
        i += 2;
        match c {
            // line continuation
            b'\n' => {}
            b'\r' => {
                if body.get(i) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'e' | b'E' => out.push(0x1b),
            b'\\' | b'\'' | b'"' | b'?' => out.push(c),
            b'0'..=b'7' => {
                let mut value = u32::from(c - b'0');
                let mut digits = 1;
                while digits < 3 && i < n && (b'0'..=b'7').contains(&body[i]) {
                    value = value * 8 + u32::from(body[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                out.push(value as u8);
            }
            b'x' => {
                let start = i;
                let mut value: u32 = 0;
                while i < n && body[i].is_ascii_hexdigit() {
                    value = value.wrapping_mul(16).wrapping_add(hex_value(body[i]));
                    i += 1;
                }
                if i == start {
                    out.extend_from_slice(b"\\x");
                } else {
                    // Narrow strings keep the low byte.
                    out.push(value as u8);
                }
            }
            b'u' | b'U' => {
                let len = if c == b'u' { 4 } else { 8 };
                let digits = body.get(i..i + len).filter(|d| d.iter().all(u8::is_ascii_hexdigit));
                let decoded = digits
                    .map(|d| d.iter().fold(0u32, |acc, &h| acc * 16 + hex_value(h)))
                    .and_then(char::from_u32);
                match decoded {
                    Some(ch) => {
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        i += len;
                    }
                    None => {
                        out.push(b'\\');
                        out.push(c);
                    }
                }
            }
            // Unknown escapes denote the character itself.
            other => out.push(other),
        }
    }

    out
}

fn strip_encoding_prefix(raw: &[u8]) -> &[u8] {
    if let Some(rest) = raw.strip_prefix(b"u8") {
        return rest;
    }
    match raw.first() {
        Some(b'L' | b'u' | b'U') => &raw[1..],
        _ => raw,
    }
}

/// `rest` is everything after `R"`: `delim(body)delim"`.
fn decode_raw(rest: &[u8]) -> &[u8] {
    let Some(open) = rest.iter().position(|&b| b == b'(') else {
        return rest;
    };
    let delimiter = &rest[..open];
    let body = &rest[open + 1..];

    let body = body.strip_suffix(b"\"").unwrap_or(body);
    let body = body.strip_suffix(delimiter).unwrap_or(body);
    body.strip_suffix(b")").unwrap_or(body)
}

fn hex_value(b: u8) -> u32 {
    match b {
        b'0'..=b'9' => u32::from(b - b'0'),
        b'a'..=b'f' => u32::from(b - b'a' + 10),
        b'A'..=b'F' => u32::from(b - b'A' + 10),
        _ => 0,
    }
}
