//! IMAP wire quoting: encode a byte string as a `string` or a `literal`.
//!
//! `quote_append` is total and infallible: every byte sequence, including
//! `None` (IMAP `NIL`), has a wire representation.

/// Append the IMAP wire form of `value` to `dst`.
///
/// `None` appends the literal text `NIL`. Otherwise the function decides,
/// in a single scan, whether the value can be written as a quoted `"..."`
/// string or must be sent as a `{N}\r\n` literal, then emits the body with
/// whitespace and line endings normalized.
///
/// The seed for "is the previous byte a space" is `dst`'s current last
/// byte, so appending `b" foo"` right after a trailing space in `dst`
/// collapses the boundary the same way two adjacent spaces within a single
/// call would.
pub fn quote_append(dst: &mut Vec<u8>, value: Option<&[u8]>) {
    let Some(value) = value else {
        dst.extend_from_slice(b"NIL");
        return;
    };

    let mut literal = false;
    let mut modify = false;
    let mut linefeeds: usize = 0;

    let first_lwsp = dst.last() == Some(&b' ');
    let mut last_lwsp = first_lwsp;

    for &b in value {
        match b {
            0 => {
                // converted to an 8-bit char in the body, forces a literal
                literal = true;
                modify = true;
            }
            b'\t' => modify = true,
            b' ' => {
                if last_lwsp {
                    modify = true;
                }
                last_lwsp = true;
            }
            13 | 10 => {
                linefeeds += 1;
                modify = true;
            }
            _ => {
                if b & 0x80 != 0 || b == b'"' || b == b'\\' {
                    literal = true;
                }
            }
        }
    }

    if literal {
        dst.extend_from_slice(format!("{{{}}}\r\n", value.len() - linefeeds).as_bytes());
    } else {
        dst.push(b'"');
    }

    if !modify {
        dst.extend_from_slice(value);
    } else {
        let mut last_lwsp = first_lwsp;
        for &b in value {
            match b {
                0 => {
                    dst.push(128);
                    last_lwsp = false;
                }
                b' ' | b'\t' => {
                    if !last_lwsp {
                        dst.push(b' ');
                    }
                    last_lwsp = true;
                }
                13 | 10 => {}
                _ => {
                    last_lwsp = false;
                    dst.push(b);
                }
            }
        }
    }

    if !literal {
        dst.push(b'"');
    }
}
