//! Semicolon-terminated CAT framing.
//!
//! Kenwood and Yaesu rigs both speak ASCII frames of the form
//! `PREFIX data ;`. They differ in how the prefix is split from the data:
//! Kenwood prefixes are purely alphabetic (`FA`, `MD`), while some Yaesu
//! commands carry a trailing digit as part of the name (`MD0`, `PA0`).
//! Callers pass that list as `digit_suffix_prefixes`.

use bytes::{BufMut, BytesMut};

/// The semicolon byte that terminates every frame.
pub const TERMINATOR: u8 = b';';

/// The frame a rig sends when it rejects a command.
pub const ERROR_RESPONSE: &[u8] = b"?;";

/// One decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command name echoed in the reply (e.g. `"FA"`, `"MD0"`).
    pub prefix: String,
    /// Everything between the prefix and the terminator.
    pub data: String,
}

/// Result of attempting to decode one frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete frame, and how many bytes it used.
    Response { frame: Frame, consumed: usize },

    /// The rig answered `?;` (or sent undecodable bytes up to a terminator).
    Error(usize),

    /// No terminator yet.
    Incomplete,
}

/// Build a frame from a prefix and its parameters.
pub fn encode_command(prefix: &str, params: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(prefix.len() + params.len() + 1);
    buf.put_slice(prefix.as_bytes());
    buf.put_slice(params.as_bytes());
    buf.put_u8(TERMINATOR);
    buf.to_vec()
}

/// Decode the first complete frame in `buf`.
pub fn decode_response(buf: &[u8], digit_suffix_prefixes: &[&str]) -> DecodeResult {
    let Some(term_pos) = buf.iter().position(|&b| b == TERMINATOR) else {
        return DecodeResult::Incomplete;
    };

    let consumed = term_pos + 1;
    let body = &buf[..term_pos];

    if body == b"?" {
        return DecodeResult::Error(consumed);
    }

    let Ok(body) = std::str::from_utf8(body) else {
        return DecodeResult::Error(consumed);
    };

    // Line noise between frames (stray CR/LF, spaces) is not part of the name.
    let body = body.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let prefix_end = prefix_len(body, digit_suffix_prefixes);

    DecodeResult::Response {
        frame: Frame {
            prefix: body[..prefix_end].to_string(),
            data: body[prefix_end..].to_string(),
        },
        consumed,
    }
}

/// The prefix the rig will echo when it answers `cmd`.
///
/// ```
/// use shackctl_cat::protocol::extract_command_prefix;
///
/// assert_eq!(extract_command_prefix(b"FA00014074000;", &[]), "FA");
/// assert_eq!(extract_command_prefix(b"MD02;", &["MD"]), "MD0");
/// ```
pub fn extract_command_prefix(cmd: &[u8], digit_suffix_prefixes: &[&str]) -> String {
    let s = match std::str::from_utf8(cmd) {
        Ok(s) => s,
        Err(_) => return String::new(),
    };
    s[..prefix_len(s, digit_suffix_prefixes)].to_string()
}

fn prefix_len(s: &str, digit_suffix_prefixes: &[&str]) -> usize {
    let alpha_end = s
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(s.len());

    if digit_suffix_prefixes.contains(&&s[..alpha_end])
        && s.as_bytes().get(alpha_end).is_some_and(u8::is_ascii_digit)
    {
        alpha_end + 1
    } else {
        alpha_end
    }
}
