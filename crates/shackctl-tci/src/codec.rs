//! `name:arg,arg;` message encoding and decoding.
//!
//! The network text protocol sends short ASCII messages terminated by `;`.
//! A message is a lowercase name, optionally followed by `:` and a
//! comma-separated argument list:
//!
//! ```text
//! vfo:0,0,14074000;     rx 0, sub-VFO 0 at 14.074 MHz
//! trx:0,true;           rx 0 transmitting
//! cw_macros_speed:25;
//! ready;
//! ```
//!
//! The server answers queries and setters alike by broadcasting the new
//! state in the same format. Some servers capitalize names (`VFO:`, `READY`)
//! or booleans (`False`); decoding is case-insensitive for both.
//!
//! All encoding/decoding in this module is pure parsing -- no I/O is performed.

use bytes::{BufMut, BytesMut};

use shackctl_core::error::{Error, Result};
use shackctl_core::types::Mode;

pub const TERMINATOR: u8 = b';';

/// One decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Lowercase message name.
    pub name: String,
    pub args: Vec<String>,
}

impl Message {
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn arg(&self, index: usize) -> Result<&str> {
        self.args.get(index).map(String::as_str).ok_or_else(|| {
            Error::Protocol(format!("{}: missing argument {index}", self.name))
        })
    }

    /// The argument at `index` parsed as a number.
    pub fn number<T: std::str::FromStr>(&self, index: usize) -> Result<T> {
        let raw = self.arg(index)?;
        raw.trim()
            .parse()
            .map_err(|_| Error::Protocol(format!("{}: bad number {raw:?}", self.name)))
    }

    pub fn flag(&self, index: usize) -> Result<bool> {
        let raw = self.arg(index)?;
        parse_bool(raw).ok_or_else(|| Error::Protocol(format!("{}: bad boolean {raw:?}", self.name)))
    }

    /// The last argument. Single-value broadcasts put the value last
    /// whether or not they carry a receiver index.
    pub fn last(&self) -> Result<&str> {
        self.args
            .last()
            .map(String::as_str)
            .ok_or_else(|| Error::Protocol(format!("{}: no arguments", self.name)))
    }

    /// Whether this message answers a request named `name` whose leading
    /// arguments were `prefix`.
    pub fn answers(&self, name: &str, prefix: &[String]) -> bool {
        self.name == name
            && self.args.len() > prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a.trim() == p)
    }
}

/// Encode `name:args;`. An empty argument list encodes as `name;`.
pub fn encode(name: &str, args: &[String]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(name.len() + 16);
    buf.put_slice(name.as_bytes());
    if !args.is_empty() {
        buf.put_u8(b':');
        buf.put_slice(args.join(",").as_bytes());
    }
    buf.put_u8(TERMINATOR);
    buf.to_vec()
}

/// Decode the first complete message in `buf`.
///
/// Returns the message and the number of bytes it used, or `None` when no
/// terminator has arrived yet. Empty messages (stray `;`) decode with an
/// empty name.
pub fn decode(buf: &[u8]) -> Result<Option<(Message, usize)>> {
    let Some(pos) = buf.iter().position(|&b| b == TERMINATOR) else {
        return Ok(None);
    };
    let body = std::str::from_utf8(&buf[..pos])
        .map_err(|_| Error::Protocol("non-UTF-8 message".into()))?
        .trim();

    let (name, args) = match body.split_once(':') {
        Some((name, rest)) => (name, rest.split(',').map(str::to_string).collect()),
        None => (body, Vec::new()),
    };
    Ok(Some((
        Message {
            name: name.trim().to_ascii_lowercase(),
            args,
        },
        pos + 1,
    )))
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

pub fn format_bool(on: bool) -> String {
    if on { "true" } else { "false" }.to_string()
}

/// Modulation name for `mode`, if the protocol has one.
pub fn modulation_name(mode: Mode) -> Option<&'static str> {
    match mode {
        Mode::USB => Some("usb"),
        Mode::LSB => Some("lsb"),
        Mode::CW => Some("cw"),
        Mode::AM => Some("am"),
        Mode::FM => Some("nfm"),
        Mode::DataUSB => Some("digu"),
        Mode::DataLSB => Some("digl"),
        Mode::CWR | Mode::RTTY | Mode::RTTYR => None,
    }
}

pub fn parse_modulation(name: &str) -> Option<Mode> {
    match name.trim().to_ascii_lowercase().as_str() {
        "usb" => Some(Mode::USB),
        "lsb" => Some(Mode::LSB),
        "cw" => Some(Mode::CW),
        "am" | "sam" => Some(Mode::AM),
        "nfm" | "wfm" | "fm" => Some(Mode::FM),
        "digu" => Some(Mode::DataUSB),
        "digl" => Some(Mode::DataLSB),
        _ => None,
    }
}

/// Make `text` safe to carry as the last argument of `cw_macros`.
pub fn sanitize_cw(text: &str) -> String {
    text.chars()
        .filter(|c| *c != ';' && *c != ':' && !c.is_control())
        .collect::<String>()
        .to_uppercase()
}
