//! PstRotator-style UDP messages.
//!
//! Commands are small XML fragments wrapped in `<PST>`; the controller
//! answers position queries with `AZ:<degrees>` (and `EL:<degrees>` when
//! an elevation rotator is attached) on the same socket.

use shackctl_core::error::{Error, Result};

/// Command port of the controller.
pub const DEFAULT_PORT: u16 = 12000;

/// Turn to `azimuth` degrees. Whole degrees only.
pub fn set_azimuth(azimuth: f64) -> String {
    format!("<PST><AZIMUTH>{}</AZIMUTH></PST>", azimuth.round() as u16)
}

/// Turn to `elevation` degrees.
pub fn set_elevation(elevation: f64) -> String {
    format!("<PST><ELEVATION>{}</ELEVATION></PST>", elevation.round() as u16)
}

pub fn query_azimuth() -> &'static str {
    "<PST>AZ?</PST>"
}

/// One reading reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Azimuth(f64),
    Elevation(f64),
}

/// Parse one reply datagram.
pub fn parse(datagram: &[u8]) -> Result<Reading> {
    let text = std::str::from_utf8(datagram)
        .map_err(|_| Error::Protocol("rotator reply is not text".into()))?
        .trim();
    let (tag, value) = text
        .split_once(':')
        .ok_or_else(|| Error::Protocol(format!("unexpected rotator reply {text:?}")))?;
    let degrees: f64 = value
        .trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("bad bearing in rotator reply {text:?}")))?;
    match tag.trim() {
        "AZ" => Ok(Reading::Azimuth(degrees)),
        "EL" => Ok(Reading::Elevation(degrees)),
        other => Err(Error::Protocol(format!("unknown rotator reading {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands() {
        assert_eq!(set_azimuth(123.4), "<PST><AZIMUTH>123</AZIMUTH></PST>");
        assert_eq!(set_azimuth(359.6), "<PST><AZIMUTH>360</AZIMUTH></PST>");
        assert_eq!(set_elevation(30.0), "<PST><ELEVATION>30</ELEVATION></PST>");
    }

    #[test]
    fn readings() {
        assert_eq!(parse(b"AZ:123").unwrap(), Reading::Azimuth(123.0));
        assert_eq!(parse(b"EL:12.5\r\n").unwrap(), Reading::Elevation(12.5));
        assert!(matches!(parse(b"AZ:north"), Err(Error::Protocol(_))));
        assert!(matches!(parse(b"hello"), Err(Error::Protocol(_))));
        assert!(matches!(parse(&[0xFF, 0xFE]), Err(Error::Protocol(_))));
    }
}
