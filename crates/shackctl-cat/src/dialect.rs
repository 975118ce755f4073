//! Kenwood and Yaesu CAT dialects.
//!
//! Both families share the frame syntax and most command names. A
//! [`CatDialect`] captures where they differ: digit counts, the VFO and
//! mode commands, how the clarifier is reported, and mode codes. Command
//! builders are pure; the driver owns all I/O.

use shackctl_core::error::{Error, Result};
use shackctl_core::types::{Mode, Vfo};

use crate::protocol::encode_command;

/// Which clarifier a command addresses. Both share one offset register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clarifier {
    Rit,
    Xit,
}

impl Clarifier {
    fn switch_prefix(self) -> &'static str {
        match self {
            Clarifier::Rit => "RT",
            Clarifier::Xit => "XT",
        }
    }
}

/// Field positions inside the data of an `IF;` reply.
#[derive(Debug, Clone, Copy)]
pub struct InfoLayout {
    /// Index of the `+`/`-` sign of the clarifier offset.
    pub offset_sign: usize,
    /// Number of offset digits following the sign.
    pub offset_digits: usize,
    /// Index of the RIT on/off flag.
    pub rit_flag: usize,
    /// Index of the XIT on/off flag.
    pub xit_flag: usize,
}

/// One CAT command family.
pub trait CatDialect: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Prefixes whose trailing digit belongs to the command name.
    fn digit_suffix_prefixes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Width of the zero-padded frequency field.
    fn frequency_digits(&self) -> usize;

    /// Command that reads the receive VFO.
    fn vfo_prefix(&self) -> &'static str;

    /// Command that reads and writes the main receiver mode.
    fn mode_prefix(&self) -> &'static str;

    fn mode_code(&self, mode: Mode) -> &'static str;

    fn parse_mode_code(&self, code: &str) -> Result<Mode>;

    fn info_layout(&self) -> InfoLayout;

    /// Pad CW text to the full 24-character field.
    fn pads_morse(&self) -> bool;

    /// Largest clarifier offset the rig accepts, in hertz.
    fn max_clarifier_hz(&self) -> u32;

    // ---------------------------------------------------------------
    // Builders shared by both families
    // ---------------------------------------------------------------

    fn read_frequency(&self, vfo: Vfo) -> Vec<u8> {
        encode_command(frequency_prefix(vfo), "")
    }

    fn set_frequency(&self, vfo: Vfo, hz: u64) -> Vec<u8> {
        let width = self.frequency_digits();
        encode_command(frequency_prefix(vfo), &format!("{hz:0width$}"))
    }

    fn parse_frequency(&self, data: &str) -> Result<u64> {
        let width = self.frequency_digits();
        if data.len() != width || !data.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Protocol(format!(
                "expected {width} digits for frequency, got {data:?}"
            )));
        }
        data.parse::<u64>()
            .map_err(|e| Error::Protocol(format!("invalid frequency digits: {data:?} ({e})")))
    }

    /// Highest frequency the field can carry.
    fn max_frequency_hz(&self) -> u64 {
        10u64.pow(self.frequency_digits() as u32) - 1
    }

    fn read_vfo(&self) -> Vec<u8> {
        encode_command(self.vfo_prefix(), "")
    }

    fn parse_vfo(&self, data: &str) -> Result<Vfo> {
        match data {
            "0" => Ok(Vfo::A),
            "1" => Ok(Vfo::B),
            _ => Err(Error::Protocol(format!("unexpected VFO state: {data:?}"))),
        }
    }

    fn read_mode(&self) -> Vec<u8> {
        encode_command(self.mode_prefix(), "")
    }

    fn set_mode(&self, mode: Mode) -> Vec<u8> {
        encode_command(self.mode_prefix(), self.mode_code(mode))
    }

    fn read_ptt(&self) -> Vec<u8> {
        encode_command("TX", "")
    }

    fn set_ptt(&self, on: bool) -> Vec<u8> {
        encode_command("TX", if on { "1" } else { "0" })
    }

    /// `TX0` is receive; `TX1` and `TX2` (data transmit) both mean on air.
    fn parse_ptt(&self, data: &str) -> Result<bool> {
        match data {
            "0" => Ok(false),
            "1" | "2" => Ok(true),
            _ => Err(Error::Protocol(format!("unexpected TX state: {data:?}"))),
        }
    }

    fn read_power(&self) -> Vec<u8> {
        encode_command("PC", "")
    }

    fn set_power(&self, watts: u16) -> Vec<u8> {
        encode_command("PC", &format!("{watts:03}"))
    }

    fn parse_power(&self, data: &str) -> Result<f32> {
        parse_digits::<u16>(data, 3, "power").map(f32::from)
    }

    fn read_keyer_speed(&self) -> Vec<u8> {
        encode_command("KS", "")
    }

    fn set_keyer_speed(&self, wpm: u8) -> Vec<u8> {
        encode_command("KS", &format!("{wpm:03}"))
    }

    fn parse_keyer_speed(&self, data: &str) -> Result<u8> {
        parse_digits(data, 3, "keyer speed")
    }

    fn read_info(&self) -> Vec<u8> {
        encode_command("IF", "")
    }

    /// The effective clarifier offset: the shared offset if `which` is
    /// switched on, otherwise zero.
    fn parse_clarifier(&self, data: &str, which: Clarifier) -> Result<i32> {
        let layout = self.info_layout();
        let flag = match which {
            Clarifier::Rit => layout.rit_flag,
            Clarifier::Xit => layout.xit_flag,
        };
        let needed = flag.max(layout.offset_sign + layout.offset_digits) + 1;
        if data.len() < needed || !data.is_ascii() {
            return Err(Error::Protocol(format!(
                "IF reply too short: expected at least {needed} characters, got {}",
                data.len()
            )));
        }

        let sign = match &data[layout.offset_sign..layout.offset_sign + 1] {
            "+" => 1,
            "-" => -1,
            other => {
                return Err(Error::Protocol(format!(
                    "expected + or - for clarifier sign, got {other:?}"
                )));
            }
        };
        let start = layout.offset_sign + 1;
        let offset: i32 = parse_digits(
            &data[start..start + layout.offset_digits],
            layout.offset_digits,
            "clarifier offset",
        )?;

        match &data[flag..flag + 1] {
            "0" => Ok(0),
            "1" => Ok(sign * offset),
            other => Err(Error::Protocol(format!(
                "expected 0 or 1 for {which:?} state, got {other:?}"
            ))),
        }
    }

    /// Commands that leave `which` switched on at `hz`, or off when `hz` is
    /// zero. The offset is set by clearing it and stepping from zero.
    fn set_clarifier(&self, which: Clarifier, hz: i32) -> Result<Vec<Vec<u8>>> {
        let max = self.max_clarifier_hz();
        if hz.unsigned_abs() > max {
            return Err(Error::Configuration(format!(
                "clarifier offset {hz} Hz outside ±{max} Hz"
            )));
        }
        let switch = which.switch_prefix();
        if hz == 0 {
            return Ok(vec![encode_command("RC", ""), encode_command(switch, "0")]);
        }
        let width = max.to_string().len();
        let step = if hz > 0 { "RU" } else { "RD" };
        Ok(vec![
            encode_command("RC", ""),
            encode_command(step, &format!("{:0width$}", hz.unsigned_abs())),
            encode_command(switch, "1"),
        ])
    }

    /// `KY` frames carrying `text`, at most 24 characters each.
    fn send_morse(&self, text: &str) -> Vec<Vec<u8>> {
        let chars: Vec<char> = text.to_uppercase().chars().collect();
        chars
            .chunks(24)
            .map(|chunk| {
                let chunk: String = chunk.iter().collect();
                if self.pads_morse() {
                    encode_command("KY", &format!(" {chunk:<24}"))
                } else {
                    encode_command("KY", &format!(" {chunk}"))
                }
            })
            .collect()
    }

    fn read_morse_buffer(&self) -> Vec<u8> {
        encode_command("KY", "")
    }

    /// Whether the rig can take another `KY` frame.
    fn parse_morse_buffer_ready(&self, data: &str) -> Result<bool> {
        match data {
            "0" => Ok(true),
            "1" => Ok(false),
            _ => Err(Error::Protocol(format!(
                "unexpected CW buffer state: {data:?}"
            ))),
        }
    }

    /// A blank `KY` frame flushes the rig's CW buffer.
    fn stop_morse(&self) -> Vec<u8> {
        encode_command("KY", &" ".repeat(25))
    }
}

fn frequency_prefix(vfo: Vfo) -> &'static str {
    match vfo {
        Vfo::B => "FB",
        _ => "FA",
    }
}

fn parse_digits<T: std::str::FromStr>(data: &str, width: usize, what: &str) -> Result<T> {
    if data.len() != width || !data.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Protocol(format!(
            "expected {width} digits for {what}, got {data:?}"
        )));
    }
    data.parse::<T>()
        .map_err(|_| Error::Protocol(format!("invalid {what} digits: {data:?}")))
}

/// TS-480/590/890/990 family.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kenwood;

impl CatDialect for Kenwood {
    fn name(&self) -> &'static str {
        "kenwood"
    }

    fn frequency_digits(&self) -> usize {
        11
    }

    fn vfo_prefix(&self) -> &'static str {
        "FR"
    }

    fn mode_prefix(&self) -> &'static str {
        "MD"
    }

    /// Kenwood has no data sub-modes in `MD`; they fall back to the
    /// underlying sideband.
    fn mode_code(&self, mode: Mode) -> &'static str {
        match mode {
            Mode::LSB | Mode::DataLSB => "1",
            Mode::USB | Mode::DataUSB => "2",
            Mode::CW => "3",
            Mode::FM => "4",
            Mode::AM => "5",
            Mode::RTTY => "6",
            Mode::CWR => "7",
            Mode::RTTYR => "9",
        }
    }

    fn parse_mode_code(&self, code: &str) -> Result<Mode> {
        match code {
            "1" => Ok(Mode::LSB),
            "2" => Ok(Mode::USB),
            "3" => Ok(Mode::CW),
            "4" => Ok(Mode::FM),
            "5" => Ok(Mode::AM),
            "6" => Ok(Mode::RTTY),
            "7" => Ok(Mode::CWR),
            "9" => Ok(Mode::RTTYR),
            _ => Err(Error::Protocol(format!(
                "unknown Kenwood mode code: {code:?}"
            ))),
        }
    }

    // IF: freq(11) step(5) offset(±4) RIT XIT ...
    fn info_layout(&self) -> InfoLayout {
        InfoLayout {
            offset_sign: 16,
            offset_digits: 4,
            rit_flag: 21,
            xit_flag: 22,
        }
    }

    fn pads_morse(&self) -> bool {
        true
    }

    fn max_clarifier_hz(&self) -> u32 {
        9999
    }
}

/// FT-DX10/FT-991A/FT-710 family.
#[derive(Debug, Clone, Copy, Default)]
pub struct Yaesu;

impl CatDialect for Yaesu {
    fn name(&self) -> &'static str {
        "yaesu"
    }

    fn digit_suffix_prefixes(&self) -> &'static [&'static str] {
        &["MD", "RM", "SM", "SH", "NA", "AN", "PA", "RA"]
    }

    fn frequency_digits(&self) -> usize {
        9
    }

    fn vfo_prefix(&self) -> &'static str {
        "VS"
    }

    fn mode_prefix(&self) -> &'static str {
        "MD0"
    }

    fn mode_code(&self, mode: Mode) -> &'static str {
        match mode {
            Mode::LSB => "1",
            Mode::USB => "2",
            Mode::CW => "3",
            Mode::FM => "4",
            Mode::AM => "5",
            Mode::RTTY => "6",
            Mode::CWR => "7",
            Mode::DataLSB => "8",
            Mode::RTTYR => "9",
            Mode::DataUSB => "C",
        }
    }

    fn parse_mode_code(&self, code: &str) -> Result<Mode> {
        match code {
            "1" => Ok(Mode::LSB),
            "2" => Ok(Mode::USB),
            "3" => Ok(Mode::CW),
            "4" | "B" => Ok(Mode::FM),
            "5" | "D" => Ok(Mode::AM),
            "6" => Ok(Mode::RTTY),
            "7" => Ok(Mode::CWR),
            "8" => Ok(Mode::DataLSB),
            "9" => Ok(Mode::RTTYR),
            "C" => Ok(Mode::DataUSB),
            _ => Err(Error::Protocol(format!("unknown Yaesu mode code: {code:?}"))),
        }
    }

    // IF: memory(3) freq(9) offset(±4) RIT XIT mode ...
    fn info_layout(&self) -> InfoLayout {
        InfoLayout {
            offset_sign: 12,
            offset_digits: 4,
            rit_flag: 17,
            xit_flag: 18,
        }
    }

    fn pads_morse(&self) -> bool {
        false
    }

    fn max_clarifier_hz(&self) -> u32 {
        9999
    }
}

/// Pick the dialect for a profile's `model` string.
///
/// Model names are matched on their manufacturer prefix, so `"ts590"` and
/// `"kenwood"` both select [`Kenwood`]. No model means Kenwood.
pub fn dialect_for(model: Option<&str>) -> Result<Box<dyn CatDialect>> {
    let Some(model) = model else {
        return Ok(Box::new(Kenwood));
    };
    let model = model.trim().to_lowercase();
    if model == "kenwood" || model.starts_with("ts") || model == "elecraft" {
        Ok(Box::new(Kenwood))
    } else if model == "yaesu" || model.starts_with("ft") {
        Ok(Box::new(Yaesu))
    } else {
        Err(Error::Configuration(format!(
            "unsupported CAT model {model:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shackctl_core::error::ErrorKind;

    #[test]
    fn frequency_width_per_family() {
        assert_eq!(Kenwood.set_frequency(Vfo::A, 14_074_000), b"FA00014074000;");
        assert_eq!(Yaesu.set_frequency(Vfo::B, 7_030_000), b"FB007030000;");
        assert_eq!(Kenwood.read_frequency(Vfo::Current), b"FA;");
        assert_eq!(Yaesu.max_frequency_hz(), 999_999_999);
    }

    #[test]
    fn frequency_parse_rejects_wrong_width() {
        assert_eq!(Kenwood.parse_frequency("00014074000").unwrap(), 14_074_000);
        assert!(Kenwood.parse_frequency("014074000").is_err());
        assert!(Yaesu.parse_frequency("01407400x").is_err());
    }

    #[test]
    fn mode_commands() {
        assert_eq!(Kenwood.set_mode(Mode::CW), b"MD3;");
        assert_eq!(Yaesu.set_mode(Mode::DataUSB), b"MD0C;");
        assert_eq!(Yaesu.read_mode(), b"MD0;");
        assert_eq!(Kenwood.parse_mode_code("7").unwrap(), Mode::CWR);
        assert_eq!(Yaesu.parse_mode_code("B").unwrap(), Mode::FM);
        assert!(Kenwood.parse_mode_code("8").is_err());
    }

    #[test]
    fn kenwood_data_modes_fall_back_to_sideband() {
        assert_eq!(Kenwood.set_mode(Mode::DataUSB), b"MD2;");
        assert_eq!(Kenwood.set_mode(Mode::DataLSB), b"MD1;");
    }

    #[test]
    fn vfo_commands() {
        assert_eq!(Kenwood.read_vfo(), b"FR;");
        assert_eq!(Yaesu.read_vfo(), b"VS;");
        assert_eq!(Kenwood.parse_vfo("1").unwrap(), Vfo::B);
        assert!(Yaesu.parse_vfo("2").is_err());
    }

    #[test]
    fn ptt_and_power() {
        assert_eq!(Kenwood.set_ptt(true), b"TX1;");
        assert!(Yaesu.parse_ptt("2").unwrap());
        assert_eq!(Kenwood.set_power(50), b"PC050;");
        assert_eq!(Yaesu.parse_power("100").unwrap(), 100.0);
        assert!(Kenwood.parse_power("1000").is_err());
    }

    #[test]
    fn keyer_speed() {
        assert_eq!(Kenwood.set_keyer_speed(28), b"KS028;");
        assert_eq!(Yaesu.parse_keyer_speed("030").unwrap(), 30);
        assert!(Kenwood.parse_keyer_speed("30").is_err());
    }

    #[test]
    fn kenwood_info_clarifier() {
        // freq, 5 step chars, -0120, RIT on, XIT off, tail
        let data = "00014074000     -01201000000000";
        assert_eq!(Kenwood.parse_clarifier(data, Clarifier::Rit).unwrap(), -120);
        assert_eq!(Kenwood.parse_clarifier(data, Clarifier::Xit).unwrap(), 0);
    }

    #[test]
    fn yaesu_info_clarifier() {
        // memory 001, freq, +0300, RIT off, XIT on, mode 2
        let data = "001014074000+0300012000000";
        assert_eq!(Yaesu.parse_clarifier(data, Clarifier::Rit).unwrap(), 0);
        assert_eq!(Yaesu.parse_clarifier(data, Clarifier::Xit).unwrap(), 300);
        assert!(Yaesu.parse_clarifier("001014074000", Clarifier::Rit).is_err());
    }

    #[test]
    fn clarifier_set_sequences() {
        assert_eq!(
            Kenwood.set_clarifier(Clarifier::Rit, -250).unwrap(),
            vec![b"RC;".to_vec(), b"RD0250;".to_vec(), b"RT1;".to_vec()]
        );
        assert_eq!(
            Yaesu.set_clarifier(Clarifier::Xit, 0).unwrap(),
            vec![b"RC;".to_vec(), b"XT0;".to_vec()]
        );
        let err = Yaesu.set_clarifier(Clarifier::Rit, 12_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn morse_is_chunked() {
        let frames = Kenwood.send_morse("cq test");
        assert_eq!(frames, vec![b"KY CQ TEST                 ;".to_vec()]);

        let long = "A".repeat(30);
        let frames = Yaesu.send_morse(&long);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], b"KY AAAAAA;".to_vec());
        assert_eq!(Kenwood.stop_morse().len(), 2 + 25 + 1);
    }

    #[test]
    fn dialect_selection() {
        assert_eq!(dialect_for(None).unwrap().name(), "kenwood");
        assert_eq!(dialect_for(Some("FT-991A")).unwrap().name(), "yaesu");
        assert_eq!(dialect_for(Some("ts590")).unwrap().name(), "kenwood");
        assert_eq!(
            dialect_for(Some("ic7300")).err().map(|e| e.kind()),
            Some(ErrorKind::Configuration)
        );
    }
}
