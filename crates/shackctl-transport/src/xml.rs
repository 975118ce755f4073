//! XML-RPC message encoding and decoding.
//!
//! Only what a method call and its response need: the scalar types, arrays,
//! structs, `<nil/>` and faults. Anything the decoder does not understand is
//! reported as [`Error::Protocol`]; a malformed body is never mistaken for
//! an empty success.

use std::fmt::Write as _;

use shackctl_core::error::{Error, Result};
use shackctl_core::transport::RpcValue;

/// Encode a `<methodCall>` document.
pub fn encode_call(method: &str, params: &[RpcValue]) -> String {
    let mut out = String::with_capacity(128);
    out.push_str("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    escape_into(&mut out, method);
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(out: &mut String, value: &RpcValue) {
    out.push_str("<value>");
    match value {
        RpcValue::Nil => out.push_str("<nil/>"),
        RpcValue::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        RpcValue::Int(n) => match i32::try_from(*n) {
            Ok(n) => {
                let _ = write!(out, "<int>{n}</int>");
            }
            Err(_) => {
                let _ = write!(out, "<i8>{n}</i8>");
            }
        },
        RpcValue::Double(d) => {
            let _ = write!(out, "<double>{d}</double>");
        }
        RpcValue::String(s) => {
            out.push_str("<string>");
            escape_into(out, s);
            out.push_str("</string>");
        }
        RpcValue::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(out, item);
            }
            out.push_str("</data></array>");
        }
        RpcValue::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                escape_into(out, name);
                out.push_str("</name>");
                encode_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

/// Decode a `<methodResponse>` document.
///
/// A response with no parameters decodes to [`RpcValue::Nil`]. A fault
/// decodes to `Err(Error::Protocol("fault CODE: MESSAGE"))`.
pub fn decode_response(body: &str) -> Result<RpcValue> {
    let tokens = tokenize(body)?;
    let mut p = Parser { tokens, pos: 0 };

    p.expect_open("methodResponse")?;
    let value = match p.next_tag()? {
        Token::Open(name) if name == "params" => {
            p.skip_ws();
            if p.peek_close("params") {
                p.pos += 1;
                RpcValue::Nil
            } else {
                p.expect_open("param")?;
                p.expect_open("value")?;
                let v = p.value_body()?;
                p.expect_close("param")?;
                p.expect_close("params")?;
                v
            }
        }
        Token::SelfClosing(name) if name == "params" => RpcValue::Nil,
        Token::Open(name) if name == "fault" => {
            p.expect_open("value")?;
            let fault = p.value_body()?;
            p.expect_close("fault")?;
            let code = fault.member("faultCode").and_then(RpcValue::as_int).unwrap_or(0);
            let message = fault
                .member("faultString")
                .and_then(RpcValue::as_str)
                .unwrap_or("")
                .to_string();
            return Err(Error::Protocol(format!("fault {code}: {message}")));
        }
        other => return Err(malformed(format!("unexpected {other:?} in methodResponse"))),
    };
    p.expect_close("methodResponse")?;
    p.skip_ws();
    if p.pos != p.tokens.len() {
        return Err(malformed("trailing content after methodResponse"));
    }
    Ok(value)
}

fn malformed(why: impl std::fmt::Display) -> Error {
    Error::Protocol(format!("malformed XML-RPC response: {why}"))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    SelfClosing(String),
    Text(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("<?") {
            let end = after.find("?>").ok_or_else(|| malformed("unterminated declaration"))?;
            rest = &after[end + 2..];
        } else if let Some(after) = rest.strip_prefix("<!--") {
            let end = after.find("-->").ok_or_else(|| malformed("unterminated comment"))?;
            rest = &after[end + 3..];
        } else if let Some(after) = rest.strip_prefix('<') {
            let end = after.find('>').ok_or_else(|| malformed("unterminated tag"))?;
            let inner = after[..end].trim();
            rest = &after[end + 1..];
            if let Some(name) = inner.strip_prefix('/') {
                tokens.push(Token::Close(tag_name(name)?));
            } else if let Some(name) = inner.strip_suffix('/') {
                tokens.push(Token::SelfClosing(tag_name(name)?));
            } else {
                tokens.push(Token::Open(tag_name(inner)?));
            }
        } else {
            let end = rest.find('<').unwrap_or(rest.len());
            tokens.push(Token::Text(unescape(&rest[..end])?));
            rest = &rest[end..];
        }
    }
    Ok(tokens)
}

/// Tag name without attributes.
fn tag_name(inner: &str) -> Result<String> {
    let name = inner.split_whitespace().next().unwrap_or("");
    if name.is_empty() {
        return Err(malformed("empty tag"));
    }
    Ok(name.to_string())
}

fn unescape(text: &str) -> Result<String> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after.find(';').ok_or_else(|| malformed("unterminated entity"))?;
        let entity = &after[..semi];
        let ch = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| malformed(format!("unknown entity &{entity};")))?
            }
        };
        out.push(ch);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn skip_ws(&mut self) {
        while let Some(Token::Text(t)) = self.tokens.get(self.pos) {
            if !t.trim().is_empty() {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_raw(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| malformed("unexpected end of document"))?;
        self.pos += 1;
        Ok(token)
    }

    /// Next token after skipping whitespace.
    fn next_tag(&mut self) -> Result<Token> {
        self.skip_ws();
        self.next_raw()
    }

    fn peek_close(&self, name: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Close(n)) if n == name)
    }

    fn expect_open(&mut self, name: &str) -> Result<()> {
        match self.next_tag()? {
            Token::Open(n) if n == name => Ok(()),
            other => Err(malformed(format!("expected <{name}>, found {other:?}"))),
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<()> {
        match self.next_tag()? {
            Token::Close(n) if n == name => Ok(()),
            other => Err(malformed(format!("expected </{name}>, found {other:?}"))),
        }
    }

    /// Text up to `</name>`, which is consumed.
    fn text_until_close(&mut self, name: &str) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.next_raw()? {
                Token::Text(t) => text.push_str(&t),
                Token::Close(n) if n == name => return Ok(text),
                other => return Err(malformed(format!("unexpected {other:?} inside <{name}>"))),
            }
        }
    }

    /// Parse what follows `<value>`, through the matching `</value>`.
    fn value_body(&mut self) -> Result<RpcValue> {
        // An untyped value is a string.
        let leading = match self.tokens.get(self.pos) {
            Some(Token::Text(t)) => {
                let t = t.clone();
                self.pos += 1;
                Some(t)
            }
            _ => None,
        };
        if self.peek_close("value") {
            self.pos += 1;
            return Ok(RpcValue::String(leading.unwrap_or_default()));
        }
        if let Some(t) = &leading
            && !t.trim().is_empty()
        {
            return Err(malformed("text mixed with a typed value"));
        }

        let value = match self.next_raw()? {
            Token::SelfClosing(t) if t == "nil" => RpcValue::Nil,
            Token::SelfClosing(t) if t == "string" => RpcValue::String(String::new()),
            Token::Open(t) => self.typed(&t)?,
            other => return Err(malformed(format!("unexpected {other:?} in value"))),
        };
        self.expect_close("value")?;
        Ok(value)
    }

    fn typed(&mut self, ty: &str) -> Result<RpcValue> {
        match ty {
            "string" => Ok(RpcValue::String(self.text_until_close("string")?)),
            "int" | "i4" | "i8" => {
                let text = self.text_until_close(ty)?;
                text.trim()
                    .parse()
                    .map(RpcValue::Int)
                    .map_err(|_| malformed(format!("bad integer {text:?}")))
            }
            "boolean" => match self.text_until_close("boolean")?.trim() {
                "1" => Ok(RpcValue::Bool(true)),
                "0" => Ok(RpcValue::Bool(false)),
                other => Err(malformed(format!("bad boolean {other:?}"))),
            },
            "double" => {
                let text = self.text_until_close("double")?;
                text.trim()
                    .parse()
                    .map(RpcValue::Double)
                    .map_err(|_| malformed(format!("bad double {text:?}")))
            }
            "nil" => {
                self.expect_close("nil")?;
                Ok(RpcValue::Nil)
            }
            "array" => {
                let mut items = Vec::new();
                match self.next_tag()? {
                    Token::SelfClosing(n) if n == "data" => {}
                    Token::Open(n) if n == "data" => loop {
                        match self.next_tag()? {
                            Token::Open(v) if v == "value" => items.push(self.value_body()?),
                            Token::Close(d) if d == "data" => break,
                            other => {
                                return Err(malformed(format!("unexpected {other:?} in array")));
                            }
                        }
                    },
                    other => return Err(malformed(format!("expected <data>, found {other:?}"))),
                }
                self.expect_close("array")?;
                Ok(RpcValue::Array(items))
            }
            "struct" => {
                let mut members = Vec::new();
                loop {
                    match self.next_tag()? {
                        Token::Open(m) if m == "member" => {
                            self.expect_open("name")?;
                            let name = self.text_until_close("name")?;
                            self.expect_open("value")?;
                            let value = self.value_body()?;
                            self.expect_close("member")?;
                            members.push((name, value));
                        }
                        Token::Close(s) if s == "struct" => break,
                        other => return Err(malformed(format!("unexpected {other:?} in struct"))),
                    }
                }
                Ok(RpcValue::Struct(members))
            }
            other => Err(malformed(format!("unknown value type <{other}>"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_string_call() {
        let xml = encode_call("text.add_tx", &[RpcValue::String("CQ <TEST> & 5NN".into())]);
        assert!(xml.contains("<methodName>text.add_tx</methodName>"));
        assert!(xml.contains("<string>CQ &lt;TEST&gt; &amp; 5NN</string>"));
    }

    #[test]
    fn encode_no_params() {
        let xml = encode_call("main.tx", &[]);
        assert!(xml.ends_with("<params></params></methodCall>\n"));
    }

    #[test]
    fn decode_empty_params_is_nil() {
        let body = "<?xml version=\"1.0\"?>\n<methodResponse><params></params></methodResponse>";
        assert_eq!(decode_response(body).unwrap(), RpcValue::Nil);
    }

    #[test]
    fn decode_untyped_string() {
        let body = "<?xml version=\"1.0\"?><methodResponse><params><param>\
                    <value>RX</value></param></params></methodResponse>";
        assert_eq!(decode_response(body).unwrap(), RpcValue::String("RX".into()));
    }

    #[test]
    fn decode_typed_scalars_with_whitespace() {
        let body = r#"<?xml version="1.0"?>
<methodResponse>
  <params>
    <param>
      <value><array><data>
        <value><i4>42</i4></value>
        <value><boolean>1</boolean></value>
        <value><double>14.074</double></value>
        <value><string>a &amp; b</string></value>
        <value><nil/></value>
      </data></array></value>
    </param>
  </params>
</methodResponse>
"#;
        assert_eq!(
            decode_response(body).unwrap(),
            RpcValue::Array(vec![
                RpcValue::Int(42),
                RpcValue::Bool(true),
                RpcValue::Double(14.074),
                RpcValue::String("a & b".into()),
                RpcValue::Nil,
            ])
        );
    }

    #[test]
    fn decode_fault() {
        let body = "<methodResponse><fault><value><struct>\
                    <member><name>faultCode</name><value><int>4</int></value></member>\
                    <member><name>faultString</name><value><string>Too many parameters</string></value></member>\
                    </struct></value></fault></methodResponse>";
        let err = decode_response(body).unwrap_err();
        assert_eq!(
            err.to_string(),
            "protocol error: fault 4: Too many parameters"
        );
    }

    #[test]
    fn malformed_bodies_are_protocol_errors() {
        for body in [
            "",
            "not xml at all",
            "<html><body>502 Bad Gateway</body></html>",
            "<methodResponse><params><param><value><int>x</int></value></param></params></methodResponse>",
            "<methodResponse><params><param><value><int>1</int></value>",
        ] {
            let err = decode_response(body).unwrap_err();
            assert!(
                matches!(err, Error::Protocol(_)),
                "body {body:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn numeric_entities() {
        assert_eq!(unescape("&#65;&#x42;C").unwrap(), "ABC");
        assert!(unescape("&bogus;").is_err());
    }
}
