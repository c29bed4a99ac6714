//! Line grammar of the interactive gatttool shell.
//!
//! Every line the tool prints is classified into one of three shapes,
//! tried in a fixed order (prompt, result, error). The first shape that
//! matches wins; anything else is [`ParsedLine::Unrecognized`].
//!
//! ```text
//! [CON][AA:BB:CC:DD:EE:FF][LE]>          prompt
//! PRIMARY-ALL-END: AA:BB:CC:DD:EE:FF 0   result
//! ERROR(2,14): connect failed            error
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a device address as printed by the tool
pub const ADDRESS_LEN: usize = 17;

/// Width of the prompt state token
pub const STATE_TOKEN_LEN: usize = 3;

/// Width of the prompt address-type token
pub const TYPE_TOKEN_LEN: usize = 2;

/// Prompt state token printed while a device is connected
pub const CONNECTED_MARKER: &str = "CON";

/// Command tokens that may open a result line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultToken {
    Notification,
    Indication,
    Connected,
    Disconnected,
    PrimaryAll,
    PrimaryAllEnd,
    PrimaryUuid,
    PrimaryUuidEnd,
    Char,
    CharEnd,
    CharDesc,
    CharDescEnd,
    CharValDesc,
    CharValDescEnd,
    CharReadUuid,
    CharReadUuidEnd,
    CharWrite,
    SecLevel,
    Mtu,
}

impl ResultToken {
    pub const ALL: [ResultToken; 19] = [
        ResultToken::Notification,
        ResultToken::Indication,
        ResultToken::Connected,
        ResultToken::Disconnected,
        ResultToken::PrimaryAll,
        ResultToken::PrimaryAllEnd,
        ResultToken::PrimaryUuid,
        ResultToken::PrimaryUuidEnd,
        ResultToken::Char,
        ResultToken::CharEnd,
        ResultToken::CharDesc,
        ResultToken::CharDescEnd,
        ResultToken::CharValDesc,
        ResultToken::CharValDescEnd,
        ResultToken::CharReadUuid,
        ResultToken::CharReadUuidEnd,
        ResultToken::CharWrite,
        ResultToken::SecLevel,
        ResultToken::Mtu,
    ];

    /// Token text exactly as the tool prints it
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultToken::Notification => "NOTIFICATION",
            ResultToken::Indication => "INDICATION",
            ResultToken::Connected => "CONNECTED",
            ResultToken::Disconnected => "DISCONNECTED",
            ResultToken::PrimaryAll => "PRIMARY-ALL",
            ResultToken::PrimaryAllEnd => "PRIMARY-ALL-END",
            ResultToken::PrimaryUuid => "PRIMARY-UUID",
            ResultToken::PrimaryUuidEnd => "PRIMARY-UUID-END",
            ResultToken::Char => "CHAR",
            ResultToken::CharEnd => "CHAR-END",
            ResultToken::CharDesc => "CHAR-DESC",
            ResultToken::CharDescEnd => "CHAR-DESC-END",
            ResultToken::CharValDesc => "CHAR-VAL-DESC",
            ResultToken::CharValDescEnd => "CHAR-VAL-DESC-END",
            ResultToken::CharReadUuid => "CHAR-READ-UUID",
            ResultToken::CharReadUuidEnd => "CHAR-READ-UUID-END",
            ResultToken::CharWrite => "CHAR-WRITE",
            ResultToken::SecLevel => "SEC-LEVEL",
            ResultToken::Mtu => "MTU",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == token)
    }

    /// Tokens whose receipt closes the running command and returns the
    /// session to `Connected`.
    pub fn is_end_of_sequence(&self) -> bool {
        matches!(
            self,
            ResultToken::PrimaryAllEnd
                | ResultToken::PrimaryUuidEnd
                | ResultToken::CharEnd
                | ResultToken::CharValDescEnd
                | ResultToken::CharReadUuidEnd
                | ResultToken::CharWrite
                | ResultToken::SecLevel
                | ResultToken::Mtu
        )
    }
}

impl fmt::Display for ResultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[sss][AA:BB:CC:DD:EE:FF][tt]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub state: String,
    pub address: String,
    pub address_type: String,
}

impl Prompt {
    pub fn is_connected(&self) -> bool {
        self.state == CONNECTED_MARKER
    }

    pub fn is_blank(&self) -> bool {
        self.state.trim().is_empty()
    }
}

/// `TOKEN: AA:BB:CC:DD:EE:FF argument...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLine {
    pub token: ResultToken,
    pub address: String,
    pub argument: String,
}

/// Classification of one line of tool output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Prompt(Prompt),
    Result(ResultLine),
    ShellError { code: u32, subcode: u32 },
    Unrecognized,
}

/// Classify a single line of tool output.
pub fn parse_line(line: &str) -> ParsedLine {
    if let Some(prompt) = parse_prompt(line) {
        return ParsedLine::Prompt(prompt);
    }
    if let Some(result) = parse_result(line) {
        return ParsedLine::Result(result);
    }
    if let Some((code, subcode)) = parse_error(line) {
        return ParsedLine::ShellError { code, subcode };
    }
    ParsedLine::Unrecognized
}

/// Prompts are redrawn with terminal noise around them, so the first
/// well-formed prompt anywhere in the line is accepted.
fn parse_prompt(line: &str) -> Option<Prompt> {
    line.match_indices('[')
        .find_map(|(start, _)| prompt_at(&line[start..]))
}

fn prompt_at(text: &str) -> Option<Prompt> {
    let mut cursor = Cursor::new(text);
    let state = cursor.bracketed(STATE_TOKEN_LEN, |c| c != ']')?;
    let address = cursor.bracketed(ADDRESS_LEN, |c| is_address_char(c) || c.is_whitespace())?;
    let address_type = cursor.bracketed(TYPE_TOKEN_LEN, |c| !c.is_whitespace())?;

    Some(Prompt {
        state: state.to_string(),
        address: address.to_string(),
        address_type: address_type.to_string(),
    })
}

fn parse_result(line: &str) -> Option<ResultLine> {
    line.match_indices(':')
        .find_map(|(colon, _)| result_at(line, colon))
}

fn result_at(line: &str, colon: usize) -> Option<ResultLine> {
    let head = &line[..colon];
    let token_start = head
        .rfind(|c: char| !is_token_char(c))
        .map(|i| i + head[i..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);
    let token = ResultToken::from_token(&head[token_start..])?;

    let mut cursor = Cursor::new(&line[colon + 1..]);
    cursor.skip_whitespace();
    let address = cursor.take_exact(ADDRESS_LEN, is_address_char)?;
    cursor.skip_whitespace();

    Some(ResultLine {
        token,
        address: address.to_string(),
        argument: cursor.rest().trim_end().to_string(),
    })
}

fn parse_error(line: &str) -> Option<(u32, u32)> {
    let mut cursor = Cursor::new(line.trim_start());
    cursor.expect_str("ERROR(")?;
    let code = cursor.take_while(|c| c.is_ascii_digit());
    cursor.expect(',')?;
    let subcode = cursor.take_while(|c| c.is_ascii_digit());
    cursor.expect_str("):")?;

    Some((parse_digits(code)?, parse_digits(subcode)?))
}

fn parse_digits(digits: &str) -> Option<u32> {
    if digits.is_empty() {
        Some(0)
    } else {
        digits.parse().ok()
    }
}

fn is_address_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, 'A'..='F' | ':')
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_uppercase() || c == '-'
}

/// True for `XX:XX:XX:XX:XX:XX` with hex octets in either case.
pub fn is_device_address(address: &str) -> bool {
    address.len() == ADDRESS_LEN
        && address.split(':').count() == 6
        && address
            .split(':')
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn rest(&self) -> &'a str {
        self.rest
    }

    fn expect(&mut self, c: char) -> Option<()> {
        self.rest = self.rest.strip_prefix(c)?;
        Some(())
    }

    fn expect_str(&mut self, s: &str) -> Option<()> {
        self.rest = self.rest.strip_prefix(s)?;
        Some(())
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> &'a str {
        let end = self
            .rest
            .char_indices()
            .find(|&(_, c)| !accept(c))
            .map_or(self.rest.len(), |(i, _)| i);
        let (taken, rest) = self.rest.split_at(end);
        self.rest = rest;
        taken
    }

    /// Take exactly `count` characters, all of which must be accepted.
    fn take_exact(&mut self, count: usize, accept: impl Fn(char) -> bool) -> Option<&'a str> {
        let mut end = 0;
        let mut taken = 0;
        for (i, c) in self.rest.char_indices() {
            if taken == count {
                break;
            }
            if !accept(c) {
                return None;
            }
            end = i + c.len_utf8();
            taken += 1;
        }
        if taken < count {
            return None;
        }
        let (field, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(field)
    }

    fn bracketed(&mut self, count: usize, accept: impl Fn(char) -> bool) -> Option<&'a str> {
        self.expect('[')?;
        let field = self.take_exact(count, accept)?;
        self.expect(']')?;
        Some(field)
    }
}
