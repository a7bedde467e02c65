//! Legacy `escape`/`unescape` codecs used for cookie values and wire
//! parameters.

/// How the hosting engine's `escape` renders characters above U+00FF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeMode {
    /// No usable probe result; treated like `UnicodeUnits`.
    Unavailable,
    /// `%uXXXX` per UTF-16 unit.
    UnicodeUnits,
    /// `%XX` per UTF-8 byte.
    Utf8Bytes,
}

impl EscapeMode {
    /// Interpret the upper-cased escape of U+0100.
    pub fn from_probe(probe: Option<&str>) -> Self {
        match probe.map(|p| p.to_ascii_uppercase()) {
            Some(p) if p == "%C4%80" => EscapeMode::Utf8Bytes,
            Some(p) if p == "%U0100" => EscapeMode::UnicodeUnits,
            _ => EscapeMode::Unavailable,
        }
    }
}

/// Value codec bound to one tracker's escape mode and character-set setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    mode: EscapeMode,
    char_set: bool,
}

impl Codec {
    pub fn new(mode: EscapeMode, char_set: bool) -> Self {
        Self { mode, char_set }
    }

    pub fn mode(&self) -> EscapeMode {
        self.mode
    }

    /// Encode a parameter or cookie value: escape, then protect `+`. With a
    /// declared character set on a `%u` engine, the first single-byte escape
    /// above 0x7F is widened to `%u00XX`.
    pub fn ape(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        let escaped = escape(raw, self.mode).replace('+', "%2B");
        if self.char_set
            && self.mode == EscapeMode::UnicodeUnits
            && !escaped.contains("%u")
            && !escaped.contains("%U")
        {
            return widen_high_bytes(&escaped);
        }
        escaped
    }

    /// Decode a value produced by [`Codec::ape`] (or a form-encoded query
    /// value): `+` becomes a space, then unescape.
    pub fn epa(&self, encoded: &str) -> String {
        if encoded.is_empty() {
            return String::new();
        }
        unescape(&encoded.replace('+', " "), self.mode)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(EscapeMode::UnicodeUnits, false)
    }
}

/// Legacy `escape`: `A-Z a-z 0-9 @ * _ + - . /` pass through.
pub fn escape(src: &str, mode: EscapeMode) -> String {
    let mut out = String::with_capacity(src.len());
    match mode {
        EscapeMode::Utf8Bytes => {
            for b in src.bytes() {
                if is_unescaped_legacy_byte(b) {
                    out.push(b as char);
                } else {
                    push_percent_byte(&mut out, b);
                }
            }
        }
        EscapeMode::UnicodeUnits | EscapeMode::Unavailable => {
            for unit in src.encode_utf16() {
                if unit <= 0x7F && is_unescaped_legacy_byte(unit as u8) {
                    out.push(unit as u8 as char);
                } else if unit <= 0xFF {
                    push_percent_byte(&mut out, unit as u8);
                } else {
                    out.push_str("%u");
                    out.push_str(&format!("{unit:04X}"));
                }
            }
        }
    }
    out
}

/// Legacy `unescape`, accepting both `%XX` and `%uXXXX`.
pub fn unescape(src: &str, mode: EscapeMode) -> String {
    let bytes = src.as_bytes();
    let mut units: Vec<u16> = Vec::with_capacity(src.len());
    let mut raw: Vec<u8> = Vec::with_capacity(src.len());
    let utf8 = mode == EscapeMode::Utf8Bytes;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 6 <= bytes.len()
                && matches!(bytes[i + 1], b'u' | b'U')
                && bytes[i + 2..i + 6].iter().all(|b| hex_value(*b).is_some())
            {
                let unit = bytes[i + 2..i + 6]
                    .iter()
                    .fold(0u16, |acc, b| (acc << 4) | hex_value(*b).unwrap_or(0) as u16);
                if utf8 {
                    let ch = char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
                    let mut buf = [0u8; 4];
                    raw.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                } else {
                    units.push(unit);
                }
                i += 6;
                continue;
            }
            if i + 3 <= bytes.len()
                && hex_value(bytes[i + 1]).is_some()
                && hex_value(bytes[i + 2]).is_some()
            {
                let byte = (hex_value(bytes[i + 1]).unwrap_or(0) << 4)
                    | hex_value(bytes[i + 2]).unwrap_or(0);
                if utf8 {
                    raw.push(byte);
                } else {
                    units.push(byte as u16);
                }
                i += 3;
                continue;
            }
        }

        let ch = src[i..].chars().next().unwrap_or_default();
        if utf8 {
            let mut buf = [0u8; 4];
            raw.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        } else {
            let mut buf = [0u16; 2];
            units.extend_from_slice(ch.encode_utf16(&mut buf));
        }
        i += ch.len_utf8();
    }

    if utf8 {
        String::from_utf8_lossy(&raw).into_owned()
    } else {
        String::from_utf16_lossy(&units)
    }
}

/// Cut `value` to at most `max_chars` characters.
pub fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

fn widen_high_bytes(escaped: &str) -> String {
    let first_high = escaped.match_indices('%').find_map(|(i, _)| {
        escaped[i + 1..]
            .starts_with(|c: char| matches!(c, '8'..='9' | 'A'..='F' | 'a'..='f'))
            .then_some(i)
    });
    match first_high {
        Some(i) => format!("{}%u00{}", &escaped[..i], &escaped[i + 1..]),
        None => escaped.to_string(),
    }
}

fn is_unescaped_legacy_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'@' | b'*' | b'_' | b'+' | b'-' | b'.' | b'/')
}

fn push_percent_byte(out: &mut String, b: u8) {
    out.push_str(&format!("%{b:02X}"));
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_legacy_set() {
        let mode = EscapeMode::UnicodeUnits;
        assert_eq!(escape("a-b_c.d/e*f@g+h", mode), "a-b_c.d/e*f@g+h");
        assert_eq!(escape("a b&c=d", mode), "a%20b%26c%3Dd");
        assert_eq!(escape("é", mode), "%E9");
        assert_eq!(escape("Ā", mode), "%u0100");
        assert_eq!(escape("Ā", EscapeMode::Utf8Bytes), "%C4%80");
    }

    #[test]
    fn test_ape_protects_plus() {
        let codec = Codec::default();
        assert_eq!(codec.ape("a+b c"), "a%2Bb%20c");
        assert_eq!(codec.ape(""), "");
    }

    #[test]
    fn test_ape_widens_first_high_byte_with_char_set() {
        let codec = Codec::new(EscapeMode::UnicodeUnits, true);
        assert_eq!(codec.ape("café crème"), "caf%u00E9%20cr%E8me");
        assert_eq!(codec.ape("éè"), "%u00E9%E8");
        assert_eq!(codec.ape("a b"), "a%20b");
        // Already %u encoded values are left alone.
        assert_eq!(codec.ape("éĀ"), "%E9%u0100");
        // Only meaningful on %u engines.
        let utf8 = Codec::new(EscapeMode::Utf8Bytes, true);
        assert_eq!(utf8.ape("é"), "%C3%A9");
    }

    #[test]
    fn test_epa_reverses_ape() {
        for codec in [
            Codec::default(),
            Codec::new(EscapeMode::UnicodeUnits, true),
            Codec::new(EscapeMode::Utf8Bytes, false),
        ] {
            for value in ["plain", "a+b", "spaces and ;=&", "café", "日本語", "emoji 😀", "100%"] {
                assert_eq!(codec.epa(&codec.ape(value)), value, "{codec:?} {value}");
            }
        }
    }

    #[test]
    fn test_epa_treats_plus_as_space() {
        assert_eq!(Codec::default().epa("spring+sale"), "spring sale");
    }

    #[test]
    fn test_unescape_leaves_malformed_sequences() {
        assert_eq!(unescape("100%", EscapeMode::UnicodeUnits), "100%");
        assert_eq!(unescape("%zz", EscapeMode::UnicodeUnits), "%zz");
        assert_eq!(unescape("%u12", EscapeMode::UnicodeUnits), "%u12");
    }

    #[test]
    fn test_escape_mode_probe() {
        assert_eq!(EscapeMode::from_probe(Some("%u0100")), EscapeMode::UnicodeUnits);
        assert_eq!(EscapeMode::from_probe(Some("%C4%80")), EscapeMode::Utf8Bytes);
        assert_eq!(EscapeMode::from_probe(None), EscapeMode::Unavailable);
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
        assert_eq!(truncate("日本語です", 2), "日本");
    }
}
