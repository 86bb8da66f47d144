//! Decode the raw bytes a client terminal sends into key events.
//!
//! SSH delivers keystrokes as an unframed byte stream, so a single read may
//! hold several keys or only part of an escape sequence. [`KeyDecoder`] keeps
//! incomplete input until the next read. A lone `ESC` at the end of a read is
//! the Escape key.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

const ESC: u8 = 0x1b;
/// Longest control sequence kept while waiting for its final byte.
const MAX_SEQUENCE: usize = 32;

enum Parsed {
    Key(KeyEvent, usize),
    Skip(usize),
    Incomplete,
}

#[derive(Debug, Default)]
pub struct KeyDecoder {
    pending: Vec<u8>,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<KeyEvent> {
        self.pending.extend_from_slice(bytes);

        let mut keys = Vec::new();
        let mut pos = 0;
        while pos < self.pending.len() {
            match parse(&self.pending[pos..]) {
                Parsed::Key(key, used) => {
                    keys.push(key);
                    pos += used;
                }
                Parsed::Skip(used) => pos += used,
                Parsed::Incomplete => {
                    if self.pending[pos..] == [ESC] {
                        keys.push(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
                        pos += 1;
                    }
                    break;
                }
            }
        }
        self.pending.drain(..pos);
        keys
    }
}

fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
    KeyEvent::new(code, modifiers)
}

fn parse(bytes: &[u8]) -> Parsed {
    match bytes[0] {
        ESC => parse_escape(bytes),
        b'\r' | b'\n' => Parsed::Key(key(KeyCode::Enter, KeyModifiers::NONE), 1),
        b'\t' => Parsed::Key(key(KeyCode::Tab, KeyModifiers::NONE), 1),
        0x7f | 0x08 => Parsed::Key(key(KeyCode::Backspace, KeyModifiers::NONE), 1),
        0x00 => Parsed::Key(key(KeyCode::Char(' '), KeyModifiers::CONTROL), 1),
        byte @ 0x01..=0x1a => {
            let ch = char::from(b'a' + byte - 1);
            Parsed::Key(key(KeyCode::Char(ch), KeyModifiers::CONTROL), 1)
        }
        byte @ 0x1c..=0x1f => {
            let ch = char::from(b'4' + byte - 0x1c);
            Parsed::Key(key(KeyCode::Char(ch), KeyModifiers::CONTROL), 1)
        }
        _ => parse_utf8(bytes, KeyModifiers::NONE),
    }
}

fn char_key(ch: char, modifiers: KeyModifiers) -> KeyEvent {
    if ch.is_ascii_uppercase() {
        key(KeyCode::Char(ch), modifiers | KeyModifiers::SHIFT)
    } else {
        key(KeyCode::Char(ch), modifiers)
    }
}

fn parse_utf8(bytes: &[u8], modifiers: KeyModifiers) -> Parsed {
    let len = match bytes[0] {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => return Parsed::Skip(1),
    };
    if bytes.len() < len {
        return Parsed::Incomplete;
    }
    match std::str::from_utf8(&bytes[..len])
        .ok()
        .and_then(|s| s.chars().next())
    {
        Some(ch) => Parsed::Key(char_key(ch, modifiers), len),
        None => Parsed::Skip(1),
    }
}

fn parse_escape(bytes: &[u8]) -> Parsed {
    let Some(&next) = bytes.get(1) else {
        return Parsed::Incomplete;
    };
    match next {
        b'[' => parse_csi(bytes),
        b'O' => parse_ss3(bytes),
        ESC => Parsed::Key(key(KeyCode::Esc, KeyModifiers::NONE), 1),
        _ => match parse(&bytes[1..]) {
            Parsed::Key(inner, used) => {
                let alt = KeyEvent::new(inner.code, inner.modifiers | KeyModifiers::ALT);
                Parsed::Key(alt, used + 1)
            }
            Parsed::Skip(used) => Parsed::Skip(used + 1),
            Parsed::Incomplete => Parsed::Incomplete,
        },
    }
}

fn parse_ss3(bytes: &[u8]) -> Parsed {
    let Some(&last) = bytes.get(2) else {
        return Parsed::Incomplete;
    };
    let code = match last {
        b'A' => KeyCode::Up,
        b'B' => KeyCode::Down,
        b'C' => KeyCode::Right,
        b'D' => KeyCode::Left,
        b'H' => KeyCode::Home,
        b'F' => KeyCode::End,
        b'P'..=b'S' => KeyCode::F(last - b'P' + 1),
        _ => return Parsed::Skip(3),
    };
    Parsed::Key(key(code, KeyModifiers::NONE), 3)
}

/// xterm encodes modifiers as `1 + bits` in the second parameter.
fn csi_modifiers(param: Option<u16>) -> KeyModifiers {
    let bits = param.unwrap_or(1).saturating_sub(1);
    let mut modifiers = KeyModifiers::NONE;
    if bits & 1 != 0 {
        modifiers |= KeyModifiers::SHIFT;
    }
    if bits & 2 != 0 {
        modifiers |= KeyModifiers::ALT;
    }
    if bits & 4 != 0 {
        modifiers |= KeyModifiers::CONTROL;
    }
    modifiers
}

fn parse_csi(bytes: &[u8]) -> Parsed {
    let mut end = 2;
    while end < bytes.len() && (0x20..=0x3f).contains(&bytes[end]) {
        end += 1;
        if end >= MAX_SEQUENCE {
            return Parsed::Skip(end);
        }
    }
    let Some(&last) = bytes.get(end) else {
        return Parsed::Incomplete;
    };
    let used = end + 1;
    if !(0x40..=0x7e).contains(&last) {
        return Parsed::Skip(used);
    }

    let params: Vec<Option<u16>> = std::str::from_utf8(&bytes[2..end])
        .unwrap_or_default()
        .split(';')
        .map(|p| p.parse().ok())
        .collect();
    let first = params.first().copied().flatten();
    let modifiers = csi_modifiers(params.get(1).copied().flatten());

    let code = match last {
        b'A' => KeyCode::Up,
        b'B' => KeyCode::Down,
        b'C' => KeyCode::Right,
        b'D' => KeyCode::Left,
        b'H' => KeyCode::Home,
        b'F' => KeyCode::End,
        b'Z' => KeyCode::BackTab,
        b'~' => match first {
            Some(1 | 7) => KeyCode::Home,
            Some(2) => KeyCode::Insert,
            Some(3) => KeyCode::Delete,
            Some(4 | 8) => KeyCode::End,
            Some(5) => KeyCode::PageUp,
            Some(6) => KeyCode::PageDown,
            _ => return Parsed::Skip(used),
        },
        _ => return Parsed::Skip(used),
    };
    Parsed::Key(key(code, modifiers), used)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn codes(keys: &[KeyEvent]) -> Vec<KeyCode> {
        keys.iter().map(|key| key.code).collect()
    }

    #[test]
    fn test_printable_and_control_bytes() {
        let mut decoder = KeyDecoder::new();
        let keys = decoder.feed(b"qj\x03\r");
        assert_eq!(
            keys,
            vec![
                plain(KeyCode::Char('q')),
                plain(KeyCode::Char('j')),
                KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
                plain(KeyCode::Enter),
            ]
        );
    }

    #[test]
    fn test_uppercase_carries_shift() {
        let keys = KeyDecoder::new().feed(b"G");
        assert_eq!(keys[0].code, KeyCode::Char('G'));
        assert!(keys[0].modifiers.contains(KeyModifiers::SHIFT));
    }

    #[test]
    fn test_navigation_sequences() {
        let mut decoder = KeyDecoder::new();
        let keys = decoder.feed(b"\x1b[A\x1b[B\x1bOA\x1b[5~\x1b[6~\x1b[H\x1b[F\x1b[1~\x1b[4~");
        assert_eq!(
            codes(&keys),
            vec![
                KeyCode::Up,
                KeyCode::Down,
                KeyCode::Up,
                KeyCode::PageUp,
                KeyCode::PageDown,
                KeyCode::Home,
                KeyCode::End,
                KeyCode::Home,
                KeyCode::End,
            ]
        );
    }

    #[test]
    fn test_lone_escape_is_escape_key() {
        let keys = KeyDecoder::new().feed(b"\x1b");
        assert_eq!(keys, vec![plain(KeyCode::Esc)]);
    }

    #[test]
    fn test_split_sequence_waits_for_rest() {
        let mut decoder = KeyDecoder::new();
        assert!(decoder.feed(b"\x1b[").is_empty());
        assert!(decoder.feed(b"6").is_empty());
        assert_eq!(codes(&decoder.feed(b"~j")), vec![KeyCode::PageDown, KeyCode::Char('j')]);
    }

    #[test]
    fn test_modified_arrow() {
        let keys = KeyDecoder::new().feed(b"\x1b[1;5A");
        assert_eq!(keys, vec![KeyEvent::new(KeyCode::Up, KeyModifiers::CONTROL)]);
    }

    #[test]
    fn test_alt_prefix() {
        let keys = KeyDecoder::new().feed(b"\x1bx");
        assert_eq!(keys, vec![KeyEvent::new(KeyCode::Char('x'), KeyModifiers::ALT)]);
    }

    #[test]
    fn test_multibyte_utf8_across_reads() {
        let mut decoder = KeyDecoder::new();
        let bytes = "é".as_bytes();
        assert!(decoder.feed(&bytes[..1]).is_empty());
        assert_eq!(decoder.feed(&bytes[1..]), vec![plain(KeyCode::Char('é'))]);
    }

    #[test]
    fn test_unknown_sequences_are_dropped() {
        let keys = KeyDecoder::new().feed(b"\x1b[99~\x1b[?1;2cq");
        assert_eq!(codes(&keys), vec![KeyCode::Char('q')]);
    }

    #[test]
    fn test_endless_sequence_is_dropped_not_buffered() {
        let mut decoder = KeyDecoder::new();
        assert!(decoder.feed(b"\x1b[").is_empty());
        for _ in 0..20 {
            decoder.feed(&[b'1'; 10]);
            assert!(decoder.pending.len() < MAX_SEQUENCE);
        }
        let keys = decoder.feed(b"q");
        assert_eq!(keys.last().map(|key| key.code), Some(KeyCode::Char('q')));
    }
}
