use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::fmt;

const ESC: u8 = 0x1b;

/// Textual spellings of ESC accepted in `config.yaml` values.
pub const TEXTUAL_ESCAPES: &[&str] = &["\\e", "\\x1b", "\\x1B", "\\033", "\\u001b", "\\u001B"];

/// One logical key press, decoded from raw terminal bytes or a crossterm event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keystroke {
    Char(char),
    Ctrl(char),
    Enter,
    Tab,
    BackTab,
    Esc,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    F(u8),
}

impl Keystroke {
    pub fn from_key_event(key: KeyEvent) -> Option<Self> {
        let stroke = match key.code {
            KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Self::Ctrl(c.to_ascii_lowercase())
            }
            KeyCode::Char(_) if key.modifiers.contains(KeyModifiers::ALT) => return None,
            KeyCode::Char(c) => Self::Char(c),
            KeyCode::Enter => Self::Enter,
            KeyCode::Tab => Self::Tab,
            KeyCode::BackTab => Self::BackTab,
            KeyCode::Esc => Self::Esc,
            KeyCode::Backspace => Self::Backspace,
            KeyCode::Delete => Self::Delete,
            KeyCode::Up => Self::Up,
            KeyCode::Down => Self::Down,
            KeyCode::Left => Self::Left,
            KeyCode::Right => Self::Right,
            KeyCode::Home => Self::Home,
            KeyCode::End => Self::End,
            KeyCode::PageUp => Self::PageUp,
            KeyCode::PageDown => Self::PageDown,
            KeyCode::F(n) => Self::F(n),
            _ => return None,
        };
        Some(stroke)
    }

    /// Parses a key binding from `config.yaml`.
    ///
    /// Accepts key names (`enter`, `pgdn`, `f5`), `ctrl-x` / `ctrl+x`, a single
    /// character (case sensitive), or a raw escape sequence written with a
    /// `\e`, `\x1b`, `\033` or `\u001b` prefix.
    pub fn parse(binding: &str) -> Option<Self> {
        let binding = binding.trim();
        let mut chars = binding.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Some(Self::Char(c));
        }

        if let Some(raw) = unescape(binding) {
            return decode(raw.as_bytes());
        }

        let lowered = binding.to_ascii_lowercase();
        if let Some(rest) = lowered
            .strip_prefix("ctrl-")
            .or_else(|| lowered.strip_prefix("ctrl+"))
        {
            let mut chars = rest.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => Some(Self::Ctrl(c)),
                _ => None,
            };
        }

        let stroke = match lowered.as_str() {
            "space" => Self::Char(' '),
            "enter" | "return" => Self::Enter,
            "tab" => Self::Tab,
            "backtab" => Self::BackTab,
            "esc" | "escape" => Self::Esc,
            "backspace" => Self::Backspace,
            "delete" | "del" => Self::Delete,
            "up" => Self::Up,
            "down" => Self::Down,
            "left" => Self::Left,
            "right" => Self::Right,
            "home" => Self::Home,
            "end" => Self::End,
            "pageup" | "pgup" => Self::PageUp,
            "pagedown" | "pgdn" => Self::PageDown,
            other => {
                let number = other.strip_prefix('f')?.parse::<u8>().ok()?;
                if !(1..=12).contains(&number) {
                    return None;
                }
                Self::F(number)
            }
        };
        Some(stroke)
    }
}

impl fmt::Display for Keystroke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(' ') => write!(f, "Space"),
            Self::Char(c) => write!(f, "{c}"),
            Self::Ctrl(c) => write!(f, "Ctrl-{c}"),
            Self::Enter => write!(f, "Enter"),
            Self::Tab => write!(f, "Tab"),
            Self::BackTab => write!(f, "Shift-Tab"),
            Self::Esc => write!(f, "Esc"),
            Self::Backspace => write!(f, "Backspace"),
            Self::Delete => write!(f, "Del"),
            Self::Up => write!(f, "Up"),
            Self::Down => write!(f, "Down"),
            Self::Left => write!(f, "Left"),
            Self::Right => write!(f, "Right"),
            Self::Home => write!(f, "Home"),
            Self::End => write!(f, "End"),
            Self::PageUp => write!(f, "PgUp"),
            Self::PageDown => write!(f, "PgDn"),
            Self::F(n) => write!(f, "F{n}"),
        }
    }
}

/// Collapses one burst of raw input bytes into a keystroke.
///
/// Unrecognized sequences yield `None` and are not dispatched.
pub fn decode(bytes: &[u8]) -> Option<Keystroke> {
    match bytes {
        [] => None,
        [ESC] => Some(Keystroke::Esc),
        [ESC, b'[', rest @ ..] => decode_csi(rest),
        [ESC, b'O', rest @ ..] => decode_ss3(rest),
        [ESC, ..] => None,
        [b'\r'] | [b'\n'] => Some(Keystroke::Enter),
        [b'\t'] => Some(Keystroke::Tab),
        [0x7f] | [0x08] => Some(Keystroke::Backspace),
        [byte @ 0x01..=0x1a] => Some(Keystroke::Ctrl(char::from(b'a' + byte - 1))),
        _ => {
            let text = std::str::from_utf8(bytes).ok()?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if !c.is_control() => Some(Keystroke::Char(c)),
                _ => None,
            }
        }
    }
}

fn decode_csi(rest: &[u8]) -> Option<Keystroke> {
    let stroke = match rest {
        b"A" => Keystroke::Up,
        b"B" => Keystroke::Down,
        b"C" => Keystroke::Right,
        b"D" => Keystroke::Left,
        b"H" | b"1~" | b"7~" => Keystroke::Home,
        b"F" | b"4~" | b"8~" => Keystroke::End,
        b"Z" => Keystroke::BackTab,
        b"3~" => Keystroke::Delete,
        // some terminals drop the trailing tilde for page keys
        b"5~" | b"5" => Keystroke::PageUp,
        b"6~" | b"6" => Keystroke::PageDown,
        b"15~" => Keystroke::F(5),
        b"17~" => Keystroke::F(6),
        b"18~" => Keystroke::F(7),
        b"19~" => Keystroke::F(8),
        b"20~" => Keystroke::F(9),
        b"21~" => Keystroke::F(10),
        b"23~" => Keystroke::F(11),
        b"24~" => Keystroke::F(12),
        _ => return None,
    };
    Some(stroke)
}

fn decode_ss3(rest: &[u8]) -> Option<Keystroke> {
    let stroke = match rest {
        b"A" => Keystroke::Up,
        b"B" => Keystroke::Down,
        b"C" => Keystroke::Right,
        b"D" => Keystroke::Left,
        b"H" => Keystroke::Home,
        b"F" => Keystroke::End,
        b"P" => Keystroke::F(1),
        b"Q" => Keystroke::F(2),
        b"R" => Keystroke::F(3),
        b"S" => Keystroke::F(4),
        _ => return None,
    };
    Some(stroke)
}

/// Replaces a leading textual escape (`\e`, `\x1b`, `\033`, `\u001b`) with the
/// ESC byte. Returns `None` when the text does not start with one.
pub fn unescape(text: &str) -> Option<String> {
    let text = text.trim();
    if text.starts_with(char::from(ESC)) {
        return Some(text.to_string());
    }
    TEXTUAL_ESCAPES
        .iter()
        .find_map(|prefix| text.strip_prefix(prefix))
        .map(|rest| format!("{}{rest}", char::from(ESC)))
}

#[cfg(test)]
mod tests {
    use super::{Keystroke, decode, unescape};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    #[test]
    fn decodes_printable_characters() {
        assert_eq!(decode(b"a"), Some(Keystroke::Char('a')));
        assert_eq!(decode(b"D"), Some(Keystroke::Char('D')));
        assert_eq!(decode("é".as_bytes()), Some(Keystroke::Char('é')));
    }

    #[test]
    fn decodes_cursor_and_paging_sequences() {
        assert_eq!(decode(b"\x1b[A"), Some(Keystroke::Up));
        assert_eq!(decode(b"\x1b[B"), Some(Keystroke::Down));
        assert_eq!(decode(b"\x1bOC"), Some(Keystroke::Right));
        assert_eq!(decode(b"\x1b[D"), Some(Keystroke::Left));
        assert_eq!(decode(b"\x1b[5~"), Some(Keystroke::PageUp));
        assert_eq!(decode(b"\x1b[6"), Some(Keystroke::PageDown));
        assert_eq!(decode(b"\x1b[H"), Some(Keystroke::Home));
        assert_eq!(decode(b"\x1b[1~"), Some(Keystroke::Home));
        assert_eq!(decode(b"\x1b[4~"), Some(Keystroke::End));
        assert_eq!(decode(b"\x1b[15~"), Some(Keystroke::F(5)));
        assert_eq!(decode(b"\x1bOP"), Some(Keystroke::F(1)));
    }

    #[test]
    fn decodes_control_bytes() {
        assert_eq!(decode(b"\x1b"), Some(Keystroke::Esc));
        assert_eq!(decode(b"\t"), Some(Keystroke::Tab));
        assert_eq!(decode(b"\r"), Some(Keystroke::Enter));
        assert_eq!(decode(b"\x7f"), Some(Keystroke::Backspace));
        assert_eq!(decode(b"\x03"), Some(Keystroke::Ctrl('c')));
    }

    #[test]
    fn unrecognized_sequences_are_dropped() {
        assert_eq!(decode(b""), None);
        assert_eq!(decode(b"\x1b[99~"), None);
        assert_eq!(decode(b"\x1bx"), None);
        assert_eq!(decode(b"ab"), None);
        assert_eq!(decode(&[0xff, 0xfe]), None);
    }

    #[test]
    fn maps_crossterm_events() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(Keystroke::from_key_event(ctrl_c), Some(Keystroke::Ctrl('c')));
        let upper = KeyEvent::new(KeyCode::Char('F'), KeyModifiers::SHIFT);
        assert_eq!(Keystroke::from_key_event(upper), Some(Keystroke::Char('F')));
        let page = KeyEvent::new(KeyCode::PageDown, KeyModifiers::NONE);
        assert_eq!(Keystroke::from_key_event(page), Some(Keystroke::PageDown));
        let insert = KeyEvent::new(KeyCode::Insert, KeyModifiers::NONE);
        assert_eq!(Keystroke::from_key_event(insert), None);
    }

    #[test]
    fn parses_config_bindings() {
        assert_eq!(Keystroke::parse("h"), Some(Keystroke::Char('h')));
        assert_eq!(Keystroke::parse("F"), Some(Keystroke::Char('F')));
        assert_eq!(Keystroke::parse("pgdn"), Some(Keystroke::PageDown));
        assert_eq!(Keystroke::parse(" Enter "), Some(Keystroke::Enter));
        assert_eq!(Keystroke::parse("ctrl-r"), Some(Keystroke::Ctrl('r')));
        assert_eq!(Keystroke::parse("Ctrl+X"), Some(Keystroke::Ctrl('x')));
        assert_eq!(Keystroke::parse("f5"), Some(Keystroke::F(5)));
        assert_eq!(Keystroke::parse("\\e[A"), Some(Keystroke::Up));
        assert_eq!(Keystroke::parse("\\033[6~"), Some(Keystroke::PageDown));
        assert_eq!(Keystroke::parse("f42"), None);
        assert_eq!(Keystroke::parse("hyper-q"), None);
    }

    #[test]
    fn unescape_only_rewrites_known_prefixes() {
        assert_eq!(unescape("\\x1b[1m").as_deref(), Some("\x1b[1m"));
        assert_eq!(unescape("\\u001b[0m").as_deref(), Some("\x1b[0m"));
        assert_eq!(unescape("1;31"), None);
    }

    #[test]
    fn displays_human_readable_names() {
        assert_eq!(Keystroke::Ctrl('r').to_string(), "Ctrl-r");
        assert_eq!(Keystroke::PageDown.to_string(), "PgDn");
        assert_eq!(Keystroke::Char('d').to_string(), "d");
    }
}
