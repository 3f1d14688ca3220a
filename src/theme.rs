use crate::input::TEXTUAL_ESCAPES;
use anyhow::{Result, bail};
use ratatui::style::{Color, Modifier, Style};
use std::collections::HashMap;

const DEFAULT_COLORS: &[(&str, &str)] = &[
    ("titledview.bg", "\\e[48;5;241m"),
    ("titledview.fg", "\\e[38;5;0m"),
    ("titledview.focused.bg", "\\e[48;5;244m"),
    ("titledview.focused.fg", "\\e[38;5;255m"),
    ("tabbedview.bg", "\\e[48;5;241m"),
    ("tabbedview.fg", "\\e[38;5;0m"),
    ("tabbedview.focused.bg", "\\e[48;5;244m"),
    ("tabbedview.focused.fg", "\\e[38;5;255m"),
    ("tabbedview.selected.bg", "\\e[48;5;241m"),
    ("tabbedview.selected.fg", "\\e[38;5;0m"),
    ("tabbedview.focused.selected.bg", "\\e[48;5;244m"),
    ("tabbedview.focused.selected.fg", "\\e[38;5;255m\\e[1m"),
    ("textview.bg", "\\e[48;5;236m"),
    ("textview.fg", "\\e[38;5;255m"),
    ("listview.focused.current.fg", "\\e[4m"),
    ("listview.connected.fg", "\\e[38;5;2m"),
    ("listview.error.fg", "\\e[38;5;1m"),
    ("dialog.bg", "\\e[48;5;236m"),
    ("dialog.fg", "\\e[38;5;255m"),
    ("dialog.title.fg", "\\e[7m"),
    ("dialog.options.fg", "\\e[7m"),
    ("filechooser.header.fg", "\\e[7m"),
];

/// Styles looked up by `"<widget>[.focused][.<state>].<channel>"` keys.
///
/// Built once at startup and handed to every render call through the canvas.
/// Missing keys resolve to an empty style.
#[derive(Debug, Clone, Default)]
pub struct Theme {
    styles: HashMap<String, Style>,
}

impl Theme {
    #[cfg(test)]
    /// An empty theme: every lookup resolves to no styling.
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut theme = Self::default();
        for (key, value) in DEFAULT_COLORS {
            if let Some(style) = parse_sgr(value) {
                theme.styles.insert((*key).to_string(), style);
            }
        }
        theme
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let Some(style) = parse_sgr(value) else {
            bail!("unsupported colour value {value:?} for {key}");
        };
        self.styles.insert(key.to_string(), style);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Style {
        self.styles.get(key).copied().unwrap_or_default()
    }

    /// Combined background and foreground style of a widget in a given state.
    pub fn style(&self, widget: &str, focused: bool, state: Option<&str>) -> Style {
        let mut prefix = widget.to_string();
        if focused {
            prefix.push_str(".focused");
        }
        if let Some(state) = state {
            prefix.push('.');
            prefix.push_str(state);
        }
        self.get(&format!("{prefix}.bg"))
            .patch(self.get(&format!("{prefix}.fg")))
    }
}

/// Parses one or more SGR escape sequences (`\e[38;5;255m\e[1m`) or a bare
/// parameter list (`1;38;5;255`) into a style.
pub fn parse_sgr(value: &str) -> Option<Style> {
    let raw = TEXTUAL_ESCAPES
        .iter()
        .fold(value.trim().to_string(), |raw, prefix| raw.replace(prefix, "\u{1b}"));
    if !raw.starts_with('\u{1b}') {
        return apply_params(Style::default(), &raw);
    }

    raw.split('\u{1b}')
        .filter(|sequence| !sequence.is_empty())
        .try_fold(Style::default(), |style, sequence| {
            let params = sequence.strip_prefix('[')?.strip_suffix('m')?;
            apply_params(style, params)
        })
}

fn apply_params(mut style: Style, params: &str) -> Option<Style> {
    let codes = if params.is_empty() {
        vec![0]
    } else {
        params
            .split(';')
            .map(|code| code.trim().parse::<u16>().ok())
            .collect::<Option<Vec<_>>>()?
    };

    let mut codes = codes.into_iter();
    while let Some(code) = codes.next() {
        style = match code {
            0 => Style::default(),
            1 => style.add_modifier(Modifier::BOLD),
            2 => style.add_modifier(Modifier::DIM),
            3 => style.add_modifier(Modifier::ITALIC),
            4 => style.add_modifier(Modifier::UNDERLINED),
            7 => style.add_modifier(Modifier::REVERSED),
            30..=37 => style.fg(Color::Indexed((code - 30) as u8)),
            40..=47 => style.bg(Color::Indexed((code - 40) as u8)),
            90..=97 => style.fg(Color::Indexed((code - 90 + 8) as u8)),
            100..=107 => style.bg(Color::Indexed((code - 100 + 8) as u8)),
            39 => style.fg(Color::Reset),
            49 => style.bg(Color::Reset),
            38 | 48 => {
                let color = match codes.next()? {
                    5 => Color::Indexed(u8::try_from(codes.next()?).ok()?),
                    2 => Color::Rgb(
                        u8::try_from(codes.next()?).ok()?,
                        u8::try_from(codes.next()?).ok()?,
                        u8::try_from(codes.next()?).ok()?,
                    ),
                    _ => return None,
                };
                if code == 38 {
                    style.fg(color)
                } else {
                    style.bg(color)
                }
            }
            _ => return None,
        };
    }
    Some(style)
}
