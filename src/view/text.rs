use super::{Canvas, View, ViewBase};
use crate::input::Keystroke;
use ratatui::layout::Rect;

/// Read-only scrollable text, used for popups (help, errors, labels, logs).
pub struct TextView {
    base: ViewBase,
    lines: Vec<String>,
    scroll_x: usize,
    scroll_y: usize,
}

impl TextView {
    pub fn new(rect: Rect, text: &str) -> Self {
        Self {
            base: ViewBase::new(rect),
            lines: text.lines().map(|line| line.replace('\t', "    ")).collect(),
            scroll_x: 0,
            scroll_y: 0,
        }
    }

    #[cfg(test)]
    pub fn scroll(&self) -> (usize, usize) {
        (self.scroll_x, self.scroll_y)
    }

    fn max_scroll_y(&self) -> usize {
        self.lines
            .len()
            .saturating_sub(usize::from(self.base.rect().height))
    }

    fn max_scroll_x(&self) -> usize {
        let widest = self
            .lines
            .iter()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0);
        widest.saturating_sub(usize::from(self.base.rect().width))
    }
}

impl View for TextView {
    fn base(&self) -> &ViewBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ViewBase {
        &mut self.base
    }

    fn update(&mut self, canvas: &mut Canvas<'_>) {
        let rect = self.base.rect();
        let style = canvas.theme().style("textview", false, None);
        for row in 0..rect.height {
            let text = self
                .lines
                .get(self.scroll_y + usize::from(row))
                .map(|line| line.chars().skip(self.scroll_x).collect::<String>())
                .unwrap_or_default();
            canvas.write(rect.x, rect.y + row, &text, rect.width, style);
        }
    }

    fn on_key_press(&mut self, key: Keystroke) -> bool {
        let page = usize::from(self.base.rect().height.max(1));
        let (x, y) = (self.scroll_x, self.scroll_y);
        match key {
            Keystroke::Down => self.scroll_y = (y + 1).min(self.max_scroll_y()),
            Keystroke::Up => self.scroll_y = y.saturating_sub(1),
            Keystroke::Right => self.scroll_x = (x + 1).min(self.max_scroll_x()),
            Keystroke::Left => self.scroll_x = x.saturating_sub(1),
            Keystroke::PageDown => self.scroll_y = (y + page).min(self.max_scroll_y()),
            Keystroke::PageUp => self.scroll_y = y.saturating_sub(page),
            Keystroke::Home => {
                self.scroll_x = 0;
                self.scroll_y = 0;
            }
            Keystroke::End => self.scroll_y = self.max_scroll_y(),
            _ => return false,
        }
        if (x, y) != (self.scroll_x, self.scroll_y) {
            self.base.queue_update();
        }
        true
    }
}

/// Greedy word wrap; existing line breaks are kept and over-long words are
/// left intact on their own line.
pub fn word_wrap(text: &str, width: usize) -> String {
    let mut out = Vec::new();
    for line in text.lines() {
        let mut current = String::new();
        for word in line.split_whitespace() {
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };
            if needed > width && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        out.push(current);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{TextView, word_wrap};
    use crate::input::Keystroke;
    use crate::theme::Theme;
    use crate::view::{Canvas, View};
    use ratatui::buffer::Buffer;
    use ratatui::layout::Rect;

    fn rendered(view: &mut TextView) -> Vec<String> {
        let rect = view.rect();
        let theme = Theme::plain();
        let mut buffer = Buffer::empty(rect);
        view.update(&mut Canvas::new(&mut buffer, &theme));
        (rect.top()..rect.bottom())
            .map(|y| {
                (rect.left()..rect.right())
                    .map(|x| buffer[(x, y)].symbol().to_string())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn scrolling_is_clamped_to_content() {
        let text = (0..10).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let mut view = TextView::new(Rect::new(0, 0, 8, 4), &text);

        view.on_key_press(Keystroke::PageDown);
        view.on_key_press(Keystroke::PageDown);
        assert_eq!(view.scroll(), (0, 6));
        assert_eq!(rendered(&mut view)[3], "line 9  ");

        view.on_key_press(Keystroke::Right);
        assert_eq!(view.scroll(), (0, 6));

        view.on_key_press(Keystroke::Home);
        assert_eq!(view.scroll(), (0, 0));
        view.on_key_press(Keystroke::Up);
        assert_eq!(view.scroll(), (0, 0));
    }

    #[test]
    fn horizontal_scroll_shifts_wide_lines() {
        let mut view = TextView::new(Rect::new(0, 0, 4, 2), "abcdefgh\nxy");
        view.on_key_press(Keystroke::Right);
        view.on_key_press(Keystroke::Right);
        assert_eq!(rendered(&mut view), vec!["cdef", "    "]);
    }

    #[test]
    fn unknown_keys_are_not_consumed() {
        let mut view = TextView::new(Rect::new(0, 0, 4, 2), "text");
        assert!(!view.on_key_press(Keystroke::Char('q')));
    }

    #[test]
    fn wraps_on_word_boundaries() {
        assert_eq!(word_wrap("one two three four", 9), "one two\nthree\nfour");
        assert_eq!(word_wrap("keep\n\nbreaks", 70), "keep\n\nbreaks");
        assert_eq!(word_wrap("averyveryverylongword x", 5), "averyveryverylongword\nx");
    }
}
