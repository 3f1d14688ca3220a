use super::{Canvas, View, ViewBase};
use crate::app::{Application, Command};
use crate::input::Keystroke;
use ratatui::layout::Rect;

struct DialogOption {
    key: Keystroke,
    label: String,
    action: Option<Command>,
}

/// Modal question with a fixed set of key-bound answers.
///
/// Layout: title bar, blank row, message, blank row, right-aligned option bar.
/// Pressing an option key closes the dialog and then runs the option's action.
pub struct QuestionDialog {
    base: ViewBase,
    title: String,
    message: String,
    options: Vec<DialogOption>,
}

impl QuestionDialog {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        let mut dialog = Self {
            base: ViewBase::default(),
            title: title.into(),
            message: message.into(),
            options: Vec::new(),
        };
        dialog.resize();
        dialog
    }

    pub fn option(
        mut self,
        key: Keystroke,
        label: impl Into<String>,
        action: impl FnOnce(&mut Application) + Send + 'static,
    ) -> Self {
        self.options.push(DialogOption {
            key,
            label: label.into(),
            action: Some(Box::new(action)),
        });
        self.resize();
        self
    }

    fn options_text(&self) -> String {
        self.options
            .iter()
            .map(|option| format!("{}: {}", option.key, option.label))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn resize(&mut self) {
        let widest = [
            self.title.chars().count(),
            self.message.chars().count(),
            self.options_text().chars().count(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        let width = u16::try_from(widest + 2).unwrap_or(u16::MAX);
        self.base.set_rect(Rect::new(0, 0, width, 5));
    }
}

impl View for QuestionDialog {
    fn base(&self) -> &ViewBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ViewBase {
        &mut self.base
    }

    fn update(&mut self, canvas: &mut Canvas<'_>) {
        let rect = self.base.rect();
        let theme = canvas.theme();
        let body = theme.style("dialog", false, None);
        let title = body.patch(theme.style("dialog", false, Some("title")));
        let bar = body.patch(theme.style("dialog", false, Some("options")));

        let options = self.options_text();
        let padding = usize::from(rect.width).saturating_sub(options.chars().count());
        let options = format!("{}{options}", " ".repeat(padding));

        let rows = [
            (self.title.as_str(), title),
            ("", body),
            (self.message.as_str(), body),
            ("", body),
            (options.as_str(), bar),
        ];
        for (offset, (text, style)) in (0u16..).zip(rows) {
            if offset < rect.height {
                canvas.write(rect.x, rect.y + offset, text, rect.width, style);
            }
        }
    }

    fn on_key_press(&mut self, key: Keystroke) -> bool {
        let Some(option) = self.options.iter_mut().find(|option| option.key == key) else {
            return false;
        };
        let Some(action) = option.action.take() else {
            return true;
        };
        if let Some(link) = self.base.link() {
            link.post(|app| {
                app.close_popup();
            });
            link.post(action);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::QuestionDialog;
    use crate::app::tests::{row, test_app};
    use crate::input::Keystroke;
    use crate::view::View;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sizes_itself_to_widest_row() {
        let dialog = QuestionDialog::new("Warning", "Sure?")
            .option(Keystroke::Char('y'), "Yes", |_| {})
            .option(Keystroke::Char('n'), "No", |_| {});
        // "y: Yes n: No" is the widest row
        assert_eq!(dialog.rect().width, 14);
        assert_eq!(dialog.rect().height, 5);
    }

    #[test]
    fn renders_centered_with_option_bar_right_aligned() {
        let mut app = test_app(20, 7);
        app.show_question_dialog(
            QuestionDialog::new("Warning", "Sure?").option(Keystroke::Char('y'), "Yes", |_| {}),
        );
        // 9 wide, 5 high, centered in 20x7
        assert_eq!(&row(app.screen(), 1)[5..14], "Warning  ");
        assert_eq!(&row(app.screen(), 3)[5..14], "Sure?    ");
        assert_eq!(&row(app.screen(), 5)[5..14], "   y: Yes");
    }

    #[test]
    fn unknown_keys_keep_the_dialog_open() {
        let mut app = test_app(40, 10);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        app.show_question_dialog(QuestionDialog::new("Warning", "Delete?").option(
            Keystroke::Char('y'),
            "Yes",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        app.handle_key(Keystroke::Enter);
        assert!(app.has_popup());
        app.handle_key(Keystroke::Char('y'));
        assert!(!app.has_popup());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
