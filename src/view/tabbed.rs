use super::{Canvas, View, ViewBase};
use crate::input::Keystroke;
use ratatui::layout::Rect;
use ratatui::text::{Line, Span};

struct Tab {
    title: String,
    view: Box<dyn View>,
}

/// Tab bar on the first row; only the active tab's view is visible.
pub struct TabbedView {
    base: ViewBase,
    tabs: Vec<Tab>,
    active: usize,
}

impl TabbedView {
    pub fn new(rect: Rect) -> Self {
        Self {
            base: ViewBase::new(rect),
            tabs: Vec::new(),
            active: 0,
        }
    }

    pub fn add_tab(&mut self, title: impl Into<String>, mut view: Box<dyn View>) {
        view.set_rect(content_rect(self.base.rect()));
        view.set_visible(self.tabs.is_empty());
        view.set_application(self.base.link().cloned());
        if self.tabs.is_empty() {
            view.set_focused(self.base.focused());
        }
        self.tabs.push(Tab {
            title: title.into(),
            view,
        });
        self.base.queue_update();
    }

    #[cfg(test)]
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn set_active(&mut self, index: usize) {
        if index >= self.tabs.len() || index == self.active {
            return;
        }
        let focused = self.base.focused();
        let previous = &mut self.tabs[self.active].view;
        previous.set_focused(false);
        previous.set_visible(false);

        self.active = index;
        let next = &mut self.tabs[index].view;
        next.set_visible(true);
        next.set_focused(focused);
        self.base.queue_update();
    }
}

fn content_rect(rect: Rect) -> Rect {
    Rect::new(
        rect.x,
        rect.y.saturating_add(1),
        rect.width,
        rect.height.saturating_sub(1),
    )
}

impl View for TabbedView {
    fn base(&self) -> &ViewBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ViewBase {
        &mut self.base
    }

    fn update(&mut self, canvas: &mut Canvas<'_>) {
        let rect = self.base.rect();
        let focused = self.base.focused();
        let theme = canvas.theme();
        let bar = theme.style("tabbedview", focused, None);
        let selected = theme.style("tabbedview", focused, Some("selected"));

        let spans = self
            .tabs
            .iter()
            .enumerate()
            .map(|(index, tab)| {
                let style = if index == self.active { selected } else { bar };
                Span::styled(format!(" {} ", tab.title), style)
            })
            .collect::<Vec<_>>();
        canvas.write_line(rect.x, rect.y, &Line::from(spans), rect.width, bar);

        if let Some(tab) = self.tabs.get_mut(self.active) {
            tab.view.update(canvas);
            tab.view.base_mut().mark_clean();
        }
    }

    fn on_key_press(&mut self, key: Keystroke) -> bool {
        match key {
            Keystroke::Right => {
                if self.active + 1 < self.tabs.len() {
                    self.set_active(self.active + 1);
                }
                true
            }
            Keystroke::Left => {
                if self.active > 0 {
                    self.set_active(self.active - 1);
                }
                true
            }
            _ => self
                .tabs
                .get_mut(self.active)
                .is_some_and(|tab| tab.view.on_key_press(key)),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut dyn View> {
        self.tabs
            .iter_mut()
            .map(|tab| tab.view.as_mut() as &mut dyn View)
            .collect()
    }

    fn set_rect(&mut self, rect: Rect) {
        for tab in &mut self.tabs {
            tab.view.set_rect(content_rect(rect));
        }
        self.base.set_rect(rect);
    }

    fn set_focused(&mut self, focused: bool) {
        self.base.set_focused(focused);
        if let Some(tab) = self.tabs.get_mut(self.active) {
            tab.view.set_focused(focused);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TabbedView;
    use crate::app::tests::{row, test_app};
    use crate::input::Keystroke;
    use crate::view::View;
    use crate::view::text::TextView;
    use ratatui::layout::Rect;

    fn tabs() -> TabbedView {
        let mut tabs = TabbedView::new(Rect::new(0, 0, 20, 3));
        tabs.add_tab("Pods", Box::new(TextView::new(Rect::default(), "pod-a")));
        tabs.add_tab("Jobs", Box::new(TextView::new(Rect::default(), "job-a")));
        tabs
    }

    #[test]
    fn only_active_tab_is_visible_and_focused() {
        let mut tabs = tabs();
        tabs.set_focused(true);
        {
            let children = tabs.children_mut();
            assert!(children[0].visible() && children[0].focused());
            assert!(!children[1].visible() && !children[1].focused());
        }

        tabs.on_key_press(Keystroke::Right);
        assert_eq!(tabs.active(), 1);
        let children = tabs.children_mut();
        assert!(!children[0].visible() && !children[0].focused());
        assert!(children[1].visible() && children[1].focused());
    }

    #[test]
    fn left_and_right_do_not_wrap() {
        let mut tabs = tabs();
        tabs.on_key_press(Keystroke::Left);
        assert_eq!(tabs.active(), 0);
        tabs.on_key_press(Keystroke::Right);
        tabs.on_key_press(Keystroke::Right);
        assert_eq!(tabs.active(), 1);
    }

    #[test]
    fn draws_tab_bar_before_active_child() {
        let mut app = test_app(20, 3);
        app.add_component(Box::new(tabs()));
        app.refresh();
        assert_eq!(row(app.screen(), 0), " Pods  Jobs         ");
        assert_eq!(row(app.screen(), 1), "pod-a               ");

        app.handle_key(Keystroke::Right);
        app.drain_queue();
        assert_eq!(row(app.screen(), 1), "job-a               ");
    }

    #[test]
    fn other_keys_go_to_the_active_child() {
        let mut tabs = tabs();
        assert!(tabs.on_key_press(Keystroke::Home));
        assert!(!tabs.on_key_press(Keystroke::Char('z')));
    }
}
