use super::{Canvas, View, ViewBase};
use crate::input::Keystroke;
use ratatui::layout::Rect;

/// Title bar on the first row, inner view below it.
pub struct TitledView {
    base: ViewBase,
    title: String,
    inner: Box<dyn View>,
}

impl TitledView {
    pub fn new(rect: Rect, title: impl Into<String>, mut inner: Box<dyn View>) -> Self {
        inner.set_rect(inner_rect(rect));
        Self {
            base: ViewBase::new(rect),
            title: title.into(),
            inner,
        }
    }
}

fn inner_rect(rect: Rect) -> Rect {
    Rect::new(
        rect.x,
        rect.y.saturating_add(1),
        rect.width,
        rect.height.saturating_sub(1),
    )
}

impl View for TitledView {
    fn base(&self) -> &ViewBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ViewBase {
        &mut self.base
    }

    fn update(&mut self, canvas: &mut Canvas<'_>) {
        let rect = self.base.rect();
        let style = canvas
            .theme()
            .style("titledview", self.base.focused(), None);
        canvas.write(rect.x, rect.y, &self.title, rect.width, style);
        self.inner.update(canvas);
        self.inner.base_mut().mark_clean();
    }

    fn on_key_press(&mut self, key: Keystroke) -> bool {
        self.inner.on_key_press(key)
    }

    fn children_mut(&mut self) -> Vec<&mut dyn View> {
        vec![self.inner.as_mut() as &mut dyn View]
    }

    fn set_rect(&mut self, rect: Rect) {
        self.inner.set_rect(inner_rect(rect));
        self.base.set_rect(rect);
    }

    fn set_focused(&mut self, focused: bool) {
        self.base.set_focused(focused);
        self.inner.set_focused(focused);
    }
}
