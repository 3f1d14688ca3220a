pub mod dialog;
pub mod file;
pub mod list;
pub mod tabbed;
pub mod text;
pub mod titled;

use crate::app::AppLink;
use crate::input::Keystroke;
use crate::theme::Theme;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Style;
use ratatui::text::Line;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(u64);

impl ViewId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// State shared by every widget: region, focus, visibility, dirty flag and the
/// non-owning link back to the application.
#[derive(Debug)]
pub struct ViewBase {
    id: ViewId,
    rect: Rect,
    focused: bool,
    visible: bool,
    dirty: bool,
    link: Option<AppLink>,
}

impl Default for ViewBase {
    fn default() -> Self {
        Self::new(Rect::default())
    }
}

impl ViewBase {
    pub fn new(rect: Rect) -> Self {
        Self {
            id: ViewId::next(),
            rect,
            focused: false,
            visible: true,
            dirty: true,
            link: None,
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn set_rect(&mut self, rect: Rect) {
        if self.rect != rect {
            self.rect = rect;
            self.dirty = true;
            self.queue_update();
        }
    }

    pub fn focused(&self) -> bool {
        self.focused
    }

    pub fn set_focused(&mut self, focused: bool) {
        if self.focused != focused {
            self.focused = focused;
            self.queue_update();
        }
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn link(&self) -> Option<&AppLink> {
        self.link.as_ref()
    }

    pub fn set_link(&mut self, link: Option<AppLink>) {
        self.link = link;
    }

    /// Registers this view in the application's dirty set. No-op while
    /// detached or hidden.
    pub fn queue_update(&self) {
        if !self.visible {
            return;
        }
        if let Some(link) = &self.link {
            link.queue_update(self.id);
        }
    }
}

/// Render target handed to `View::update`: the application's screen buffer plus
/// the theme. Every write is clipped to the buffer area.
pub struct Canvas<'a> {
    buffer: &'a mut Buffer,
    theme: &'a Theme,
}

impl<'a> Canvas<'a> {
    pub fn new(buffer: &'a mut Buffer, theme: &'a Theme) -> Self {
        Self { buffer, theme }
    }

    pub fn theme(&self) -> &Theme {
        self.theme
    }

    /// Writes `text` at (x, y) and pads the rest of `width` cells with blanks.
    pub fn write(&mut self, x: u16, y: u16, text: &str, width: u16, style: Style) {
        let Some(width) = self.fill_row(x, y, width, style) else {
            return;
        };
        self.buffer.set_stringn(x, y, text, usize::from(width), style);
    }

    /// Like `write`, for pre-styled lines. Span styles patch `base`.
    pub fn write_line(&mut self, x: u16, y: u16, line: &Line<'_>, width: u16, base: Style) {
        let Some(width) = self.fill_row(x, y, width, base) else {
            return;
        };
        self.buffer.set_line(x, y, line, width);
    }

    pub fn clear(&mut self, rect: Rect) {
        let rect = rect.intersection(self.buffer.area);
        for y in rect.top()..rect.bottom() {
            for x in rect.left()..rect.right() {
                self.buffer[(x, y)].reset();
            }
        }
    }

    fn fill_row(&mut self, x: u16, y: u16, width: u16, style: Style) -> Option<u16> {
        let area = self.buffer.area;
        if y < area.top() || y >= area.bottom() || x < area.left() || x >= area.right() {
            return None;
        }
        let width = width.min(area.right() - x);
        if width == 0 {
            return None;
        }
        for cx in x..x + width {
            let cell = &mut self.buffer[(cx, y)];
            cell.reset();
            cell.set_style(style);
        }
        Some(width)
    }
}

/// Uniform contract of every widget.
///
/// Composite views expose their children through `children_mut`, which is how
/// the application reaches a nested view by id and how the default
/// `set_application` reaches the whole subtree.
pub trait View {
    fn base(&self) -> &ViewBase;
    fn base_mut(&mut self) -> &mut ViewBase;

    /// Renders the view into the canvas. Only the render loop calls this.
    fn update(&mut self, canvas: &mut Canvas<'_>);

    /// Returns true when the key was consumed.
    fn on_key_press(&mut self, _key: Keystroke) -> bool {
        false
    }

    /// Main-thread hook to pick up state published by background work.
    fn sync(&mut self) {}

    fn children_mut(&mut self) -> Vec<&mut dyn View> {
        Vec::new()
    }

    fn id(&self) -> ViewId {
        self.base().id()
    }

    fn rect(&self) -> Rect {
        self.base().rect()
    }

    fn set_rect(&mut self, rect: Rect) {
        self.base_mut().set_rect(rect);
    }

    fn focused(&self) -> bool {
        self.base().focused()
    }

    fn set_focused(&mut self, focused: bool) {
        self.base_mut().set_focused(focused);
    }

    fn visible(&self) -> bool {
        self.base().visible()
    }

    fn set_visible(&mut self, visible: bool) {
        self.base_mut().set_visible(visible);
    }

    fn set_application(&mut self, link: Option<AppLink>) {
        for child in self.children_mut() {
            child.set_application(link.clone());
        }
        self.base_mut().set_link(link);
    }

    fn queue_update(&self) {
        self.base().queue_update();
    }
}

/// Renders `view` and its subtree unconditionally.
pub fn render(view: &mut dyn View, canvas: &mut Canvas<'_>) {
    if !view.visible() {
        return;
    }
    view.update(canvas);
    view.base_mut().mark_clean();
}

/// Renders the view with the given id if it lives in `view`'s subtree.
/// Returns true when it was found.
pub fn update_by_id(view: &mut dyn View, id: ViewId, canvas: &mut Canvas<'_>) -> bool {
    if !view.visible() {
        return false;
    }
    if view.id() == id {
        render(view, canvas);
        return true;
    }
    view.children_mut()
        .into_iter()
        .any(|child| update_by_id(child, id, canvas))
}

/// Calls `sync` on every view of the subtree, parents first.
pub fn sync_tree(view: &mut dyn View) {
    view.sync();
    for child in view.children_mut() {
        sync_tree(child);
    }
}

pub fn contains(view: &mut dyn View, id: ViewId) -> bool {
    view.id() == id
        || view
            .children_mut()
            .into_iter()
            .any(|child| contains(child, id))
}

/// Centers a `width` x `height` rectangle inside `area`.
pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}
