use super::{Canvas, View, ViewBase};
use crate::app::AppLink;
use crate::input::Keystroke;
use crate::listener::{ListenerHandler, ListenerId};
use ratatui::layout::Rect;
use ratatui::text::Line;
use std::collections::HashMap;

/// What a model reports after picking up new contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Unchanged,
    /// Same logical list, new contents. Cursor and selection are clamped.
    Updated,
    /// A different list altogether. Cursor, scroll and selection reset.
    Replaced,
}

/// Data source of a `ListView`: a count plus indexed access to the current
/// snapshot.
pub trait ListModel: 'static {
    type Item: Clone + Send + Sync + 'static;

    fn item_count(&self) -> usize;

    /// `None` outside `0..item_count()`.
    fn item(&self, index: usize) -> Option<&Self::Item>;

    /// Key handlers installed on the view only run while this is true.
    fn enabled(&self) -> bool {
        true
    }

    /// Applies contents published since the last call. Runs on the render
    /// thread, which is the only place a snapshot swap becomes visible.
    fn sync(&mut self) -> ListChange {
        ListChange::Unchanged
    }

    /// Fired with the new snapshot whenever contents are published. May fire
    /// on a background thread, so subscribers only schedule work.
    fn list_changed(&self) -> Option<&ListenerHandler<[Self::Item], ListChange>> {
        None
    }
}

/// In-memory list model; `set_items` takes effect on the next sync.
pub struct VecListModel<T> {
    items: Vec<T>,
    pending: Option<(Vec<T>, ListChange)>,
    changed: ListenerHandler<[T], ListChange>,
}

impl<T> VecListModel<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            pending: None,
            changed: ListenerHandler::new(),
        }
    }

    #[cfg(test)]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[cfg(test)]
    pub fn set_items(&mut self, items: Vec<T>) {
        self.pending = Some((items, ListChange::Updated));
    }

    #[cfg(test)]
    pub fn replace_items(&mut self, items: Vec<T>) {
        self.pending = Some((items, ListChange::Replaced));
    }
}

impl<T: Clone + Send + Sync + 'static> ListModel for VecListModel<T> {
    type Item = T;

    fn item_count(&self) -> usize {
        self.items.len()
    }

    fn item(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    fn sync(&mut self) -> ListChange {
        let Some((items, change)) = self.pending.take() else {
            return ListChange::Unchanged;
        };
        self.items = items;
        self.changed.fire(&self.items, &change);
        change
    }

    fn list_changed(&self) -> Option<&ListenerHandler<[T], ListChange>> {
        Some(&self.changed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemState {
    pub current: bool,
    pub selected: bool,
    pub focused: bool,
}

pub trait ItemRenderer<T> {
    fn render(&self, item: &T, state: ItemState, width: u16) -> Line<'static>;
}

impl<T, F> ItemRenderer<T> for F
where
    F: Fn(&T, ItemState, u16) -> Line<'static>,
{
    fn render(&self, item: &T, state: ItemState, width: u16) -> Line<'static> {
        self(item, state, width)
    }
}

pub type ListKeyHandler<M> = Box<dyn Fn(&ListView<M>)>;

/// Virtualized, scrollable, optionally selectable list.
///
/// Holds a cursor (`current`), an independent selection and the first visible
/// row (`scroll_y`). Whenever the list is non-empty,
/// `scroll_y <= current < scroll_y + height`.
pub struct ListView<M: ListModel> {
    base: ViewBase,
    model: M,
    renderer: Box<dyn ItemRenderer<M::Item>>,
    selectable: bool,
    current: Option<usize>,
    selected: Option<usize>,
    scroll_y: usize,
    on_select: ListenerHandler<ListView<M>, Option<M::Item>>,
    key_handlers: HashMap<Keystroke, ListKeyHandler<M>>,
    model_listener: Option<ListenerId>,
}

impl<M: ListModel> ListView<M> {
    pub fn new(model: M, renderer: impl ItemRenderer<M::Item> + 'static) -> Self {
        let mut view = Self {
            base: ViewBase::default(),
            model,
            renderer: Box::new(renderer),
            selectable: false,
            current: None,
            selected: None,
            scroll_y: 0,
            on_select: ListenerHandler::new(),
            key_handlers: HashMap::new(),
            model_listener: None,
        };
        view.apply_change(ListChange::Replaced);
        view
    }

    pub fn selectable(mut self, selectable: bool) -> Self {
        self.selectable = selectable;
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.set_rect(rect);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn link(&self) -> Option<&AppLink> {
        self.base.link()
    }

    #[cfg(test)]
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    #[cfg(test)]
    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    #[cfg(test)]
    pub fn scroll_y(&self) -> usize {
        self.scroll_y
    }

    pub fn current_item(&self) -> Option<&M::Item> {
        self.current.and_then(|index| self.model.item(index))
    }

    pub fn on_select(&self) -> &ListenerHandler<ListView<M>, Option<M::Item>> {
        &self.on_select
    }

    pub fn set_key_handler(&mut self, key: Keystroke, handler: impl Fn(&ListView<M>) + 'static) {
        self.key_handlers.insert(key, Box::new(handler));
    }

    /// Sets the selection and notifies `on_select` with the selected item.
    pub fn select(&mut self, index: Option<usize>) {
        let index = index.filter(|index| *index < self.model.item_count());
        self.selected = index;
        let item = index.and_then(|index| self.model.item(index)).cloned();
        self.on_select.fire(self, &item);
        self.base.queue_update();
    }

    fn height(&self) -> usize {
        usize::from(self.base.rect().height).max(1)
    }

    fn apply_change(&mut self, change: ListChange) {
        let count = self.model.item_count();
        match change {
            ListChange::Unchanged => return,
            ListChange::Replaced => {
                self.scroll_y = 0;
                self.selected = None;
                self.current = (count > 0).then_some(0);
            }
            ListChange::Updated => {
                self.current = match self.current {
                    _ if count == 0 => None,
                    Some(current) => Some(current.min(count - 1)),
                    None => Some(0),
                };
                if self.selected.is_some_and(|selected| selected >= count) {
                    self.selected = None;
                }
                self.scroll_into_view();
            }
        }
        self.base.queue_update();
    }

    fn scroll_into_view(&mut self) {
        let height = self.height();
        let count = self.model.item_count();
        self.scroll_y = self.scroll_y.min(count.saturating_sub(height));
        if let Some(current) = self.current {
            if current < self.scroll_y {
                self.scroll_y = current;
            } else if current >= self.scroll_y + height {
                self.scroll_y = current + 1 - height;
            }
        }
    }

    /// Cursor movement. Returns the new (current, scroll_y) pair.
    fn navigate(&self, key: Keystroke, current: usize) -> Option<(usize, usize)> {
        let count = self.model.item_count();
        let last = count.saturating_sub(1);
        let height = self.height();
        let scroll = self.scroll_y;

        let moved = match key {
            Keystroke::Down if current < last => {
                let next = current + 1;
                let scroll = if next >= scroll + height {
                    next + 1 - height
                } else {
                    scroll
                };
                (next, scroll)
            }
            Keystroke::Up if current > 0 => {
                let next = current - 1;
                (next, scroll.min(next))
            }
            Keystroke::Down | Keystroke::Up => (current, scroll),
            Keystroke::PageDown => (
                (current + height).min(last),
                (scroll + height).min(count.saturating_sub(height)),
            ),
            Keystroke::PageUp => (
                current.saturating_sub(height),
                scroll.saturating_sub(height),
            ),
            Keystroke::Home => (0, 0),
            Keystroke::End => (last, count.saturating_sub(height)),
            _ => return None,
        };
        Some(moved)
    }
}

impl<M: ListModel> View for ListView<M> {
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
        let normal = theme.style("listview", focused, None);
        let current_style = normal.patch(theme.style("listview", focused, Some("current")));
        let selected_style = normal.patch(theme.style("listview", focused, Some("selected")));

        for row in 0..rect.height {
            let index = self.scroll_y + usize::from(row);
            let y = rect.y + row;
            let Some(item) = self.model.item(index) else {
                canvas.write(rect.x, y, "", rect.width, normal);
                continue;
            };
            let state = ItemState {
                current: self.current == Some(index),
                selected: self.selectable && self.selected == Some(index),
                focused,
            };
            let style = if state.current {
                current_style
            } else if state.selected {
                selected_style
            } else {
                normal
            };
            let line = self.renderer.render(item, state, rect.width);
            canvas.write_line(rect.x, y, &line, rect.width, style);
        }
    }

    fn on_key_press(&mut self, key: Keystroke) -> bool {
        if self.model.enabled()
            && let Some(handler) = self.key_handlers.get(&key)
        {
            handler(self);
            return true;
        }

        let Some(current) = self.current else {
            return false;
        };
        if key == Keystroke::Enter {
            if self.selectable {
                self.select(Some(current));
            }
            return self.selectable;
        }
        let Some((next, scroll)) = self.navigate(key, current) else {
            return false;
        };
        if (next, scroll) != (current, self.scroll_y) {
            self.current = Some(next);
            self.scroll_y = scroll;
            self.base.queue_update();
        }
        true
    }

    fn sync(&mut self) {
        let change = self.model.sync();
        self.apply_change(change);
    }

    fn set_rect(&mut self, rect: Rect) {
        self.base.set_rect(rect);
        self.scroll_into_view();
    }

    fn set_application(&mut self, link: Option<AppLink>) {
        if let (Some(id), Some(handler)) = (self.model_listener.take(), self.model.list_changed()) {
            handler.remove(id);
        }
        if let (Some(link), Some(handler)) = (&link, self.model.list_changed()) {
            let link = link.clone();
            let view = self.base.id();
            self.model_listener = Some(handler.add(move |_, _| link.queue_update(view)));
        }
        self.base.set_link(link);
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemRenderer, ItemState, ListChange, ListModel, ListView, VecListModel};
    use crate::app::{AppLink, AppShared};
    use crate::input::Keystroke;
    use crate::theme::Theme;
    use crate::view::{Canvas, View};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use ratatui::buffer::Buffer;
    use ratatui::layout::Rect;
    use ratatui::text::Line;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn display_renderer<T: std::fmt::Display>() -> impl ItemRenderer<T> {
        |item: &T, _: ItemState, _: u16| Line::from(item.to_string())
    }

    fn list(count: usize, height: u16) -> ListView<VecListModel<String>> {
        let items = (0..count).map(|n| format!("item-{n}")).collect();
        ListView::new(VecListModel::new(items), display_renderer())
            .with_rect(Rect::new(0, 0, 10, height))
    }

    fn press(view: &mut ListView<VecListModel<String>>, key: Keystroke, times: usize) {
        for _ in 0..times {
            view.on_key_press(key);
        }
    }

    fn rows(view: &mut ListView<VecListModel<String>>) -> Vec<String> {
        let rect = view.rect();
        let theme = Theme::plain();
        let mut buffer = Buffer::empty(rect);
        view.update(&mut Canvas::new(&mut buffer, &theme));
        (rect.top()..rect.bottom())
            .map(|y| {
                (rect.left()..rect.right())
                    .map(|x| buffer[(x, y)].symbol().to_string())
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn eleven_downs_through_twelve_items_scroll_by_one_row() {
        let mut view = list(12, 5);
        press(&mut view, Keystroke::Down, 11);
        assert_eq!(view.current_index(), Some(11));
        assert_eq!(view.scroll_y(), 7);

        press(&mut view, Keystroke::Down, 3);
        assert_eq!(view.current_index(), Some(11));
        assert_eq!(view.scroll_y(), 7);
    }

    #[test]
    fn empty_list_has_no_cursor_and_ignores_navigation() {
        let mut view = list(0, 5);
        assert_eq!(view.current_index(), None);
        for key in [
            Keystroke::Down,
            Keystroke::Up,
            Keystroke::PageDown,
            Keystroke::End,
            Keystroke::Enter,
        ] {
            view.on_key_press(key);
        }
        assert_eq!(view.current_index(), None);
        assert_eq!(view.current_item(), None);
        assert_eq!(rows(&mut view), vec![""; 5]);
    }

    #[test]
    fn paging_clamps_to_the_last_viewport() {
        let mut view = list(12, 5);
        press(&mut view, Keystroke::PageDown, 1);
        assert_eq!((view.current_index(), view.scroll_y()), (Some(5), 5));
        press(&mut view, Keystroke::PageDown, 1);
        assert_eq!((view.current_index(), view.scroll_y()), (Some(10), 7));
        press(&mut view, Keystroke::PageDown, 1);
        assert_eq!((view.current_index(), view.scroll_y()), (Some(11), 7));
        press(&mut view, Keystroke::PageUp, 1);
        assert_eq!((view.current_index(), view.scroll_y()), (Some(6), 2));
        press(&mut view, Keystroke::Home, 1);
        assert_eq!((view.current_index(), view.scroll_y()), (Some(0), 0));
        press(&mut view, Keystroke::End, 1);
        assert_eq!((view.current_index(), view.scroll_y()), (Some(11), 7));
    }

    #[test]
    fn renders_visible_window_and_blanks_the_rest() {
        let mut view = list(3, 5);
        press(&mut view, Keystroke::Down, 1);
        assert_eq!(rows(&mut view), vec!["item-0", "item-1", "item-2", "", ""]);

        let mut view = list(12, 3);
        press(&mut view, Keystroke::End, 1);
        assert_eq!(rows(&mut view), vec!["item-9", "item-10", "item-11"]);
    }

    #[test]
    fn renderer_sees_cursor_and_selection() {
        let items = vec!["a".to_string(), "b".to_string()];
        let renderer = |item: &String, state: ItemState, _: u16| {
            let marker = match (state.current, state.selected) {
                (true, true) => "*>",
                (true, false) => " >",
                (false, true) => "* ",
                (false, false) => "  ",
            };
            Line::from(format!("{marker}{item}"))
        };
        let mut view = ListView::new(VecListModel::new(items), renderer)
            .selectable(true)
            .with_rect(Rect::new(0, 0, 6, 2));
        view.on_key_press(Keystroke::Enter);
        view.on_key_press(Keystroke::Down);

        let theme = Theme::plain();
        let mut buffer = Buffer::empty(Rect::new(0, 0, 6, 2));
        view.update(&mut Canvas::new(&mut buffer, &theme));
        let first = (0..6).map(|x| buffer[(x, 0)].symbol().to_string()).collect::<String>();
        let second = (0..6).map(|x| buffer[(x, 1)].symbol().to_string()).collect::<String>();
        assert_eq!(first, "* a   ");
        assert_eq!(second, " >b   ");
    }

    #[test]
    fn enter_selects_only_when_selectable() {
        let mut view = list(3, 5);
        assert!(!view.on_key_press(Keystroke::Enter));
        assert_eq!(view.selected_index(), None);

        let mut view = list(3, 5).selectable(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        view.on_select()
            .add(move |_, item: &Option<String>| sink.lock().push(item.clone()));
        press(&mut view, Keystroke::Down, 2);
        assert!(view.on_key_press(Keystroke::Enter));
        assert_eq!(view.selected_index(), Some(2));
        view.select(None);
        assert_eq!(*seen.lock(), vec![Some("item-2".to_string()), None]);
    }

    #[test]
    fn key_handlers_see_the_current_item_while_enabled() {
        let mut view = list(4, 5);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        view.set_key_handler(Keystroke::Char('d'), move |view| {
            sink.borrow_mut().push(view.current_item().cloned());
        });
        press(&mut view, Keystroke::Down, 1);
        assert!(view.on_key_press(Keystroke::Char('d')));
        assert_eq!(*seen.borrow(), vec![Some("item-1".to_string())]);
        assert!(!view.on_key_press(Keystroke::Char('x')));
    }

    #[test]
    fn model_updates_clamp_and_replacements_reset() {
        let shared = Arc::new(AppShared::default());
        let mut view = list(10, 4).selectable(true);
        view.set_application(Some(AppLink::new(&shared)));
        press(&mut view, Keystroke::End, 1);
        view.on_key_press(Keystroke::Enter);
        shared.take_dirty();

        view.model_mut()
            .set_items((0..5).map(|n| format!("new-{n}")).collect());
        view.sync();
        assert_eq!(view.current_index(), Some(4));
        assert_eq!(view.scroll_y(), 1);
        assert_eq!(view.selected_index(), None);
        assert_eq!(shared.take_dirty(), vec![view.id()]);

        press(&mut view, Keystroke::Up, 2);
        view.model_mut().replace_items(vec!["other".to_string()]);
        view.sync();
        assert_eq!((view.current_index(), view.scroll_y()), (Some(0), 0));

        view.sync();
        assert_eq!(view.model_mut().sync(), ListChange::Unchanged);
    }

    #[test]
    fn detaching_unsubscribes_from_the_model() {
        let shared = Arc::new(AppShared::default());
        let mut view = list(2, 4);
        view.set_application(Some(AppLink::new(&shared)));
        assert_eq!(view.model().list_changed().map(|h| h.len()), Some(1));
        view.set_application(None);
        assert_eq!(view.model().list_changed().map(|h| h.len()), Some(0));
    }

    #[derive(Debug, Clone)]
    enum Nav {
        Up,
        Down,
        PageUp,
        PageDown,
        Home,
        End,
    }

    impl Nav {
        fn key(&self) -> Keystroke {
            match self {
                Self::Up => Keystroke::Up,
                Self::Down => Keystroke::Down,
                Self::PageUp => Keystroke::PageUp,
                Self::PageDown => Keystroke::PageDown,
                Self::Home => Keystroke::Home,
                Self::End => Keystroke::End,
            }
        }
    }

    fn nav() -> impl Strategy<Value = Nav> {
        prop_oneof![
            Just(Nav::Up),
            Just(Nav::Down),
            Just(Nav::PageUp),
            Just(Nav::PageDown),
            Just(Nav::Home),
            Just(Nav::End),
        ]
    }

    proptest! {
        #[test]
        fn cursor_stays_inside_the_viewport(
            count in 0usize..60,
            height in 1u16..20,
            keys in prop::collection::vec(nav(), 0..80),
        ) {
            let mut view = list(count, height);
            let height = usize::from(height);
            for key in keys {
                let before = (view.current_index(), view.scroll_y());
                let nav = key.clone();
                view.on_key_press(key.key());

                match view.current_index() {
                    None => prop_assert_eq!(count, 0),
                    Some(current) => {
                        prop_assert!(current < count);
                        prop_assert!(view.scroll_y() <= current);
                        prop_assert!(current < view.scroll_y() + height);
                    }
                }
                if matches!(nav, Nav::PageDown) {
                    prop_assert!(view.scroll_y() <= count.saturating_sub(height));
                }
                if matches!(nav, Nav::Down) && before.0 == Some(count.saturating_sub(1)) {
                    prop_assert_eq!((view.current_index(), view.scroll_y()), before);
                }
                if matches!(nav, Nav::Up) && before.0 == Some(0) {
                    prop_assert_eq!((view.current_index(), view.scroll_y()), before);
                }
            }
        }
    }
}
