use crate::executor::TaskExecutor;
use crate::input::Keystroke;
use crate::terminal::{Detached, Suspend, TuiTerminal};
use crate::theme::Theme;
use crate::view::dialog::QuestionDialog;
use crate::view::text::{TextView, word_wrap};
use crate::view::{Canvas, View, ViewId, centered, render, sync_tree, update_by_id};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use parking_lot::Mutex;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use tokio::time::Duration;
use tracing::{debug, error};

const LOOP_PAUSE: Duration = Duration::from_millis(10);
const ERROR_WRAP: usize = 70;

/// Deferred work for the render thread.
pub type Command = Box<dyn FnOnce(&mut Application) + Send>;
pub type KeyHandler = Rc<dyn Fn(&mut Application)>;

/// Thread-safe inbox of the application: the de-duplicated dirty set and the
/// command queue. Background work only ever touches this.
#[derive(Default)]
pub struct AppShared {
    dirty: Mutex<Vec<ViewId>>,
    commands: Mutex<VecDeque<Command>>,
}

impl AppShared {
    pub fn take_dirty(&self) -> Vec<ViewId> {
        std::mem::take(&mut *self.dirty.lock())
    }

    fn take_commands(&self) -> VecDeque<Command> {
        std::mem::take(&mut *self.commands.lock())
    }
}

/// Non-owning back-reference from views and models to the application.
#[derive(Debug, Clone, Default)]
pub struct AppLink(Weak<AppShared>);

impl AppLink {
    pub fn new(shared: &Arc<AppShared>) -> Self {
        Self(Arc::downgrade(shared))
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn queue_update(&self, id: ViewId) {
        let Some(shared) = self.0.upgrade() else {
            return;
        };
        let mut dirty = shared.dirty.lock();
        if !dirty.contains(&id) {
            dirty.push(id);
        }
    }

    /// Queues a command for the render thread. Returns false once the
    /// application is gone.
    pub fn post(&self, command: impl FnOnce(&mut Application) + Send + 'static) -> bool {
        let Some(shared) = self.0.upgrade() else {
            return false;
        };
        shared.commands.lock().push_back(Box::new(command));
        true
    }
}

struct Popup {
    view: Box<dyn View>,
    closeable: bool,
}

/// Owner of the component tree, the popup slot, the key-handler registry and
/// the screen model. Runs on the main task only.
pub struct Application {
    shared: Arc<AppShared>,
    components: Vec<Box<dyn View>>,
    focused_index: usize,
    popup: Option<Popup>,
    active: bool,
    key_handlers: HashMap<Keystroke, KeyHandler>,
    theme: Theme,
    screen: Buffer,
    clear_requested: bool,
    frame_pending: bool,
    executor: TaskExecutor,
    suspender: Box<dyn Suspend>,
}

impl Application {
    pub fn new(area: Rect, theme: Theme, executor: TaskExecutor) -> Self {
        Self {
            shared: Arc::new(AppShared::default()),
            components: Vec::new(),
            focused_index: 0,
            popup: None,
            active: true,
            key_handlers: HashMap::new(),
            theme,
            screen: Buffer::empty(area),
            clear_requested: false,
            frame_pending: true,
            executor,
            suspender: Box::new(Detached),
        }
    }

    pub fn set_suspender(&mut self, suspender: Box<dyn Suspend>) {
        self.suspender = suspender;
    }

    pub fn link(&self) -> AppLink {
        AppLink::new(&self.shared)
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn area(&self) -> Rect {
        self.screen.area
    }

    #[cfg(test)]
    pub fn screen(&self) -> &Buffer {
        &self.screen
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn quit(&mut self) {
        self.active = false;
    }

    pub fn has_popup(&self) -> bool {
        self.popup.is_some()
    }

    pub fn add_component(&mut self, mut component: Box<dyn View>) {
        component.set_application(Some(self.link()));
        if self.components.is_empty() {
            component.set_focused(true);
            self.focused_index = 0;
        }
        component.queue_update();
        self.components.push(component);
    }

    pub fn focus_component(&mut self, index: usize) {
        if index >= self.components.len() || index == self.focused_index {
            return;
        }
        if let Some(current) = self.components.get_mut(self.focused_index) {
            current.set_focused(false);
        }
        self.focused_index = index;
        self.components[index].set_focused(true);
    }

    #[cfg(test)]
    pub fn focused_index(&self) -> usize {
        self.focused_index
    }

    pub fn set_key_handler(&mut self, key: Keystroke, handler: impl Fn(&mut Application) + 'static) {
        self.key_handlers.insert(key, Rc::new(handler));
    }

    #[cfg(test)]
    pub fn unset_key_handler(&mut self, key: Keystroke) -> bool {
        self.key_handlers.remove(&key).is_some()
    }

    /// Dispatches one keystroke, then runs any commands it queued.
    pub fn handle_key(&mut self, key: Keystroke) {
        debug!("key press {key:?}");
        match key {
            Keystroke::Esc => {
                if self.has_popup() {
                    self.close_popup();
                } else {
                    self.quit();
                }
            }
            Keystroke::Tab => self.cycle_focus(),
            _ => {
                if let Some(handler) = self.key_handlers.get(&key).cloned() {
                    handler(self);
                } else if let Some(popup) = &mut self.popup {
                    popup.view.on_key_press(key);
                } else if let Some(component) = self.components.get_mut(self.focused_index) {
                    component.on_key_press(key);
                }
            }
        }
        self.run_commands();
    }

    fn cycle_focus(&mut self) {
        if let Some(popup) = &mut self.popup {
            popup.view.set_focused(true);
        }
        if self.components.is_empty() {
            return;
        }
        self.components[self.focused_index].set_focused(false);
        self.focused_index = (self.focused_index + 1) % self.components.len();
        self.components[self.focused_index].set_focused(true);
    }

    pub fn run_commands(&mut self) {
        for command in self.shared.take_commands() {
            command(self);
        }
    }

    /// Picks up background state, then renders every view in the dirty set.
    /// While a popup is open only its subtree is rendered.
    pub fn drain_queue(&mut self) {
        if let Some(popup) = &mut self.popup {
            sync_tree(popup.view.as_mut());
        }
        for component in &mut self.components {
            sync_tree(component.as_mut());
        }

        let dirty = self.shared.take_dirty();
        if dirty.is_empty() {
            return;
        }

        let mut canvas = Canvas::new(&mut self.screen, &self.theme);
        match &mut self.popup {
            Some(popup) => {
                for id in dirty {
                    update_by_id(popup.view.as_mut(), id, &mut canvas);
                }
            }
            None => {
                for id in dirty {
                    for component in &mut self.components {
                        if update_by_id(component.as_mut(), id, &mut canvas) {
                            break;
                        }
                    }
                }
            }
        }
        self.frame_pending = true;
    }

    /// Installs `view` in the single popup slot, centered, and renders it.
    /// An open popup is replaced, not stacked.
    pub fn open_popup(&mut self, mut view: Box<dyn View>, closeable: bool) {
        let rect = view.rect();
        view.set_rect(centered(self.area(), rect.width, rect.height));

        if let Some(mut previous) = self.popup.take() {
            previous.view.set_application(None);
            self.repaint_all();
        }

        view.set_application(Some(self.link()));
        view.set_focused(true);
        let mut canvas = Canvas::new(&mut self.screen, &self.theme);
        render(view.as_mut(), &mut canvas);
        self.popup = Some(Popup { view, closeable });
        self.frame_pending = true;
    }

    /// Detaches a closeable popup and repaints the component tree. Returns
    /// false when there was nothing to close.
    pub fn close_popup(&mut self) -> bool {
        if !self.popup.as_ref().is_some_and(|popup| popup.closeable) {
            return false;
        }
        if let Some(mut popup) = self.popup.take() {
            popup.view.set_application(None);
        }
        self.repaint_all();
        true
    }

    pub fn show_text_popup(&mut self, text: &str) {
        let area = self.area();
        let rect = Rect::new(
            0,
            0,
            area.width - area.width / 4,
            area.height - area.height / 4,
        );
        self.open_popup(Box::new(TextView::new(rect, text)), true);
    }

    pub fn show_question_dialog(&mut self, dialog: QuestionDialog) {
        self.open_popup(Box::new(dialog), true);
    }

    pub fn show_error(&mut self, error: impl fmt::Display) {
        let message = format!("{error:#}");
        error!("{message}");
        self.show_text_popup(&format!(
            "An error has occurred:\n\n{}",
            word_wrap(&message, ERROR_WRAP)
        ));
    }

    /// Clears the terminal and redraws everything unconditionally.
    pub fn refresh(&mut self) {
        self.clear_requested = true;
        self.repaint_all();
    }

    pub fn resize(&mut self, area: Rect) {
        self.screen.resize(area);
        self.refresh();
    }

    fn repaint_all(&mut self) {
        self.screen.reset();
        let mut canvas = Canvas::new(&mut self.screen, &self.theme);
        for component in &mut self.components {
            render(component.as_mut(), &mut canvas);
        }
        if let Some(popup) = &mut self.popup {
            render(popup.view.as_mut(), &mut canvas);
        }
        self.shared.take_dirty();
        self.frame_pending = true;
    }

    pub async fn run(&mut self, terminal: &mut TuiTerminal) -> Result<()> {
        self.refresh();
        let result = self.run_loop(terminal).await;
        self.executor.finish().await;
        result
    }

    async fn run_loop(&mut self, terminal: &mut TuiTerminal) -> Result<()> {
        while self.is_active() {
            self.drain_queue();
            self.flush(terminal)?;
            self.poll_input()?;
            self.run_commands();
            tokio::time::sleep(LOOP_PAUSE).await;
        }
        Ok(())
    }

    fn poll_input(&mut self) -> Result<()> {
        if !event::poll(Duration::ZERO).context("failed to poll terminal input")? {
            return Ok(());
        }
        match event::read().context("failed to read terminal input")? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if let Some(keystroke) = Keystroke::from_key_event(key) {
                    self.handle_key(keystroke);
                }
            }
            Event::Resize(width, height) => self.resize(Rect::new(0, 0, width, height)),
            _ => {}
        }
        Ok(())
    }

    fn flush(&mut self, terminal: &mut TuiTerminal) -> Result<()> {
        if self.clear_requested {
            terminal.clear().context("failed to clear terminal")?;
            self.clear_requested = false;
            self.frame_pending = true;
        }
        if !self.frame_pending {
            return Ok(());
        }

        let screen = &self.screen;
        terminal
            .draw(|frame| {
                let target = frame.buffer_mut();
                let area = target.area.intersection(screen.area);
                for y in area.top()..area.bottom() {
                    for x in area.left()..area.right() {
                        target[(x, y)] = screen[(x, y)].clone();
                    }
                }
            })
            .context("failed to render terminal frame")?;
        self.frame_pending = false;
        Ok(())
    }
}

impl Suspend for Application {
    fn suspend(&mut self) -> Result<()> {
        self.suspender.suspend()
    }

    fn resume(&mut self) -> Result<()> {
        let resumed = self.suspender.resume();
        self.refresh();
        resumed
    }
}
