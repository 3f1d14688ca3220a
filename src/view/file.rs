use super::list::{ItemState, ListChange, ListModel, ListView};
use super::{Canvas, View, ViewBase};
use crate::input::Keystroke;
use crate::listener::ListenerHandler;
use anyhow::{Context, Result};
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::Line;
use std::path::{Path, PathBuf};
use tracing::warn;

const HEADER: &str = "Select file";
const FOOTER: &str = "Enter: select, Esc: Exit";

/// Decides whether a regular file is offered: `(directory, file name)`.
pub type FileFilter = Box<dyn Fn(&Path, &str) -> bool>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Entries of one directory: `..` first (unless at the root), then
/// sub-directories, then the files the filter accepts. Hidden entries are
/// skipped.
pub struct FileListModel {
    dir: PathBuf,
    entries: Vec<FileEntry>,
    filter: FileFilter,
    pending: ListChange,
}

impl FileListModel {
    pub fn new(dir: impl Into<PathBuf>, filter: FileFilter) -> Result<Self> {
        let mut model = Self {
            dir: PathBuf::new(),
            entries: Vec::new(),
            filter,
            pending: ListChange::Unchanged,
        };
        model.set_dir(dir.into())?;
        Ok(model)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Lists `dir`. On failure the model keeps showing the previous directory.
    pub fn set_dir(&mut self, dir: PathBuf) -> Result<()> {
        let listing = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read directory {}", dir.display()))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in listing {
            let entry = entry.with_context(|| format!("failed to read directory {}", dir.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                dirs.push(FileEntry {
                    name,
                    path,
                    is_dir: true,
                });
            } else if (self.filter)(&dir, &name) {
                files.push(FileEntry {
                    name,
                    path,
                    is_dir: false,
                });
            }
        }
        dirs.sort_by(|a, b| a.name.cmp(&b.name));
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let parent = dir.parent().map(|parent| FileEntry {
            name: "..".to_string(),
            path: parent.to_path_buf(),
            is_dir: true,
        });
        self.entries = parent.into_iter().chain(dirs).chain(files).collect();
        self.dir = dir;
        self.pending = ListChange::Replaced;
        Ok(())
    }
}

impl ListModel for FileListModel {
    type Item = FileEntry;

    fn item_count(&self) -> usize {
        self.entries.len()
    }

    fn item(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    fn sync(&mut self) -> ListChange {
        std::mem::replace(&mut self.pending, ListChange::Unchanged)
    }
}

fn render_entry(entry: &FileEntry, _: ItemState, _: u16) -> Line<'static> {
    if entry.is_dir && entry.name != ".." {
        Line::from(format!("{}/", entry.name))
    } else {
        Line::from(entry.name.clone())
    }
}

/// Popup for picking a file. Entering a directory navigates in place; picking
/// a file fires `on_file_selected` and leaves closing the popup to the caller.
pub struct FileChooser {
    base: ViewBase,
    list: ListView<FileListModel>,
    on_file_selected: ListenerHandler<FileChooser, PathBuf>,
}

impl FileChooser {
    pub fn new(rect: Rect, dir: impl Into<PathBuf>, filter: FileFilter) -> Result<Self> {
        let model = FileListModel::new(dir, filter)?;
        let list = ListView::new(model, render_entry).with_rect(list_rect(rect));
        Ok(Self {
            base: ViewBase::new(rect),
            list,
            on_file_selected: ListenerHandler::new(),
        })
    }

    pub fn on_file_selected(&self) -> &ListenerHandler<FileChooser, PathBuf> {
        &self.on_file_selected
    }

    pub fn dir(&self) -> &Path {
        self.list.model().dir()
    }

    #[cfg(test)]
    pub fn list(&self) -> &ListView<FileListModel> {
        &self.list
    }

    fn choose(&mut self) {
        let Some(entry) = self.list.current_item().cloned() else {
            return;
        };
        if !entry.is_dir {
            self.on_file_selected.fire(self, &entry.path);
            return;
        }
        match self.list.model_mut().set_dir(entry.path) {
            Ok(()) => {
                self.list.sync();
                self.base.queue_update();
            }
            Err(err) => warn!("{err:#}"),
        }
    }
}

fn list_rect(rect: Rect) -> Rect {
    Rect::new(
        rect.x,
        rect.y.saturating_add(2),
        rect.width,
        rect.height.saturating_sub(3),
    )
}

impl View for FileChooser {
    fn base(&self) -> &ViewBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ViewBase {
        &mut self.base
    }

    fn update(&mut self, canvas: &mut Canvas<'_>) {
        let rect = self.base.rect();
        if rect.height < 3 {
            return;
        }
        let theme = canvas.theme();
        let body = theme.style("filechooser", false, None);
        let header = body
            .patch(Style::default().add_modifier(Modifier::BOLD))
            .patch(theme.style("filechooser", false, Some("header")));

        canvas.write(rect.x, rect.y, HEADER, rect.width, header);
        let dir = self.dir().display().to_string();
        canvas.write(rect.x, rect.y + 1, &dir, rect.width, body);
        self.list.update(canvas);
        self.list.base_mut().mark_clean();
        canvas.write(rect.x, rect.bottom() - 1, FOOTER, rect.width, header);
    }

    fn on_key_press(&mut self, key: Keystroke) -> bool {
        if key == Keystroke::Enter {
            self.choose();
            return true;
        }
        self.list.on_key_press(key)
    }

    fn children_mut(&mut self) -> Vec<&mut dyn View> {
        vec![&mut self.list]
    }

    fn set_rect(&mut self, rect: Rect) {
        self.list.set_rect(list_rect(rect));
        self.base.set_rect(rect);
    }

    fn set_focused(&mut self, focused: bool) {
        self.base.set_focused(focused);
        self.list.set_focused(focused);
    }
}
