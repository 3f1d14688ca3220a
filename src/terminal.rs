use anyhow::{Context, Result};
use crossterm::cursor::{Hide, Show};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use std::io::{self, Stdout};
use tracing::warn;

pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Hands the terminal over to a child process and takes it back.
pub trait Suspend {
    fn suspend(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
}

/// No terminal attached; suspending is a no-op.
#[derive(Debug, Default)]
pub struct Detached;

impl Suspend for Detached {
    fn suspend(&mut self) -> Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CrosstermSuspend;

impl Suspend for CrosstermSuspend {
    fn suspend(&mut self) -> Result<()> {
        disable_raw_mode().context("failed to disable raw mode for subprocess")?;
        execute!(io::stdout(), LeaveAlternateScreen, Show)
            .context("failed to leave alternate screen for subprocess")?;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        enable_raw_mode().context("failed to re-enable raw mode after subprocess")?;
        execute!(io::stdout(), EnterAlternateScreen, Hide)
            .context("failed to re-enter alternate screen after subprocess")?;
        Ok(())
    }
}

/// Raw-mode, alternate-screen terminal. Restored on drop and from the panic
/// hook, so every exit path leaves a usable shell behind.
pub struct TerminalSession {
    terminal: TuiTerminal,
    restored: bool,
}

impl TerminalSession {
    pub fn start() -> Result<Self> {
        install_panic_hook();
        enable_raw_mode().context("failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide).context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
        terminal.clear().context("failed to clear terminal")?;
        Ok(Self {
            terminal,
            restored: false,
        })
    }

    pub fn terminal_mut(&mut self) -> &mut TuiTerminal {
        &mut self.terminal
    }

    /// Samples the current terminal size.
    pub fn area(&self) -> Result<Rect> {
        let size = self.terminal.size().context("failed to read terminal size")?;
        Ok(Rect::new(0, 0, size.width, size.height))
    }

    pub fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        restore_terminal()?;
        self.terminal
            .show_cursor()
            .context("failed to show cursor")?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if let Err(error) = self.restore() {
            warn!("terminal restore failed: {error:#}");
        }
    }
}

fn restore_terminal() -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(io::stdout(), LeaveAlternateScreen, Show)
        .context("failed to leave alternate screen")?;
    Ok(())
}

// Only the render thread owns the terminal. Panics caught inside background
// tasks must not tear it down.
fn install_panic_hook() {
    let render_thread = std::thread::current().id();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if std::thread::current().id() == render_thread {
            let _ = restore_terminal();
        }
        previous(info);
    }));
}
