use crate::terminal::Suspend;
use anyhow::{Context, Result, anyhow, bail};
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use tempfile::NamedTempFile;

/// External programs the dashboard hands text to. Commands are split on
/// whitespace into program and arguments; the file path is appended last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalTools {
    editor: Option<Vec<String>>,
    viewer: Option<Vec<String>>,
}

impl ExternalTools {
    pub fn new(editor: Option<&str>, viewer: Option<&str>) -> Self {
        Self {
            editor: editor.and_then(split_command),
            viewer: viewer.and_then(split_command),
        }
    }

    pub fn has_viewer(&self) -> bool {
        self.viewer.is_some()
    }

    /// Shows `text` in the viewer. Returns false without doing anything when
    /// no viewer is configured, so the caller can fall back to a popup.
    pub fn view(&self, terminal: &mut dyn Suspend, text: &str, suffix: &str) -> Result<bool> {
        let Some(viewer) = &self.viewer else {
            return Ok(false);
        };
        let file = scratch_file(text, suffix)?;
        let status = run_suspended(terminal, viewer, file.path())?;
        if !status.success() {
            bail!("viewer {} exited with {status}", viewer[0]);
        }
        Ok(true)
    }

    /// Opens `text` in the editor. Yields the edited text only when the editor
    /// exited successfully and the content changed.
    pub fn edit(
        &self,
        terminal: &mut dyn Suspend,
        text: &str,
        suffix: &str,
    ) -> Result<Option<String>> {
        let Some(editor) = &self.editor else {
            bail!("no editor configured, set general.editor in config.yaml");
        };
        let file = scratch_file(text, suffix)?;
        let status = run_suspended(terminal, editor, file.path())?;
        if !status.success() {
            return Ok(None);
        }
        let edited = std::fs::read_to_string(file.path())
            .with_context(|| format!("failed to read back {}", file.path().display()))?;
        Ok((edited != text).then_some(edited))
    }
}

fn split_command(command: &str) -> Option<Vec<String>> {
    let parts = command
        .split_whitespace()
        .map(str::to_string)
        .collect::<Vec<_>>();
    (!parts.is_empty()).then_some(parts)
}

fn scratch_file(text: &str, suffix: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("kubedash-")
        .suffix(suffix)
        .tempfile()
        .context("failed to create temporary file")?;
    file.write_all(text.as_bytes())
        .and_then(|()| file.flush())
        .context("failed to write temporary file")?;
    Ok(file)
}

fn run_suspended(terminal: &mut dyn Suspend, command: &[String], path: &Path) -> Result<ExitStatus> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;

    terminal.suspend()?;
    let run_result = Command::new(program)
        .args(args)
        .arg(path)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("failed to run {program}"));
    let restore_result = terminal.resume();

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow!(
            "{run_error:#}\nterminal resume error: {restore_error:#}"
        )),
        (Err(error), _) | (_, Err(error)) => Err(error),
        (Ok(status), Ok(())) => Ok(status),
    }
}

#[cfg(test)]
mod tests {
    use super::ExternalTools;
    use crate::terminal::Suspend;

    #[derive(Default)]
    struct Recorder {
        events: Vec<&'static str>,
    }

    impl Suspend for Recorder {
        fn suspend(&mut self) -> anyhow::Result<()> {
            self.events.push("suspend");
            Ok(())
        }

        fn resume(&mut self) -> anyhow::Result<()> {
            self.events.push("resume");
            Ok(())
        }
    }

    fn editor(script: &str) -> ExternalTools {
        ExternalTools {
            editor: Some(vec!["sh".to_string(), "-c".to_string(), script.to_string()]),
            viewer: None,
        }
    }

    #[test]
    fn changed_content_is_returned() {
        let tools = editor("printf 'kind: Pod\\n' > \"$0\"");
        let mut terminal = Recorder::default();
        let edited = tools
            .edit(&mut terminal, "kind: Node\n", ".yaml")
            .expect("edit");
        assert_eq!(edited.as_deref(), Some("kind: Pod\n"));
        assert_eq!(terminal.events, vec!["suspend", "resume"]);
    }

    #[test]
    fn unchanged_content_yields_nothing() {
        let tools = editor("true");
        let edited = tools
            .edit(&mut Recorder::default(), "kind: Node\n", ".yaml")
            .expect("edit");
        assert_eq!(edited, None);
    }

    #[test]
    fn failing_editor_discards_changes() {
        let tools = editor("printf changed > \"$0\"; exit 1");
        let edited = tools
            .edit(&mut Recorder::default(), "original", ".tpl")
            .expect("edit");
        assert_eq!(edited, None);
    }

    #[test]
    fn missing_program_still_resumes_the_terminal() {
        let tools = ExternalTools::new(Some("kubedash-no-such-editor --wait"), None);
        let mut terminal = Recorder::default();
        assert!(tools.edit(&mut terminal, "x", ".yaml").is_err());
        assert_eq!(terminal.events, vec!["suspend", "resume"]);
    }

    #[test]
    fn viewer_is_optional() {
        let mut terminal = Recorder::default();
        let none = ExternalTools::new(Some("vi"), Some("   "));
        assert!(!none.has_viewer());
        assert!(!none.view(&mut terminal, "text", ".yaml").expect("view"));
        assert!(terminal.events.is_empty());

        let viewer = ExternalTools::new(None, Some("true"));
        assert!(viewer.view(&mut terminal, "text", ".yaml").expect("view"));
        assert_eq!(terminal.events, vec!["suspend", "resume"]);
    }

    #[test]
    fn editing_without_an_editor_is_an_error() {
        let tools = ExternalTools::new(None, None);
        assert!(tools.edit(&mut Recorder::default(), "x", ".yaml").is_err());
    }
}
