//! Conversion collaborators: markdown passthrough and an external converter command.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{CollaboratorError, Converted, Converter};

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Accepts documents that are already text and passes them through unchanged.
#[derive(Debug, Default, Clone)]
pub struct MarkdownConverter;

#[async_trait]
impl Converter for MarkdownConverter {
    fn name(&self) -> &str {
        "markdown-passthrough"
    }

    async fn convert(&self, input: &Path) -> Result<Converted, CollaboratorError> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !MARKDOWN_EXTENSIONS.contains(&ext.as_str()) {
            return Err(CollaboratorError::Unsupported(format!(
                "{} is not a text document; configure a conversion command",
                input.display()
            )));
        }
        let markdown = tokio::fs::read_to_string(input).await?;
        debug!(path = %input.display(), bytes = markdown.len(), "read markdown input");
        Ok(Converted::from_markdown(markdown, None))
    }
}

/// Runs an external converter that prints markdown on stdout.
///
/// `{input}` in the argument list is replaced by the document path; without a
/// placeholder the path is appended. The child is killed if the conversion is
/// cancelled by a timeout.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line such as `docling --to md "{input}"` with shell quoting rules.
    ///
    /// `None` when the line is empty or its quotes are unbalanced.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = shlex::split(command_line)?.into_iter();
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn args_for(&self, input: &Path) -> Vec<String> {
        let path = input.display().to_string();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{input}", &path))
            .collect();
        if !self.args.iter().any(|a| a.contains("{input}")) {
            args.push(path);
        }
        args
    }
}

#[async_trait]
impl Converter for CommandConverter {
    fn name(&self) -> &str {
        &self.program
    }

    async fn convert(&self, input: &Path) -> Result<Converted, CollaboratorError> {
        let args = self.args_for(input);
        info!(program = %self.program, ?args, "running converter");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CollaboratorError::Command {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let markdown = String::from_utf8_lossy(&output.stdout).into_owned();
        if markdown.trim().is_empty() {
            return Err(CollaboratorError::Unsupported(format!(
                "`{}` produced no text for {}",
                self.program,
                input.display()
            )));
        }
        info!(bytes = markdown.len(), "conversion complete");
        Ok(Converted::from_markdown(markdown, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn passthrough_reads_markdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("circular.md");
        std::fs::write(&path, "[PAGE 1]\nSub: Test\n").unwrap();

        let converted = MarkdownConverter.convert(&path).await.unwrap();
        assert_eq!(converted.markdown, "[PAGE 1]\nSub: Test\n");
        assert_eq!(converted.page_count, None);
    }

    #[tokio::test]
    async fn passthrough_rejects_binary_documents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("circular.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let err = MarkdownConverter.convert(&path).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unsupported(_)));
    }

    #[tokio::test]
    async fn passthrough_missing_file_is_io_error() {
        let err = MarkdownConverter
            .convert(Path::new("/nonexistent/circular.md"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Io(_)));
    }

    #[test]
    fn command_line_placeholder() {
        let c = CommandConverter::parse("docling --to md {input}").unwrap();
        assert_eq!(c.name(), "docling");
        assert_eq!(
            c.args_for(Path::new("/tmp/a.pdf")),
            vec!["--to", "md", "/tmp/a.pdf"]
        );

        let c = CommandConverter::parse("pdftotext -layout").unwrap();
        assert_eq!(c.args_for(Path::new("a.pdf")), vec!["-layout", "a.pdf"]);

        assert!(CommandConverter::parse("   ").is_none());
    }

    #[test]
    fn command_line_keeps_quoted_arguments_whole() {
        let c = CommandConverter::parse(r#""/opt/PDF Tools/convert" --title 'SEBI circular' {input}"#).unwrap();
        assert_eq!(c.name(), "/opt/PDF Tools/convert");
        assert_eq!(
            c.args_for(Path::new("/data/my circular.pdf")),
            vec!["--title", "SEBI circular", "/data/my circular.pdf"]
        );

        assert!(CommandConverter::parse("docling 'unterminated").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_stdout_becomes_markdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("circular.txt");
        std::fs::write(&path, "[PAGE 1]\nhello\n").unwrap();

        let converted = CommandConverter::new("cat", vec![]).convert(&path).await.unwrap();
        assert_eq!(converted.markdown, "[PAGE 1]\nhello\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_status() {
        let err = CommandConverter::new("false", vec![])
            .convert(Path::new("x.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Command { .. }));
    }
}
