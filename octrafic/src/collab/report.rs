use super::ReportGenerator;
use crate::error::ToolError;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Writes reports as Markdown files into a directory.
#[derive(Debug, Clone)]
pub struct MarkdownReportGenerator {
    reports_dir: PathBuf,
}

impl MarkdownReportGenerator {
    /// Generator writing into `reports_dir`.
    #[must_use]
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    /// File name for a report, with the `.md` extension.
    fn file_name(requested: Option<&str>) -> String {
        let stem = requested
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| name.trim_end_matches(".md").trim_end_matches(".pdf"))
            .map(|name| {
                name.chars()
                    .map(|c| if c == '/' || c == '\\' { '_' } else { c })
                    .collect::<String>()
            })
            .unwrap_or_else(|| {
                format!("report-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"))
            });
        format!("{stem}.md")
    }
}

#[async_trait]
impl ReportGenerator for MarkdownReportGenerator {
    async fn generate(&self, content: &str, file_name: Option<&str>) -> Result<PathBuf, ToolError> {
        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .map_err(|e| ToolError::execution(format!("failed to create reports directory: {e}")))?;
        let path = self.reports_dir.join(Self::file_name(file_name));
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::execution(format!("failed to write report: {e}")))?;
        info!(path = %path.display(), "report written");
        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(MarkdownReportGenerator::file_name(Some("summary")), "summary.md");
        assert_eq!(MarkdownReportGenerator::file_name(Some("a/b.pdf")), "a_b.md");
        let generated = MarkdownReportGenerator::file_name(None);
        assert!(generated.starts_with("report-"));
        assert!(generated.ends_with(".md"));
        assert!(MarkdownReportGenerator::file_name(Some("  ")).starts_with("report-"));
    }

    #[tokio::test]
    async fn test_generate_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let generator = MarkdownReportGenerator::new(dir.path().join("reports"));
        let path = generator.generate("# Results\n", Some("run")).await.unwrap();
        assert_eq!(path, dir.path().join("reports/run.md"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# Results\n");
    }
}
