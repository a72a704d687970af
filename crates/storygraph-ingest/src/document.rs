//! Source documents and how they are loaded from disk.
//!
//! Archives are laid out as `.../<dd.mm.yyyy>/<title>.txt`; the publication
//! date comes from the first path component carrying such a date.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use storygraph_core::DocumentId;

use crate::error::{ProcessError, Result};

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2}\.\d{2}\.\d{4})\b").expect("valid date pattern"));

/// One unit of work for the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Recorded in edge provenance lists.
    pub id: DocumentId,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub text: String,
    /// Where the document was read from, if it came from disk.
    pub path: Option<PathBuf>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            date: None,
            text: text.into(),
            path: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Read a UTF-8 document. The path string becomes the document id.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ProcessError::Read {
                path: path.display().to_string(),
                source,
            })?;

        let date = date_from_path(path);
        if date.is_none() {
            tracing::debug!(path = %path.display(), "No dd.mm.yyyy component in document path");
        }

        Ok(Self {
            id: DocumentId::new(path.display().to_string()),
            title: title_from_path(path),
            date,
            text,
            path: Some(path.to_path_buf()),
        })
    }
}

/// File name up to its first dot.
pub fn title_from_path(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

/// First `dd.mm.yyyy` date found in any path component.
pub fn date_from_path(path: &Path) -> Option<NaiveDate> {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .find_map(find_date)
}

fn find_date(component: &str) -> Option<NaiveDate> {
    DATE_RE
        .captures_iter(component)
        .find_map(|caps| NaiveDate::parse_from_str(&caps[1], "%d.%m.%Y").ok())
}

/// Read a list file: one document path per line. Blank lines and `#`
/// comments are ignored.
pub async fn read_list(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProcessError::Read {
            path: path.display().to_string(),
            source,
        })?;

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(PathBuf::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_from_directory() {
        let path = Path::new("archive/01.02.2011/Путин назначен.txt");
        assert_eq!(date_from_path(path), NaiveDate::from_ymd_opt(2011, 2, 1));
        assert_eq!(title_from_path(path), "Путин назначен");
    }

    #[test]
    fn test_date_embedded_in_component() {
        let path = Path::new("news-15.03.2020 lenta/a.txt");
        assert_eq!(date_from_path(path), NaiveDate::from_ymd_opt(2020, 3, 15));
        // Word characters on either side are not a boundary.
        assert_eq!(date_from_path(Path::new("v15.03.2020/a.txt")), None);
    }

    #[test]
    fn test_invalid_or_missing_date() {
        assert_eq!(date_from_path(Path::new("archive/32.13.2011/a.txt")), None);
        assert_eq!(date_from_path(Path::new("archive/a.txt")), None);
        assert_eq!(date_from_path(Path::new("101.02.20111/a.txt")), None);
        // An invalid first candidate does not hide a valid later one.
        assert_eq!(
            date_from_path(Path::new("32.13.2011 01.02.2011/a.txt")),
            NaiveDate::from_ymd_opt(2011, 2, 1)
        );
    }

    #[tokio::test]
    async fn test_load_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("08.05.2008");
        std::fs::create_dir_all(&day).unwrap();
        let doc_path = day.join("Назначение.txt");
        std::fs::write(&doc_path, "Владимир Путин назначен премьер-министром.").unwrap();

        let list = dir.path().join("list.txt");
        std::fs::write(
            &list,
            format!("# batch\n\n  {}  \n", doc_path.display()),
        )
        .unwrap();

        let paths = read_list(&list).await.unwrap();
        assert_eq!(paths, vec![doc_path.clone()]);

        let doc = Document::load(&paths[0]).await.unwrap();
        assert_eq!(doc.title, "Назначение");
        assert_eq!(doc.date, NaiveDate::from_ymd_opt(2008, 5, 8));
        assert_eq!(doc.id.as_str(), doc_path.display().to_string());
        assert!(doc.text.contains("Путин"));
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let err = Document::load(Path::new("/nonexistent/doc.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Read { .. }));
    }
}
