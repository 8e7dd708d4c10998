//! Document storage for local research.
//!
//! Documents live either in the document root (`storage.doc_path`) or inside a
//! named knowledge base at `<storage.vector_store_path>/<name>/docs`. Every
//! name coming from a request is checked to be a single plain path component
//! before it touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::types::{AppError, Result};
use crate::utils::toml_config::StorageConfig;

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct DocumentStore {
    doc_root: PathBuf,
    vector_store_root: PathBuf,
}

impl DocumentStore {
    pub fn new(doc_root: impl Into<PathBuf>, vector_store_root: impl Into<PathBuf>) -> Self {
        Self {
            doc_root: doc_root.into(),
            vector_store_root: vector_store_root.into(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(&storage.doc_path, &storage.vector_store_path)
    }

    pub fn doc_root(&self) -> &Path {
        &self.doc_root
    }

    pub fn vector_store_root(&self) -> &Path {
        &self.vector_store_root
    }

    /// `<vector_store_root>/<kb>/docs`. Does not touch the filesystem.
    pub fn kb_docs_dir(&self, kb: &str) -> Result<PathBuf> {
        let kb = plain_name(kb, "knowledge base")?;
        Ok(self.vector_store_root.join(kb).join("docs"))
    }

    fn target_dir(&self, kb: Option<&str>) -> Result<PathBuf> {
        match kb.filter(|k| !k.is_empty()) {
            Some(kb) => self.kb_docs_dir(kb),
            None => Ok(self.doc_root.clone()),
        }
    }

    /// File names in the document root or a knowledge base, sorted.
    ///
    /// A missing document root is created; a missing knowledge base is empty.
    pub async fn list(&self, kb: Option<&str>) -> Result<Vec<String>> {
        let dir = self.target_dir(kb)?;
        if dir == self.doc_root {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| AppError::resource(format!("creating {}", dir.display()), e))?;
        } else if tokio::fs::metadata(&dir).await.is_err() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| AppError::resource(format!("listing {}", dir.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::resource(format!("listing {}", dir.display()), e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Store `contents` as `filename`, replacing any file of the same name.
    pub async fn upload(&self, filename: &str, contents: &[u8], kb: Option<&str>) -> Result<PathBuf> {
        let filename = plain_name(filename, "file name")?;
        let dir = self.target_dir(kb)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::resource(format!("creating {}", dir.display()), e))?;

        let path = dir.join(filename);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| AppError::resource(format!("writing {}", path.display()), e))?;

        tracing::info!(path = %path.display(), bytes = contents.len(), "document uploaded");
        Ok(path)
    }

    pub async fn delete(&self, filename: &str, kb: Option<&str>) -> Result<()> {
        let filename = plain_name(filename, "file name")?;
        let path = self.target_dir(kb)?.join(filename);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "document deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("File '{}' not found", filename)))
            }
            Err(e) => Err(AppError::resource(format!("deleting {}", path.display()), e)),
        }
    }

    /// Names of the subdirectories of the vector store root, sorted.
    pub async fn list_knowledge_bases(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.vector_store_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::resource("listing knowledge bases", e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::resource("listing knowledge bases", e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Accept `name` only if it is one normal path component.
fn plain_name<'a>(name: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", what)));
    }
    if trimmed.len() > MAX_NAME_LEN || trimmed.contains(['\\', '\0']) {
        return Err(AppError::Validation(format!("Invalid {} '{}'", what, name)));
    }

    let mut components = Path::new(trimmed).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(trimmed),
        _ => Err(AppError::Validation(format!("Invalid {} '{}'", what, name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> DocumentStore {
        DocumentStore::new(dir.path().join("my-docs"), dir.path().join("vector_store"))
    }

    #[rstest]
    #[case("notes.md", true)]
    #[case("my notes.txt", true)]
    #[case("", false)]
    #[case("..", false)]
    #[case(".", false)]
    #[case("../escape.md", false)]
    #[case("a/b.md", false)]
    #[case("a\\b.md", false)]
    #[case("/etc/passwd", false)]
    fn test_plain_name(#[case] name: &str, #[case] ok: bool) {
        assert_eq!(plain_name(name, "file name").is_ok(), ok);
    }

    #[tokio::test]
    async fn test_list_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.list(None).await.unwrap().is_empty());
        assert!(store.doc_root().is_dir());
    }

    #[tokio::test]
    async fn test_upload_to_knowledge_base_then_list() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let path = store.upload("a.md", b"hello", Some("rust")).await.unwrap();
        assert_eq!(path, dir.path().join("vector_store/rust/docs/a.md"));

        // Re-uploading replaces rather than duplicates.
        store.upload("a.md", b"hello again", Some("rust")).await.unwrap();

        assert_eq!(store.list(Some("rust")).await.unwrap(), vec!["a.md"]);
        assert_eq!(store.list_knowledge_bases().await.unwrap(), vec!["rust"]);
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.upload("a.md", b"x", None).await.unwrap();

        store.delete("a.md", None).await.unwrap();
        assert!(store.list(None).await.unwrap().is_empty());

        assert!(matches!(
            store.delete("a.md", None).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(matches!(
            store.upload("x.md", b"x", Some("../outside")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            store.delete("../../Cargo.toml", None).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_unknown_knowledge_base_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.list(Some("nothing")).await.unwrap().is_empty());
        assert!(store.list_knowledge_bases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_knowledge_bases_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).list_knowledge_bases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_knowledge_bases_ignore_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.upload("a.md", b"x", Some("beta")).await.unwrap();
        store.upload("a.md", b"x", Some("alpha")).await.unwrap();
        std::fs::write(store.vector_store_root().join("stray.txt"), "x").unwrap();

        assert_eq!(
            store.list_knowledge_bases().await.unwrap(),
            vec!["alpha", "beta"]
        );
    }
}
