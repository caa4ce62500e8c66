//! Link file storage

use async_trait::async_trait;
use tracing::debug;

use crate::errors::LinkError;
use crate::filesys::dir::Dir;
use crate::models::link::LinkDefinition;

/// Where link definitions live, keyed by link id (the file name)
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Ids of every stored link, sorted
    async fn list_ids(&self) -> Result<Vec<String>, LinkError>;

    /// Raw link file contents
    async fn read(&self, id: &str) -> Result<String, LinkError>;

    /// Replace the link file contents
    async fn write(&self, id: &str, contents: &str) -> Result<(), LinkError>;

    /// Remove the link file
    async fn delete(&self, id: &str) -> Result<(), LinkError>;

    async fn exists(&self, id: &str) -> bool;

    /// Read and validate a definition
    async fn load_definition(&self, id: &str) -> Result<LinkDefinition, LinkError> {
        let contents = self.read(id).await?;
        LinkDefinition::from_toml(&contents)
    }

    /// Persist a definition
    async fn save_definition(&self, id: &str, definition: &LinkDefinition) -> Result<(), LinkError> {
        let contents = definition.to_toml()?;
        self.write(id, &contents).await
    }
}

/// Link files in a directory, one `<id>` file per link
#[derive(Debug, Clone)]
pub struct TomlLinkStore {
    dir: Dir,
}

impl TomlLinkStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    fn checked_file(&self, id: &str) -> Result<crate::filesys::file::File, LinkError> {
        if !is_valid_link_id(id) {
            return Err(LinkError::ConfigValidation(format!("invalid link id `{}`", id)));
        }
        Ok(self.dir.file(id))
    }
}

#[async_trait]
impl LinkStore for TomlLinkStore {
    async fn list_ids(&self) -> Result<Vec<String>, LinkError> {
        self.dir.file_names_with_extension("toml").await
    }

    async fn read(&self, id: &str) -> Result<String, LinkError> {
        let file = self.checked_file(id)?;
        if !file.is_file().await {
            return Err(LinkError::NotFound(format!("link file `{}`", id)));
        }
        file.read_string().await
    }

    async fn write(&self, id: &str, contents: &str) -> Result<(), LinkError> {
        let file = self.checked_file(id)?;
        debug!("Writing link file {}", file.path().display());
        file.write_string(contents).await
    }

    async fn delete(&self, id: &str) -> Result<(), LinkError> {
        let file = self.checked_file(id)?;
        file.delete().await
    }

    async fn exists(&self, id: &str) -> bool {
        match self.checked_file(id) {
            Ok(file) => file.is_file().await,
            Err(_) => false,
        }
    }
}

/// Link ids are file names made of `[0-9A-Za-z._-]` ending in `.toml`
pub fn is_valid_link_id(id: &str) -> bool {
    match id.strip_suffix(".toml") {
        Some(stem) => {
            !stem.is_empty()
                && !stem.starts_with('.')
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        }
        None => false,
    }
}

/// Turn a user supplied link name into a link id.
///
/// Spaces become `_`, doubled separators collapse, the result is lowercase and
/// carries the `.toml` suffix.
pub fn sanitize_link_name(name: &str) -> Result<String, LinkError> {
    let stem = name.trim().trim_end_matches(".toml");
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ');
    if stem.is_empty() || !stem.chars().all(allowed) {
        return Err(LinkError::ConfigValidation(format!("invalid link name `{}`", name)));
    }

    let mut id = stem.replace(' ', "_");
    while id.contains("__") {
        id = id.replace("__", "_");
    }
    while id.contains("--") {
        id = id.replace("--", "-");
    }
    let id = format!("{}.toml", id.to_lowercase());

    if !is_valid_link_id(&id) {
        return Err(LinkError::ConfigValidation(format!("invalid link name `{}`", name)));
    }
    Ok(id)
}
