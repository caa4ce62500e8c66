//! Dial face image store

use crate::errors::LinkError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::link::is_plain_file_name;

/// PNG images that links can push to their dial
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: Dir,
}

impl ImageStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    /// The image file for `name`, or `None` when it is not in the store
    pub async fn resolve(&self, name: &str) -> Option<File> {
        if !is_plain_file_name(name) {
            return None;
        }
        let file = self.dir.file(name);
        file.is_file().await.then_some(file)
    }

    /// Names of every stored PNG
    pub async fn list(&self) -> Result<Vec<String>, LinkError> {
        self.dir.file_names_with_extension("png").await
    }
}
