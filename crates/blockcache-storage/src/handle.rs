//! Open handles and their cursors
//!
//! A handle ties a cursor to an open backing file. Handles come and go
//! independently of the pages cached for their file.

use crate::device::BackingFile;
use blockcache_common::{Error, FileIdentity, HandleId, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// One open session on a backing file
pub struct Handle {
    id: HandleId,
    identity: FileIdentity,
    path: PathBuf,
    cursor: u64,
    file: Box<dyn BackingFile>,
}

impl Handle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current byte position
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: u64) {
        self.cursor = cursor;
    }

    pub fn file(&self) -> &dyn BackingFile {
        self.file.as_ref()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("path", &self.path)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

/// Registry of open handles
#[derive(Debug)]
pub struct HandleRegistry {
    handles: HashMap<HandleId, Handle>,
    next_id: u64,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self {
            handles: HashMap::new(),
            next_id: 1,
        }
    }
}

impl HandleRegistry {
    /// Register an open file with its cursor at zero
    pub fn register(
        &mut self,
        identity: FileIdentity,
        path: impl Into<PathBuf>,
        file: Box<dyn BackingFile>,
    ) -> HandleId {
        let id = HandleId::new(self.next_id);
        self.next_id += 1;
        self.handles.insert(
            id,
            Handle {
                id,
                identity,
                path: path.into(),
                cursor: 0,
                file,
            },
        );
        id
    }

    pub fn get(&self, id: HandleId) -> Result<&Handle> {
        self.handles.get(&id).ok_or(Error::InvalidHandle(id))
    }

    pub fn get_mut(&mut self, id: HandleId) -> Result<&mut Handle> {
        self.handles.get_mut(&id).ok_or(Error::InvalidHandle(id))
    }

    pub fn remove(&mut self, id: HandleId) -> Result<Handle> {
        self.handles.remove(&id).ok_or(Error::InvalidHandle(id))
    }

    /// Pick an open handle to write pages of `identity` through,
    /// preferring `preferred` when it is still open on that file
    pub fn writer_for(&self, identity: FileIdentity, preferred: HandleId) -> Option<&Handle> {
        self.handles
            .get(&preferred)
            .filter(|h| h.identity == identity)
            .or_else(|| {
                self.handles
                    .values()
                    .filter(|h| h.identity == identity)
                    .min_by_key(|h| h.id)
            })
    }

    pub fn ids(&self) -> Vec<HandleId> {
        let mut ids: Vec<_> = self.handles.keys().copied().collect();
        ids.sort();
        ids
    }
}
