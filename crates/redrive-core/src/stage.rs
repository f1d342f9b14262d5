//! Filesystem-backed staging area for one source queue.
//!
//! Every message lives as `<message id>.json` in exactly one stage directory
//! below `<data directory>/<source queue>/`:
//!
//! ```text
//! received/
//! processing-errors/
//! skips/<subcategory...>/
//! updates/{pending,errors,archived}/
//! deletes/{pending,errors,archived}/
//! ```
//!
//! Writes land in a temporary sibling first and are renamed into place, so a
//! file is never observed half-written.

use crate::error::{RedriveError, Result};
use crate::message::{file_name_for, Message};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;

const RECEIVED: &str = "received";
const PROCESSING_ERRORS: &str = "processing-errors";
const SKIPS: &str = "skips";
const UPDATES: &str = "updates";
const DELETES: &str = "deletes";
const PENDING: &str = "pending";
const ERRORS: &str = "errors";
const ARCHIVED: &str = "archived";

const MESSAGE_EXTENSION: &str = "json";
const ERROR_SIDECAR_SUFFIX: &str = ".error.txt";
const TEMP_PREFIX: &str = ".tmp-";

/// One stage of a message's custody lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Received,
    ProcessingErrors,
    /// Skipped messages, by subcategory (may contain `/` for nesting).
    Skips(String),
    UpdatesPending,
    UpdatesErrors,
    UpdatesArchived,
    DeletesPending,
    DeletesErrors,
    DeletesArchived,
}

impl Stage {
    /// Path of this stage relative to the queue's stage root.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            Stage::Received => PathBuf::from(RECEIVED),
            Stage::ProcessingErrors => PathBuf::from(PROCESSING_ERRORS),
            Stage::Skips(subcategory) => {
                subcategory.split('/').fold(PathBuf::from(SKIPS), |p, s| p.join(s))
            }
            Stage::UpdatesPending => [UPDATES, PENDING].iter().collect(),
            Stage::UpdatesErrors => [UPDATES, ERRORS].iter().collect(),
            Stage::UpdatesArchived => [UPDATES, ARCHIVED].iter().collect(),
            Stage::DeletesPending => [DELETES, PENDING].iter().collect(),
            Stage::DeletesErrors => [DELETES, ERRORS].iter().collect(),
            Stage::DeletesArchived => [DELETES, ARCHIVED].iter().collect(),
        }
    }

    /// Stages created up front; skip subcategories are created on demand.
    fn skeleton() -> [Stage; 8] {
        [
            Stage::Received,
            Stage::ProcessingErrors,
            Stage::UpdatesPending,
            Stage::UpdatesErrors,
            Stage::UpdatesArchived,
            Stage::DeletesPending,
            Stage::DeletesErrors,
            Stage::DeletesArchived,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative_path().display())
    }
}

/// Staging area rooted at `<data directory>/<source queue>`.
#[derive(Clone, Debug)]
pub struct StageDirectory {
    root: PathBuf,
}

impl StageDirectory {
    pub fn new(data_directory: impl AsRef<Path>, source_queue: &str) -> Self {
        Self {
            root: data_directory.as_ref().join(source_queue),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, stage: &Stage) -> PathBuf {
        self.root.join(stage.relative_path())
    }

    /// Creates every fixed stage directory that does not exist yet.
    pub async fn ensure_layout(&self) -> Result<()> {
        for stage in Stage::skeleton() {
            self.ensure_stage(&stage).await?;
        }
        fs::create_dir_all(self.root.join(SKIPS))
            .await
            .map_err(|e| RedriveError::io(self.root.join(SKIPS), e))
    }

    async fn ensure_stage(&self, stage: &Stage) -> Result<PathBuf> {
        let dir = self.path(stage);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RedriveError::io(&dir, e))?;
        Ok(dir)
    }

    /// Message file names in `stage`, sorted. A missing directory is empty.
    pub async fn list(&self, stage: &Stage) -> Result<Vec<String>> {
        let dir = self.path(stage);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RedriveError::io(&dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RedriveError::io(&dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| RedriveError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_message_file(name) {
                    files.push(name.to_string());
                }
            }
        }

        files.sort();
        Ok(files)
    }

    pub async fn read_raw(&self, stage: &Stage, file: &str) -> Result<Vec<u8>> {
        let path = self.path(stage).join(file);
        fs::read(&path).await.map_err(|e| RedriveError::io(&path, e))
    }

    /// Reads and deserializes one message file.
    pub async fn read(&self, stage: &Stage, file: &str) -> Result<Message> {
        let bytes = self.read_raw(stage, file).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RedriveError::json(self.path(stage).join(file), e))
    }

    /// Writes `message` into `stage`, replacing any existing file of that id.
    pub async fn write(&self, stage: &Stage, message: &Message) -> Result<()> {
        let file = message.file_name()?;
        let path = self.path(stage).join(&file);
        let contents =
            serde_json::to_vec_pretty(message).map_err(|e| RedriveError::json(&path, e))?;
        self.write_bytes(stage, &file, &contents).await
    }

    /// Writes raw bytes as `file` in `stage`, creating the stage if needed.
    pub async fn write_bytes(&self, stage: &Stage, file: &str, contents: &[u8]) -> Result<()> {
        let dir = self.ensure_stage(stage).await?;
        let target = dir.join(file);
        let temp = dir.join(format!("{TEMP_PREFIX}{file}"));

        fs::write(&temp, contents)
            .await
            .map_err(|e| RedriveError::io(&temp, e))?;
        fs::rename(&temp, &target)
            .await
            .map_err(|e| RedriveError::io(&target, e))
    }

    /// Records why a message failed processing next to its envelope.
    pub async fn write_error_cause(&self, message_id: &str, cause: &str) -> Result<()> {
        file_name_for(message_id)?;
        let file = format!("{message_id}{ERROR_SIDECAR_SUFFIX}");
        self.write_bytes(&Stage::ProcessingErrors, &file, cause.as_bytes())
            .await
    }

    /// Moves `file` from one stage to another.
    pub async fn move_file(&self, file: &str, from: &Stage, to: &Stage) -> Result<()> {
        let source = self.path(from).join(file);
        let target = self.ensure_stage(to).await?.join(file);
        fs::rename(&source, &target)
            .await
            .map_err(|e| RedriveError::io(&source, e))
    }

    /// Copies `file` from one stage to another, leaving the source in place.
    pub async fn copy_file(&self, file: &str, from: &Stage, to: &Stage) -> Result<()> {
        let contents = self.read_raw(from, file).await?;
        self.write_bytes(to, file, &contents).await
    }

    /// Message file names present in any stage other than `received`.
    pub async fn staged_files(&self) -> Result<HashSet<String>> {
        let mut staged = HashSet::new();
        for stage in Stage::skeleton().iter().filter(|s| **s != Stage::Received) {
            staged.extend(self.list(stage).await?);
        }
        for path in walk_files(&self.root.join(SKIPS)).await? {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if is_message_file(name) {
                    staged.insert(name.to_string());
                }
            }
        }
        Ok(staged)
    }

    /// Deletes every file in every stage, keeping `received` unless `all`.
    ///
    /// Directories are left in place. Returns the number of files removed.
    pub async fn clean(&self, all: bool) -> Result<usize> {
        let mut targets = vec![
            self.path(&Stage::ProcessingErrors),
            self.root.join(SKIPS),
            self.root.join(UPDATES),
            self.root.join(DELETES),
        ];
        if all {
            targets.push(self.path(&Stage::Received));
        }

        let mut removed = 0;
        for target in targets {
            for file in walk_files(&target).await? {
                fs::remove_file(&file)
                    .await
                    .map_err(|e| RedriveError::io(&file, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_message_file(name: &str) -> bool {
    !name.starts_with(TEMP_PREFIX)
        && Path::new(name).extension().and_then(|e| e.to_str()) == Some(MESSAGE_EXTENSION)
}

/// Every regular file below `dir`, recursively. A missing directory is empty.
async fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(RedriveError::io(&dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RedriveError::io(&dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| RedriveError::io(entry.path(), e))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
