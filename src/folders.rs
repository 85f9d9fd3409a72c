//! Folder coordination.
//!
//! Folders are named aggregates of document identifiers owned by a user;
//! they reference documents but never own file bytes. Updates are full
//! replacements of the member list. Deleting a folder never deletes the
//! referenced documents, and a member whose document has disappeared is
//! tolerated and surfaced as unresolved.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::classify;
use crate::config::UploadConfig;
use crate::models::{FileMetadata, Folder};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::transport::{FilePayload, FolderPayload, Transport};
use crate::upload::{UploadScope, UploadStrategy};

/// Resolution of one folder member id against the metadata index.
#[derive(Debug)]
pub enum MemberResolution {
    Resolved(Box<FileMetadata>),
    Unresolved(String),
}

/// Outcome of a bulk upload into a folder.
#[derive(Debug, Default)]
pub struct FolderUploadSummary {
    pub succeeded: Vec<FileMetadata>,
    pub failed: Vec<(String, String)>,
}

impl FolderUploadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct FolderCoordinator {
    transport: Transport,
    strategy: UploadStrategy,
}

impl FolderCoordinator {
    pub fn new(transport: Transport, uploads: UploadConfig) -> Self {
        let strategy = UploadStrategy::new(transport.clone(), uploads);
        Self {
            transport,
            strategy,
        }
    }

    pub async fn create_folder(
        &self,
        name: &str,
        folder_type: Option<&str>,
        member_ids: Vec<String>,
        token: &str,
    ) -> Result<Folder> {
        if name.trim().is_empty() {
            bail!("folder name must not be empty");
        }
        let payload = FolderPayload {
            name: name.trim().to_string(),
            file_ids: member_ids,
            folder_type: folder_type.unwrap_or("documents").to_string(),
        };
        let folder = self.transport.create_folder(&payload, token).await?;
        Ok(folder)
    }

    /// Full-replacement update: the given member list becomes the folder's
    /// member list. Documents are neither created nor destroyed.
    pub async fn update_folder(
        &self,
        folder_id: &str,
        name: &str,
        folder_type: Option<&str>,
        member_ids: Vec<String>,
        token: &str,
    ) -> Result<Folder> {
        if name.trim().is_empty() {
            bail!("folder name must not be empty");
        }
        let payload = FolderPayload {
            name: name.trim().to_string(),
            file_ids: member_ids,
            folder_type: folder_type.unwrap_or("documents").to_string(),
        };
        let folder = self
            .transport
            .update_folder(folder_id, &payload, token)
            .await?;
        Ok(folder)
    }

    pub async fn get_folders(&self, token: &str) -> Result<Vec<Folder>> {
        let folders = self.transport.get_folders(token).await?;
        Ok(folders)
    }

    /// Remove the aggregate; referenced documents stay.
    pub async fn delete_folder(&self, folder_id: &str, token: &str) -> Result<()> {
        self.transport.delete_folder(folder_id, token).await?;
        Ok(())
    }

    /// Look up each member id in the metadata index. Orphaned ids come
    /// back as [`MemberResolution::Unresolved`] instead of failing the
    /// whole lookup.
    pub async fn resolve_members(
        &self,
        folder: &Folder,
        token: &str,
    ) -> Vec<MemberResolution> {
        let mut resolutions = Vec::with_capacity(folder.file_ids.len());
        for file_id in &folder.file_ids {
            match self.transport.get_metadata(file_id, token).await {
                Ok(metadata) => resolutions.push(MemberResolution::Resolved(Box::new(metadata))),
                Err(_) => resolutions.push(MemberResolution::Unresolved(file_id.clone())),
            }
        }
        resolutions
    }

    /// Upload files into a folder one at a time; bulk uploads stay
    /// sequential to avoid saturating the server. Per-file progress is
    /// reported by filename; a failed file is recorded and the rest
    /// continue.
    pub async fn upload_files(
        &self,
        files: Vec<FilePayload>,
        folder_id: &str,
        token: &str,
        progress: &dyn ProgressReporter,
    ) -> FolderUploadSummary {
        let total = files.len();
        let mut summary = FolderUploadSummary::default();
        let scope = UploadScope::Folder {
            folder_id: folder_id.to_string(),
        };

        for (index, file) in files.into_iter().enumerate() {
            progress.report(ProgressEvent::UploadStarted {
                filename: file.name.clone(),
                index: index + 1,
                total,
            });

            match self.strategy.upload(&file, token, &scope).await {
                Ok(metadata) => {
                    progress.report(ProgressEvent::UploadFinished {
                        filename: file.name.clone(),
                        ok: true,
                    });
                    summary.succeeded.push(metadata);
                }
                Err(e) => {
                    progress.report(ProgressEvent::UploadFinished {
                        filename: file.name.clone(),
                        ok: false,
                    });
                    summary.failed.push((file.name, e.to_string()));
                }
            }
        }

        summary
    }
}

/// Collect files under `root` for a bulk upload, honoring include globs
/// (all files when none are given).
pub fn collect_local_files(root: &Path, include_globs: &[String]) -> Result<Vec<FilePayload>> {
    if !root.exists() {
        bail!("upload root does not exist: {}", root.display());
    }

    let include_set = if include_globs.is_empty() {
        None
    } else {
        Some(build_globset(include_globs)?)
    };

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if let Some(ref set) = include_set {
            if !set.is_match(&rel_str) {
                continue;
            }
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| rel_str.clone());
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        files.push(FilePayload {
            mime: classify::mime_for_name(&name).to_string(),
            name,
            bytes,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
