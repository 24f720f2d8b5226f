// src/workspace.rs
//! Project workspaces. Every project name maps to exactly one directory under
//! the configured workspace root, and every path handed out here has been
//! checked to stay inside that directory.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use crate::errors::{CodeboxError, Result};
use crate::models::{ProjectFile, ProjectInfo, ProjectSummary, UploadFile, UploadedFile};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn project_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-][A-Za-z0-9_.\-]{0,63}$").expect("valid regex"))
}

/// Rejects anything that is not a plain directory name.
pub fn validate_project_name(name: &str) -> Result<()> {
    if project_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(CodeboxError::InvalidProjectName(name.to_string()))
    }
}

/// Path of the project's directory, without touching the filesystem.
pub fn project_path(root: &Path, name: &str) -> Result<PathBuf> {
    validate_project_name(name)?;
    Ok(root.join(name))
}

/// Path of the project's directory, created if it does not exist yet.
pub fn ensure_project(root: &Path, name: &str) -> Result<PathBuf> {
    let path = project_path(root, name)?;
    fs::create_dir_all(&path)?;
    Ok(path)
}

pub fn list_projects(root: &Path) -> Result<Vec<ProjectSummary>> {
    fs::create_dir_all(root)?;

    let mut projects = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        projects.push(ProjectSummary {
            name: entry.file_name().to_string_lossy().to_string(),
            created_at: created_at(&metadata),
            updated_at: updated_at(&metadata),
        });
    }
    projects.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(projects)
}

pub fn project_info(root: &Path, name: &str) -> Result<ProjectInfo> {
    let path = project_path(root, name)?;
    let metadata = match fs::metadata(&path) {
        Ok(m) if m.is_dir() => m,
        _ => return Err(CodeboxError::ProjectNotFound(name.to_string())),
    };

    let mut files = Vec::new();
    collect_files(&path, &path, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let total: u64 = files.iter().map(|f| f.size).sum();

    Ok(ProjectInfo {
        name: name.to_string(),
        created_at: created_at(&metadata),
        updated_at: updated_at(&metadata),
        files,
        size_mb: total as f64 / BYTES_PER_MB,
    })
}

/// Total size in bytes of the regular files below `dir`.
pub fn directory_size(dir: &Path) -> Result<u64> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    Ok(files.iter().map(|f| f.size).sum())
}

/// Writes uploaded files into the project, creating it if needed. The whole
/// upload is rejected up front if it would push the project over `limit_mb`.
pub fn save_files(root: &Path, name: &str, uploads: &[UploadFile], limit_mb: u64) -> Result<Vec<UploadedFile>> {
    let project = ensure_project(root, name)?;

    let mut targets = Vec::with_capacity(uploads.len());
    for upload in uploads {
        targets.push(validate_relative_path(&upload.name)?);
    }

    // Later uploads of the same path win, and a replaced file stops counting.
    let final_sizes: HashMap<&Path, u64> = targets
        .iter()
        .zip(uploads)
        .map(|(relative, upload)| (relative.as_path(), upload.content.len() as u64))
        .collect();
    let mut used = directory_size(&project)?;
    for (relative, size) in &final_sizes {
        if let Ok(existing) = fs::symlink_metadata(project.join(relative)) {
            if existing.is_file() {
                used = used.saturating_sub(existing.len());
            }
        }
        used += size;
    }
    if used as f64 > limit_mb as f64 * BYTES_PER_MB {
        return Err(CodeboxError::QuotaExceeded {
            used_mb: used as f64 / BYTES_PER_MB,
            limit_mb,
        });
    }

    let mut saved = Vec::with_capacity(uploads.len());
    for (upload, relative) in uploads.iter().zip(targets) {
        let target = project.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, upload.content.as_bytes())?;
        saved.push(UploadedFile {
            name: upload.name.clone(),
            size: upload.content.len() as u64,
            path: relative.to_string_lossy().to_string(),
        });
    }
    Ok(saved)
}

/// Only plain relative paths are accepted: no root, no `..`, no empty name.
fn validate_relative_path(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(CodeboxError::InvalidFileName(name.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(CodeboxError::InvalidFileName(name.to_string()));
    }
    Ok(clean)
}

/// Coarse file kind by extension.
pub fn classify(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "rst" | "log" => "text",
        "py" | "js" | "ts" | "java" | "go" | "rs" | "rb" | "php" | "sh" | "cpp" | "c" | "h" => "code",
        "csv" | "json" | "xlsx" | "xls" | "parquet" => "data",
        "yaml" | "yml" | "toml" | "ini" | "conf" => "config",
        "pdf" | "docx" | "doc" => "document",
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tiff" | "webp" | "svg" => "image",
        "mp4" | "avi" | "mov" | "mkv" | "flv" | "wmv" | "webm" => "video",
        _ => "unknown",
    }
}

// Symlinks are listed as nothing; we never follow them out of the project.
fn collect_files(base: &Path, dir: &Path, out: &mut Vec<ProjectFile>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_files(base, &path, out)?;
        } else if file_type.is_file() {
            let relative = path.strip_prefix(base).unwrap_or(&path);
            out.push(ProjectFile {
                path: relative.to_string_lossy().to_string(),
                kind: classify(&path).to_string(),
                size: entry.metadata()?.len(),
            });
        }
    }
    Ok(())
}

fn to_rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

fn created_at(metadata: &fs::Metadata) -> String {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(to_rfc3339)
        .unwrap_or_else(|_| Utc::now().to_rfc3339())
}

fn updated_at(metadata: &fs::Metadata) -> String {
    metadata
        .modified()
        .map(to_rfc3339)
        .unwrap_or_else(|_| Utc::now().to_rfc3339())
}
