//! File tree and content access for the playground's explorer and editor.
//!
//! Everything here goes through the provisioner's remote filesystem; the
//! only local logic is path validation, language tagging, and shaping the
//! listing into the nested tree the explorer renders.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::provisioner::{SandboxHandle, SandboxProvisioner};

/// Directory names never shown in the explorer, at any depth.
const SKIPPED_DIRS: &[&str] = &["node_modules"];

/// Top-level entries hidden from the explorer.
const SKIPPED_TOP_LEVEL: &[&str] = &["package-lock.json"];

/// One node of the explorer tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub title: String,
    pub key: String,
    pub path: String,
    pub is_leaf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

/// File content plus the metadata the editor needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub content: String,
    pub language: &'static str,
    pub path: String,
}

/// Rejects tool paths before any remote call is made.
///
/// A valid path is relative, stays under `root` (the generated project's
/// source directory), and contains no traversal components.
pub fn validate_tool_path(path: &str, root: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::invalid_path(path, "path is empty"));
    }
    if path.starts_with('/') {
        return Err(Error::invalid_path(path, "absolute paths are not allowed"));
    }
    if path.split('/').any(|part| part == "..") {
        return Err(Error::invalid_path(path, "path traversal is not allowed"));
    }
    let prefix = format!("{}/", root.trim_end_matches('/'));
    if !path.starts_with(&prefix) {
        return Err(Error::invalid_path(
            path,
            format!("path must start with '{prefix}'"),
        ));
    }
    Ok(())
}

/// Editor language for a file name, from its extension.
pub fn language_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "java" => "java",
        "c" => "c",
        "cpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "go" => "go",
        "rs" => "rust",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "sass" => "sass",
        "less" => "less",
        "json" => "json",
        "xml" => "xml",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        "sql" => "sql",
        "sh" | "bash" | "zsh" | "fish" => "shell",
        "ps1" => "powershell",
        "dockerfile" => "dockerfile",
        "toml" => "toml",
        "ini" | "cfg" | "conf" => "ini",
        _ => "plaintext",
    }
}

/// Builds the full explorer tree from the sandbox root.
///
/// Skips `node_modules` at every level and hides dotfiles and lockfiles at
/// the top level, matching what the playground shows.
pub async fn build_tree(
    provisioner: &dyn SandboxProvisioner,
    handle: &SandboxHandle,
) -> Result<Vec<FileNode>> {
    let tree = walk(provisioner, handle, String::new()).await?;
    Ok(tree
        .into_iter()
        .filter(|node| !node.title.starts_with('.'))
        .filter(|node| !SKIPPED_TOP_LEVEL.contains(&node.title.as_str()))
        .collect())
}

fn walk<'a>(
    provisioner: &'a dyn SandboxProvisioner,
    handle: &'a SandboxHandle,
    dir: String,
) -> BoxFuture<'a, Result<Vec<FileNode>>> {
    async move {
        let entries = provisioner.list_dir(handle, &dir).await?;
        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.is_dir && SKIPPED_DIRS.contains(&entry.name.as_str()) {
                continue;
            }
            let path = if dir.is_empty() {
                entry.name.clone()
            } else {
                format!("{dir}/{}", entry.name)
            };
            if entry.is_dir {
                let children = walk(provisioner, handle, path.clone()).await?;
                nodes.push(FileNode {
                    title: entry.name,
                    key: path.clone(),
                    path,
                    is_leaf: false,
                    language: None,
                    children: Some(children),
                });
            } else {
                nodes.push(FileNode {
                    title: entry.name.clone(),
                    key: path.clone(),
                    path,
                    is_leaf: true,
                    language: Some(language_for(&entry.name)),
                    children: None,
                });
            }
        }
        Ok(nodes)
    }
    .boxed()
}

/// Reads one file for the editor, distinguishing missing paths from
/// directories.
pub async fn read_file(
    provisioner: &dyn SandboxProvisioner,
    handle: &SandboxHandle,
    path: &str,
) -> Result<FileContent> {
    if !provisioner.exists(handle, path).await? {
        return Err(Error::NotFound {
            path: path.to_string(),
        });
    }
    if provisioner.list_dir(handle, path).await.is_ok_and(|entries| !entries.is_empty()) {
        return Err(Error::IsDirectory {
            path: path.to_string(),
        });
    }
    let content = provisioner.read_file(handle, path).await?;
    Ok(FileContent {
        content,
        language: language_for(path),
        path: path.to_string(),
    })
}
