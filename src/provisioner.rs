//! Remote sandbox provisioning and file access.
//!
//! The provider is an external cloud service: every sandbox is an ephemeral
//! compute + filesystem environment created from a template. This module
//! defines the narrow interface the rest of the service consumes and an HTTP
//! implementation of it.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Opaque reference to a live remote sandbox.
///
/// Owned exclusively by the lifecycle manager; at most one live handle exists
/// per process at any time.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    /// Provider-assigned identifier.
    pub id: String,
    /// Template the sandbox was created from.
    pub template_id: String,
    /// Host serving the sandbox's dev-server preview.
    pub host: String,
    /// When this handle was created.
    pub created_at: Instant,
}

impl SandboxHandle {
    /// Public URL of the live preview served by the sandbox.
    pub fn preview_url(&self) -> String {
        format!("https://{}", self.host)
    }
}

/// One entry in a sandbox directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Interface to the sandbox provider.
///
/// Create/destroy calls are not cancelable; once issued they run to
/// completion or error. The remote filesystem serializes its own operations,
/// so no locking is layered on top of individual file calls.
#[async_trait]
pub trait SandboxProvisioner: Send + Sync {
    /// Provision a fresh sandbox from the given template.
    async fn create(&self, template_id: &str) -> Result<SandboxHandle>;

    /// Tear down a sandbox. Destroying an already-dead sandbox is an error
    /// the caller may choose to ignore.
    async fn destroy(&self, handle: &SandboxHandle) -> Result<()>;

    /// Read a file's contents.
    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<String>;

    /// Write a file, creating it if absent.
    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &str) -> Result<()>;

    /// Delete a file.
    async fn delete_file(&self, handle: &SandboxHandle, path: &str) -> Result<()>;

    /// Whether a file or directory exists at `path`.
    async fn exists(&self, handle: &SandboxHandle, path: &str) -> Result<bool>;

    /// List a directory. Fails if `path` is not a directory.
    async fn list_dir(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<FileEntry>>;

    /// Create a directory, including missing parents.
    async fn make_dir(&self, handle: &SandboxHandle, path: &str) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxRequest<'a> {
    template_id: &'a str,
    preview_port: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxResponse {
    sandbox_id: String,
    host: String,
}

#[derive(Serialize)]
struct WriteFileRequest<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct ReadFileResponse {
    content: String,
}

#[derive(Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Deserialize)]
struct ListDirResponse {
    entries: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    error: Option<String>,
}

/// HTTP client for the sandbox provider's REST API.
pub struct HttpProvisioner {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    preview_port: u16,
}

impl HttpProvisioner {
    pub fn new(base_url: &str, api_key: &str, preview_port: u16) -> Result<Self> {
        // A trailing slash keeps Url::join from replacing the last path
        // segment of bases that carry a path prefix.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: Url::parse(&normalized)?,
            api_key: api_key.to_string(),
            preview_port,
        })
    }

    fn sandbox_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn file_url(&self, handle: &SandboxHandle, endpoint: &str, path: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("v1/sandboxes/{}/{}", handle.id, endpoint))?;
        url.query_pairs_mut().append_pair("path", path);
        Ok(url)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let reason = match response.json::<ProviderErrorBody>().await {
            Ok(body) => body.error.unwrap_or_else(|| status.to_string()),
            Err(_) => status.to_string(),
        };
        Err(Error::provider(reason))
    }
}

#[async_trait]
impl SandboxProvisioner for HttpProvisioner {
    async fn create(&self, template_id: &str) -> Result<SandboxHandle> {
        let response = self
            .client
            .post(self.sandbox_url("v1/sandboxes")?)
            .bearer_auth(&self.api_key)
            .json(&CreateSandboxRequest {
                template_id,
                preview_port: self.preview_port,
            })
            .send()
            .await?;
        let body: CreateSandboxResponse = self.check(response).await?.json().await?;
        debug!(sandbox_id = %body.sandbox_id, host = %body.host, "sandbox created");
        Ok(SandboxHandle {
            id: body.sandbox_id,
            template_id: template_id.to_string(),
            host: body.host,
            created_at: Instant::now(),
        })
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        let response = self
            .client
            .delete(self.sandbox_url(&format!("v1/sandboxes/{}", handle.id))?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        self.check(response).await?;
        debug!(sandbox_id = %handle.id, "sandbox destroyed");
        Ok(())
    }

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<String> {
        let response = self
            .client
            .get(self.file_url(handle, "files", path)?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }
        let body: ReadFileResponse = self.check(response).await?.json().await?;
        Ok(body.content)
    }

    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &str) -> Result<()> {
        let response = self
            .client
            .put(self.file_url(handle, "files", path)?)
            .bearer_auth(&self.api_key)
            .json(&WriteFileRequest { content })
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn delete_file(&self, handle: &SandboxHandle, path: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.file_url(handle, "files", path)?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn exists(&self, handle: &SandboxHandle, path: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.file_url(handle, "files/exists", path)?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body: ExistsResponse = self.check(response).await?.json().await?;
        Ok(body.exists)
    }

    async fn list_dir(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<FileEntry>> {
        let response = self
            .client
            .get(self.file_url(handle, "files/list", path)?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body: ListDirResponse = self.check(response).await?.json().await?;
        Ok(body.entries)
    }

    async fn make_dir(&self, handle: &SandboxHandle, path: &str) -> Result<()> {
        let response = self
            .client
            .post(self.file_url(handle, "files/mkdir", path)?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}

/// In-memory provisioner used by tests across the crate.
///
/// Sandbox ids increment so tests can tell a recreated sandbox from the one
/// it replaced. Files are a flat path -> content map shared by every handle,
/// mirroring how a template seeds each new sandbox with the same tree.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
    use std::sync::Mutex;

    use tokio::sync::Notify;

    use super::*;

    #[derive(Default)]
    pub struct MockProvisioner {
        next_id: AtomicU64,
        created: AtomicU64,
        destroyed: AtomicU64,
        /// Number of upcoming create calls that should fail.
        pub fail_creates: AtomicU32,
        /// When set, destroy calls fail.
        pub fail_destroy: AtomicBool,
        /// When set, create parks until `release_create` is called.
        pub gate_create: AtomicBool,
        create_gate: Notify,
        pub files: Mutex<HashMap<String, String>>,
    }

    impl MockProvisioner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_files(entries: &[(&str, &str)]) -> Self {
            let mock = Self::new();
            {
                let mut files = mock.files.lock().unwrap();
                for (path, content) in entries {
                    files.insert((*path).to_string(), (*content).to_string());
                }
            }
            mock
        }

        pub fn created(&self) -> u64 {
            self.created.load(Ordering::SeqCst)
        }

        pub fn destroyed(&self) -> u64 {
            self.destroyed.load(Ordering::SeqCst)
        }

        pub fn release_create(&self) {
            self.gate_create.store(false, Ordering::SeqCst);
            self.create_gate.notify_waiters();
        }

        pub fn file(&self, path: &str) -> Option<String> {
            self.files.lock().unwrap().get(path).cloned()
        }

        fn is_dir(&self, path: &str) -> bool {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            self.files
                .lock()
                .unwrap()
                .keys()
                .any(|k| k.starts_with(&prefix))
        }
    }

    #[async_trait]
    impl SandboxProvisioner for MockProvisioner {
        async fn create(&self, template_id: &str) -> Result<SandboxHandle> {
            if self.gate_create.load(Ordering::SeqCst) {
                self.create_gate.notified().await;
            }
            if self
                .fail_creates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::provider("create failed"));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(SandboxHandle {
                id: format!("sbx-{id}"),
                template_id: template_id.to_string(),
                host: format!("sbx-{id}.mock.dev"),
                created_at: Instant::now(),
            })
        }

        async fn destroy(&self, _handle: &SandboxHandle) -> Result<()> {
            if self.fail_destroy.load(Ordering::SeqCst) {
                return Err(Error::provider("destroy failed"));
            }
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn read_file(&self, _handle: &SandboxHandle, path: &str) -> Result<String> {
            self.file(path).ok_or_else(|| Error::NotFound {
                path: path.to_string(),
            })
        }

        async fn write_file(
            &self,
            _handle: &SandboxHandle,
            path: &str,
            content: &str,
        ) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_string());
            Ok(())
        }

        async fn delete_file(&self, _handle: &SandboxHandle, path: &str) -> Result<()> {
            self.files.lock().unwrap().remove(path);
            Ok(())
        }

        async fn exists(&self, _handle: &SandboxHandle, path: &str) -> Result<bool> {
            Ok(self.file(path).is_some() || self.is_dir(path))
        }

        async fn list_dir(&self, _handle: &SandboxHandle, path: &str) -> Result<Vec<FileEntry>> {
            let prefix = if path.is_empty() || path == "/" {
                String::new()
            } else {
                format!("{}/", path.trim_end_matches('/'))
            };
            let files = self.files.lock().unwrap();
            let mut entries: Vec<FileEntry> = Vec::new();
            for key in files.keys() {
                let Some(rest) = key.strip_prefix(&prefix) else {
                    continue;
                };
                match rest.split_once('/') {
                    Some((dir, _)) => {
                        if !entries.iter().any(|e| e.name == dir && e.is_dir) {
                            entries.push(FileEntry {
                                name: dir.to_string(),
                                is_dir: true,
                            });
                        }
                    }
                    None => entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: false,
                    }),
                }
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        }

        async fn make_dir(&self, _handle: &SandboxHandle, _path: &str) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockProvisioner;
    use super::*;

    #[tokio::test]
    async fn mock_ids_increment_across_recreations() {
        let mock = MockProvisioner::new();
        let first = mock.create("vite-react").await.unwrap();
        mock.destroy(&first).await.unwrap();
        let second = mock.create("vite-react").await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(mock.created(), 2);
        assert_eq!(mock.destroyed(), 1);
    }

    #[tokio::test]
    async fn mock_list_dir_groups_children() {
        let mock = MockProvisioner::with_files(&[
            ("src/App.tsx", "app"),
            ("src/components/Todo.tsx", "todo"),
            ("package.json", "{}"),
        ]);
        let handle = mock.create("vite-react").await.unwrap();

        let root = mock.list_dir(&handle, "").await.unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["package.json", "src"]);

        let src = mock.list_dir(&handle, "src").await.unwrap();
        assert!(src.iter().any(|e| e.name == "components" && e.is_dir));
        assert!(src.iter().any(|e| e.name == "App.tsx" && !e.is_dir));
    }

    #[test]
    fn preview_url_uses_https() {
        let handle = SandboxHandle {
            id: "sbx-1".to_string(),
            template_id: "vite-react".to_string(),
            host: "sbx-1.mock.dev".to_string(),
            created_at: Instant::now(),
        };
        assert_eq!(handle.preview_url(), "https://sbx-1.mock.dev");
    }
}
