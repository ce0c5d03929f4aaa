//! Archive client backed by the `ia` command-line tool

use super::traits::{ArchiveClient, Metadata, SubmitReceipt};
use crate::error::{Error, RemoteError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;

/// Substring of the remote store's response when it flags an item as spam
const SPAM_MARKER: &str = "appears to be spam";

/// Archive client that shells out to the `ia` binary
///
/// # Examples
///
/// ```no_run
/// use vod_archiver::remote::{ArchiveClient, IaCliClient};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = IaCliClient::from_path().expect("ia not found in PATH");
/// let exists = client.item_exists("BiliBili-BV1HP411D7Rj_p1-1R1D3PH1VB").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct IaCliClient {
    binary_path: PathBuf,
    config_file: Option<PathBuf>,
    retries: u32,
}

impl IaCliClient {
    /// Create a client with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            config_file: None,
            retries: 5,
        }
    }

    /// Attempt to find `ia` in PATH
    pub fn from_path() -> Option<Self> {
        which::which("ia").ok().map(Self::new)
    }

    /// Use a specific credentials file instead of the default one
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Retries `ia upload` performs internally per file
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        if let Some(config) = &self.config_file {
            cmd.arg("--config-file").arg(config);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> crate::Result<String> {
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute ia: {}", e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let stdout = String::from_utf8_lossy(&output.stdout);
        Err(classify_failure(&format!("{stderr}{stdout}")).into())
    }

    async fn item_json(&self, identifier: &str) -> crate::Result<Value> {
        let mut cmd = self.command();
        cmd.arg("metadata").arg(identifier);
        let stdout = self.run(cmd).await?;
        Ok(serde_json::from_str(stdout.trim())?)
    }
}

/// Map `ia` failure output to a remote error class
fn classify_failure(output: &str) -> RemoteError {
    let message = output.trim().to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains(SPAM_MARKER) {
        RemoteError::PolicyRejected(message)
    } else if lower.contains("slowdown")
        || lower.contains("slow down")
        || lower.contains("503")
        || lower.contains("timed out")
        || lower.contains("connection")
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Rejected(message)
    }
}

/// `key:value` arguments for `--metadata`/`--modify`; lists use `key[i]:value`
fn metadata_args(metadata: &Metadata) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in metadata {
        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    args.push(format!("{key}[{i}]:{}", scalar(item)));
                }
            }
            other => args.push(format!("{key}:{}", scalar(other))),
        }
    }
    args
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ArchiveClient for IaCliClient {
    async fn item_exists(&self, identifier: &str) -> crate::Result<bool> {
        let item = self.item_json(identifier).await?;
        Ok(item
            .get("metadata")
            .and_then(Value::as_object)
            .is_some_and(|m| !m.is_empty()))
    }

    async fn list_remote_files(&self, identifier: &str) -> crate::Result<Vec<String>> {
        let item = self.item_json(identifier).await?;
        Ok(item
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn submit(
        &self,
        identifier: &str,
        files: &BTreeMap<String, PathBuf>,
        metadata: &Metadata,
    ) -> crate::Result<SubmitReceipt> {
        let md_args = metadata_args(metadata);
        let mut uploaded = Vec::with_capacity(files.len());

        // --remote-name only applies to a single file, so upload one at a time
        for (remote_name, local) in files {
            let mut cmd = self.command();
            cmd.arg("upload")
                .arg(identifier)
                .arg(local)
                .arg(format!("--remote-name={remote_name}"))
                .arg(format!("--retries={}", self.retries));
            for arg in &md_args {
                cmd.arg(format!("--metadata={arg}"));
            }
            self.run(cmd).await?;
            tracing::info!(identifier, file = %remote_name, "Uploaded file");
            uploaded.push(remote_name.clone());
        }

        Ok(SubmitReceipt {
            identifier: identifier.to_string(),
            uploaded,
        })
    }

    async fn get_metadata(&self, identifier: &str) -> crate::Result<Metadata> {
        let item = self.item_json(identifier).await?;
        Ok(item
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    async fn patch_metadata(&self, identifier: &str, patch: &Metadata) -> crate::Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut cmd = self.command();
        cmd.arg("metadata").arg(identifier);
        for arg in metadata_args(patch) {
            cmd.arg(format!("--modify={arg}"));
        }
        self.run(cmd).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ia-cli"
    }
}
