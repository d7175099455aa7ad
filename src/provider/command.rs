//! External command provider.
//!
//! Runs a provider program once per action: `<program> [args...] apply` or
//! `<program> [args...] delete`, with the request as JSON on stdin. For
//! `apply` the program prints the outputs as a JSON object on stdout. A
//! non-zero exit status is a provider error carrying the program's stderr.

use async_trait::async_trait;
use serde::Serialize;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::ProviderError;
use super::backend::{ApplyRequest, DeleteRequest, Outputs, ProviderBackend, ProviderResult};

/// Provider backend delegating to an external program.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    /// Creates a provider running `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Sets arguments passed before the action name.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Runs the program for one action and returns its stdout.
    async fn invoke<T: Serialize + Sync>(
        &self,
        action: &str,
        kind: &str,
        request: &T,
    ) -> ProviderResult<Vec<u8>> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ProviderError::new(kind, format!("failed to encode request: {e}")))?;

        debug!("Running provider program: {} {:?} {action}", self.program, self.args);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::new(kind, format!("failed to start '{}': {e}", self.program)))?;

        // stdin is fed while stdout and stderr drain, so neither side can
        // fill a pipe and block the other
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, waited) = tokio::join!(feed, child.wait_with_output());
        let output = waited
            .map_err(|e| ProviderError::new(kind, format!("failed to wait for '{}': {e}", self.program)))?;

        if let Err(e) = fed {
            // a program may exit without reading its request
            if e.kind() == ErrorKind::BrokenPipe || !output.status.success() {
                debug!("Request not fully read by '{}': {e}", self.program);
            } else {
                return Err(ProviderError::new(kind, format!("failed to write request: {e}")));
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProviderError::new(
                kind,
                format!("'{}' {action} exited with {}", self.program, output.status),
            )
            .with_diagnostic(stderr));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl ProviderBackend for CommandProvider {
    async fn apply(&self, request: &ApplyRequest) -> ProviderResult<Outputs> {
        let kind = request.kind.as_str();
        let stdout = self.invoke("apply", kind, request).await?;

        serde_json::from_slice(&stdout).map_err(|e| {
            ProviderError::new(kind, format!("invalid outputs for '{}': {e}", request.node_id))
                .with_diagnostic(String::from_utf8_lossy(&stdout).into_owned())
        })
    }

    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
        self.invoke("delete", request.kind.as_str(), request).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
