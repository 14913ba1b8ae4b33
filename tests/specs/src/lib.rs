// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `agenthub` binary as a subprocess and exercises it over
//! HTTP and WebSocket, including restarts against the same state directory.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `agenthub` binary.
pub fn hub_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("agenthub")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `agenthub` process that is killed on drop.
pub struct HubProcess {
    child: Child,
    port: u16,
    auth_token: Option<String>,
}

/// Builder for the flags a [`HubProcess`] starts with.
#[derive(Default)]
pub struct HubBuilder {
    state_dir: Option<PathBuf>,
    auth_token: Option<String>,
    service_key: Option<String>,
    extra: Vec<String>,
}

impl HubBuilder {
    /// Persist state under `dir` (`--state-dir`).
    pub fn state_dir(mut self, dir: &Path) -> Self {
        self.state_dir = Some(dir.to_path_buf());
        self
    }

    /// Require a bearer token on control routes (`--auth-token`).
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Accept a shared service credential on `/ws` (`--service-key`).
    pub fn service_key(mut self, key: &str) -> Self {
        self.service_key = Some(key.to_owned());
        self
    }

    /// Pass an arbitrary extra flag and value.
    pub fn arg(mut self, flag: &str, value: &str) -> Self {
        self.extra.extend([flag.to_owned(), value.to_owned()]);
        self
    }

    pub fn spawn(self) -> anyhow::Result<HubProcess> {
        ensure_crypto();
        let binary = hub_binary();
        anyhow::ensure!(binary.exists(), "agenthub binary not found at {}", binary.display());

        let port = free_port()?;
        let mut args: Vec<String> = vec![
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        if let Some(ref dir) = self.state_dir {
            args.extend(["--state-dir".into(), dir.to_string_lossy().into_owned()]);
        }
        if let Some(ref token) = self.auth_token {
            args.extend(["--auth-token".into(), token.clone()]);
        }
        if let Some(ref key) = self.service_key {
            args.extend(["--service-key".into(), key.clone()]);
        }
        args.extend(self.extra);

        let child = Command::new(&binary)
            .args(&args)
            .env_remove("AGENTHUB_AUTH_TOKEN")
            .env_remove("AGENTHUB_STATE_DIR")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(HubProcess { child, port, auth_token: self.auth_token })
    }
}

impl HubProcess {
    /// Create a builder for custom configuration.
    pub fn build() -> HubBuilder {
        HubBuilder::default()
    }

    /// Spawn with an in-memory store and no auth.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Agent channel URL.
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// HTTP client request with the bearer token attached, if one is set.
    pub fn request(
        &self,
        client: &reqwest::Client,
        method: reqwest::Method,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let req = client.request(method, format!("{}{path}", self.base_url()));
        match self.auth_token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Poll `/health` until it answers.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("agenthub did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Kill the process and wait for it to go away.
    pub fn stop(mut self) -> anyhow::Result<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for HubProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
