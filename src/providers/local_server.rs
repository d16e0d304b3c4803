//! Lifecycle of the local LLM server.
//!
//! The server speaks the chat-completions protocol on `127.0.0.1:<port>`.
//! If one is already answering on the configured port it is reused;
//! otherwise the configured command is started and `GET /health` is polled
//! a fixed number of times before giving up.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::ProviderError;
use crate::core::config::{ConfigurationError, Settings};
use crate::utils::url::local_server_root_url;

pub const READINESS_ATTEMPTS: u32 = 60;
pub const READINESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct LocalServer {
    command: Option<String>,
    model: String,
    port: u16,
    context_size: Option<u32>,
    attempts: u32,
    interval: Duration,
    child: Mutex<Option<Child>>,
}

impl LocalServer {
    /// Reads model, port and server command from `settings.json`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigurationError> {
        let main = &settings.main_settings;
        let model = main
            .local_llm_model
            .clone()
            .filter(|model| !model.trim().is_empty())
            .ok_or_else(|| ConfigurationError::MissingSetting("local_llm_model".to_string()))?;

        Ok(Self {
            command: main
                .local_llm_server_command
                .clone()
                .filter(|command| !command.trim().is_empty()),
            model,
            port: main.local_llm_port,
            context_size: main.local_llm_context_size,
            attempts: READINESS_ATTEMPTS,
            interval: READINESS_INTERVAL,
            child: Mutex::new(None),
        })
    }

    pub fn with_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts;
        self.interval = interval;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn health_url(&self) -> String {
        format!("{}/health", local_server_root_url(self.port))
    }

    fn server_args(&self) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            self.model.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        if let Some(size) = self.context_size {
            args.push("--ctx-size".to_string());
            args.push(size.to_string());
        }
        args
    }

    async fn is_healthy(&self, client: &reqwest::Client) -> bool {
        match client.get(self.health_url()).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn spawn(&self, command: &str) -> Result<(), ProviderError> {
        let args = self.server_args();
        debug!(command, args = ?args, "starting local LLM server");
        let child = Command::new(command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProviderError::Process)?;
        if let Ok(mut slot) = self.child.lock() {
            *slot = Some(child);
        }
        Ok(())
    }

    fn exited(&self) -> Option<std::process::ExitStatus> {
        let mut slot = self.child.lock().ok()?;
        slot.as_mut()?.try_wait().ok().flatten()
    }

    /// Starts the server if needed and waits until it reports healthy.
    ///
    /// Fails with [`ProviderError::Timeout`] when the server is still not
    /// answering after the configured number of polls. A server started
    /// here is killed when the returned handle is dropped.
    pub async fn ensure_ready(
        self,
        client: &reqwest::Client,
    ) -> Result<Arc<LocalServer>, ProviderError> {
        if self.is_healthy(client).await {
            debug!(port = self.port, "reusing running local LLM server");
            return Ok(Arc::new(self));
        }

        if let Some(command) = self.command.clone() {
            self.spawn(&command)?;
        }

        for attempt in 1..=self.attempts {
            tokio::time::sleep(self.interval).await;
            if let Some(status) = self.exited() {
                return Err(ProviderError::Process(std::io::Error::other(format!(
                    "local LLM server exited early ({status})"
                ))));
            }
            if self.is_healthy(client).await {
                info!(port = self.port, attempt, "local LLM server ready");
                return Ok(Arc::new(self));
            }
        }

        Err(ProviderError::Timeout(format!(
            "local LLM server on port {} not ready after {} attempts",
            self.port, self.attempts
        )))
    }
}
