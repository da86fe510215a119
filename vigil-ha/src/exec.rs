//! Command-driven engine adapter.
//!
//! Production deployments manage the database through operator tooling
//! (`pg_ctl promote`, `repmgr standby follow`, and the like). This adapter
//! maps the [`DatabaseEngine`] contract onto configured commands: the status
//! command prints an [`EngineStatus`] as JSON on stdout, promote and demote
//! are fire-and-verify, with verification left to the controller's status
//! polling.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use vigil_core::engine::DatabaseEngine;
use vigil_core::{EngineStatus, Result, VigilError};

/// A program plus its fixed arguments.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse `"prog arg1 arg2"`. Whitespace splitting only; commands that
    /// need quoting should wrap themselves in a script.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| VigilError::config("empty command line"))?;
        Ok(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }

    async fn run(&self, extra_args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(extra_args)
            .output()
            .await
            .map_err(|e| VigilError::engine(format!("spawning {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VigilError::engine(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Health probe that runs an external status command, for deployments
/// where probing and engine control are configured independently.
pub struct CommandProbe {
    status: CommandSpec,
}

impl CommandProbe {
    pub fn new(status: CommandSpec) -> Self {
        Self { status }
    }
}

#[async_trait]
impl vigil_core::engine::HealthCheck for CommandProbe {
    async fn probe(&self) -> Result<EngineStatus> {
        let stdout = self.status.run(&[]).await?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| VigilError::engine(format!("undecodable status output: {e}")))
    }
}

/// Engine controlled through external commands.
pub struct CommandEngine {
    status: CommandSpec,
    promote: CommandSpec,
    demote: CommandSpec,
}

impl CommandEngine {
    pub fn new(status: CommandSpec, promote: CommandSpec, demote: CommandSpec) -> Self {
        Self {
            status,
            promote,
            demote,
        }
    }
}

#[async_trait]
impl DatabaseEngine for CommandEngine {
    async fn status(&self) -> Result<EngineStatus> {
        let stdout = self.status.run(&[]).await?;
        let status: EngineStatus = serde_json::from_str(stdout.trim())
            .map_err(|e| VigilError::engine(format!("undecodable status output: {e}")))?;
        Ok(status)
    }

    async fn promote(&self) -> Result<()> {
        debug!(program = %self.promote.program, "running promote command");
        self.promote.run(&[]).await?;
        Ok(())
    }

    async fn demote(&self, new_primary: Option<&str>) -> Result<()> {
        debug!(program = %self.demote.program, ?new_primary, "running demote command");
        match new_primary {
            Some(primary) => self.demote.run(&[primary]).await?,
            None => self.demote.run(&[]).await?,
        };
        Ok(())
    }
}
