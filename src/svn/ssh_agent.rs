// src/svn/ssh_agent.rs

//! Loading the operator's key into a running ssh-agent
//!
//! `svn+ssh://` access runs with `BatchMode=yes`, so the key must already be
//! in the agent. Encrypted keys are unlocked through a throwaway
//! `SSH_ASKPASS` script that reads the password from the environment.

use crate::error::{Error, Result};
use crate::svn::shell::run_with_timeout;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

const ASKPASS_ENV: &str = "APEX_ASKPASS_SECRET";

#[derive(Debug, Clone)]
pub struct SshAgent {
    key: PathBuf,
    password: Option<String>,
    timeout: Duration,
}

impl SshAgent {
    pub fn new(key: impl Into<PathBuf>, password: Option<String>, timeout: Duration) -> Self {
        Self {
            key: key.into(),
            password,
            timeout,
        }
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    fn fingerprint(&self) -> Result<String> {
        let mut cmd = Command::new("ssh-keygen");
        cmd.arg("-lf").arg(&self.key);
        let output = run_with_timeout(cmd, self.timeout, None)
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !output.success {
            return Err(Error::Transport(format!(
                "Unable to read SSH key {}: {}",
                self.key.display(),
                output.stderr.trim()
            )));
        }
        fingerprint_of(&output.stdout_text()).ok_or_else(|| {
            Error::Transport(format!("Unable to fingerprint SSH key {}", self.key.display()))
        })
    }

    /// Whether the agent already holds this key
    pub fn is_loaded(&self) -> Result<bool> {
        let fingerprint = self.fingerprint()?;
        let mut cmd = Command::new("ssh-add");
        cmd.arg("-l");
        let output = run_with_timeout(cmd, self.timeout, None)
            .map_err(|e| Error::Transport(e.to_string()))?;

        // exit 1 means the agent is running but empty
        Ok(output.success && listed_fingerprints(&output.stdout_text()).contains(&fingerprint))
    }

    /// Add the key to the agent unless it is already there
    pub fn ensure_loaded(&self) -> Result<()> {
        if !self.key.exists() {
            return Err(Error::NotFound(format!(
                "SSH key {} does not exist",
                self.key.display()
            )));
        }
        if self.is_loaded()? {
            debug!("SSH key {} already in agent", self.key.display());
            return Ok(());
        }

        let mut cmd = Command::new("ssh-add");
        cmd.arg(&self.key);

        // keep the script alive until ssh-add returns
        let _askpass = match &self.password {
            Some(password) => {
                let script = write_askpass_script()?;
                cmd.env("SSH_ASKPASS", &*script)
                    .env("SSH_ASKPASS_REQUIRE", "force")
                    .env("DISPLAY", std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string()))
                    .env(ASKPASS_ENV, password);
                Some(script)
            }
            None => None,
        };

        let output = run_with_timeout(cmd, self.timeout, None)
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !output.success {
            return Err(Error::Transport(format!(
                "Unable to add SSH key {} to the agent: {}",
                self.key.display(),
                output.stderr.trim()
            )));
        }

        info!("Added SSH key {} to the agent", self.key.display());
        Ok(())
    }
}

fn write_askpass_script() -> Result<tempfile::TempPath> {
    let file = tempfile::Builder::new()
        .prefix("apex-askpass-")
        .suffix(".sh")
        .tempfile()?;
    let path = file.into_temp_path();
    fs::write(&path, format!("#!/bin/sh\nprintf '%s\\n' \"${}\"\n", ASKPASS_ENV))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700))?;
    }

    Ok(path)
}

/// Second field of `ssh-keygen -l` output (`2048 SHA256:... comment (RSA)`)
fn fingerprint_of(line: &str) -> Option<String> {
    line.split_whitespace().nth(1).map(|s| s.to_string())
}

fn listed_fingerprints(output: &str) -> Vec<String> {
    output.lines().filter_map(fingerprint_of).collect()
}
