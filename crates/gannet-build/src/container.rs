use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use pep508_rs::MarkerEnvironment;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use gannet_store::Platform;

use crate::BuildError;

const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// The builder spec carried on a `container` platform row.
///
/// `environment` is the marker environment the resolver evaluates
/// requirement markers against; it consumes exactly the PEP 508 keys
/// (`implementation_name`, `implementation_version`, `os_name`,
/// `platform_machine`, `platform_python_implementation`, `platform_release`,
/// `platform_system`, `platform_version`, `python_full_version`,
/// `python_version`, `sys_platform`).
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSpec {
    /// Image reference, e.g. `ghcr.io/example/wheel-builder:py311`.
    pub image: String,
    /// Command template; `{source}` and `{output}` expand to the in-container
    /// source artifact path and output directory.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub environment: MarkerEnvironment,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl ContainerSpec {
    pub fn from_platform(platform: &Platform) -> Result<Self, BuildError> {
        serde_json::from_value(platform.spec.clone()).map_err(BuildError::BadSpec)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

pub(crate) struct ContainerOutcome {
    pub(crate) success: bool,
    pub(crate) log: String,
}

/// Run the configured container with the workspace bind-mounted at
/// `/build`. The source artifact sits in `{workspace}/source/`, and the
/// command is expected to leave exactly one wheel plus a `metadata.json`
/// in `{workspace}/output/`.
pub(crate) async fn invoke(
    spec: &ContainerSpec,
    workspace: &Path,
    source_filename: &str,
) -> Result<ContainerOutcome, BuildError> {
    let mut command = Command::new("docker");
    command
        .arg("run")
        .arg("--rm")
        .arg("--network=none")
        .arg("-v")
        .arg(format!("{}:/build", workspace.display()));
    for (key, value) in &spec.env {
        command.arg("-e").arg(format!("{key}={value}"));
    }
    command.arg(&spec.image);
    for part in &spec.command {
        command.arg(
            part.replace("{source}", &format!("/build/source/{source_filename}"))
                .replace("{output}", "/build/output"),
        );
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(image = %spec.image, "invoking build container");
    let mut child = command.spawn()?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| BuildError::failed("could not capture container stdout", ""))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| BuildError::failed("could not capture container stderr", ""))?;

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let status = {
        let run = async {
            tokio::try_join!(
                stdout.read_to_end(&mut stdout_buf),
                stderr.read_to_end(&mut stderr_buf),
            )?;
            child.wait().await
        };
        tokio::time::timeout(spec.timeout(), run).await
    };

    let mut log = String::new();
    log.push_str(&String::from_utf8_lossy(&stdout_buf));
    log.push_str(&String::from_utf8_lossy(&stderr_buf));

    match status {
        Ok(status) => {
            let status = status?;
            if !status.success() {
                log.push_str(&format!("\ncontainer exited with {status}\n"));
            }
            Ok(ContainerOutcome {
                success: status.success(),
                log,
            })
        }
        Err(_) => {
            child.kill().await.ok();
            log.push_str(&format!(
                "\nbuild timed out after {}s; log truncated\n",
                spec.timeout().as_secs()
            ));
            Ok(ContainerOutcome {
                success: false,
                log,
            })
        }
    }
}
