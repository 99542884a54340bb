//! Docker-backed sandbox
//!
//! One long-lived container per evaluation run. Files move in and out with
//! `docker cp`, commands run with `docker exec`, and every commit snapshots
//! the container into a throwaway image tag so each turn's state can be
//! inspected after the fact.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::sandbox::{Mount, Sandbox, SandboxProvider, SandboxSpec};

/// Image repository used for committed turn states
pub const STATE_REPOSITORY: &str = "krisis-state";

/// Creates [`DockerSandbox`]es with the given engine binary
#[derive(Debug, Clone)]
pub struct DockerProvider {
    docker: PathBuf,
    scratch_root: Option<PathBuf>,
}

impl DockerProvider {
    pub fn new(docker: impl Into<PathBuf>) -> Self {
        Self {
            docker: docker.into(),
            scratch_root: None,
        }
    }

    /// Host directory for copy staging (system temp dir by default)
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

impl Default for DockerProvider {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>> {
        // Nothing may fail between `docker run` and owning the container.
        let mut builder = tempfile::Builder::new();
        builder.prefix("krisis-sandbox-");
        let scratch = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let name = format!("krisis-{}", Uuid::new_v4().simple());
        let args = run_args(spec, &name);
        run(&self.docker, &args).await?;
        info!(container = %name, image = %spec.image, "Sandbox container started");

        let mut sandbox = DockerSandbox {
            docker: self.docker.clone(),
            name,
            workdir: spec.workdir.clone(),
            scratch,
            states: Vec::new(),
            removed: false,
        };

        if !spec.dirs.is_empty() {
            let mut mkdir = vec!["mkdir".to_string(), "-p".to_string()];
            mkdir.extend(spec.dirs.iter().cloned());
            if let Err(e) = sandbox.exec(&mkdir).await {
                let _ = sandbox.teardown().await;
                return Err(e);
            }
        }

        Ok(Box::new(sandbox))
    }
}

/// A running container
pub struct DockerSandbox {
    docker: PathBuf,
    name: String,
    workdir: Option<String>,
    scratch: TempDir,
    states: Vec<String>,
    removed: bool,
}

impl DockerSandbox {
    /// Image tags committed so far, oldest first
    pub fn states(&self) -> &[String] {
        &self.states
    }

    fn scratch_path(&self) -> PathBuf {
        self.scratch.path().join(Uuid::new_v4().simple().to_string())
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.name
    }

    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            let mkdir = vec![
                "mkdir".to_string(),
                "-p".to_string(),
                parent.display().to_string(),
            ];
            self.exec(&mkdir).await?;
        }

        let staged = self.scratch_path();
        tokio::fs::write(&staged, contents).await?;
        let result = run(&self.docker, &copy_in_args(&staged, &self.name, path)).await;
        let _ = tokio::fs::remove_file(&staged).await;
        result?;

        debug!(container = %self.name, path, bytes = contents.len(), "Wrote file");
        Ok(())
    }

    async fn exec(&mut self, argv: &[String]) -> Result<String> {
        let args = exec_args(&self.name, self.workdir.as_deref(), argv);
        let output = run(&self.docker, &args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn commit(&mut self) -> Result<String> {
        let tag = state_tag(&self.name, self.states.len() + 1);
        run(
            &self.docker,
            &["commit".to_string(), self.name.clone(), tag.clone()],
        )
        .await?;
        debug!(container = %self.name, state = %tag, "Committed sandbox state");
        self.states.push(tag.clone());
        Ok(tag)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let dest = self.scratch_path();
        match run(&self.docker, &copy_out_args(&self.name, path, &dest)).await {
            Ok(_) => {}
            Err(SandboxError::CommandFailed { stderr, .. }) if is_container_gone(&stderr) => {
                return Err(SandboxError::ContainerGone(self.name.clone()));
            }
            Err(SandboxError::CommandFailed { stderr, .. }) if is_missing_path(&stderr) => {
                return Err(SandboxError::FileNotFound(path.to_string()));
            }
            Err(e) => return Err(e),
        }

        let contents = tokio::fs::read(&dest).await?;
        let _ = tokio::fs::remove_file(&dest).await;
        Ok(contents)
    }

    async fn teardown(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        run(&self.docker, &["rm".to_string(), "-f".to_string(), self.name.clone()]).await?;
        self.removed = true;

        for tag in self.states.drain(..) {
            if let Err(e) = run(&self.docker, &["rmi".to_string(), tag.clone()]).await {
                warn!(state = %tag, "Failed to remove sandbox state: {}", e);
            }
        }

        info!(container = %self.name, "Sandbox removed");
        Ok(())
    }
}

impl Drop for DockerSandbox {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Best effort; a leftover container only wastes resources.
        let _ = std::process::Command::new(&self.docker)
            .args(["rm", "-f", self.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        for tag in &self.states {
            let _ = std::process::Command::new(&self.docker)
                .args(["rmi", tag.as_str()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
        }
    }
}

async fn run(docker: &Path, args: &[String]) -> Result<Output> {
    let output = Command::new(docker)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SandboxError::EngineNotFound(docker.display().to_string())
            } else {
                SandboxError::Io(e)
            }
        })?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(SandboxError::CommandFailed {
            command: describe(docker, args),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn describe(docker: &Path, args: &[String]) -> String {
    let subcommand = args.first().map(String::as_str).unwrap_or("");
    format!("{} {}", docker.display(), subcommand)
}

// `docker cp` reports a missing path as "No such container:path" on older engines.
fn is_missing_path(stderr: &str) -> bool {
    stderr.contains("Could not find the file")
        || stderr.contains("No such file or directory")
        || stderr.contains("No such container:path")
}

fn is_container_gone(stderr: &str) -> bool {
    stderr.contains("No such container") && !is_missing_path(stderr)
}

fn mount_arg(mount: &Mount) -> String {
    let mut arg = format!("{}:{}", mount.source.display(), mount.target);
    if mount.read_only {
        arg.push_str(":ro");
    }
    arg
}

/// `docker run` arguments for a detached, idle container
pub(crate) fn run_args(spec: &SandboxSpec, name: &str) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--entrypoint".to_string(),
        "sleep".to_string(),
    ];
    for mount in &spec.mounts {
        args.push("-v".to_string());
        args.push(mount_arg(mount));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    // Bare names forward the host value without it appearing in argv.
    for secret in &spec.secrets {
        args.push("-e".to_string());
        args.push(secret.clone());
    }
    if let Some(workdir) = &spec.workdir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }
    args.push(spec.image.clone());
    args.push("infinity".to_string());
    args
}

pub(crate) fn exec_args(name: &str, workdir: Option<&str>, argv: &[String]) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if let Some(workdir) = workdir {
        args.push("-w".to_string());
        args.push(workdir.to_string());
    }
    args.push(name.to_string());
    args.extend(argv.iter().cloned());
    args
}

fn copy_in_args(source: &Path, name: &str, path: &str) -> Vec<String> {
    vec![
        "cp".to_string(),
        source.display().to_string(),
        format!("{}:{}", name, path),
    ]
}

fn copy_out_args(name: &str, path: &str, dest: &Path) -> Vec<String> {
    vec![
        "cp".to_string(),
        format!("{}:{}", name, path),
        dest.display().to_string(),
    ]
}

fn state_tag(name: &str, turn: usize) -> String {
    format!("{}:{}-{}", STATE_REPOSITORY, name, turn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use krisis_core::error::{BackendError, HandoffError};
    use std::collections::BTreeMap;

    fn spec() -> SandboxSpec {
        let mut env = BTreeMap::new();
        env.insert("GOOSE_SYSTEM_PROMPT_FILE_PATH".to_string(), "/system_prompt.md".to_string());
        SandboxSpec {
            image: "ghcr.io/block/goose:latest".to_string(),
            mounts: vec![
                Mount::bind("/home/me/hello-dagger", "/target"),
                Mount::bind("/usr/local/bin/dagger", "/usr/local/bin/engine").read_only(),
            ],
            env,
            secrets: vec!["OPENAI_API_KEY".to_string()],
            workdir: Some("/target".to_string()),
            dirs: vec!["/tmp/env_snapshot".to_string()],
        }
    }

    #[test]
    fn test_run_args() {
        let args = run_args(&spec(), "krisis-abc");
        assert_eq!(
            args,
            vec![
                "run", "-d", "--name", "krisis-abc", "--entrypoint", "sleep",
                "-v", "/home/me/hello-dagger:/target",
                "-v", "/usr/local/bin/dagger:/usr/local/bin/engine:ro",
                "-e", "GOOSE_SYSTEM_PROMPT_FILE_PATH=/system_prompt.md",
                "-e", "OPENAI_API_KEY",
                "-w", "/target",
                "ghcr.io/block/goose:latest", "infinity",
            ]
        );
    }

    #[test]
    fn test_secret_value_never_in_args() {
        let args = run_args(&spec(), "krisis-abc");
        assert!(args.iter().all(|a| !a.starts_with("OPENAI_API_KEY=")));
    }

    #[test]
    fn test_exec_args() {
        let argv = vec!["goose".to_string(), "run".to_string()];
        assert_eq!(
            exec_args("krisis-abc", Some("/target"), &argv),
            vec!["exec", "-w", "/target", "krisis-abc", "goose", "run"]
        );
        assert_eq!(
            exec_args("krisis-abc", None, &argv),
            vec!["exec", "krisis-abc", "goose", "run"]
        );
    }

    #[test]
    fn test_copy_args() {
        assert_eq!(
            copy_in_args(Path::new("/tmp/x"), "krisis-abc", "/tmp/env_snapshot/input.json"),
            vec!["cp", "/tmp/x", "krisis-abc:/tmp/env_snapshot/input.json"]
        );
        assert_eq!(
            copy_out_args("krisis-abc", "/tmp/env_snapshot/output.json", Path::new("/tmp/y")),
            vec!["cp", "krisis-abc:/tmp/env_snapshot/output.json", "/tmp/y"]
        );
    }

    #[test]
    fn test_state_tags_are_per_turn() {
        assert_eq!(state_tag("krisis-abc", 1), "krisis-state:krisis-abc-1");
        assert_eq!(state_tag("krisis-abc", 2), "krisis-state:krisis-abc-2");
    }

    #[test]
    fn test_copy_failure_classification() {
        let missing = "Error response from daemon: Could not find the file \
                       /tmp/env_snapshot/output.json in container krisis-abc";
        assert!(is_missing_path(missing));
        assert!(!is_container_gone(missing));

        let gone = "Error response from daemon: No such container: krisis-abc";
        assert!(is_container_gone(gone));
        assert!(!is_missing_path(gone));

        let old_engine = "Error: No such container:path: krisis-abc:/tmp/env_snapshot/output.json";
        assert!(is_missing_path(old_engine));
        assert!(!is_container_gone(old_engine));

        assert!(!is_missing_path("permission denied"));
        assert!(!is_container_gone("permission denied"));
    }

    /// Shell stand-in for the docker CLI: logs every call, fails `cp` with `cp_stderr`
    #[cfg(unix)]
    fn fake_docker(dir: &Path, cp_stderr: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\n\
             if [ \"$1\" = cp ]; then echo '{}' >&2; exit 1; fi\n\
             exit 0\n",
            log.display(),
            cp_stderr
        );
        let path = dir.join("docker");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn docker_calls(dir: &Path) -> String {
        std::fs::read_to_string(dir.join("calls.log")).unwrap_or_default()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scratch_failure_starts_no_container() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DockerProvider::new(fake_docker(dir.path(), ""))
            .with_scratch_root(dir.path().join("does-not-exist"));

        let result = provider.create(&spec()).await;
        assert!(matches!(result, Err(SandboxError::Io(_))));
        assert!(!docker_calls(dir.path()).contains("run -d"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_from_lost_container() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(
            dir.path(),
            "Error response from daemon: No such container: krisis-gone",
        );
        let provider = DockerProvider::new(docker).with_scratch_root(dir.path());
        let mut sandbox = provider.create(&spec()).await.unwrap();

        let err = sandbox
            .read_file("/tmp/env_snapshot/output.json")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ContainerGone(_)));
        assert!(matches!(BackendError::from(err), BackendError::Transport(_)));

        sandbox.teardown().await.unwrap();
        let calls = docker_calls(dir.path());
        assert!(calls.starts_with("run -d --name krisis-"));
        assert!(calls.contains("\nrm -f krisis-"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(
            dir.path(),
            "Error response from daemon: Could not find the file \
             /tmp/env_snapshot/output.json in container krisis-x",
        );
        let provider = DockerProvider::new(docker).with_scratch_root(dir.path());
        let mut sandbox = provider.create(&spec()).await.unwrap();

        let err = sandbox
            .read_file("/tmp/env_snapshot/output.json")
            .await
            .unwrap_err();
        assert!(matches!(
            BackendError::from(err),
            BackendError::Handoff(HandoffError::Missing { ref path })
                if path.ends_with("output.json")
        ));
        sandbox.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_engine() {
        let err = run(Path::new("/nonexistent/krisis-docker"), &["ps".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::EngineNotFound(_)));
    }
}
