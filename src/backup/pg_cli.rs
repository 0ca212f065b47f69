use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

use super::{BackupError, BackupTool};

/// Connection parameters for the PostgreSQL client tools.
#[derive(Clone, PartialEq, Eq)]
pub struct DbParams {
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for DbParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbParams")
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl DbParams {
    pub fn from_url(database_url: &str) -> Result<Self, BackupError> {
        let url = reqwest::Url::parse(database_url)
            .map_err(|e| BackupError::BackupFailed(format!("invalid database URL: {e}")))?;
        let dbname = url.path().trim_start_matches('/').to_string();
        if dbname.is_empty() {
            return Err(BackupError::BackupFailed(
                "database URL has no database name".to_string(),
            ));
        }
        let decode = |raw: &str| {
            urlencoding::decode(raw)
                .map(|s| s.into_owned())
                .map_err(|e| BackupError::BackupFailed(format!("invalid database URL: {e}")))
        };
        let user = decode(url.username())?;
        let password = url.password().map(decode).transpose()?;
        Ok(Self {
            dbname,
            user,
            password,
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
        })
    }

    fn connection_args(&self) -> Vec<String> {
        vec![
            "--dbname".into(),
            self.dbname.clone(),
            "--username".into(),
            self.user.clone(),
            "--host".into(),
            self.host.clone(),
            "--port".into(),
            self.port.to_string(),
        ]
    }
}

/// `pg_dump` / `pg_restore` run as child processes.
pub struct PgCliTool {
    params: DbParams,
    pg_dump: String,
    pg_restore: String,
}

impl PgCliTool {
    pub fn new(params: DbParams) -> Self {
        Self {
            params,
            pg_dump: "pg_dump".to_string(),
            pg_restore: "pg_restore".to_string(),
        }
    }

    /// Override the client binaries, e.g. to pin a server-matched version.
    pub fn with_binaries(mut self, pg_dump: impl Into<String>, pg_restore: impl Into<String>) -> Self {
        self.pg_dump = pg_dump.into();
        self.pg_restore = pg_restore.into();
        self
    }

    fn dump_args(&self, target: &Path) -> Vec<String> {
        let mut args = self.params.connection_args();
        args.extend([
            "--file".to_string(),
            target.to_string_lossy().into_owned(),
            "--format".to_string(),
            "c".to_string(),
            "--no-password".to_string(),
        ]);
        args
    }

    fn restore_args(&self, source: &Path) -> Vec<String> {
        let mut args = self.params.connection_args();
        args.extend([
            "--clean".to_string(),
            "--if-exists".to_string(),
            "--no-password".to_string(),
            source.to_string_lossy().into_owned(),
        ]);
        args
    }

    /// Run `program` to completion. Non-zero exit or non-UTF-8 stderr is an
    /// error, wrapped by `fail`.
    async fn run(
        &self,
        program: &str,
        args: Vec<String>,
        fail: fn(String) -> BackupError,
    ) -> Result<(), BackupError> {
        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &self.params.password {
            command.env("PGPASSWORD", password);
        }

        let output = command
            .output()
            .await
            .map_err(|e| fail(format!("failed to start {program}: {e}")))?;
        let stderr = String::from_utf8(output.stderr)
            .map_err(|_| fail(format!("{program} produced undecodable stderr")))?;

        if !output.status.success() {
            return Err(fail(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if !stderr.trim().is_empty() {
            warn!("{program}: {}", stderr.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl BackupTool for PgCliTool {
    async fn dump(&self, target: &Path) -> Result<(), BackupError> {
        self.run(&self.pg_dump, self.dump_args(target), BackupError::BackupFailed)
            .await
    }

    async fn restore(&self, source: &Path) -> Result<(), BackupError> {
        self.run(&self.pg_restore, self.restore_args(source), BackupError::RestoreFailed)
            .await
    }
}
