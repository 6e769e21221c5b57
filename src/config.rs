//! Runtime settings read from the environment (and a `.env` file, if any).
use anyhow::{Context, bail};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::service::DEFAULT_MAX_CODE_ATTEMPTS;
use crate::verification::VerificationCodeGenerator;

static DOTENV_LOADED: LazyLock<()> = LazyLock::new(|| {
    let _ = dotenvy::dotenv();
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub db_path: PathBuf,
    pub code_prefix: String,
    pub max_code_attempts: u32,
    pub stamp_timeout: Duration,
    pub log_filter: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("approval.db"),
            code_prefix: "DOC".into(),
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
            stamp_timeout: Duration::from_secs(30),
            log_filter: "info".into(),
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        LazyLock::force(&DOTENV_LOADED);
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Missing keys fall back to
    /// the defaults; present but malformed values are an error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("APPROVAL_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(prefix) = lookup("APPROVAL_CODE_PREFIX") {
            config.code_prefix = prefix.trim().to_ascii_uppercase();
        }
        if let Some(raw) = lookup("APPROVAL_CODE_MAX_ATTEMPTS") {
            config.max_code_attempts = raw
                .trim()
                .parse()
                .with_context(|| format!("APPROVAL_CODE_MAX_ATTEMPTS is not a number: {raw:?}"))?;
        }
        if let Some(raw) = lookup("APPROVAL_STAMP_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("APPROVAL_STAMP_TIMEOUT_SECS is not a number: {raw:?}"))?;
            config.stamp_timeout = Duration::from_secs(secs);
        }
        if let Some(filter) = lookup("APPROVAL_LOG") {
            config.log_filter = filter;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let prefix_ok = (1..=8).contains(&self.code_prefix.len())
            && self
                .code_prefix
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if !prefix_ok {
            bail!(
                "verification code prefix must be 1 to 8 uppercase letters or digits, got {:?}",
                self.code_prefix
            );
        }
        if self.max_code_attempts == 0 {
            bail!("APPROVAL_CODE_MAX_ATTEMPTS must be at least 1");
        }
        if self.stamp_timeout.is_zero() {
            bail!("APPROVAL_STAMP_TIMEOUT_SECS must be at least 1");
        }
        Ok(())
    }

    pub fn code_generator(&self) -> VerificationCodeGenerator {
        VerificationCodeGenerator::new(self.code_prefix.clone())
    }

    pub fn open_db(&self) -> anyhow::Result<sled::Db> {
        sled::open(&self.db_path)
            .with_context(|| format!("failed to open approval store at {}", self.db_path.display()))
    }
}
