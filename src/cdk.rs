//! `cdk deploy` / `cdk destroy` through `npx`, run from the directory that
//! holds the CDK app.

use std::path::PathBuf;
use std::process::Command;

use tracing::info;

use crate::error::{AppError, Result};

/// How chatty subprocesses and logs should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

#[derive(Debug, Clone)]
pub struct CdkApp {
    dir: PathBuf,
    region: String,
    aws_profile: Option<String>,
    verbosity: Verbosity,
}

impl CdkApp {
    pub fn new(dir: impl Into<PathBuf>, region: &str, aws_profile: Option<&str>, verbosity: Verbosity) -> Self {
        Self {
            dir: dir.into(),
            region: region.to_string(),
            aws_profile: aws_profile.map(|s| s.to_string()),
            verbosity,
        }
    }

    fn cdk_cmd(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("npx");
        cmd.arg("cdk").args(args).current_dir(&self.dir);
        cmd.env("CDK_DEFAULT_REGION", &self.region);
        cmd.env("AWS_REGION", &self.region);
        if let Some(p) = &self.aws_profile {
            cmd.args(["--profile", p]);
        }
        match self.verbosity {
            Verbosity::Quiet => { cmd.arg("--quiet"); }
            Verbosity::Verbose => { cmd.arg("--verbose"); }
            Verbosity::Normal => {}
        }
        cmd
    }

    /// Arguments for `cdk deploy` with the given `--context` pairs.
    pub fn deploy_args(stack: &str, context: &[(&str, String)]) -> Vec<String> {
        let mut args = vec![
            "deploy".to_string(),
            stack.to_string(),
            "--require-approval".to_string(),
            "never".to_string(),
        ];
        for (k, v) in context.iter().filter(|(_, v)| !v.is_empty()) {
            args.push("--context".to_string());
            args.push(format!("{}={}", k, v));
        }
        args
    }

    pub fn deploy(&self, stack: &str, context: &[(&str, String)]) -> Result<()> {
        let args = Self::deploy_args(stack, context);
        let refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        info!(stack, region = %self.region, "cdk deploy");
        self.run(&refs)
    }

    pub fn destroy(&self, stack: &str) -> Result<()> {
        info!(stack, region = %self.region, "cdk destroy");
        self.run(&["destroy", stack, "--force"])
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let status = self.cdk_cmd(args).status()?;
        if !status.success() {
            return Err(AppError::Cdk(format!(
                "cdk {} exited with {}",
                args.first().copied().unwrap_or(""),
                status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".into())
            )));
        }
        Ok(())
    }
}
