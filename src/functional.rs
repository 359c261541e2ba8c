use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{FUNCTIONAL_TESTS_DIR, REQUIREMENTS_FILE, VENV_DIR};
use crate::process::{CommandRunner, CommandSpec};

pub const USAGE: &str = "usage: autotag-ops functional <AWS_ACCESS_KEY_ID> <AWS_SECRET_ACCESS_KEY> <AWS_REGION> <PDFIX_SDK_NAME> <PDFIX_SDK_KEY>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected 5 arguments, got {0}")]
pub struct UsageError(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionalCredentials {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub aws_region: String,
    pub sdk_name: String,
    pub sdk_key: String,
}

impl FunctionalCredentials {
    pub fn from_args(args: &[String]) -> Result<Self, UsageError> {
        match args {
            [id, secret, region, name, key] => Ok(Self {
                aws_access_key_id: id.clone(),
                aws_secret_access_key: secret.clone(),
                aws_region: region.clone(),
                sdk_name: name.clone(),
                sdk_key: key.clone(),
            }),
            _ => Err(UsageError(args.len())),
        }
    }

    fn apply(&self, cmd: CommandSpec) -> CommandSpec {
        let mut cmd = cmd
            .env("AWS_ACCESS_KEY_ID", &self.aws_access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &self.aws_secret_access_key)
            .env("AWS_REGION", &self.aws_region)
            .env("PDFIX_SDK_NAME", &self.sdk_name)
            .env("PDFIX_SDK_KEY", &self.sdk_key);
        cmd.secrets.extend(
            [&self.aws_secret_access_key, &self.sdk_key]
                .into_iter()
                .filter(|s| !s.is_empty())
                .cloned(),
        );
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct FunctionalConfig {
    pub project_root: PathBuf,
    pub python: String,
    pub venv_dir: PathBuf,
    pub requirements: PathBuf,
    pub tests_dir: PathBuf,
}

impl FunctionalConfig {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            python: "python3".to_string(),
            venv_dir: root.join(VENV_DIR),
            requirements: root.join(REQUIREMENTS_FILE),
            tests_dir: root.join(FUNCTIONAL_TESTS_DIR),
            project_root: root,
        }
    }

    fn venv_bin(&self, tool: &str) -> String {
        let dir = if cfg!(windows) { "Scripts" } else { "bin" };
        self.venv_dir.join(dir).join(tool).display().to_string()
    }
}

/// Tears the isolated environment down when dropped.
struct Teardown<'a> {
    cfg: &'a FunctionalConfig,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        println!("🧹 Removing test environment");
        let root = &self.cfg.project_root;
        for dir in [self.cfg.venv_dir.clone(), root.join(".pytest_cache")] {
            if let Err(e) = remove_if_present(&dir) {
                tracing::warn!(path = %dir.display(), "cleanup failed: {e}");
            }
        }
        if let Err(e) = remove_pycache(root) {
            tracing::warn!(root = %root.display(), "__pycache__ cleanup failed: {e}");
        }
    }
}

fn remove_if_present(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Delete every `__pycache__` below `root`. Symlinks are not followed.
pub fn remove_pycache(root: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        if !ty.is_dir() {
            continue;
        }
        let path = entry.path();
        if entry.file_name() == "__pycache__" {
            fs::remove_dir_all(&path)?;
        } else {
            remove_pycache(&path)?;
        }
    }
    Ok(())
}

/// Provision, test, tear down. Returns the pytest exit code.
pub fn run_functional(
    runner: &dyn CommandRunner,
    cfg: &FunctionalConfig,
    creds: &FunctionalCredentials,
) -> Result<i32> {
    let _teardown = Teardown { cfg };

    println!("🔧 Creating virtual environment {}", cfg.venv_dir.display());
    runner
        .run_checked(
            &CommandSpec::new(&cfg.python)
                .args(["-m", "venv"])
                .arg(cfg.venv_dir.display().to_string())
                .current_dir(&cfg.project_root),
        )
        .context("creating virtual environment")?;

    let mut install = CommandSpec::new(cfg.venv_bin("pip"))
        .args(["install", "--quiet", "pytest"])
        .current_dir(&cfg.project_root);
    if cfg.requirements.exists() {
        install = install.arg("-r").arg(cfg.requirements.display().to_string());
    } else {
        tracing::warn!(path = %cfg.requirements.display(), "no requirements file, installing pytest only");
    }
    runner.run_checked(&install).context("installing test dependencies")?;

    println!("🧪 Running functional tests in {}", cfg.tests_dir.display());
    let pytest = creds.apply(
        CommandSpec::new(cfg.venv_bin("pytest"))
            .args(["-v"])
            .arg(cfg.tests_dir.display().to_string())
            .current_dir(&cfg.project_root),
    );
    let out = runner.run(&pytest)?;
    print!("{}", pytest.redact(&out.stdout));
    eprint!("{}", pytest.redact(&out.stderr));

    let code = out.code.unwrap_or(1);
    if code == 0 {
        println!("✅ Functional tests passed");
    } else {
        println!("❌ Functional tests failed with exit code {}", code);
    }
    Ok(code)
}

/// Entry point used by the CLI: argument check first, no side effects on misuse.
pub fn run_from_args(runner: &dyn CommandRunner, cfg: &FunctionalConfig, args: &[String]) -> i32 {
    let creds = match FunctionalCredentials::from_args(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return 1;
        }
    };
    match run_functional(runner, cfg, &creds) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{fail, ok, FakeRunner};
    use crate::process::CommandOutcome;
    use tempfile::TempDir;

    fn args(n: usize) -> Vec<String> {
        ["id", "secret", "us-east-1", "name", "key", "extra"]
            .iter()
            .take(n)
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_wrong_argument_count_does_nothing() {
        let root = TempDir::new().unwrap();
        let cfg = FunctionalConfig::for_root(root.path());
        let runner = FakeRunner::new(|_| ok());

        assert_eq!(run_from_args(&runner, &cfg, &args(4)), 1);
        assert_eq!(run_from_args(&runner, &cfg, &args(6)), 1);
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_credentials_from_args() {
        let creds = FunctionalCredentials::from_args(&args(5)).unwrap();
        assert_eq!(creds.aws_region, "us-east-1");
        assert_eq!(creds.sdk_key, "key");
        assert_eq!(FunctionalCredentials::from_args(&args(0)), Err(UsageError(0)));
    }

    #[test]
    fn test_propagates_pytest_code_and_tears_down() {
        let root = TempDir::new().unwrap();
        let cfg = FunctionalConfig::for_root(root.path());
        fs::create_dir_all(root.path().join("tests/functional/__pycache__")).unwrap();
        fs::create_dir_all(root.path().join(".pytest_cache")).unwrap();
        fs::write(root.path().join(REQUIREMENTS_FILE), "pytest\n").unwrap();

        let venv = cfg.venv_dir.clone();
        let runner = FakeRunner::new(move |cmd: &CommandSpec| -> CommandOutcome {
            if cmd.args.iter().any(|a| a == "venv") {
                fs::create_dir_all(&venv).unwrap();
            }
            if cmd.program.ends_with("pytest") {
                assert_eq!(cmd.env["AWS_REGION"], "us-east-1");
                assert_eq!(cmd.env["PDFIX_SDK_NAME"], "name");
                return fail(3);
            }
            ok()
        });

        assert_eq!(run_from_args(&runner, &cfg, &args(5)), 3);

        let lines = runner.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("-r"));
        assert!(!lines[2].contains("secret"));
        assert!(!cfg.venv_dir.exists());
        assert!(!root.path().join(".pytest_cache").exists());
        assert!(!root.path().join("tests/functional/__pycache__").exists());
        assert!(root.path().join("tests/functional").exists());
    }

    #[test]
    fn test_provisioning_failure_still_tears_down() {
        let root = TempDir::new().unwrap();
        let cfg = FunctionalConfig::for_root(root.path());
        let venv = cfg.venv_dir.clone();
        let runner = FakeRunner::new(move |cmd: &CommandSpec| -> CommandOutcome {
            if cmd.args.iter().any(|a| a == "venv") {
                fs::create_dir_all(&venv).unwrap();
                return ok();
            }
            fail(1)
        });

        assert_eq!(run_from_args(&runner, &cfg, &args(5)), 1);
        assert_eq!(runner.calls.borrow().len(), 2);
        assert!(!cfg.venv_dir.exists());
    }
}
