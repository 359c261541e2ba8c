use anyhow::{ensure, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{AwsArgs, LicenseArgs};
use crate::process::{exit_label, CommandRunner, CommandSpec};

const EXAMPLES_MOUNT: &str = "/data/examples";
const OUTPUT_MOUNT: &str = "/data/output";

#[derive(Debug, Clone)]
pub struct SmokeConfig {
    /// Full image reference, e.g. `pdfix/autotag-textract:test`.
    pub image: String,
    pub context: PathBuf,
    pub examples_dir: PathBuf,
    pub sample: String,
    pub build: bool,
    pub keep_image: bool,
    pub aws: AwsArgs,
    pub license: LicenseArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmokeCheck {
    pub number: usize,
    pub name: &'static str,
    pub args: Vec<String>,
    /// File expected under the output mount afterwards.
    pub output: Option<String>,
    /// Indices into `args` that must be masked in logs.
    pub secret_args: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub number: usize,
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmokeReport {
    pub results: Vec<CheckResult>,
}

impl SmokeReport {
    pub fn failed(&self) -> Vec<&CheckResult> {
        self.results.iter().filter(|r| !r.passed).collect()
    }

    pub fn passed(&self) -> bool {
        self.failed().is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}

fn sample_stem(sample: &str) -> &str {
    Path::new(sample)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("sample")
}

/// The fixed check list, in execution order.
pub fn checks(cfg: &SmokeConfig) -> Vec<SmokeCheck> {
    let stem = sample_stem(&cfg.sample);
    let input = format!("{}/{}", EXAMPLES_MOUNT, cfg.sample);
    let tagged = format!("{}-tagged.pdf", stem);
    let template = format!("{}-template.json", stem);

    let aws = |args: &mut Vec<String>| {
        args.extend([
            "--aws_id".to_string(),
            cfg.aws.aws_id.clone(),
            "--aws_secret".to_string(),
            cfg.aws.aws_secret.clone(),
            "--aws_region".to_string(),
            cfg.aws.aws_region.clone(),
        ]);
    };

    let mut tag_args = vec![
        "tag".to_string(),
        "--name".to_string(),
        cfg.license.name.clone(),
        "--key".to_string(),
        cfg.license.key.clone(),
    ];
    aws(&mut tag_args);
    tag_args.extend(["-i".to_string(), input.clone(), "-o".to_string(), format!("{}/{}", OUTPUT_MOUNT, tagged)]);

    let mut template_args = vec!["template".to_string()];
    aws(&mut template_args);
    template_args.extend(["-i".to_string(), input, "-o".to_string(), format!("{}/{}", OUTPUT_MOUNT, template)]);

    vec![
        SmokeCheck {
            number: 1,
            name: "--help",
            args: vec!["--help".to_string()],
            output: None,
            secret_args: vec![],
        },
        SmokeCheck {
            number: 2,
            name: "config",
            args: vec!["config".to_string(), "-o".to_string(), format!("{}/config.json", OUTPUT_MOUNT)],
            output: Some("config.json".to_string()),
            secret_args: vec![],
        },
        SmokeCheck {
            number: 3,
            name: "tag",
            args: tag_args,
            output: Some(tagged),
            // --key, --aws_secret values
            secret_args: vec![4, 8],
        },
        SmokeCheck {
            number: 4,
            name: "template",
            args: template_args,
            output: Some(template),
            secret_args: vec![4],
        },
    ]
}

/// Removes the test image when dropped, whatever happened before.
struct ImageGuard<'a> {
    runner: &'a dyn CommandRunner,
    image: String,
    keep: bool,
}

impl Drop for ImageGuard<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        println!("🧹 Removing test image {}", self.image);
        let cmd = CommandSpec::new("docker").args(["rmi", "-f", self.image.as_str()]);
        match self.runner.run(&cmd) {
            Ok(out) if out.success() => {}
            Ok(out) => tracing::warn!(image = %self.image, "image removal failed: {}", exit_label(out.code)),
            Err(e) => tracing::warn!(image = %self.image, "image removal failed: {e:#}"),
        }
    }
}

fn docker_run(cfg: &SmokeConfig, scratch: &Path, check: &SmokeCheck) -> CommandSpec {
    let mut cmd = CommandSpec::new("docker").args([
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:{}", cfg.examples_dir.display(), EXAMPLES_MOUNT),
        "-v".to_string(),
        format!("{}:{}", scratch.display(), OUTPUT_MOUNT),
        "-w".to_string(),
        "/data".to_string(),
        cfg.image.clone(),
    ]);
    for (i, a) in check.args.iter().enumerate() {
        cmd = if check.secret_args.contains(&i) {
            cmd.secret_arg(a.clone())
        } else {
            cmd.arg(a.clone())
        };
    }
    cmd
}

fn run_check(runner: &dyn CommandRunner, cfg: &SmokeConfig, scratch: &Path, check: &SmokeCheck) -> CheckResult {
    let cmd = docker_run(cfg, scratch, check);
    let (passed, detail) = match runner.run(&cmd) {
        Err(e) => (false, format!("could not launch: {e:#}")),
        Ok(out) if !out.success() => (false, exit_label(out.code)),
        Ok(_) => match &check.output {
            Some(file) if !scratch.join(file).exists() => (false, format!("{} was not created", file)),
            _ => (true, "ok".to_string()),
        },
    };

    if passed {
        println!("✅ Test #{:02} passed: {}", check.number, check.name);
    } else {
        println!("❌ Test #{:02} failed: {} ({})", check.number, check.name, detail);
    }
    CheckResult {
        number: check.number,
        name: check.name,
        passed,
        detail,
    }
}

/// Docker treats a relative `-v` source as a named volume, so host folders
/// are always handed over absolute.
fn host_dir(path: &Path, what: &str) -> Result<PathBuf> {
    let abs = fs::canonicalize(path).with_context(|| format!("{} folder {} not found", what, path.display()))?;
    ensure!(abs.is_dir(), "{} {} is not a folder", what, abs.display());
    Ok(abs)
}

/// Build the image, run every check, clean up.
///
/// A failing check does not stop the remaining ones. The scratch directory
/// and the test image are released on every path out of this function.
pub fn run_smoke(runner: &dyn CommandRunner, cfg: &SmokeConfig) -> Result<SmokeReport> {
    let resolved = SmokeConfig {
        examples_dir: host_dir(&cfg.examples_dir, "examples")?,
        context: if cfg.build {
            host_dir(&cfg.context, "build context")?
        } else {
            cfg.context.clone()
        },
        ..cfg.clone()
    };
    let cfg = &resolved;

    if cfg.build {
        println!("🔧 Building image {}", cfg.image);
        let build = CommandSpec::new("docker")
            .args(["build", "-t", cfg.image.as_str()])
            .arg(cfg.context.display().to_string());
        runner.run_checked(&build).context("building test image")?;
    }
    let _image = ImageGuard {
        runner,
        image: cfg.image.clone(),
        keep: cfg.keep_image,
    };

    let scratch = TempDir::new().context("creating scratch directory")?;
    tracing::info!(scratch = %scratch.path().display(), "smoke scratch dir");

    let results = checks(cfg)
        .iter()
        .map(|check| run_check(runner, cfg, scratch.path(), check))
        .collect();
    let report = SmokeReport { results };

    let failed = report.failed().len();
    if failed == 0 {
        println!("✅ All {} smoke tests passed", report.results.len());
    } else {
        println!("❌ {} of {} smoke tests failed", failed, report.results.len());
    }
    Ok(report)
}
