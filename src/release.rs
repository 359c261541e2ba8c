use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::config::{
    AwsArgs, FtpArgs, ImageArgs, LicenseArgs, RegistryArgs, TrackingArgs, TriggerArgs, DESCRIPTOR_FILE,
    EXAMPLES_DIR, MAIN_BRANCH_REF, PLATFORMS, SAMPLE_PDF, UPDATE_SERVICE_PREFIX,
};
use crate::process::{CommandRunner, CommandSpec};
use crate::registry::{DescriptionUpdate, RegistryClient};
use crate::smoke::{run_smoke, SmokeConfig};
use crate::tracking;
use crate::version::{self, TAG_REF_PREFIX};

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("releases are not triggered by `{0}` events")]
    UnsupportedTrigger(String),

    #[error("cannot derive an image tag from ref `{0}`")]
    UnsupportedRef(String),

    #[error("smoke tests failed: {0}")]
    SmokeFailed(String),

    #[error("missing secret: {0}")]
    MissingSecret(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    WorkflowDispatch,
    Push { git_ref: String },
    Other(String),
}

impl Trigger {
    pub fn from_event(event: &str, git_ref: &str) -> Self {
        match event {
            "workflow_dispatch" => Trigger::WorkflowDispatch,
            "push" => Trigger::Push {
                git_ref: git_ref.to_string(),
            },
            other => Trigger::Other(other.to_string()),
        }
    }
}

/// Manual runs and pushes to main publish `latest`; tag pushes publish the tag.
pub fn compute_tag(trigger: &Trigger) -> Result<String, ReleaseError> {
    match trigger {
        Trigger::WorkflowDispatch => Ok("latest".to_string()),
        Trigger::Push { git_ref } if git_ref == MAIN_BRANCH_REF => Ok("latest".to_string()),
        Trigger::Push { git_ref } => match git_ref.strip_prefix(TAG_REF_PREFIX) {
            Some(tag) if !tag.is_empty() => Ok(tag.to_string()),
            _ => Err(ReleaseError::UnsupportedRef(git_ref.clone())),
        },
        Trigger::Other(event) => Err(ReleaseError::UnsupportedTrigger(event.clone())),
    }
}

/// OCI annotations attached to the pushed image.
pub fn image_labels(image: &ImageArgs, trigger: &TriggerArgs, version: &str, created: DateTime<Utc>) -> Vec<(String, String)> {
    let mut labels = vec![
        ("org.opencontainers.image.title".to_string(), image.repository.clone()),
        ("org.opencontainers.image.version".to_string(), version.to_string()),
        (
            "org.opencontainers.image.created".to_string(),
            created.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ];
    if !trigger.repository.is_empty() {
        labels.push((
            "org.opencontainers.image.source".to_string(),
            format!("https://github.com/{}", trigger.repository),
        ));
    }
    if !trigger.sha.is_empty() {
        labels.push(("org.opencontainers.image.revision".to_string(), trigger.sha.clone()));
    }
    labels
}

/// `update-service/v1/actions/<namespace>/<repository>/config.json`
pub fn ftp_remote_path(image: &ImageArgs) -> String {
    format!(
        "{}/{}/{}/{}",
        UPDATE_SERVICE_PREFIX, image.namespace, image.repository, DESCRIPTOR_FILE
    )
}

pub fn ftp_url(host: &str, remote_path: &str) -> Result<url::Url> {
    let base = if host.contains("://") {
        host.to_string()
    } else {
        format!("ftp://{}", host)
    };
    let base = url::Url::parse(&base).with_context(|| format!("invalid FTP host `{}`", host))?;
    Ok(base.join(&format!("/{}", remote_path))?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Checkout,
    SetupBuilder,
    Login,
    ComputeTag,
    StampVersion,
    Labels,
    Smoke,
    BuildPush,
    Description,
    UploadDescriptor,
    CloneTracking,
    RecordVersion,
}

impl Step {
    pub const ALL: [Step; 12] = [
        Step::Checkout,
        Step::SetupBuilder,
        Step::Login,
        Step::ComputeTag,
        Step::StampVersion,
        Step::Labels,
        Step::Smoke,
        Step::BuildPush,
        Step::Description,
        Step::UploadDescriptor,
        Step::CloneTracking,
        Step::RecordVersion,
    ];
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Checkout => "checkout",
            Step::SetupBuilder => "set up emulation and builder",
            Step::Login => "registry login",
            Step::ComputeTag => "compute tag",
            Step::StampVersion => "stamp descriptor version",
            Step::Labels => "image metadata",
            Step::Smoke => "smoke tests",
            Step::BuildPush => "build and push",
            Step::Description => "update registry description",
            Step::UploadDescriptor => "upload descriptor",
            Step::CloneTracking => "check out version tracking",
            Step::RecordVersion => "record version",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseConfig {
    /// Working tree holding the Dockerfile, descriptor and examples.
    pub root: PathBuf,
    pub image: ImageArgs,
    pub trigger: TriggerArgs,
    pub registry: RegistryArgs,
    pub ftp: FtpArgs,
    pub tracking: TrackingArgs,
    pub aws: AwsArgs,
    pub license: LicenseArgs,
    pub cascade: bool,
    pub dry_run: bool,
}

impl ReleaseConfig {
    fn descriptor(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseSummary {
    pub tag: String,
    pub completed: Vec<Step>,
}

pub struct Publisher<'a> {
    runner: &'a dyn CommandRunner,
    registry: &'a dyn RegistryClient,
    cfg: &'a ReleaseConfig,
    now: DateTime<Utc>,
}

fn require(value: &str, name: &'static str) -> Result<(), ReleaseError> {
    if value.is_empty() {
        Err(ReleaseError::MissingSecret(name))
    } else {
        Ok(())
    }
}

impl<'a> Publisher<'a> {
    pub fn new(runner: &'a dyn CommandRunner, registry: &'a dyn RegistryClient, cfg: &'a ReleaseConfig) -> Self {
        Self {
            runner,
            registry,
            cfg,
            now: Utc::now(),
        }
    }

    #[cfg(test)]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    fn exec(&self, cmd: &CommandSpec) -> Result<()> {
        if self.cfg.dry_run {
            println!("   $ {}", cmd);
        } else {
            self.runner.run_checked(cmd)?;
        }
        Ok(())
    }

    fn smoke_config(&self) -> SmokeConfig {
        SmokeConfig {
            image: self.cfg.image.reference("test"),
            context: self.cfg.root.clone(),
            examples_dir: self.cfg.root.join(EXAMPLES_DIR),
            sample: SAMPLE_PDF.to_string(),
            build: true,
            keep_image: false,
            aws: self.cfg.aws.clone(),
            license: self.cfg.license.clone(),
        }
    }

    /// Run every step in order. The first failing step stops the release.
    pub async fn run(&self) -> Result<ReleaseSummary> {
        let cfg = self.cfg;
        let mut summary = ReleaseSummary::default();
        let mut labels = Vec::new();

        for step in Step::ALL {
            println!("▶ {}", step);
            match step {
                Step::Checkout => {
                    let path = cfg.descriptor();
                    anyhow::ensure!(path.exists(), "{} not found in working tree", path.display());
                }
                Step::SetupBuilder => {
                    self.exec(&CommandSpec::new("docker").args([
                        "run",
                        "--privileged",
                        "--rm",
                        "tonistiigi/binfmt",
                        "--install",
                        "all",
                    ]))?;
                    self.exec(&CommandSpec::new("docker").args(["buildx", "create", "--use"]))?;
                }
                Step::Login => {
                    if !cfg.dry_run {
                        require(&cfg.registry.username, "registry username")?;
                        require(&cfg.registry.token, "registry token")?;
                    }
                    let mut login = CommandSpec::new("docker")
                        .args(["login", "-u", cfg.registry.username.as_str(), "--password-stdin"])
                        .stdin(cfg.registry.token.clone());
                    if !cfg.registry.token.is_empty() {
                        login.secrets.push(cfg.registry.token.clone());
                    }
                    self.exec(&login).context("registry login")?;
                }
                Step::ComputeTag => {
                    let trigger = Trigger::from_event(&cfg.trigger.event, &cfg.trigger.git_ref);
                    summary.tag = compute_tag(&trigger)?;
                    println!("🏷️  Tag: {}", summary.tag);
                }
                Step::StampVersion => {
                    if cfg.dry_run {
                        println!("   would stamp {} into {}", summary.tag, cfg.descriptor().display());
                    } else {
                        version::stamp_file(&cfg.descriptor(), &summary.tag, cfg.cascade)?;
                    }
                }
                Step::Labels => {
                    labels = image_labels(&cfg.image, &cfg.trigger, &summary.tag, self.now);
                    for (k, v) in &labels {
                        tracing::info!(label = %k, value = %v, "image label");
                    }
                }
                Step::Smoke => {
                    if cfg.dry_run {
                        println!("   would run smoke tests against {}", cfg.image.reference("test"));
                    } else {
                        let report = run_smoke(self.runner, &self.smoke_config())?;
                        if !report.passed() {
                            let names: Vec<_> = report
                                .failed()
                                .iter()
                                .map(|r| format!("#{:02} {}", r.number, r.name))
                                .collect();
                            return Err(ReleaseError::SmokeFailed(names.join(", ")).into());
                        }
                    }
                }
                Step::BuildPush => {
                    let mut cmd = CommandSpec::new("docker")
                        .args(["buildx", "build", "--platform"])
                        .arg(PLATFORMS.join(","))
                        .arg("--push")
                        .args(["-t".to_string(), cfg.image.reference(&summary.tag)]);
                    for (k, v) in &labels {
                        cmd = cmd.arg("--label").arg(format!("{}={}", k, v));
                    }
                    self.exec(&cmd.arg(cfg.root.display().to_string()))
                        .context("building and pushing image")?;
                }
                Step::Description => {
                    let readme = cfg.root.join(&cfg.registry.readme);
                    let full_description = if cfg.dry_run {
                        String::new()
                    } else {
                        fs::read_to_string(&readme).with_context(|| format!("reading {}", readme.display()))?
                    };
                    let update = DescriptionUpdate {
                        namespace: cfg.image.namespace.clone(),
                        repository: cfg.image.repository.clone(),
                        description: cfg.registry.short_description.clone(),
                        full_description,
                    };
                    if cfg.dry_run {
                        println!("   would update description of {} from {}", cfg.image.slug(), readme.display());
                    } else {
                        self.registry.update_description(&update).await?;
                    }
                }
                Step::UploadDescriptor => {
                    if !cfg.dry_run {
                        require(&cfg.ftp.host, "FTP host")?;
                    }
                    let remote = ftp_remote_path(&cfg.image);
                    let url = if cfg.ftp.host.is_empty() {
                        format!("ftp://<host>/{}", remote)
                    } else {
                        ftp_url(&cfg.ftp.host, &remote)?.to_string()
                    };
                    let cmd = CommandSpec::new("curl")
                        .args(["--fail", "--ftp-create-dirs", "--user"])
                        .secret_arg(format!("{}:{}", cfg.ftp.username, cfg.ftp.password))
                        .arg("-T")
                        .arg(cfg.descriptor().display().to_string())
                        .arg(url);
                    self.exec(&cmd).context("uploading descriptor")?;
                }
                Step::CloneTracking if cfg.dry_run => {
                    println!("   would record {} {} in {}", cfg.image.slug(), summary.tag, cfg.tracking.repo);
                }
                Step::CloneTracking => {
                    // Cloned and recorded in one go so the checkout lives as long as it is needed.
                    require(&cfg.tracking.token, "tracking repository token")?;
                    let checkout = tracking::checkout(self.runner, &cfg.tracking)?;
                    summary.completed.push(Step::CloneTracking);
                    println!("▶ {}", Step::RecordVersion);
                    tracking::record_version(self.runner, &checkout, &cfg.image.slug(), &summary.tag, self.now)?;
                    summary.completed.push(Step::RecordVersion);
                    break;
                }
                Step::RecordVersion => {}
            }
            summary.completed.push(step);
        }

        if cfg.dry_run {
            println!("✅ Dry run complete, nothing was published");
        } else {
            println!("✅ Released {}", cfg.image.reference(&summary.tag));
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{fail, FakeRunner};
    use crate::process::CommandOutcome;
    use crate::registry::fake::RecordingRegistry;
    use crate::smoke::tests::well_behaved;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const DESCRIPTOR: &str = "{\n  \"name\": \"AutoTag\",\n  \"version\": \"v0.0.0\",\n  \"actions\": []\n}\n";

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DESCRIPTOR_FILE), DESCRIPTOR).unwrap();
        fs::write(dir.path().join("README.md"), "# AutoTag\n").unwrap();
        fs::create_dir_all(dir.path().join(EXAMPLES_DIR)).unwrap();
        dir
    }

    fn release_config(root: &TempDir, event: &str, git_ref: &str) -> ReleaseConfig {
        ReleaseConfig {
            root: root.path().to_path_buf(),
            trigger: TriggerArgs {
                event: event.to_string(),
                git_ref: git_ref.to_string(),
                repository: "pdfix/autotag-textract".to_string(),
                sha: "abc123".to_string(),
            },
            registry: RegistryArgs {
                username: "bot".to_string(),
                token: "dckr_pat_value".to_string(),
                readme: "README.md".to_string(),
                short_description: "short".to_string(),
            },
            ftp: FtpArgs {
                host: "ftp.example.com".to_string(),
                username: "ftpuser".to_string(),
                password: "ftp-password-value".to_string(),
            },
            tracking: TrackingArgs {
                token: "ghp_value".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_compute_tag() {
        let tag = |e: &str, r: &str| compute_tag(&Trigger::from_event(e, r));
        assert_eq!(tag("workflow_dispatch", "").unwrap(), "latest");
        assert_eq!(tag("push", "refs/heads/main").unwrap(), "latest");
        assert_eq!(tag("push", "refs/tags/v1.4.0").unwrap(), "v1.4.0");
        assert!(matches!(tag("push", "refs/heads/feature"), Err(ReleaseError::UnsupportedRef(_))));
        assert!(matches!(tag("push", "refs/tags/"), Err(ReleaseError::UnsupportedRef(_))));
        assert!(matches!(tag("pull_request", ""), Err(ReleaseError::UnsupportedTrigger(_))));
    }

    #[test]
    fn test_labels_and_remote_path() {
        let image = ImageArgs::default();
        let trigger = TriggerArgs {
            repository: "pdfix/autotag-textract".to_string(),
            sha: "abc".to_string(),
            ..Default::default()
        };
        let labels = image_labels(&image, &trigger, "v2.0.0", when());
        assert!(labels.contains(&("org.opencontainers.image.version".to_string(), "v2.0.0".to_string())));
        assert!(labels.contains(&("org.opencontainers.image.created".to_string(), "2024-05-06T07:08:09Z".to_string())));
        assert!(labels.contains(&(
            "org.opencontainers.image.source".to_string(),
            "https://github.com/pdfix/autotag-textract".to_string()
        )));

        assert_eq!(
            ftp_remote_path(&image),
            "update-service/v1/actions/pdfix/autotag-textract/config.json"
        );
        assert_eq!(
            ftp_url("ftp.example.com", &ftp_remote_path(&image)).unwrap().as_str(),
            "ftp://ftp.example.com/update-service/v1/actions/pdfix/autotag-textract/config.json"
        );
    }

    #[tokio::test]
    async fn test_full_release_on_version_tag() {
        let root = workspace();
        let cfg = release_config(&root, "push", "refs/tags/v1.2.0");
        let runner = FakeRunner::new(|cmd: &CommandSpec| -> CommandOutcome {
            if cmd.program == "git" && cmd.args.first().map(String::as_str) == Some("clone") {
                fs::create_dir_all(cmd.args.last().unwrap()).unwrap();
            }
            well_behaved(cmd)
        });
        let registry = RecordingRegistry::default();

        let summary = Publisher::new(&runner, &registry, &cfg).at(when()).run().await.unwrap();

        assert_eq!(summary.tag, "v1.2.0");
        assert_eq!(summary.completed, Step::ALL.to_vec());

        let stamped = fs::read_to_string(root.path().join(DESCRIPTOR_FILE)).unwrap();
        assert!(stamped.contains("\"version\": \"v1.2.0\""));

        let lines = runner.lines();
        let pos = |needle: &str| lines.iter().position(|l| l.contains(needle)).unwrap();
        assert!(pos("docker login") < pos("docker build -t"));
        assert!(pos("docker rmi") < pos("buildx build"));
        assert!(pos("buildx build") < pos("curl"));
        assert!(pos("curl") < pos("git clone"));
        assert!(lines[pos("buildx build")].contains("--platform linux/amd64,linux/arm64 --push -t pdfix/autotag-textract:v1.2.0"));
        assert!(lines.iter().all(|l| !l.contains("ftp-password-value") && !l.contains("ghp_value")));

        let updates = registry.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].full_description, "# AutoTag\n");
    }

    #[tokio::test]
    async fn test_login_failure_halts_release() {
        let root = workspace();
        let cfg = release_config(&root, "workflow_dispatch", "");
        let runner = FakeRunner::new(|cmd: &CommandSpec| -> CommandOutcome {
            if cmd.args.first().map(String::as_str) == Some("login") {
                return fail(1);
            }
            well_behaved(cmd)
        });
        let registry = RecordingRegistry::default();

        let err = Publisher::new(&runner, &registry, &cfg).run().await.unwrap_err();
        assert!(format!("{err:#}").contains("registry login"));
        assert!(runner.lines().iter().all(|l| !l.contains("buildx build")));
        assert!(registry.updates.lock().unwrap().is_empty());
        assert_eq!(fs::read_to_string(root.path().join(DESCRIPTOR_FILE)).unwrap(), DESCRIPTOR);
    }

    #[tokio::test]
    async fn test_smoke_failure_blocks_publish() {
        let root = workspace();
        let cfg = release_config(&root, "push", "refs/heads/main");
        let runner = FakeRunner::new(|cmd: &CommandSpec| -> CommandOutcome {
            if cmd.args.first().map(String::as_str) == Some("run") && cmd.args.iter().any(|a| a == "tag") {
                return fail(2);
            }
            well_behaved(cmd)
        });
        let registry = RecordingRegistry::default();

        let err = Publisher::new(&runner, &registry, &cfg).run().await.unwrap_err();
        assert!(err.to_string().contains("#03 tag"));
        let lines = runner.lines();
        assert!(lines.iter().any(|l| l.contains("docker rmi")));
        assert!(lines.iter().all(|l| !l.contains("buildx build") && !l.contains("curl")));
        assert!(registry.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_ref_stops_before_stamping() {
        let root = workspace();
        let cfg = release_config(&root, "push", "refs/heads/dev");
        let runner = FakeRunner::new(well_behaved);
        let registry = RecordingRegistry::default();

        let err = Publisher::new(&runner, &registry, &cfg).run().await.unwrap_err();
        assert!(err.to_string().contains("refs/heads/dev"));
        assert_eq!(fs::read_to_string(root.path().join(DESCRIPTOR_FILE)).unwrap(), DESCRIPTOR);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let root = workspace();
        let mut cfg = release_config(&root, "push", "refs/tags/v9.9.9");
        cfg.dry_run = true;
        let runner = FakeRunner::new(well_behaved);
        let registry = RecordingRegistry::default();

        let summary = Publisher::new(&runner, &registry, &cfg).run().await.unwrap();
        assert_eq!(summary.tag, "v9.9.9");
        assert!(runner.calls.borrow().is_empty());
        assert!(registry.updates.lock().unwrap().is_empty());
        assert_eq!(fs::read_to_string(root.path().join(DESCRIPTOR_FILE)).unwrap(), DESCRIPTOR);
    }
}
