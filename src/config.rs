use clap::Args;

// Descriptor shipped with the action image; `config` prints it.
pub const DEFAULT_DESCRIPTOR: &str = include_str!("../config.json");
pub const DESCRIPTOR_FILE: &str = "config.json";

// Image coordinates on the registry
pub const DEFAULT_NAMESPACE: &str = "pdfix";
pub const DEFAULT_REPOSITORY: &str = "autotag-textract";
pub const PLATFORMS: [&str; 2] = ["linux/amd64", "linux/arm64"];
pub const MAIN_BRANCH_REF: &str = "refs/heads/main";

// Update service layout, keyed by <namespace>/<repository>
pub const UPDATE_SERVICE_PREFIX: &str = "update-service/v1/actions";

// Docker Hub API
pub const DOCKERHUB_API_BASE: &str = "https://hub.docker.com/v2";

// Version tracking repository
pub const TRACKING_REPO_DEFAULT: &str = "pdfix/pdfix-version-updates";
pub const TRACKING_RECORD_FILE: &str = "versions.json";

// Sample inputs for the smoke checks
pub const EXAMPLES_DIR: &str = "examples";
pub const SAMPLE_PDF: &str = "air_quality.pdf";

// Functional test environment
pub const VENV_DIR: &str = "venv-functional";
pub const REQUIREMENTS_FILE: &str = "requirements-test.txt";
pub const FUNCTIONAL_TESTS_DIR: &str = "tests/functional";

pub const LOG_ENV: &str = "AUTOTAG_LOG";

#[derive(Args, Debug, Clone, Default)]
pub struct AwsArgs {
    #[arg(long = "aws-id", env = "AWS_ACCESS_KEY_ID", default_value = "", hide_env_values = true)]
    pub aws_id: String,
    #[arg(long = "aws-secret", env = "AWS_SECRET_ACCESS_KEY", default_value = "", hide_env_values = true)]
    pub aws_secret: String,
    #[arg(long = "aws-region", env = "AWS_REGION", default_value = "us-east-1")]
    pub aws_region: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LicenseArgs {
    /// PDF SDK license name
    #[arg(long = "license-name", env = "PDFIX_SDK_NAME", default_value = "")]
    pub name: String,
    /// PDF SDK license key
    #[arg(long = "license-key", env = "PDFIX_SDK_KEY", default_value = "", hide_env_values = true)]
    pub key: String,
}

#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    #[arg(long, env = "IMAGE_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
    #[arg(long, env = "IMAGE_REPOSITORY", default_value = DEFAULT_REPOSITORY)]
    pub repository: String,
}

impl Default for ImageArgs {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
        }
    }
}

impl ImageArgs {
    /// `<namespace>/<repository>`
    pub fn slug(&self) -> String {
        format!("{}/{}", self.namespace, self.repository)
    }

    pub fn reference(&self, tag: &str) -> String {
        format!("{}:{}", self.slug(), tag)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RegistryArgs {
    #[arg(id = "docker_username", long = "docker-username", env = "DOCKERHUB_USERNAME", default_value = "")]
    pub username: String,
    #[arg(id = "docker_token", long = "docker-token", env = "DOCKERHUB_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,
    /// File uploaded as the repository's full description
    #[arg(long = "readme", default_value = "README.md")]
    pub readme: String,
    #[arg(long = "short-description", default_value = "Autotag PDF documents with Amazon Textract")]
    pub short_description: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FtpArgs {
    #[arg(long = "ftp-host", env = "FTP_HOST", default_value = "")]
    pub host: String,
    #[arg(long = "ftp-username", env = "FTP_USERNAME", default_value = "")]
    pub username: String,
    #[arg(long = "ftp-password", env = "FTP_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,
}

#[derive(Args, Debug, Clone)]
pub struct TrackingArgs {
    /// `<owner>/<repo>` on GitHub holding published versions
    #[arg(long = "tracking-repo", env = "VERSION_REPO", default_value = TRACKING_REPO_DEFAULT)]
    pub repo: String,
    #[arg(long = "tracking-token", env = "VERSION_REPO_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,
    #[arg(long = "tracking-branch", default_value = "main")]
    pub branch: String,
}

impl Default for TrackingArgs {
    fn default() -> Self {
        Self {
            repo: TRACKING_REPO_DEFAULT.to_string(),
            token: String::new(),
            branch: "main".to_string(),
        }
    }
}

/// What started the pipeline run, as GitHub Actions reports it.
#[derive(Args, Debug, Clone, Default)]
pub struct TriggerArgs {
    #[arg(long = "event", env = "GITHUB_EVENT_NAME", default_value = "workflow_dispatch")]
    pub event: String,
    #[arg(long = "ref", env = "GITHUB_REF", default_value = "")]
    pub git_ref: String,
    /// `<owner>/<repo>` of the source repository, used for image labels
    #[arg(id = "source_repo", long = "source-repo", env = "GITHUB_REPOSITORY", default_value = "")]
    pub repository: String,
    #[arg(long = "revision", env = "GITHUB_SHA", default_value = "")]
    pub sha: String,
}
