use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod functional;
mod layout_template;
mod models;
mod process;
mod program;
mod registry;
mod release;
mod smoke;
mod tracking;
mod validate;
mod version;

use config::{
    AwsArgs, FtpArgs, ImageArgs, LicenseArgs, RegistryArgs, TrackingArgs, TriggerArgs, DESCRIPTOR_FILE,
    EXAMPLES_DIR, LOG_ENV, SAMPLE_PDF,
};

#[derive(Parser, Debug)]
#[command(name = "autotag-ops", version, about = "Build, test and release tooling for the AutoTag (Textract) action")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose logs
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the shipped action descriptor, or write it with -o
    Config {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check an action descriptor for structural problems
    Validate {
        /// Descriptor to check; the shipped one when omitted
        #[arg(long)]
        descriptor: Option<PathBuf>,
        /// Fail on warnings as well
        #[arg(long)]
        strict: bool,
    },
    /// Write a release version into the descriptor
    Stamp {
        /// Version or tag ref, e.g. v1.2.3 or refs/tags/v1.2.3
        #[arg(value_name = "VERSION")]
        tag: String,
        #[arg(long, default_value = DESCRIPTOR_FILE)]
        descriptor: PathBuf,
        /// Also stamp every action's version
        #[arg(long)]
        cascade: bool,
    },
    /// Expand an action's program with argument values
    Render {
        #[arg(long)]
        action: String,
        /// name=value, repeatable
        #[arg(long = "set")]
        assignments: Vec<String>,
        #[arg(long)]
        descriptor: Option<PathBuf>,
    },
    /// Build the image and run the container smoke checks
    Smoke {
        /// Image reference to build and test
        #[arg(long, default_value = "autotag-textract:test")]
        image: String,
        /// Docker build context
        #[arg(long, default_value = ".")]
        context: PathBuf,
        #[arg(long, default_value = EXAMPLES_DIR)]
        examples: PathBuf,
        #[arg(long, default_value = SAMPLE_PDF)]
        sample: String,
        /// Test an already built image
        #[arg(long)]
        no_build: bool,
        #[arg(long)]
        keep_image: bool,
        #[command(flatten)]
        aws: AwsArgs,
        #[command(flatten)]
        license: LicenseArgs,
    },
    /// Run the functional test suite in a throwaway virtualenv
    Functional {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// AWS_ACCESS_KEY_ID AWS_SECRET_ACCESS_KEY AWS_REGION PDFIX_SDK_NAME PDFIX_SDK_KEY
        #[arg(num_args = 0.., allow_hyphen_values = true)]
        credentials: Vec<String>,
    },
    /// Run the release pipeline
    Release {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Print the plan without running anything
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        cascade: bool,
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        trigger: TriggerArgs,
        #[command(flatten)]
        registry: RegistryArgs,
        #[command(flatten)]
        ftp: FtpArgs,
        #[command(flatten)]
        tracking: TrackingArgs,
        #[command(flatten)]
        aws: AwsArgs,
        #[command(flatten)]
        license: LicenseArgs,
    },
    /// Build a layout template from Textract layout detections
    LayoutTemplate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 2.0)]
        zoom: f64,
        /// Descriptor whose version goes into the template metadata
        #[arg(long)]
        descriptor: Option<PathBuf>,
        #[arg(long)]
        sdk_version: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var(LOG_ENV).unwrap_or_else(|_| filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Config { output } => commands::cmd_config(output)?,
        Commands::Validate { descriptor, strict } => {
            if !commands::cmd_validate(descriptor, strict)? {
                std::process::exit(1);
            }
        }
        Commands::Stamp { tag, descriptor, cascade } => commands::cmd_stamp(descriptor, tag, cascade)?,
        Commands::Render { action, assignments, descriptor } => {
            commands::cmd_render(descriptor, action, assignments)?
        }
        Commands::Smoke { image, context, examples, sample, no_build, keep_image, aws, license } => {
            let code = commands::cmd_smoke(smoke::SmokeConfig {
                image,
                context,
                examples_dir: examples,
                sample,
                build: !no_build,
                keep_image,
                aws,
                license,
            })?;
            std::process::exit(code);
        }
        Commands::Functional { root, credentials } => {
            std::process::exit(commands::cmd_functional(root, credentials));
        }
        Commands::Release { root, dry_run, cascade, image, trigger, registry, ftp, tracking, aws, license } => {
            commands::cmd_release(release::ReleaseConfig {
                root,
                image,
                trigger,
                registry,
                ftp,
                tracking,
                aws,
                license,
                cascade,
                dry_run,
            })
            .await?
        }
        Commands::LayoutTemplate { input, output, zoom, descriptor, sdk_version } => {
            commands::cmd_layout_template(input, output, zoom, descriptor, sdk_version)?
        }
    }
    Ok(())
}
