use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{DEFAULT_DESCRIPTOR, DESCRIPTOR_FILE};
use crate::functional::{self, FunctionalConfig};
use crate::layout_template::{build_template, LayoutDocument, TemplateMeta};
use crate::models::ActionDescriptor;
use crate::process::{ensure_tool, SystemRunner};
use crate::program;
use crate::registry::DockerHubClient;
use crate::release::{Publisher, ReleaseConfig};
use crate::smoke::{run_smoke, SmokeConfig};
use crate::validate::{validate, warnings};
use crate::version;

/// Read a descriptor from disk, or the one shipped with the binary.
pub fn load_descriptor(path: Option<&Path>) -> Result<ActionDescriptor> {
    let text = match path {
        Some(p) => fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?,
        None => DEFAULT_DESCRIPTOR.to_string(),
    };
    let shown = path.map(|p| p.display().to_string()).unwrap_or_else(|| DESCRIPTOR_FILE.into());
    serde_json::from_str(&text).with_context(|| format!("parsing {}", shown))
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

pub fn cmd_config(output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            write_output(&path, DEFAULT_DESCRIPTOR)?;
            println!("✓ Wrote {}", path.display());
        }
        None => print!("{}", DEFAULT_DESCRIPTOR),
    }
    Ok(())
}

/// Returns whether the descriptor is valid. With `strict`, warnings count too.
pub fn cmd_validate(path: Option<PathBuf>, strict: bool) -> Result<bool> {
    let descriptor = load_descriptor(path.as_deref())?;
    let violations = validate(&descriptor);
    let advisories = warnings(&descriptor);

    for w in &advisories {
        tracing::warn!("{}", w);
        println!("⚠️  {}", w);
    }
    for v in &violations {
        println!("❌ {}", v);
    }

    let failed = violations.len() + if strict { advisories.len() } else { 0 };
    if failed == 0 {
        println!("✅ {} action(s) valid", descriptor.actions.len());
        return Ok(true);
    }
    println!("{} problem(s) found", failed);
    Ok(false)
}

pub fn cmd_stamp(path: PathBuf, version: String, cascade: bool) -> Result<()> {
    let stamped = version::stamp_file(&path, &version, cascade)?;
    println!("✓ {} version set to {}", path.display(), stamped);
    Ok(())
}

pub fn cmd_render(path: Option<PathBuf>, action: String, assignments: Vec<String>) -> Result<()> {
    let descriptor = load_descriptor(path.as_deref())?;
    let Some(action) = descriptor.actions.iter().find(|a| a.name == action) else {
        let known: Vec<_> = descriptor.actions.iter().map(|a| a.name.as_str()).collect();
        bail!("no action named '{}' (known: {})", action, known.join(", "));
    };
    let values = program::parse_assignments(&assignments)?;
    println!("{}", program::render(action, &values)?);
    Ok(())
}

pub fn cmd_smoke(cfg: SmokeConfig) -> Result<i32> {
    ensure_tool("docker")?;
    let report = run_smoke(&SystemRunner, &cfg)?;
    Ok(report.exit_code())
}

pub fn cmd_functional(root: PathBuf, args: Vec<String>) -> i32 {
    let cfg = FunctionalConfig::for_root(root);
    functional::run_from_args(&SystemRunner, &cfg, &args)
}

pub async fn cmd_release(cfg: ReleaseConfig) -> Result<()> {
    if !cfg.dry_run {
        for tool in ["docker", "git", "curl"] {
            ensure_tool(tool)?;
        }
    }
    let registry = DockerHubClient::new(cfg.registry.username.clone(), cfg.registry.token.clone());
    Publisher::new(&SystemRunner, &registry, &cfg).run().await?;
    Ok(())
}

pub fn cmd_layout_template(
    input: PathBuf,
    output: PathBuf,
    zoom: f64,
    descriptor: Option<PathBuf>,
    sdk_version: Option<String>,
) -> Result<()> {
    let text = fs::read_to_string(&input).with_context(|| format!("reading {}", input.display()))?;
    let doc: LayoutDocument =
        serde_json::from_str(&text).with_context(|| format!("parsing layout detections {}", input.display()))?;

    let meta = TemplateMeta {
        tool_version: load_descriptor(descriptor.as_deref())?.version,
        sdk_version,
        created: chrono::Local::now().date_naive(),
    };
    let template = build_template(&doc, zoom, &meta)?;
    write_output(&output, &version::render_pretty(&template)?)?;
    println!("✓ Layout template for {} page(s) written to {}", doc.pages.len(), output.display());
    Ok(())
}
