use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

use crate::config::{TrackingArgs, TRACKING_RECORD_FILE};
use crate::process::{CommandRunner, CommandSpec};

/// Local clone of the version-tracking repository. Deleted on drop.
pub struct TrackingCheckout {
    _work: TempDir,
    pub dir: PathBuf,
    pub branch: String,
}

impl TrackingCheckout {
    pub fn record_path(&self) -> PathBuf {
        self.dir.join(TRACKING_RECORD_FILE)
    }
}

fn remote_url(args: &TrackingArgs) -> String {
    if args.token.is_empty() {
        format!("https://github.com/{}.git", args.repo)
    } else {
        format!("https://x-access-token:{}@github.com/{}.git", args.token, args.repo)
    }
}

fn git(dir: &Path, args: &[&str]) -> CommandSpec {
    CommandSpec::new("git").args(args.iter().copied()).current_dir(dir)
}

pub fn checkout(runner: &dyn CommandRunner, args: &TrackingArgs) -> Result<TrackingCheckout> {
    let work = tempdir()?;
    let dir = work.path().join("repo");

    let mut clone = CommandSpec::new("git")
        .args(["clone", "--depth", "1", "--branch", args.branch.as_str()])
        .secret_arg(remote_url(args))
        .arg(dir.display().to_string());
    if !args.token.is_empty() {
        clone.secrets.push(args.token.clone());
    }
    runner
        .run_checked(&clone)
        .with_context(|| format!("cloning {}", args.repo))?;

    println!("✓ Checked out {} ({})", args.repo, args.branch);
    Ok(TrackingCheckout {
        _work: work,
        dir,
        branch: args.branch.clone(),
    })
}

/// Insert or update `component`'s entry. Returns false when the recorded
/// version already matches, in which case the file is left untouched.
pub fn upsert_record(path: &Path, component: &str, version: &str, now: DateTime<Utc>) -> Result<bool> {
    let mut doc: Map<String, Value> = if path.exists() {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Map::new()
    };

    let current = doc
        .get(component)
        .and_then(|e| e.get("version"))
        .and_then(Value::as_str);
    if current == Some(version) {
        return Ok(false);
    }

    doc.insert(
        component.to_string(),
        json!({ "version": version, "updated": now.to_rfc3339() }),
    );
    let mut out = serde_json::to_string_pretty(&Value::Object(doc))?;
    out.push('\n');
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

/// Record the published version and push it. No commit when nothing changed.
pub fn record_version(
    runner: &dyn CommandRunner,
    checkout: &TrackingCheckout,
    component: &str,
    version: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !upsert_record(&checkout.record_path(), component, version, now)? {
        println!("ℹ️  {} already recorded at {}", component, version);
        return Ok(false);
    }

    let message = format!("Update {} to {}", component, version);
    runner.run_checked(&git(&checkout.dir, &["add", TRACKING_RECORD_FILE]))?;
    runner.run_checked(&git(
        &checkout.dir,
        &[
            "-c",
            "user.name=github-actions[bot]",
            "-c",
            "user.email=github-actions[bot]@users.noreply.github.com",
            "commit",
            "-m",
            &message,
        ],
    ))?;
    runner
        .run_checked(&git(&checkout.dir, &["push", "origin", checkout.branch.as_str()]))
        .context("pushing version record")?;

    println!("✓ Recorded {} {}", component, version);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{ok, FakeRunner};
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, h, 0, 0).unwrap()
    }

    #[test]
    fn test_upsert_creates_and_updates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TRACKING_RECORD_FILE);

        assert!(upsert_record(&path, "pdfix/autotag-textract", "v1.0.0", at(1)).unwrap());
        assert!(upsert_record(&path, "pdfix/other", "v3", at(1)).unwrap());
        assert!(upsert_record(&path, "pdfix/autotag-textract", "v1.1.0", at(2)).unwrap());

        let doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["pdfix/autotag-textract"]["version"], "v1.1.0");
        assert_eq!(doc["pdfix/autotag-textract"]["updated"], "2024-01-02T02:00:00+00:00");
        assert_eq!(doc["pdfix/other"]["version"], "v3");
        let keys: Vec<_> = doc.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["pdfix/autotag-textract", "pdfix/other"]);
    }

    #[test]
    fn test_upsert_same_version_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TRACKING_RECORD_FILE);

        upsert_record(&path, "c", "v1", at(1)).unwrap();
        let before = fs::read_to_string(&path).unwrap();
        assert!(!upsert_record(&path, "c", "v1", at(5)).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_checkout_hides_token() {
        let runner = FakeRunner::new(|_| ok());
        let args = TrackingArgs {
            repo: "org/versions".to_string(),
            token: "ghp_secret".to_string(),
            branch: "main".to_string(),
        };
        let co = checkout(&runner, &args).unwrap();

        let calls = runner.calls.borrow();
        assert!(calls[0].args.iter().any(|a| a.contains("x-access-token:ghp_secret@github.com/org/versions.git")));
        assert!(!runner.lines()[0].contains("ghp_secret"));
        assert!(co.dir.ends_with("repo"));
    }

    #[test]
    fn test_record_version_commits_and_pushes_once() {
        let runner = FakeRunner::new(|_| ok());
        let args = TrackingArgs::default();
        let co = checkout(&runner, &args).unwrap();
        fs::create_dir_all(&co.dir).unwrap();

        assert!(record_version(&runner, &co, "pdfix/autotag-textract", "v2.0.0", at(1)).unwrap());
        assert!(!record_version(&runner, &co, "pdfix/autotag-textract", "v2.0.0", at(2)).unwrap());

        let lines = runner.lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "git add versions.json");
        assert!(lines[2].ends_with("commit -m \"Update pdfix/autotag-textract to v2.0.0\""));
        assert_eq!(lines[3], "git push origin main");
    }
}
