use std::fmt;
use std::path::Path;

use strata_build::fsutil::resolve_in_root;
use strata_build::{BaseImageProvider, LayerCache};
use strata_core::StrataConfig;
use strata_exec::ChrootRunner;

use super::Project;

#[derive(Debug, Default, Clone)]
struct CheckResult {
    passed: bool,
    detail: String,
}

impl CheckResult {
    fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

#[derive(Debug, Default)]
struct DoctorReport {
    config_file: CheckResult,
    chroot: CheckResult,
    unshare: CheckResult,
    store: CheckResult,
    base_image: CheckResult,
    zoneinfo: CheckResult,
}

impl DoctorReport {
    fn all_passed(&self) -> bool {
        self.checks().iter().all(|(_, check)| check.passed)
    }

    fn checks(&self) -> [(&'static str, &CheckResult); 6] {
        [
            ("Descriptor", &self.config_file),
            ("chroot", &self.chroot),
            ("unshare", &self.unshare),
            ("Store", &self.store),
            ("Base image", &self.base_image),
            ("Zone database", &self.zoneinfo),
        ]
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "strata doctor")?;
        writeln!(f, "-------------")?;
        for (name, check) in self.checks() {
            writeln!(f, "{name:<14} {:<3} {}", check.icon(), check.detail)?;
        }
        Ok(())
    }
}

/// Run every check without stopping at the first failure.
pub async fn doctor(config: Option<&Path>) -> anyhow::Result<()> {
    let mut report = DoctorReport::default();

    let project = match Project::load(config) {
        Ok(project) => {
            report.config_file = match config {
                Some(path) => CheckResult::ok(&path.display().to_string()),
                None if project.dir.join(strata_core::config::CONFIG_FILE).exists() => {
                    CheckResult::ok("strata.toml")
                }
                None => CheckResult::ok("not found; using defaults"),
            };
            Some(project)
        }
        Err(e) => {
            report.config_file = CheckResult::fail(&format!("{e:#}"));
            None
        }
    };

    for (program, slot) in [("chroot", &mut report.chroot), ("unshare", &mut report.unshare)] {
        *slot = match ChrootRunner::tool_version(program).await {
            Ok(version) if !version.is_empty() => CheckResult::ok(&version),
            Ok(_) => CheckResult::ok("found"),
            Err(e) => CheckResult::fail(&e.to_string()),
        };
    }

    match &project {
        Some(project) => check_store(project, &mut report),
        None => {
            let skipped = CheckResult::fail("skipped: descriptor did not load");
            report.store = skipped.clone();
            report.base_image = skipped.clone();
            report.zoneinfo = skipped;
        }
    }

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed; see above for details");
    }
    Ok(())
}

fn check_store(project: &Project, report: &mut DoctorReport) {
    let store_root = &project.store_root;
    report.store = match LayerCache::open(store_root).and_then(|cache| cache.workspace()) {
        Ok(_) => CheckResult::ok(&format!("{} (writable)", store_root.display())),
        Err(e) => CheckResult::fail(&format!("{}: {e}", store_root.display())),
    };

    let bases = BaseImageProvider::new(store_root);
    let (base, zone) = check_base(&project.config, &bases);
    report.base_image = base;
    report.zoneinfo = zone;
}

fn check_base(config: &StrataConfig, bases: &BaseImageProvider) -> (CheckResult, CheckResult) {
    let image = match config.base_image() {
        Ok(image) => image,
        Err(e) => {
            return (
                CheckResult::fail(&e.to_string()),
                CheckResult::fail("skipped: no base image"),
            );
        }
    };
    if !bases.contains(&image) {
        return (
            CheckResult::fail(&format!("{image} not imported; run `strata import {image} <rootfs>`")),
            CheckResult::fail("skipped: no base image"),
        );
    }
    let base = CheckResult::ok(&image.to_string());

    let tz = match config.timezone() {
        Ok(Some(tz)) => tz,
        Ok(None) => return (base, CheckResult::ok("timezone not configured")),
        Err(e) => return (base, CheckResult::fail(&e.to_string())),
    };
    let rootfs = bases.image_dir(&image).join("rootfs");
    let zone = match resolve_in_root(&rootfs, &tz.zoneinfo_path()) {
        Ok(Some(path)) if path.is_file() => CheckResult::ok(&format!("{tz} present")),
        Ok(_) => CheckResult::fail(&format!("{tz} missing from {image}")),
        Err(e) => CheckResult::fail(&format!("{tz}: {e}")),
    };
    (base, zone)
}
