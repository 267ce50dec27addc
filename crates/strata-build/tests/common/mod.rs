#![allow(dead_code)]

use std::collections::HashSet;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use strata_build::fsutil::in_root;
use strata_build::steps::BaseImageProvider;
use strata_build::{
    BuildFailure, BuildOptions, BuildPlan, BuildReport, Builder, ImageStore, LayerCache,
    LayerKey, StepKind,
};
use strata_core::StrataConfig;
use strata_exec::{CommandOutput, CommandRunner, ExecError, Invocation};
use tempfile::TempDir;

/// Simulates apt-get and pip by writing marker files into the root
/// filesystem, and records every invocation.
#[derive(Default)]
pub struct FakeRunner {
    pub missing_packages: HashSet<String>,
    pub missing_dependencies: HashSet<String>,
    pub fail_update: bool,
    pub init_exit: i32,
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<Vec<String>>>,
    pub inits: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|argv| argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p))
            .count()
    }

    pub fn inits(&self) -> Vec<Invocation> {
        self.inits.lock().unwrap().clone()
    }

    fn apt(&self, rootfs: &Path, argv: &[String]) -> CommandOutput {
        match argv.get(1).map(String::as_str) {
            Some("update") if self.fail_update => CommandOutput {
                code: 100,
                stdout: String::new(),
                stderr: "E: The repository 'http://deb.debian.org/debian bullseye Release' does not have a Release file.\n".to_owned(),
            },
            Some("update") => {
                let lists = rootfs.join("var/lib/apt/lists");
                std::fs::create_dir_all(lists.join("partial")).unwrap();
                std::fs::write(lists.join("deb.debian.org_debian_dists_bullseye_InRelease"), "index")
                    .unwrap();
                CommandOutput::default()
            }
            Some("install") => {
                let packages: Vec<&String> = argv[2..].iter().filter(|a| !a.starts_with('-')).collect();
                if let Some(missing) = packages.iter().find(|p| self.missing_packages.contains(**p)) {
                    return CommandOutput {
                        code: 100,
                        stdout: "Reading package lists...\n".to_owned(),
                        stderr: format!("E: Unable to locate package {missing}\n"),
                    };
                }
                for package in packages {
                    let doc = rootfs.join("usr/share/doc").join(package);
                    std::fs::create_dir_all(&doc).unwrap();
                    std::fs::write(doc.join("copyright"), format!("{package} license")).unwrap();
                }
                CommandOutput::default()
            }
            _ => CommandOutput {
                code: 100,
                stdout: String::new(),
                stderr: "E: Invalid operation\n".to_owned(),
            },
        }
    }

    fn pip(&self, rootfs: &Path, argv: &[String]) -> CommandOutput {
        let manifest = argv.last().unwrap();
        let content = std::fs::read_to_string(in_root(rootfs, Path::new(manifest))).unwrap();
        let site = rootfs.join("usr/local/lib/python3.8/site-packages");
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let name = line
                .split(|c: char| "=<>!~[; ".contains(c))
                .next()
                .unwrap();
            if self.missing_dependencies.contains(name) {
                return CommandOutput {
                    code: 1,
                    stdout: String::new(),
                    stderr: format!(
                        "ERROR: Could not find a version that satisfies the requirement {line} (from versions: none)\nERROR: No matching distribution found for {line}\n"
                    ),
                };
            }
            let pkg = site.join(name.to_lowercase());
            std::fs::create_dir_all(&pkg).unwrap();
            std::fs::write(pkg.join("__init__.py"), line).unwrap();
        }
        CommandOutput::default()
    }
}

impl CommandRunner for FakeRunner {
    async fn exec(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(invocation.argv.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let output = match invocation.program() {
            Some("apt-get") => self.apt(&invocation.rootfs, &invocation.argv),
            Some("pip") => self.pip(&invocation.rootfs, &invocation.argv),
            Some(other) => CommandOutput {
                code: 127,
                stdout: String::new(),
                stderr: format!("{other}: command not found\n"),
            },
            None => return Err(ExecError::EmptyCommand),
        };
        Ok(output)
    }

    async fn exec_init(&self, invocation: &Invocation) -> Result<i32, ExecError> {
        self.inits.lock().unwrap().push(invocation.clone());
        Ok(self.init_exit)
    }
}

/// A minimal Debian-like base root filesystem.
pub fn seed_base(bases: &BaseImageProvider, reference: &str) {
    let rootfs = bases.image_dir(&reference.parse().unwrap()).join("rootfs");
    for dir in [
        "etc",
        "usr/bin",
        "usr/share/zoneinfo/America",
        "usr/share/zoneinfo/US",
        "var/lib/apt/lists",
    ] {
        std::fs::create_dir_all(rootfs.join(dir)).unwrap();
    }
    std::fs::write(rootfs.join("etc/os-release"), "ID=debian\nVERSION_ID=\"11\"\n").unwrap();
    std::fs::write(rootfs.join("etc/timezone"), "Etc/UTC").unwrap();
    symlink("/usr/share/zoneinfo/UTC", rootfs.join("etc/localtime")).unwrap();
    std::fs::write(rootfs.join("usr/share/zoneinfo/UTC"), b"TZif2 UTC").unwrap();
    std::fs::write(
        rootfs.join("usr/share/zoneinfo/America/Detroit"),
        b"TZif2 America/Detroit",
    )
    .unwrap();
    symlink("../America/Detroit", rootfs.join("usr/share/zoneinfo/US/Michigan")).unwrap();
    std::fs::write(rootfs.join("usr/bin/python3.8"), "#!/bin/false\n").unwrap();
    std::fs::set_permissions(
        rootfs.join("usr/bin/python3.8"),
        std::fs::Permissions::from_mode(0o755),
    )
    .unwrap();
    symlink("python3.8", rootfs.join("usr/bin/python3")).unwrap();
}

/// A small Django-style project with a manifest and a start script.
pub fn seed_project(project: &Path) {
    std::fs::create_dir_all(project.join("pe/views")).unwrap();
    std::fs::write(
        project.join("requirements.txt"),
        "Django==3.2.25\nmysqlclient==2.1.1\n",
    )
    .unwrap();
    std::fs::write(project.join("manage.py"), "import django\n").unwrap();
    std::fs::write(project.join("pe/views/__init__.py"), "").unwrap();
    std::fs::write(project.join("pe/views/exam.py"), "def index(): pass\n").unwrap();
    std::fs::write(
        project.join("start.sh"),
        "#!/bin/bash\npython manage.py migrate\n",
    )
    .unwrap();
    std::fs::set_permissions(
        project.join("start.sh"),
        std::fs::Permissions::from_mode(0o755),
    )
    .unwrap();
    std::fs::create_dir_all(project.join(".git")).unwrap();
    std::fs::write(project.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
}

pub struct Harness {
    pub tmp: TempDir,
    pub project: PathBuf,
    pub store: PathBuf,
    pub cache: LayerCache,
    pub images: ImageStore,
    pub bases: BaseImageProvider,
    pub runner: FakeRunner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_runner(FakeRunner::default())
    }

    pub fn with_runner(runner: FakeRunner) -> Self {
        Self::with_store(runner, ".strata")
    }

    /// Harness whose store lives at `store_dir` inside the project.
    pub fn with_store(runner: FakeRunner, store_dir: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        seed_project(&project);
        let store = project.join(store_dir);
        let cache = LayerCache::open(&store).unwrap();
        let images = ImageStore::open(&store).unwrap();
        let bases = BaseImageProvider::new(&store);
        seed_base(&bases, "python:3.8");
        Self {
            tmp,
            project,
            store,
            cache,
            images,
            bases,
            runner,
        }
    }

    /// Plan from the default descriptor.
    pub fn plan(&self) -> BuildPlan {
        BuildPlan::from_config(&StrataConfig::default(), &self.project).unwrap()
    }

    pub async fn build(&self, plan: &BuildPlan) -> Result<BuildReport, BuildFailure> {
        self.build_with(plan, BuildOptions::default()).await
    }

    pub async fn build_with(
        &self,
        plan: &BuildPlan,
        options: BuildOptions,
    ) -> Result<BuildReport, BuildFailure> {
        Builder::new(&self.cache, &self.images, &self.bases, &self.runner)
            .options(options)
            .build(plan)
            .await
    }

    pub fn write(&self, relative: &str, content: &str) {
        std::fs::write(self.project.join(relative), content).unwrap();
    }
}

/// Layer key produced by `step`, if the build ran it.
pub fn key_of(report: &BuildReport, step: StepKind) -> Option<LayerKey> {
    report
        .steps
        .iter()
        .find(|record| record.step == step)
        .map(|record| record.key.clone())
}
