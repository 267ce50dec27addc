mod common;

use std::path::{Path, PathBuf};

use common::{FakeRunner, Harness, key_of};
use mockall::mock;
use strata_build::error::{DependencyInstallError, PackageInstallError};
use strata_build::fsutil::resolve_in_root;
use strata_build::{
    BuildError, BuildOptions, BuildPlan, BuildState, Builder, CacheStatus, ErrorKind, Launcher,
    RunError, StepKind,
};
use strata_core::StrataConfig;
use strata_exec::{CommandOutput, CommandRunner, ExecError, Invocation};

const ALL_STATES: [BuildState; 8] = [
    BuildState::Pending,
    BuildState::BaseResolved,
    BuildState::SystemPackagesInstalled,
    BuildState::DependenciesInstalled,
    BuildState::ContextMaterialized,
    BuildState::RuntimeConfigured,
    BuildState::EntryPointSet,
    BuildState::Sealed,
];

// ── Full build ──

#[tokio::test]
async fn build_passes_every_state_and_seals_image() {
    let h = Harness::new();
    let report = h.build(&h.plan()).await.unwrap();

    assert_eq!(report.states, ALL_STATES.to_vec());
    let steps: Vec<StepKind> = report.steps.iter().map(|r| r.step).collect();
    assert_eq!(
        steps,
        vec![
            StepKind::Base,
            StepKind::SystemPackages,
            StepKind::Dependencies,
            StepKind::Context,
            StepKind::Timezone,
        ]
    );
    assert!(report.steps.iter().all(|r| r.cache == CacheStatus::Miss));

    let image = h.images.resolve(&report.image.id).unwrap();
    assert_eq!(image, report.image);
    assert_eq!(image.base, "python:3.8");
    assert_eq!(image.layers.len(), 5);
    assert_eq!(image.config.entrypoint, Some(vec!["/app/start.sh".to_owned()]));
    assert_eq!(image.config.env.get("TZ"), Some("America/Detroit"));
    assert_eq!(image.config.working_dir.as_deref(), Some("/app"));
}

#[tokio::test]
async fn package_refresh_runs_before_install() {
    let h = Harness::new();
    h.build(&h.plan()).await.unwrap();

    let calls = h.runner.calls();
    let update = calls.iter().position(|a| a[..2] == ["apt-get", "update"]);
    let install = calls.iter().position(|a| a[..2] == ["apt-get", "install"]);
    assert!(update.unwrap() < install.unwrap());
    assert_eq!(
        calls[install.unwrap()],
        vec![
            "apt-get",
            "install",
            "-y",
            "--no-install-recommends",
            "build-essential",
            "default-libmysqlclient-dev",
            "netcat",
        ]
    );
}

#[tokio::test]
async fn package_index_is_cleared_from_image() {
    let h = Harness::new();
    let report = h.build(&h.plan()).await.unwrap();

    let launcher = Launcher::new(&h.cache, &h.runner);
    let workspace = launcher.materialize(&report.image).unwrap();
    let rootfs = workspace.path().join("rootfs");

    assert!(rootfs.join("usr/share/doc/netcat/copyright").is_file());
    assert!(rootfs.join("var/lib/apt/lists").is_dir());
    assert_eq!(
        std::fs::read_dir(rootfs.join("var/lib/apt/lists")).unwrap().count(),
        0
    );
}

#[tokio::test]
async fn image_contains_manifest_dependencies_and_source() {
    let h = Harness::new();
    let report = h.build(&h.plan()).await.unwrap();

    let workspace = Launcher::new(&h.cache, &h.runner)
        .materialize(&report.image)
        .unwrap();
    let rootfs = workspace.path().join("rootfs");

    assert!(rootfs.join("usr/local/lib/python3.8/site-packages/django/__init__.py").is_file());
    assert!(rootfs.join("app/requirements.txt").is_file());
    assert!(rootfs.join("app/pe/views/exam.py").is_file());
    assert!(rootfs.join("app/start.sh").is_file());
    assert!(!rootfs.join("app/.git").exists());
    assert!(!rootfs.join("app/.strata").exists());
}

#[tokio::test]
async fn store_inside_project_is_left_out_of_the_context() {
    let h = Harness::with_store(FakeRunner::default(), "cache");
    let checkout = h.tmp.path().join("checkout");
    std::os::unix::fs::symlink(&h.project, &checkout).unwrap();
    let plan = BuildPlan::from_config(&StrataConfig::default(), &checkout).unwrap();

    let first = h.build(&plan).await.unwrap();
    let second = h.build(&plan).await.unwrap();

    assert!(second.steps.iter().all(|r| r.cache == CacheStatus::Hit));
    assert_eq!(first.image.id, second.image.id);
    let workspace = Launcher::new(&h.cache, &h.runner)
        .materialize(&second.image)
        .unwrap();
    let rootfs = workspace.path().join("rootfs");
    assert!(rootfs.join("app/pe/views/exam.py").is_file());
    assert!(!rootfs.join("app/cache").exists());
}

// ── Caching ──

#[tokio::test]
async fn rebuild_of_unchanged_project_reuses_every_layer() {
    let h = Harness::new();
    let first = h.build(&h.plan()).await.unwrap();
    let calls_after_first = h.runner.calls().len();

    let second = h.build(&h.plan()).await.unwrap();

    let first_keys: Vec<_> = first.steps.iter().map(|r| r.key.clone()).collect();
    let second_keys: Vec<_> = second.steps.iter().map(|r| r.key.clone()).collect();
    assert_eq!(first_keys, second_keys);
    assert!(second.steps.iter().all(|r| r.cache == CacheStatus::Hit));
    assert_eq!(h.runner.calls().len(), calls_after_first);
    assert_eq!(first.image.id, second.image.id);
}

#[tokio::test]
async fn source_edit_invalidates_context_and_later_layers_only() {
    let h = Harness::new();
    let first = h.build(&h.plan()).await.unwrap();

    h.write("pe/views/exam.py", "def index(): return 'edited'\n");
    let second = h.build(&h.plan()).await.unwrap();

    for step in [StepKind::Base, StepKind::SystemPackages, StepKind::Dependencies] {
        assert_eq!(key_of(&first, step), key_of(&second, step), "{step} key changed");
    }
    let cached: Vec<_> = second
        .steps
        .iter()
        .map(|r| (r.step, r.cache))
        .collect();
    assert_eq!(
        cached,
        vec![
            (StepKind::Base, CacheStatus::Hit),
            (StepKind::SystemPackages, CacheStatus::Hit),
            (StepKind::Dependencies, CacheStatus::Hit),
            (StepKind::Context, CacheStatus::Miss),
            (StepKind::Timezone, CacheStatus::Miss),
        ]
    );
    assert_ne!(
        key_of(&first, StepKind::Context),
        key_of(&second, StepKind::Context)
    );
    assert_ne!(
        key_of(&first, StepKind::Timezone),
        key_of(&second, StepKind::Timezone)
    );
    assert_eq!(h.runner.count(&["pip", "install"]), 1);
}

#[tokio::test]
async fn mode_change_invalidates_context_layer() {
    use std::os::unix::fs::PermissionsExt;

    let h = Harness::new();
    let first = h.build(&h.plan()).await.unwrap();
    std::fs::set_permissions(
        h.project.join("start.sh"),
        std::fs::Permissions::from_mode(0o700),
    )
    .unwrap();
    let second = h.build(&h.plan()).await.unwrap();

    assert_ne!(
        key_of(&first, StepKind::Context),
        key_of(&second, StepKind::Context)
    );
}

#[tokio::test]
async fn dependency_key_depends_only_on_manifest() {
    let h = Harness::new();
    let first = h.build(&h.plan()).await.unwrap();

    h.write("manage.py", "import django  # changed\n");
    h.write("new_module.py", "x = 1\n");
    let unrelated = h.build(&h.plan()).await.unwrap();
    assert_eq!(
        key_of(&first, StepKind::Dependencies),
        key_of(&unrelated, StepKind::Dependencies)
    );

    h.write("requirements.txt", "Django==3.2.25\nmysqlclient==2.1.1\npytz\n");
    let manifest_changed = h.build(&h.plan()).await.unwrap();
    assert_eq!(
        key_of(&first, StepKind::SystemPackages),
        key_of(&manifest_changed, StepKind::SystemPackages)
    );
    assert_ne!(
        key_of(&first, StepKind::Dependencies),
        key_of(&manifest_changed, StepKind::Dependencies)
    );
}

#[tokio::test]
async fn package_set_change_invalidates_package_layer() {
    let h = Harness::new();
    let first = h.build(&h.plan()).await.unwrap();

    let mut plan = h.plan();
    plan.add_packages(["curl"]);
    let second = h.build(&plan).await.unwrap();

    assert_eq!(key_of(&first, StepKind::Base), key_of(&second, StepKind::Base));
    assert_ne!(
        key_of(&first, StepKind::SystemPackages),
        key_of(&second, StepKind::SystemPackages)
    );
    assert_ne!(
        key_of(&first, StepKind::Dependencies),
        key_of(&second, StepKind::Dependencies)
    );
}

#[tokio::test]
async fn no_cache_rebuilds_with_identical_keys() {
    let h = Harness::new();
    let first = h.build(&h.plan()).await.unwrap();

    let options = BuildOptions {
        no_cache: true,
        ..Default::default()
    };
    let second = h.build_with(&h.plan(), options).await.unwrap();

    assert!(second.steps.iter().all(|r| r.cache == CacheStatus::Miss));
    assert_eq!(first.image.id, second.image.id);
    assert_eq!(h.runner.count(&["apt-get", "install"]), 2);
}

#[tokio::test]
async fn tampered_layer_is_evicted_and_rebuilt() {
    let h = Harness::new();
    let first = h.build(&h.plan()).await.unwrap();
    let context_key = key_of(&first, StepKind::Context).unwrap();

    let planted = h.cache.diff_dir(&context_key).join("app/manage.py");
    std::fs::write(&planted, "import os; os.system('evil')\n").unwrap();

    let second = h.build(&h.plan()).await.unwrap();
    let record = second
        .steps
        .iter()
        .find(|r| r.step == StepKind::Context)
        .unwrap();
    assert_eq!(record.cache, CacheStatus::Miss);
    assert_eq!(record.key, context_key);
    assert!(h.cache.verify(&context_key).unwrap());
}

#[tokio::test]
async fn empty_package_set_skips_layer_but_not_state() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.packages.clear();

    let report = h.build(&plan).await.unwrap();

    assert_eq!(report.states, ALL_STATES.to_vec());
    assert!(key_of(&report, StepKind::SystemPackages).is_none());
    assert_eq!(h.runner.count(&["apt-get"]), 0);
}

#[tokio::test]
async fn disabled_manifest_and_timezone_skip_their_layers() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.manifest = None;
    plan.timezone = None;

    let report = h.build(&plan).await.unwrap();

    assert_eq!(report.states, ALL_STATES.to_vec());
    assert!(key_of(&report, StepKind::Dependencies).is_none());
    assert!(key_of(&report, StepKind::Timezone).is_none());
    assert_eq!(h.runner.count(&["pip"]), 0);
}

// ── Concurrency ──

#[tokio::test]
async fn concurrent_builds_share_layers_with_one_producer() {
    let h = Harness::with_runner(FakeRunner {
        delay: Some(std::time::Duration::from_millis(20)),
        ..Default::default()
    });
    let plan = h.plan();

    let (a, b) = tokio::join!(h.build(&plan), h.build(&plan));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.image.id, b.image.id);
    assert_eq!(h.runner.count(&["apt-get", "install"]), 1);
    assert_eq!(h.runner.count(&["pip", "install"]), 1);
    let hits = a
        .steps
        .iter()
        .chain(&b.steps)
        .filter(|r| r.cache == CacheStatus::Hit)
        .count();
    assert_eq!(hits, 5);
}

// ── Timezone ──

#[tokio::test]
async fn timezone_symlink_and_file_are_materialized() {
    let h = Harness::new();
    let report = h.build(&h.plan()).await.unwrap();

    let workspace = Launcher::new(&h.cache, &h.runner)
        .materialize(&report.image)
        .unwrap();
    let rootfs = workspace.path().join("rootfs");

    assert_eq!(
        std::fs::read_link(rootfs.join("etc/localtime")).unwrap(),
        PathBuf::from("/usr/share/zoneinfo/America/Detroit")
    );
    assert_eq!(
        resolve_in_root(&rootfs, Path::new("/etc/localtime")).unwrap(),
        Some(rootfs.join("usr/share/zoneinfo/America/Detroit"))
    );
    assert_eq!(
        std::fs::read_to_string(rootfs.join("etc/timezone")).unwrap(),
        "America/Detroit"
    );
}

#[tokio::test]
async fn timezone_layer_is_reproducible() {
    let h = Harness::new();
    let first = h.build(&h.plan()).await.unwrap();
    let tz_key = key_of(&first, StepKind::Timezone).unwrap();
    h.cache.evict(&tz_key).unwrap();

    let second = h.build(&h.plan()).await.unwrap();

    assert_eq!(key_of(&second, StepKind::Timezone), Some(tz_key.clone()));
    assert!(h.cache.verify(&tz_key).unwrap());
    assert_eq!(first.image.id, second.image.id);
}

#[tokio::test]
async fn linked_zone_identifier_is_accepted() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.set_timezone("US/Michigan".parse().unwrap());

    let report = h.build(&plan).await.unwrap();
    assert_eq!(report.image.config.env.get("TZ"), Some("US/Michigan"));
}

#[tokio::test]
async fn unknown_timezone_fails_without_layer_or_image() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.set_timezone("Mars/Olympus_Mons".parse().unwrap());

    let failure = h.build(&plan).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::UnknownTimezone);
    assert_eq!(failure.state, BuildState::ContextMaterialized);
    assert_eq!(failure.states.last(), Some(&BuildState::Failed));
    assert_eq!(failure.completed.len(), 4);
    assert_eq!(h.cache.list().unwrap().len(), 4);
    assert!(h.images.list().unwrap().is_empty());
}

// ── Failure propagation ──

#[tokio::test]
async fn missing_dependency_fails_build_and_seals_nothing() {
    let h = Harness::with_runner(FakeRunner {
        missing_dependencies: ["nosuchpkg".to_owned()].into(),
        ..Default::default()
    });
    h.write("requirements.txt", "Django==3.2.25\nnosuchpkg==9.9\n");

    let failure = h.build(&h.plan()).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::DependencyInstallError);
    assert_eq!(failure.state, BuildState::SystemPackagesInstalled);
    assert_eq!(failure.states.last(), Some(&BuildState::Failed));
    assert!(matches!(
        &failure.error,
        BuildError::DependencyInstall(DependencyInstallError::Unresolved { requirement })
            if requirement == "nosuchpkg==9.9"
    ));
    assert!(h.images.list().unwrap().is_empty());

    // Layers sealed before the failure are reused by the corrected build.
    for record in &failure.completed {
        assert!(h.cache.get(&record.key).unwrap().is_some());
    }
    h.write("requirements.txt", "Django==3.2.25\n");
    let fixed = h.build(&h.plan()).await.unwrap();
    assert_eq!(fixed.steps[0].cache, CacheStatus::Hit);
    assert_eq!(fixed.steps[1].cache, CacheStatus::Hit);
    assert_eq!(fixed.steps[2].cache, CacheStatus::Miss);
}

#[tokio::test]
async fn malformed_manifest_fails_before_pip_runs() {
    let h = Harness::new();
    h.write("requirements.txt", "Django==3.2\n-r base.txt\n");

    let failure = h.build(&h.plan()).await.unwrap_err();

    assert!(matches!(
        failure.error,
        BuildError::DependencyInstall(DependencyInstallError::ManifestParse { line: 2, .. })
    ));
    assert_eq!(h.runner.count(&["pip"]), 0);
}

#[tokio::test]
async fn manifest_with_invalid_utf8_fails_before_pip_runs() {
    let h = Harness::new();
    std::fs::write(h.project.join("requirements.txt"), b"Django==3.2\nmysql\xffclient\n").unwrap();

    let failure = h.build(&h.plan()).await.unwrap_err();

    assert_eq!(failure.state, BuildState::SystemPackagesInstalled);
    assert!(matches!(
        failure.error,
        BuildError::DependencyInstall(DependencyInstallError::ManifestParse { line: 2, .. })
    ));
    assert_eq!(h.runner.count(&["pip"]), 0);
}

#[tokio::test]
async fn missing_package_fails_with_package_install_error() {
    let h = Harness::with_runner(FakeRunner {
        missing_packages: ["netcat".to_owned()].into(),
        ..Default::default()
    });

    let failure = h.build(&h.plan()).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::PackageInstallError);
    assert_eq!(failure.state, BuildState::BaseResolved);
    assert!(matches!(
        &failure.error,
        BuildError::PackageInstall(PackageInstallError::NotFound { package }) if package == "netcat"
    ));
    assert_eq!(h.runner.count(&["apt-get", "install"]), 1);
}

#[tokio::test]
async fn failed_index_refresh_is_fatal() {
    let h = Harness::with_runner(FakeRunner {
        fail_update: true,
        ..Default::default()
    });

    let failure = h.build(&h.plan()).await.unwrap_err();

    assert!(matches!(
        failure.error,
        BuildError::PackageInstall(PackageInstallError::IndexRefresh { code: 100, .. })
    ));
    assert_eq!(h.runner.count(&["apt-get", "install"]), 0);
}

#[tokio::test]
async fn unresolved_base_image_fails_in_pending() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.base = "python:2.7".parse().unwrap();

    let failure = h.build(&plan).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::UnresolvedBaseImage);
    assert_eq!(failure.state, BuildState::Pending);
    assert!(failure.completed.is_empty());
    assert_eq!(failure.states, vec![BuildState::Pending, BuildState::Failed]);
}

#[tokio::test]
async fn missing_context_fails_with_context_copy_error() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.context_root = h.tmp.path().join("nowhere");
    plan.manifest = None;

    let failure = h.build(&plan).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::ContextCopyError);
    assert_eq!(failure.state, BuildState::DependenciesInstalled);
}

#[tokio::test]
async fn invalid_tag_is_rejected_before_building() {
    let h = Harness::new();
    let options = BuildOptions {
        tag: Some("bad/tag".to_owned()),
        ..Default::default()
    };

    let failure = h.build_with(&h.plan(), options).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Internal);
    assert_eq!(failure.state, BuildState::Pending);
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn tag_points_at_sealed_image() {
    let h = Harness::new();
    let options = BuildOptions {
        tag: Some("placement-exams".to_owned()),
        ..Default::default()
    };
    let report = h.build_with(&h.plan(), options).await.unwrap();

    let resolved = h.images.resolve("placement-exams").unwrap();
    assert_eq!(resolved.id, report.image.id);
    assert_eq!(
        h.images.tags_of(&report.image.id).unwrap(),
        vec!["placement-exams"]
    );
}

#[tokio::test]
async fn failed_tag_write_discards_the_new_image() {
    let h = Harness::new();
    let tags = h.store.join("tags");
    std::fs::remove_dir_all(&tags).unwrap();
    std::fs::write(&tags, "").unwrap();
    let options = BuildOptions {
        tag: Some("app".to_owned()),
        ..Default::default()
    };

    let failure = h.build_with(&h.plan(), options).await.unwrap_err();

    assert_eq!(failure.state, BuildState::EntryPointSet);
    assert_eq!(failure.kind(), ErrorKind::Internal);
    assert_eq!(failure.states.last(), Some(&BuildState::Failed));
    assert!(h.images.list().unwrap().is_empty());
}

#[tokio::test]
async fn failed_tag_write_keeps_an_earlier_identical_image() {
    let h = Harness::new();
    let report = h.build(&h.plan()).await.unwrap();
    let tags = h.store.join("tags");
    std::fs::remove_dir_all(&tags).unwrap();
    std::fs::write(&tags, "").unwrap();
    let options = BuildOptions {
        tag: Some("app".to_owned()),
        ..Default::default()
    };

    h.build_with(&h.plan(), options).await.unwrap_err();

    let images = h.images.list().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, report.image.id);
}

// ── Entry point ──

#[tokio::test]
async fn start_runs_entrypoint_and_propagates_exit_code() {
    let h = Harness::with_runner(FakeRunner {
        init_exit: 3,
        ..Default::default()
    });
    let report = h.build(&h.plan()).await.unwrap();

    let code = Launcher::new(&h.cache, &h.runner)
        .start(&report.image)
        .await
        .unwrap();

    assert_eq!(code, 3);
    let inits = h.runner.inits();
    assert_eq!(inits.len(), 1);
    assert_eq!(inits[0].argv, vec!["/app/start.sh"]);
    assert_eq!(inits[0].workdir.as_deref(), Some("/app"));
    assert!(inits[0]
        .env
        .contains(&("TZ".to_owned(), "America/Detroit".to_owned())));
    assert!(inits[0].env.iter().any(|(k, _)| k == "PATH"));
}

#[tokio::test]
async fn last_entrypoint_declaration_wins() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.set_entrypoint(vec!["python3".to_owned(), "manage.py".to_owned()]);

    let report = h.build(&plan).await.unwrap();
    assert_eq!(
        report.image.config.entrypoint,
        Some(vec!["python3".to_owned(), "manage.py".to_owned()])
    );

    Launcher::new(&h.cache, &h.runner)
        .start(&report.image)
        .await
        .unwrap();
    assert_eq!(h.runner.inits()[0].argv, vec!["python3", "manage.py"]);
}

#[tokio::test]
async fn missing_entrypoint_is_a_runtime_error_only() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.set_entrypoint(vec!["/app/missing.sh".to_owned()]);

    let report = h.build(&plan).await.unwrap();
    let err = Launcher::new(&h.cache, &h.runner)
        .start(&report.image)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::EntryPointNotFound { .. }));
    assert!(h.runner.inits().is_empty());
}

#[tokio::test]
async fn non_executable_entrypoint_is_reported() {
    use std::os::unix::fs::PermissionsExt;

    let h = Harness::new();
    std::fs::set_permissions(
        h.project.join("start.sh"),
        std::fs::Permissions::from_mode(0o644),
    )
    .unwrap();
    let report = h.build(&h.plan()).await.unwrap();

    let err = Launcher::new(&h.cache, &h.runner)
        .start(&report.image)
        .await
        .unwrap_err();

    assert!(
        matches!(err, RunError::EntryPointNotExecutable { path } if path == Path::new("/app/start.sh"))
    );
}

#[tokio::test]
async fn start_fails_when_a_layer_was_evicted() {
    let h = Harness::new();
    let report = h.build(&h.plan()).await.unwrap();
    h.cache.evict(&report.image.layers[2]).unwrap();

    let err = Launcher::new(&h.cache, &h.runner)
        .start(&report.image)
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Store(_)));
}

// ── Runner failures (mockall) ──

mock! {
    Runner {}

    impl CommandRunner for Runner {
        async fn exec(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
        async fn exec_init(&self, invocation: &Invocation) -> Result<i32, ExecError>;
    }
}

#[tokio::test]
async fn spawn_failure_surfaces_as_package_install_error() {
    let h = Harness::new();
    let mut runner = MockRunner::new();
    runner.expect_exec().times(1).returning(|_| {
        Err(ExecError::Spawn {
            program: "chroot".to_owned(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    });

    let failure = Builder::new(&h.cache, &h.images, &h.bases, &runner)
        .build(&h.plan())
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        BuildError::PackageInstall(PackageInstallError::Exec(ExecError::Spawn { .. }))
    ));
}

#[tokio::test]
async fn toolchain_failure_surfaces_as_dependency_install_error() {
    let h = Harness::new();
    let mut runner = MockRunner::new();
    runner
        .expect_exec()
        .withf(|inv| inv.program() == Some("apt-get"))
        .returning(|_| Ok(CommandOutput::default()));
    runner
        .expect_exec()
        .withf(|inv| inv.program() == Some("pip"))
        .times(1)
        .returning(|_| {
            Ok(CommandOutput {
                code: 1,
                stdout: String::new(),
                stderr: "  Building wheel for mysqlclient (setup.py): finished with status 'error'\n  ERROR: Failed building wheel for mysqlclient\n".to_owned(),
            })
        });

    let failure = Builder::new(&h.cache, &h.images, &h.bases, &runner)
        .build(&h.plan())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::DependencyInstallError);
    assert!(matches!(
        failure.error,
        BuildError::DependencyInstall(DependencyInstallError::Toolchain { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn slow_package_install_times_out() {
    let h = Harness::new();
    let mut plan = h.plan();
    plan.package_timeout = std::time::Duration::from_secs(5);
    let runner = FakeRunner {
        delay: Some(std::time::Duration::from_secs(60)),
        ..Default::default()
    };

    let failure = Builder::new(&h.cache, &h.images, &h.bases, &runner)
        .build(&plan)
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        BuildError::PackageInstall(PackageInstallError::Timeout { secs: 5 })
    ));
}
