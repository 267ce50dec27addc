use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use strata_core::TimezoneId;
use strata_core::timezone::{LOCALTIME_PATH, TIMEZONE_FILE};
use strata_exec::CommandRunner;
use tracing::info;

use super::Step;
use crate::error::{BuildError, FsError};
use crate::fsutil::{in_root, remove_path, resolve_in_root};
use crate::layer::StepKind;

/// Points `/etc/localtime` at the zone database entry and records the zone
/// identifier in `/etc/timezone`.
#[derive(Debug, Clone)]
pub struct Timezone {
    id: TimezoneId,
}

impl Timezone {
    pub fn new(id: TimezoneId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &TimezoneId {
        &self.id
    }
}

impl Step for Timezone {
    fn kind(&self) -> StepKind {
        StepKind::Timezone
    }

    fn instruction(&self) -> String {
        format!(
            "RUN ln -snf {zone} {LOCALTIME_PATH} && printf '%s' {id} > {TIMEZONE_FILE}",
            zone = self.id.zoneinfo_path().display(),
            id = self.id.as_str(),
        )
    }

    fn inputs(&self) -> Result<Vec<String>, BuildError> {
        Ok(Vec::new())
    }

    async fn apply<R: CommandRunner>(&self, rootfs: &Path, _runner: &R) -> Result<(), BuildError> {
        let zone = self.id.zoneinfo_path();
        let unknown = || BuildError::UnknownTimezone {
            id: self.id.as_str().to_owned(),
            path: zone.clone(),
        };
        let resolved = resolve_in_root(rootfs, &zone).map_err(|e| FsError::Read {
            path: in_root(rootfs, &zone),
            source: e,
        })?;
        match resolved {
            Some(entry) if entry.is_file() => {}
            _ => return Err(unknown()),
        }

        let localtime = in_root(rootfs, Path::new(LOCALTIME_PATH));
        let timezone_file = in_root(rootfs, Path::new(TIMEZONE_FILE));
        let etc = match localtime.parent() {
            Some(dir) => dir,
            None => rootfs,
        };
        fs::create_dir_all(etc).map_err(|e| FsError::Write {
            path: etc.to_path_buf(),
            source: e,
        })?;

        // Prepare both entries first, then swap them in.
        let link_tmp = etc.join(".localtime.strata");
        let file_tmp = etc.join(".timezone.strata");
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |e| FsError::Write { path, source: e }
        };
        for tmp in [&link_tmp, &file_tmp] {
            remove_path(tmp).map_err(write_err(tmp))?;
        }
        symlink(&zone, &link_tmp).map_err(write_err(&link_tmp))?;
        fs::write(&file_tmp, self.id.as_str()).map_err(write_err(&file_tmp))?;

        for target in [&localtime, &timezone_file] {
            if target.is_dir() {
                remove_path(target).map_err(write_err(target))?;
            }
        }
        fs::rename(&link_tmp, &localtime).map_err(write_err(&localtime))?;
        fs::rename(&file_tmp, &timezone_file).map_err(write_err(&timezone_file))?;

        info!(timezone = %self.id.as_str(), "timezone configured");
        Ok(())
    }
}
