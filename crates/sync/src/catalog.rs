//! Syncing an image catalog directory onto several disks

#![allow(clippy::cast_precision_loss)]

use refurb_config::Config;
use refurb_errors::{Error, SyncError, TaskError};
use refurb_platform::PlatformCommand;
use refurb_runner::{CallbackTask, ProcessTask, RunCtx, RunnerPlan, Task};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::fanout::{DestinationSpec, FanoutCopyTask, ASSUMED_RATE};
use crate::rsync::rsync_task;

/// One place the catalog is synced to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDestination {
    pub key: String,
    /// Block device to mount, or `None` when `dir` is used as is
    pub device: Option<PathBuf>,
    pub dir: PathBuf,
}

/// Top-level layout of the catalog source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogListing {
    /// Regular files directly under the source, with their sizes
    pub images: Vec<(String, u64)>,
    /// Bytes in everything else, synced by rsync
    pub metadata_bytes: u64,
}

/// Deepest level of the metadata tree that is still counted
pub const MAX_CATALOG_DEPTH: usize = 32;

/// Split `source` into image files and the rest
///
/// Symlinks are neither followed nor counted; rsync copies them as links.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be read.
pub fn scan_catalog(source: &Path) -> Result<CatalogListing, Error> {
    let mut listing = CatalogListing::default();
    let walker = WalkDir::new(source)
        .min_depth(1)
        .max_depth(MAX_CATALOG_DEPTH)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| walk_error(e, source))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata().map_err(|e| walk_error(e, source))?.len();
        if entry.depth() == 1 {
            listing
                .images
                .push((entry.file_name().to_string_lossy().into_owned(), size));
        } else {
            listing.metadata_bytes += size;
        }
    }
    Ok(listing)
}

fn walk_error(err: walkdir::Error, root: &Path) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    let io = std::io::Error::from(err);
    Error::io_with_path(&io, path)
}

/// Mounts every destination, copies each image with a fan-out copy, then
/// rsyncs the remaining tree. Unmounts run as teardown tasks.
pub struct CatalogSync {
    source: PathBuf,
    targets: Vec<PathBuf>,
}

impl CatalogSync {
    /// Targets that are directories are used directly; anything else is
    /// treated as a device and mounted under the run's mount root.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, targets: Vec<PathBuf>) -> Self {
        Self {
            source: source.into(),
            targets,
        }
    }

    fn destinations(&self, run_tag: &str) -> Vec<CatalogDestination> {
        self.targets
            .iter()
            .zip(1u32..)
            .map(|(target, number)| {
                let key = target
                    .file_name()
                    .map_or_else(|| format!("dest{number}"), |n| n.to_string_lossy().into_owned());
                if target.is_dir() {
                    CatalogDestination {
                        key,
                        device: None,
                        dir: target.clone(),
                    }
                } else {
                    CatalogDestination {
                        key,
                        device: Some(target.clone()),
                        dir: Config::mount_point(run_tag, number),
                    }
                }
            })
            .collect()
    }
}

impl RunnerPlan for CatalogSync {
    fn name(&self) -> &str {
        "sync"
    }

    fn prepare(&mut self, ctx: &RunCtx) -> Result<Vec<Box<dyn Task>>, Error> {
        if self.targets.is_empty() {
            return Err(SyncError::NoDestinations.into());
        }
        let listing = scan_catalog(&self.source)?;
        let run_tag: String = ctx.run_id().simple().to_string().chars().take(8).collect();
        let destinations = self.destinations(&run_tag);
        let tools = &ctx.config().tools;
        tracing::info!(
            source = %self.source.display(),
            images = listing.images.len(),
            destinations = destinations.len(),
            "planning catalog sync"
        );

        let mut tasks: Vec<Box<dyn Task>> = Vec::new();

        let mounted: Vec<CatalogDestination> =
            destinations.iter().filter(|d| d.device.is_some()).cloned().collect();
        if !mounted.is_empty() {
            let dirs: Vec<PathBuf> = mounted.iter().map(|d| d.dir.clone()).collect();
            tasks.push(Box::new(CallbackTask::new(
                "create mount points",
                1.0,
                move |_ctx: &RunCtx| {
                    for dir in &dirs {
                        std::fs::create_dir_all(dir).map_err(|e| {
                            TaskError::failed("create mount points", format!("{}: {e}", dir.display()))
                        })?;
                    }
                    Ok(())
                },
            )));
        }
        for dest in &mounted {
            if let Some(device) = &dest.device {
                let mut command = PlatformCommand::new(&tools.mount);
                command
                    .arg(device.display().to_string())
                    .arg(dest.dir.display().to_string());
                tasks.push(Box::new(
                    ProcessTask::new(format!("mount {}", device.display()), command).with_estimate(2.0),
                ));
            }
        }

        for (name, size) in &listing.images {
            let specs = destinations
                .iter()
                .map(|d| (d.key.clone(), DestinationSpec::Path(d.dir.join(name))))
                .collect();
            tasks.push(Box::new(FanoutCopyTask::new(self.source.join(name), specs, *size)));
        }

        let excludes: Vec<String> = listing
            .images
            .iter()
            .map(|(name, _)| format!("--exclude=/{name}"))
            .collect();
        let rsync_targets: Vec<(String, PathBuf)> =
            destinations.iter().map(|d| (d.key.clone(), d.dir.clone())).collect();
        let estimate = (listing.metadata_bytes as f64 / ASSUMED_RATE).max(5.0);
        tasks.push(Box::new(rsync_task(
            &tools.rsync,
            &self.source,
            &rsync_targets,
            &excludes,
            estimate,
        )?));

        for dest in &mounted {
            // 32: not mounted, e.g. the mount task never ran
            let mut command = PlatformCommand::new(&tools.umount);
            command.arg(dest.dir.display().to_string());
            tasks.push(Box::new(
                ProcessTask::new(format!("unmount {}", dest.dir.display()), command)
                    .with_estimate(2.0)
                    .good_codes(&[0, 32])
                    .as_teardown(),
            ));
        }

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_splits_images_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("win10.img"), vec![0u8; 64]).unwrap();
        std::fs::write(dir.path().join("ubuntu.img"), vec![0u8; 16]).unwrap();
        std::fs::create_dir_all(dir.path().join("meta/sub")).unwrap();
        std::fs::write(dir.path().join("meta/sub/info.json"), b"{}").unwrap();

        let listing = scan_catalog(dir.path()).unwrap();
        assert_eq!(
            listing.images,
            vec![("ubuntu.img".to_string(), 16), ("win10.img".to_string(), 64)]
        );
        assert_eq!(listing.metadata_bytes, 2);
    }

    #[test]
    fn scan_skips_symlinks_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("win10.img"), vec![0u8; 64]).unwrap();
        std::fs::create_dir_all(dir.path().join("meta")).unwrap();
        std::fs::write(dir.path().join("meta/info.json"), b"{}").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("meta/loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("win10.img"), dir.path().join("latest.img"))
            .unwrap();

        let listing = scan_catalog(dir.path()).unwrap();
        assert_eq!(listing.images, vec![("win10.img".to_string(), 64)]);
        assert_eq!(listing.metadata_bytes, 2);
    }

    #[test]
    fn scan_of_a_missing_catalog_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let err = scan_catalog(&missing).unwrap_err();
        assert!(matches!(err, Error::Io { path: Some(ref p), .. } if p == &missing));
    }

    #[test]
    fn directories_are_not_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let plan = CatalogSync::new("/srv/catalog", vec![dir.path().to_path_buf(), PathBuf::from("/dev/sdz1")]);
        let dests = plan.destinations("abcd1234");
        assert_eq!(dests[0].device, None);
        assert_eq!(dests[0].dir, dir.path());
        assert_eq!(dests[1].key, "sdz1");
        assert_eq!(dests[1].dir, Config::mount_point("abcd1234", 2));
    }
}
