//! Workspace reconciliation: a manifest of local program files against the
//! programs stored on a controller.
//!
//! [`Workspace::controller_diff`] classifies every manifest entry without
//! touching the controller; [`Workspace::write_to_controller`] applies the
//! difference with the fewest uploads, then restarts the controller when a
//! change only takes effect at boot.

#![allow(missing_docs)]

mod manifest;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use similar::TextDiff;
use smol_str::SmolStr;
use tracing::debug;

use crate::checksum::checksum_bytes;
use crate::controller::Controller;
use crate::error::TrioError;
use crate::program::{program_from_filename, AutorunSpec, ProgramEntry, ProgramType};
use crate::session::Connector;

pub use manifest::{Manifest, ManifestEntry};

const CHANGED_TITLE: &str = "Programs have changed";

/// Discrepancies between a manifest and a controller.
///
/// A path lands in at most one of `missing`, `wrong_type` and `different`;
/// it may additionally be listed in `autorun_changed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerDiff {
    pub missing: Vec<PathBuf>,
    pub wrong_type: Vec<PathBuf>,
    pub different: Vec<PathBuf>,
    pub autorun_changed: Vec<PathBuf>,
    /// Controller programs the manifest does not name.
    pub extra_programs: IndexSet<SmolStr>,
}

impl ControllerDiff {
    /// Files whose content has to be written to the controller.
    pub fn uploads(&self) -> impl Iterator<Item = &PathBuf> {
        self.missing
            .iter()
            .chain(&self.wrong_type)
            .chain(&self.different)
    }

    fn needs_upload(&self, path: &Path) -> bool {
        self.uploads().any(|candidate| candidate == path)
    }

    /// True when neither files nor autorun settings differ. Extra programs
    /// are not considered.
    #[must_use]
    pub fn is_in_sync(&self) -> bool {
        self.missing.is_empty()
            && self.wrong_type.is_empty()
            && self.different.is_empty()
            && self.autorun_changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSection {
    pub title: &'static str,
    pub items: Vec<String>,
}

/// Printable form of a [`ControllerDiff`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub sections: Vec<DiffSection>,
    pub changed: bool,
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            writeln!(f, "{}:", section.title)?;
            for item in &section.items {
                writeln!(f, "    {item}")?;
            }
        }
        Ok(())
    }
}

/// Outcome of [`Workspace::write_to_controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    NoChanges,
    /// Changes applied and the controller was restarted.
    Restarted,
    /// Changes applied; a restart is needed but was not requested.
    RestartRequired,
    /// Changes applied, no restart needed.
    Applied,
}

impl ApplyStatus {
    /// Numeric status printed by the command line tool.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::NoChanges => 0,
            Self::Restarted | Self::RestartRequired => 1,
            Self::Applied => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Delete controller programs the manifest does not name.
    pub remove_extra: bool,
    /// Erase every program before uploading.
    pub clear: bool,
    /// Restart when a change needs it.
    pub auto_restart: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            remove_extra: true,
            clear: false,
            auto_restart: true,
        }
    }
}

/// Decides destructive steps while pulling from a controller.
pub trait Confirm {
    fn confirm(&mut self, question: &str) -> bool;
}

/// Accepts every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _question: &str) -> bool {
        true
    }
}

/// A manifest bound to a controller.
pub struct Workspace<'c, C: Connector> {
    controller: &'c mut Controller<C>,
    manifest: Option<Manifest>,
    base_dir: PathBuf,
}

impl<'c, C: Connector> Workspace<'c, C> {
    #[must_use]
    pub fn new(controller: &'c mut Controller<C>) -> Self {
        Self {
            controller,
            manifest: None,
            base_dir: PathBuf::new(),
        }
    }

    /// Uses an in-memory manifest whose file names are relative to `base_dir`.
    #[must_use]
    pub fn with_manifest(mut self, manifest: Manifest, base_dir: impl Into<PathBuf>) -> Self {
        self.manifest = Some(manifest);
        self.base_dir = base_dir.into();
        self
    }

    #[must_use]
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn controller_mut(&mut self) -> &mut Controller<C> {
        &mut *self.controller
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), TrioError> {
        let path = path.as_ref();
        self.manifest = Some(Manifest::load(path)?);
        self.base_dir = manifest_dir(path);
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TrioError> {
        self.loaded()?.save(path.as_ref())
    }

    fn loaded(&self) -> Result<&Manifest, TrioError> {
        self.manifest.as_ref().ok_or(TrioError::EmptyWorkspace)
    }

    fn resolve(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    fn display_path<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(&self.base_dir).unwrap_or(path)
    }

    /// Compares the manifest with the controller.
    pub fn controller_diff(&mut self) -> Result<ControllerDiff, TrioError> {
        let entries = self.loaded()?.files.clone();
        let programs = self.controller.list_programs()?;
        let mut diff = ControllerDiff {
            extra_programs: programs.keys().cloned().collect(),
            ..ControllerDiff::default()
        };
        for entry in &entries {
            let path = self.resolve(&entry.filename);
            let (name, program_type) = program_from_filename(&path)?;
            let Some(remote) = programs.get(&name) else {
                diff.missing.push(path);
                continue;
            };
            diff.extra_programs.shift_remove(&name);
            if remote.program_type != program_type {
                diff.wrong_type.push(path.clone());
            } else if !self.matches_controller(&path, &name)? {
                diff.different.push(path.clone());
            }
            if program_type.supports_autorun() && remote.autorun.process() != entry.auto_process() {
                diff.autorun_changed.push(path);
            }
        }
        debug!(
            missing = diff.missing.len(),
            wrong_type = diff.wrong_type.len(),
            different = diff.different.len(),
            autorun_changed = diff.autorun_changed.len(),
            extra = diff.extra_programs.len(),
            "controller diff"
        );
        Ok(diff)
    }

    /// Local file checksum against the controller's. A failed query (e.g.
    /// the program vanished) counts as a mismatch.
    fn matches_controller(&mut self, path: &Path, name: &str) -> Result<bool, TrioError> {
        let content = fs::read(path)
            .map_err(|err| TrioError::Io(format!("{}: {err}", path.display()).into()))?;
        let local = checksum_bytes(&content);
        match self.controller.checksum_program(name) {
            Ok(remote) => Ok(remote == local),
            Err(err) => {
                debug!(program = name, error = %err, "checksum query failed");
                Ok(false)
            }
        }
    }

    /// Groups a diff into titled sections. Extra programs only count as a
    /// change when they are not ignored.
    #[must_use]
    pub fn summarize_diff(&self, diff: &ControllerDiff, ignore_extras: bool) -> DiffSummary {
        let mut summary = DiffSummary::default();
        let paths = |list: &[PathBuf]| -> Vec<String> {
            list.iter()
                .map(|path| self.display_path(path).display().to_string())
                .collect()
        };
        let mut push = |title: &'static str, items: Vec<String>| {
            if !items.is_empty() {
                summary.changed = true;
                summary.sections.push(DiffSection { title, items });
            }
        };
        push("Missing programs", paths(&diff.missing));
        push("Programs with wrong type", paths(&diff.wrong_type));
        push(CHANGED_TITLE, paths(&diff.different));
        push("Programs with wrong autorun", paths(&diff.autorun_changed));
        if !ignore_extras {
            push(
                "Extra programs in the controller",
                diff.extra_programs.iter().map(ToString::to_string).collect(),
            );
        }
        summary
    }

    /// Like [`Self::summarize_diff`], with every changed program shown as a
    /// unified diff of the local file against the controller's copy.
    pub fn summarize_changes(
        &mut self,
        diff: &ControllerDiff,
        ignore_extras: bool,
    ) -> Result<DiffSummary, TrioError> {
        let mut summary = self.summarize_diff(diff, ignore_extras);
        let mut lines = Vec::new();
        for path in &diff.different {
            lines.extend(self.unified_diff(path)?);
        }
        if let Some(section) = summary
            .sections
            .iter_mut()
            .find(|section| section.title == CHANGED_TITLE)
        {
            section.items = lines;
        }
        Ok(summary)
    }

    /// Diff lines for one file, or just its path when the controller copy
    /// cannot be listed or the text is equal.
    fn unified_diff(&mut self, path: &Path) -> Result<Vec<String>, TrioError> {
        let shown = self.display_path(path).display().to_string();
        let (name, _) = program_from_filename(path)?;
        let content = fs::read(path)
            .map_err(|err| TrioError::Io(format!("{}: {err}", path.display()).into()))?;
        let local = normalize_lines(&String::from_utf8_lossy(&content));
        let remote = match self.controller.read_program(&name) {
            Ok(source) => normalize_lines(&source),
            Err(err) => {
                debug!(program = %name, error = %err, "cannot list program for diff");
                return Ok(vec![shown]);
            }
        };
        let text = TextDiff::from_lines(&local, &remote)
            .unified_diff()
            .context_radius(1)
            .header(&shown, "controller")
            .to_string();
        if text.is_empty() {
            return Ok(vec![shown]);
        }
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Makes the controller match the manifest.
    pub fn write_to_controller(&mut self, options: UploadOptions) -> Result<ApplyStatus, TrioError> {
        self.loaded()?;
        self.controller.halt();
        if options.clear {
            self.controller.clear_all()?;
        }
        let diff = self.controller_diff()?;
        let summary = self.summarize_changes(&diff, !options.remove_extra)?;
        if !summary.sections.is_empty() {
            self.status(summary.to_string().trim_end());
        }
        if !summary.changed {
            return Ok(ApplyStatus::NoChanges);
        }

        if options.remove_extra {
            for name in &diff.extra_programs {
                self.controller.delete_program(name)?;
            }
        }

        let entries = self.loaded()?.files.clone();
        let mut restart_needed = false;
        for entry in &entries {
            let path = self.resolve(&entry.filename);
            let (name, program_type) = program_from_filename(&path)?;
            let mut update_autorun = false;
            if diff.needs_upload(&path) {
                self.status(&format!("Updating {}", self.display_path(&path).display()));
                self.controller.upload_program(&path)?;
                match program_type {
                    ProgramType::MachineConfig => {
                        self.status(&format!(
                            "Restart needed after change of {}",
                            self.display_path(&path).display()
                        ));
                        restart_needed = true;
                    }
                    ProgramType::Normal => update_autorun = true,
                    _ => {}
                }
            }
            if update_autorun || diff.autorun_changed.contains(&path) {
                let process = entry.auto_process();
                self.controller.set_autorun(&name, program_type, process)?;
                if process.is_some() && program_type.supports_autorun() {
                    self.status(&format!(
                        "Restart needed to autorun {}",
                        self.display_path(&path).display()
                    ));
                    restart_needed = true;
                }
            }
        }

        match (restart_needed, options.auto_restart) {
            (true, true) => {
                self.controller.restart(true)?;
                Ok(ApplyStatus::Restarted)
            }
            (true, false) => Ok(ApplyStatus::RestartRequired),
            (false, _) => Ok(ApplyStatus::Applied),
        }
    }

    /// Replaces the manifest with the controller's listing; files are placed
    /// under `folder`, relative to the manifest directory.
    pub fn load_controller(&mut self, folder: &Path) -> Result<(), TrioError> {
        let files = self
            .controller
            .list_programs()?
            .values()
            .map(|program| entry_from_program(folder, program))
            .collect();
        self.manifest = Some(Manifest { files });
        Ok(())
    }

    /// Creates a manifest and local copies of every controller program.
    /// Programs go to `folder`, or next to the manifest when not given.
    pub fn new_from_controller(
        &mut self,
        manifest_path: impl AsRef<Path>,
        folder: Option<&Path>,
    ) -> Result<(), TrioError> {
        let manifest_path = manifest_path.as_ref();
        self.base_dir = manifest_dir(manifest_path);
        let target = folder.map_or_else(|| self.base_dir.clone(), Path::to_path_buf);
        fs::create_dir_all(&target)
            .map_err(|err| TrioError::Io(format!("{}: {err}", target.display()).into()))?;
        let relative = target
            .strip_prefix(&self.base_dir)
            .map_or_else(|_| target.clone(), Path::to_path_buf);
        self.load_controller(&relative)?;
        self.download_all()?;
        self.save(manifest_path)
    }

    /// Pulls controller-side changes into the workspace and saves the
    /// manifest. Every destructive step is put to `confirm` first.
    pub fn update_from_controller(
        &mut self,
        manifest_path: impl AsRef<Path>,
        confirm: &mut dyn Confirm,
    ) -> Result<(), TrioError> {
        let manifest_path = manifest_path.as_ref();
        self.load(manifest_path)?;
        let mut programs = self.controller.list_programs()?;
        let entries = self.loaded()?.files.clone();
        let mut kept = Vec::with_capacity(entries.len());

        for mut entry in entries {
            let path = self.resolve(&entry.filename);
            let (name, program_type) = program_from_filename(&path)?;
            let Some(remote) = programs.shift_remove(&name) else {
                self.status(&format!("File {} removed from the controller", entry.filename));
                if confirm.confirm("Remove from workspace") {
                    remove_local(&path)?;
                } else {
                    kept.push(entry);
                }
                continue;
            };

            if !path.exists() || !self.matches_controller(&path, &name)? {
                self.status(&format!("File {} is different", entry.filename));
                if confirm.confirm("Download from controller") {
                    self.controller.download_program(&path)?;
                }
            }

            if program_type.supports_autorun() && remote.autorun.process() != entry.auto_process() {
                self.status(&format!("File {} has different autorun", entry.filename));
                if confirm.confirm("Update it") {
                    entry.autorun = manifest_autorun(&remote);
                }
            }
            kept.push(entry);
        }

        if !programs.is_empty() && confirm.confirm("Download extra files from controller") {
            for program in programs.values() {
                let entry = entry_from_program(Path::new(""), program);
                if confirm.confirm(&format!("Downloading new file {}", program.name)) {
                    let path = self.resolve(&entry.filename);
                    self.controller.download_program(&path)?;
                    kept.push(entry);
                }
            }
        }

        self.manifest = Some(Manifest { files: kept });
        self.save(manifest_path)
    }

    /// Downloads every manifest file from the controller.
    pub fn download_all(&mut self) -> Result<Vec<PathBuf>, TrioError> {
        let paths: Vec<PathBuf> = self
            .loaded()?
            .files
            .iter()
            .map(|entry| self.resolve(&entry.filename))
            .collect();
        for path in &paths {
            self.controller.download_program(path)?;
        }
        Ok(paths)
    }

    fn status(&mut self, message: &str) {
        self.controller.reporter_mut().status(message);
    }
}

fn normalize_lines(text: &str) -> String {
    text.lines().map(|line| format!("{line}\n")).collect()
}

fn manifest_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn manifest_autorun(program: &ProgramEntry) -> Option<AutorunSpec> {
    program.autorun.is_auto().then_some(program.autorun)
}

fn entry_from_program(folder: &Path, program: &ProgramEntry) -> ManifestEntry {
    let filename = folder.join(program.file_name());
    ManifestEntry::new(
        filename.to_string_lossy().replace('\\', "/"),
        manifest_autorun(program),
    )
}

fn remove_local(path: &Path) -> Result<(), TrioError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TrioError::Io(format!("{}: {err}", path.display()).into())),
    }
}
