//! Acquisition requests and their validation
//!
//! An [`AcquisitionRequest`] is plain data collected by the control layer.
//! Before a run can start it is checked against the live environment by
//! [`validate`], which yields a [`ValidationResult`]. Only a passing result can
//! be turned into a [`ValidatedRequest`], and only a `ValidatedRequest` is
//! accepted by the pipeline.

use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::tools::ToolCommands;
use chrono_tz::Tz;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Extension of the ddrescue map file
pub const MAP_EXTENSION: &str = "map";

/// External tool used to read the disc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImagingTool {
    /// `readom` (fast, gives up on damaged media)
    #[default]
    ReadCommand,
    /// `ddrescue` (slow, resumable, tolerant of read errors)
    RescueCommand,
}

impl ImagingTool {
    /// Name recorded in logs and metadata
    pub fn name(&self) -> &'static str {
        match self {
            ImagingTool::ReadCommand => "readom",
            ImagingTool::RescueCommand => "ddrescue",
        }
    }
}

impl fmt::Display for ImagingTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ImagingTool {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "readom" => Ok(ImagingTool::ReadCommand),
            "ddrescue" => Ok(ImagingTool::RescueCommand),
            _ => Err(Error::InvalidRequest(format!(
                "Unknown imaging tool: {} (expected readom or ddrescue)",
                s
            ))),
        }
    }
}

/// Parameters for one disc acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRequest {
    /// Optical device node
    pub device: PathBuf,
    /// Directory receiving all outputs
    pub output_dir: PathBuf,
    /// Tool used to read the disc
    pub tool: ImagingTool,
    /// Maximum read retries passed to the tool
    pub retries: u32,
    /// Direct disc access (ddrescue only)
    pub direct_disc_mode: bool,
    /// Image file name prefix
    pub prefix: String,
    /// Image file extension, without the dot
    pub extension: String,
    /// Free-form identifier recorded in metadata
    pub identifier: String,
    /// Free-form description recorded in metadata
    pub description: String,
    /// Free-form notes recorded in metadata
    pub notes: String,
    /// Timezone for acquisition timestamps
    pub timezone: Tz,
    /// Name of the run log file
    pub log_file: String,
    /// Name of the checksum manifest
    pub checksum_file: String,
    /// Name of the metadata file
    pub metadata_file: String,
}

impl AcquisitionRequest {
    /// Build a request pre-filled from configuration
    ///
    /// The output directory is the configured default; the tool defaults to
    /// readom.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            device: PathBuf::from(&settings.device.path),
            output_dir: settings.output.default_dir.clone(),
            tool: ImagingTool::default(),
            retries: settings.imaging.retries,
            direct_disc_mode: settings.imaging.direct_disc_mode,
            prefix: settings.output.prefix.clone(),
            extension: settings.output.extension.clone(),
            identifier: String::new(),
            description: String::new(),
            notes: String::new(),
            timezone: settings.timezone()?,
            log_file: settings.output.log_file.clone(),
            checksum_file: settings.output.checksum_file.clone(),
            metadata_file: settings.output.metadata_file.clone(),
        })
    }

    /// Set the device
    pub fn device(mut self, device: impl Into<PathBuf>) -> Self {
        self.device = device.into();
        self
    }

    /// Set the output directory
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the imaging tool
    pub fn tool(mut self, tool: ImagingTool) -> Self {
        self.tool = tool;
        self
    }

    /// Set the retry count
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Enable or disable direct disc mode
    pub fn direct_disc_mode(mut self, enabled: bool) -> Self {
        self.direct_disc_mode = enabled;
        self
    }

    /// Set the file name prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the image extension
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set the identifier
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the notes
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Set the timezone
    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// `<output_dir>/<prefix>.<extension>`
    pub fn image_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.prefix, self.extension))
    }

    /// `<output_dir>/<prefix>.map`
    pub fn map_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.prefix, MAP_EXTENSION))
    }

    /// Run log file path
    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(&self.log_file)
    }

    /// Checksum manifest path
    pub fn checksum_path(&self) -> PathBuf {
        self.output_dir.join(&self.checksum_file)
    }

    /// Metadata file path
    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(&self.metadata_file)
    }
}

/// Reason a request cannot be run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationProblem {
    /// Output directory does not exist or is not a directory
    OutputDirMissing(PathBuf),
    /// Output directory cannot be written
    OutputDirNotWritable(PathBuf),
    /// Device is missing or not a block device
    DeviceNotAccessible(PathBuf),
    /// An external tool is not installed
    ToolMissing(String),
    /// Prefix or extension cannot form a plain file name
    InvalidFileName(String),
}

impl fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationProblem::OutputDirMissing(p) => {
                write!(f, "Output directory does not exist: {}", p.display())
            }
            ValidationProblem::OutputDirNotWritable(p) => {
                write!(f, "Cannot write to directory {}", p.display())
            }
            ValidationProblem::DeviceNotAccessible(p) => {
                write!(f, "Selected device is not accessible: {}", p.display())
            }
            ValidationProblem::ToolMissing(tool) => write!(f, "{} is not installed", tool),
            ValidationProblem::InvalidFileName(name) => {
                write!(f, "Not a valid file name component: '{}'", name)
            }
        }
    }
}

/// Outcome of checking a request against the environment
///
/// Computed fresh on every call to [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Output directory exists and is a directory
    pub dir_out_is_directory: bool,
    /// Output directory is writable and searchable
    pub dir_out_is_writable: bool,
    /// Device is a block device
    pub device_is_block_device: bool,
    /// readom is on `PATH`
    pub read_command_installed: bool,
    /// ddrescue is on `PATH`
    pub rescue_command_installed: bool,
    /// Files matching `<prefix>*.<extension>` already exist
    pub output_exists: bool,
    /// Prefix and extension are usable as file name parts
    pub file_names_valid: bool,
    read_command: String,
    rescue_command: String,
    request: AcquisitionRequest,
}

impl ValidationResult {
    /// Every failing check, in a stable order
    ///
    /// `output_exists` is not a problem: the control layer decides whether
    /// to overwrite.
    pub fn problems(&self) -> Vec<ValidationProblem> {
        let mut problems = Vec::new();
        if !self.file_names_valid {
            let bad = if is_plain_name(&self.request.prefix) {
                &self.request.extension
            } else {
                &self.request.prefix
            };
            problems.push(ValidationProblem::InvalidFileName(bad.clone()));
        }
        if !self.dir_out_is_directory {
            problems.push(ValidationProblem::OutputDirMissing(
                self.request.output_dir.clone(),
            ));
        } else if !self.dir_out_is_writable {
            problems.push(ValidationProblem::OutputDirNotWritable(
                self.request.output_dir.clone(),
            ));
        }
        if !self.device_is_block_device {
            problems.push(ValidationProblem::DeviceNotAccessible(
                self.request.device.clone(),
            ));
        }
        if !self.read_command_installed {
            problems.push(ValidationProblem::ToolMissing(self.read_command.clone()));
        }
        if !self.rescue_command_installed {
            problems.push(ValidationProblem::ToolMissing(self.rescue_command.clone()));
        }
        problems
    }

    /// Whether the request may be run
    pub fn is_valid(&self) -> bool {
        self.file_names_valid
            && self.dir_out_is_directory
            && self.dir_out_is_writable
            && self.device_is_block_device
            && self.read_command_installed
            && self.rescue_command_installed
    }

    /// The request that was checked
    pub fn request(&self) -> &AcquisitionRequest {
        &self.request
    }

    /// Turn a passing result into a runnable request
    pub fn into_validated(self) -> Result<ValidatedRequest> {
        if self.is_valid() {
            Ok(ValidatedRequest(self.request))
        } else {
            Err(Error::Validation(self.problems()))
        }
    }
}

/// A request that passed validation
///
/// Can only be obtained from [`ValidationResult::into_validated`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest(AcquisitionRequest);

impl ValidatedRequest {
    /// Unwrap into the plain request
    pub fn into_inner(self) -> AcquisitionRequest {
        self.0
    }
}

impl Deref for ValidatedRequest {
    type Target = AcquisitionRequest;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Predicate deciding whether a path is a usable optical device
pub type DeviceCheck = fn(&Path) -> bool;

/// Check a request against the live environment
///
/// Read-only: nothing is created, removed or unmounted.
pub fn validate(request: &AcquisitionRequest, commands: &ToolCommands) -> ValidationResult {
    validate_with(request, commands, optimager_platform::is_block_device)
}

/// [`validate`] with a custom device predicate
pub fn validate_with(
    request: &AcquisitionRequest,
    commands: &ToolCommands,
    device_check: DeviceCheck,
) -> ValidationResult {
    let file_names_valid = is_plain_name(&request.prefix) && is_plain_name(&request.extension);
    let dir_out_is_directory = request.output_dir.is_dir();
    let dir_out_is_writable = optimager_platform::is_writable_dir(&request.output_dir);
    let device_is_block_device = device_check(&request.device);
    let read_command_installed = optimager_platform::is_program_installed(&commands.read);
    let rescue_command_installed = optimager_platform::is_program_installed(&commands.rescue);
    let output_exists = dir_out_is_directory
        && file_names_valid
        && !find_existing_outputs(&request.output_dir, &request.prefix, &request.extension)
            .is_empty();

    tracing::debug!(
        "Validation for {}: dir={} writable={} device={} readom={} ddrescue={} exists={}",
        request.output_dir.display(),
        dir_out_is_directory,
        dir_out_is_writable,
        device_is_block_device,
        read_command_installed,
        rescue_command_installed,
        output_exists
    );

    ValidationResult {
        dir_out_is_directory,
        dir_out_is_writable,
        device_is_block_device,
        read_command_installed,
        rescue_command_installed,
        output_exists,
        file_names_valid,
        read_command: commands.read.clone(),
        rescue_command: commands.rescue.clone(),
        request: request.clone(),
    }
}

/// Files in `dir` whose names match `<prefix>*.<extension>`
///
/// Hidden files are skipped unless the prefix itself starts with a dot.
pub fn find_existing_outputs(dir: &Path, prefix: &str, extension: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let suffix = format!(".{}", extension);

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                return false;
            };
            if name.starts_with('.') && !prefix.starts_with('.') {
                return false;
            }
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(&suffix)
        })
        .map(|entry| entry.path())
        .collect();
    found.sort();
    found
}

/// Remove outputs of an earlier run before a new one starts
///
/// readom always starts from scratch, so the old image and map are deleted.
/// ddrescue resumes from its map; the image is only deleted when no map
/// exists (the image then came from readom). Returns the removed paths.
pub fn clear_previous_image(request: &AcquisitionRequest) -> Result<Vec<PathBuf>> {
    let image = request.image_path();
    let map = request.map_path();
    let mut removed = Vec::new();

    let targets: Vec<&PathBuf> = match request.tool {
        ImagingTool::ReadCommand => vec![&image, &map],
        ImagingTool::RescueCommand if !map.is_file() => vec![&image],
        ImagingTool::RescueCommand => {
            tracing::info!("Keeping {} to resume from {}", image.display(), map.display());
            Vec::new()
        }
    };

    for path in targets {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::info!("Removed {}", path.display());
                removed.push(path.clone());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Ok(removed)
}

fn is_plain_name(part: &str) -> bool {
    !part.trim().is_empty() && !part.contains('/') && !part.contains('\0') && part != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn request_in(dir: &Path) -> AcquisitionRequest {
        AcquisitionRequest::from_settings(&Settings::default())
            .unwrap()
            .output_dir(dir)
            .prefix("disc")
            .extension("iso")
    }

    fn shell_commands() -> ToolCommands {
        ToolCommands::new("sh", "sh", "sh")
    }

    #[test]
    fn test_validation_is_comparable_and_repeatable() {
        fn assert_eq_impl<T: Eq>(_: &T) {}

        let dir = TempDir::new().unwrap();
        let request = request_in(dir.path());
        let first = validate_with(&request, &shell_commands(), |_| true);
        let second = validate_with(&request, &shell_commands(), |_| true);

        assert_eq_impl(&first);
        assert_eq!(first, second);
        assert_eq!(first.request(), &request);
        assert!(first.is_valid());
    }

    #[test]
    fn test_imaging_tool_names() {
        assert_eq!(ImagingTool::ReadCommand.name(), "readom");
        assert_eq!(ImagingTool::RescueCommand.to_string(), "ddrescue");
        assert_eq!(
            "DDRESCUE".parse::<ImagingTool>().unwrap(),
            ImagingTool::RescueCommand
        );
        assert!("cdparanoia".parse::<ImagingTool>().is_err());
    }

    #[test]
    fn test_output_paths() {
        let request = request_in(Path::new("/srv/out")).prefix("kb123");
        assert_eq!(request.image_path(), PathBuf::from("/srv/out/kb123.iso"));
        assert_eq!(request.map_path(), PathBuf::from("/srv/out/kb123.map"));
        assert_eq!(
            request.checksum_path(),
            PathBuf::from("/srv/out/checksums.sha512")
        );
        assert_eq!(
            request.metadata_path(),
            PathBuf::from("/srv/out/metadata.json")
        );
        assert_eq!(request.log_path(), PathBuf::from("/srv/out/optimager.log"));
    }

    #[test]
    fn test_missing_output_dir_is_invalid() {
        let request = request_in(Path::new("/nonexistent/optimager/out"));
        let result = validate(&request, &shell_commands());

        assert!(!result.dir_out_is_directory);
        assert!(!result.output_exists);
        assert!(!result.is_valid());
        assert!(result
            .problems()
            .contains(&ValidationProblem::OutputDirMissing(PathBuf::from(
                "/nonexistent/optimager/out"
            ))));
    }

    #[test]
    fn test_regular_file_is_not_a_device() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("sr0");
        fs::write(&fake, b"").unwrap();

        let request = request_in(dir.path()).device(&fake);
        let result = validate(&request, &shell_commands());

        assert!(result.dir_out_is_directory);
        assert!(!result.device_is_block_device);
        assert!(matches!(
            result.clone().into_validated(),
            Err(Error::Validation(problems))
                if problems == vec![ValidationProblem::DeviceNotAccessible(fake.clone())]
        ));
    }

    #[test]
    fn test_missing_tools_reported() {
        let dir = TempDir::new().unwrap();
        let commands = ToolCommands::new("/nonexistent/readom", "/nonexistent/ddrescue", "umount");
        let result = validate(&request_in(dir.path()), &commands);

        assert!(!result.read_command_installed);
        assert!(!result.rescue_command_installed);
        let problems = result.problems();
        assert!(problems.contains(&ValidationProblem::ToolMissing(
            "/nonexistent/readom".to_string()
        )));
        assert!(problems.contains(&ValidationProblem::ToolMissing(
            "/nonexistent/ddrescue".to_string()
        )));
    }

    #[test]
    fn test_invalid_prefix() {
        let dir = TempDir::new().unwrap();
        let result = validate(&request_in(dir.path()).prefix("../x"), &shell_commands());
        assert!(!result.file_names_valid);
        assert_eq!(
            result.problems()[0],
            ValidationProblem::InvalidFileName("../x".to_string())
        );
    }

    #[test]
    fn test_output_exists_detection() {
        let dir = TempDir::new().unwrap();
        let request = request_in(dir.path());
        assert!(!validate(&request, &shell_commands()).output_exists);

        fs::write(dir.path().join("disc_session2.iso"), b"x").unwrap();
        assert!(validate(&request, &shell_commands()).output_exists);
    }

    #[test]
    fn test_find_existing_outputs_pattern() {
        let dir = TempDir::new().unwrap();
        for name in ["disc.iso", "disc2.iso", "disc.ISO", "other.iso", "disc.iso.bak", ".disc.iso"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let found = find_existing_outputs(dir.path(), "disc", "iso");
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["disc.iso", "disc2.iso"]);
    }

    #[test]
    fn test_validation_does_not_touch_files() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("disc.iso");
        fs::write(&image, b"old").unwrap();

        let result = validate(&request_in(dir.path()), &shell_commands());
        assert!(result.output_exists);
        assert_eq!(fs::read(&image).unwrap(), b"old");
    }

    #[test]
    fn test_clear_previous_image_readom() {
        let dir = TempDir::new().unwrap();
        let request = request_in(dir.path()).tool(ImagingTool::ReadCommand);
        fs::write(request.image_path(), b"old").unwrap();
        fs::write(request.map_path(), b"map").unwrap();

        let removed = clear_previous_image(&request).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!request.image_path().exists());
        assert!(!request.map_path().exists());
    }

    #[test]
    fn test_clear_previous_image_ddrescue_keeps_resumable_image() {
        let dir = TempDir::new().unwrap();
        let request = request_in(dir.path()).tool(ImagingTool::RescueCommand);
        fs::write(request.image_path(), b"partial").unwrap();
        fs::write(request.map_path(), b"map").unwrap();

        assert!(clear_previous_image(&request).unwrap().is_empty());
        assert!(request.image_path().exists());
        assert!(request.map_path().exists());
    }

    #[test]
    fn test_clear_previous_image_ddrescue_after_readom() {
        let dir = TempDir::new().unwrap();
        let request = request_in(dir.path()).tool(ImagingTool::RescueCommand);
        fs::write(request.image_path(), b"from readom").unwrap();

        let removed = clear_previous_image(&request).unwrap();
        assert_eq!(removed, vec![request.image_path()]);
        assert!(!request.image_path().exists());
    }

    #[test]
    fn test_clear_previous_image_nothing_there() {
        let dir = TempDir::new().unwrap();
        assert!(clear_previous_image(&request_in(dir.path()))
            .unwrap()
            .is_empty());
    }
}
