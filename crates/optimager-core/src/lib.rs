//! # Optimager Core
//!
//! Core library for supervised imaging of optical discs.
//!
//! ## Modules
//!
//! - `request`: Acquisition parameters and validation against the environment
//! - `tools`: readom / ddrescue / umount wrappers with output classification
//! - `checksum`: SHA-512 manifests over output files
//! - `metadata`: JSON record written at the end of every run
//! - `pipeline`: The acquisition state machine and its background thread
//! - `state`: Run state shared between the pipeline and observers
//! - `logging`: Channel and log-file layers for `tracing`
//! - `settings`: Persistent configuration from a TOML file
//! - `error`: Error types and result aliases
//!
//! ## Example
//!
//! ```ignore
//! use optimager_core::{AcquisitionRequest, CancellationToken, ImagingTool, Pipeline, Settings};
//!
//! let settings = Settings::load(None)?;
//! let pipeline = Pipeline::from_settings(&settings);
//! let request = AcquisitionRequest::from_settings(&settings)?
//!     .output_dir("/srv/discs/kb-0042")
//!     .tool(ImagingTool::RescueCommand);
//!
//! let handle = pipeline.spawn(pipeline.prepare(&request)?, CancellationToken::new())?;
//! while !handle.is_finished() {
//!     std::thread::sleep(pipeline.tunables().poll_interval);
//! }
//! let outcome = handle.wait()?;
//! println!("success: {}", outcome.success);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod checksum;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod request;
pub mod settings;
pub mod state;
pub mod tools;

pub use cancel::CancellationToken;
pub use checksum::{
    parse_manifest, verify_manifest, ChecksumEntry, ChecksumManifest, ChecksumReport, Mismatch,
    VerificationReport, CHECKSUM_TYPE,
};
pub use error::{Error, Result};
pub use logging::{channel_layer, file_layer, ChannelLayer, LogRecord, RunLogFile};
pub use metadata::{Metadata, TOOL_VERSION};
pub use pipeline::{Pipeline, RunHandle, RunOutcome, Tunables};
pub use request::{
    clear_previous_image, find_existing_outputs, AcquisitionRequest, DeviceCheck, ImagingTool,
    ValidatedRequest, ValidationProblem, ValidationResult,
};
pub use settings::{
    DeviceSettings, ImagingSettings, OutputSettings, Settings, SettingsError, TimingSettings,
    ToolSettings,
};
pub use state::{Phase, RunSnapshot, RunState};
pub use tools::{ToolCommands, ToolOutcome, ToolResult, UnmountResult};
