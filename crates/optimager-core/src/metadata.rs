//! Metadata record written at the end of every run
//!
//! The record is JSON with sorted keys and 4-space indentation. Serializing
//! the same record twice yields byte-identical output.

use crate::checksum::CHECKSUM_TYPE;
use crate::error::Result;
use crate::request::AcquisitionRequest;
use chrono::{DateTime, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Version recorded as `toolVersion`
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Description of one acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Operator-supplied identifier
    pub identifier: String,
    /// Operator-supplied description
    pub description: String,
    /// Operator-supplied notes
    pub notes: String,
    /// Version of this software
    pub tool_version: String,
    /// Device that was read
    pub device: String,
    /// `readom` or `ddrescue`
    pub read_command: String,
    /// Retry count passed to the tool
    pub max_retries: u32,
    /// ddrescue direct disc mode
    pub direct_disc_mode: bool,
    /// Image name prefix
    pub prefix: String,
    /// Image extension
    pub extension: String,
    /// RFC 3339 start timestamp
    pub acquisition_start: String,
    /// RFC 3339 end timestamp
    pub acquisition_end: String,
    /// Whether the run succeeded up to the metadata write
    pub success_flag: bool,
    /// Filename to SHA-512 digest
    pub checksums: BTreeMap<String, String>,
    /// Always `SHA-512`
    pub checksum_type: String,
}

impl Metadata {
    /// Describe `request`; timestamps and results are filled in afterwards
    pub fn for_request(request: &AcquisitionRequest) -> Self {
        Self {
            identifier: request.identifier.clone(),
            description: request.description.clone(),
            notes: request.notes.clone(),
            tool_version: TOOL_VERSION.to_string(),
            device: request.device.display().to_string(),
            read_command: request.tool.name().to_string(),
            max_retries: request.retries,
            direct_disc_mode: request.direct_disc_mode,
            prefix: request.prefix.clone(),
            extension: request.extension.clone(),
            acquisition_start: String::new(),
            acquisition_end: String::new(),
            success_flag: false,
            checksums: BTreeMap::new(),
            checksum_type: CHECKSUM_TYPE.to_string(),
        }
    }

    /// Pretty JSON with sorted keys and 4-space indentation
    pub fn to_json(&self) -> Result<String> {
        // Round-trip through Value: its object map is ordered by key
        let value = serde_json::to_value(self)?;
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut serializer)?;
        out.push(b'\n');
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Write to `path` through a temporary file and a rename
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let temp_path = path.with_extension("tmp");

        let written =
            write_synced(&temp_path, json.as_bytes()).and_then(|()| fs::rename(&temp_path, path));
        if let Err(e) = written {
            // No stale temp file may survive a failed write
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        tracing::debug!("Wrote metadata to {}", path.display());
        Ok(())
    }

    /// Load a previously written record
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Current time in `tz` as RFC 3339 with second precision
pub fn timestamp<Z: TimeZone>(tz: &Z) -> String
where
    Z::Offset: std::fmt::Display,
{
    format_timestamp(&chrono::Utc::now().with_timezone(tz))
}

/// RFC 3339 with second precision
pub fn format_timestamp<Z: TimeZone>(time: &DateTime<Z>) -> String
where
    Z::Offset: std::fmt::Display,
{
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}
