//! Production platform backed by PowerShell storage cmdlets.
//!
//! Each operation runs one short script through `powershell -NoProfile
//! -NonInteractive -Command`. Scripts that return data pipe it through
//! `ConvertTo-Json -Compress`, which is parsed with serde. A non-zero exit
//! status is mapped to the error variant of the operation, carrying the
//! cmdlet's stderr as the reason.
//!
//! Requires the Hyper-V PowerShell module (`New-VHD`, `Mount-VHD`, ...) and
//! an elevated session.

use crate::disk::FormatSpec;
use crate::error::{Error, Result};
use crate::platform::traits::{
    DiskHandle, DiskPlatform, ImageHandle, ImageMetadata, PartitionHandle, PartitionRequest,
    PartitionStyle, VolumeInfo,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

/// Executable used when none is configured.
#[cfg(windows)]
const DEFAULT_EXECUTABLE: &str = "powershell.exe";
#[cfg(not(windows))]
const DEFAULT_EXECUTABLE: &str = "pwsh";

/// Prepended to every script so cmdlet errors terminate with non-zero status.
const SCRIPT_PRELUDE: &str = "$ErrorActionPreference = 'Stop'; $ProgressPreference = 'SilentlyContinue'; ";

/// Platform that shells out to PowerShell.
#[derive(Debug, Clone)]
pub struct PowerShellPlatform {
    executable: String,
}

impl Default for PowerShellPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// `ConvertTo-Json` emits a bare object for single results and an array
/// otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VhdJson {
    attached: bool,
    disk_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiskJson {
    number: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PartitionJson {
    disk_number: u32,
    partition_number: u32,
    drive_letter: Option<String>,
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeJson {
    drive_letter: Option<String>,
    file_system: Option<String>,
    file_system_label: Option<String>,
    size: u64,
}

impl From<PartitionJson> for PartitionHandle {
    fn from(p: PartitionJson) -> Self {
        Self {
            disk_number: p.disk_number,
            partition_number: p.partition_number,
            drive_letter: letter_from_json(p.drive_letter.as_deref()),
            size_bytes: p.size,
        }
    }
}

impl From<VolumeJson> for VolumeInfo {
    fn from(v: VolumeJson) -> Self {
        Self {
            drive_letter: letter_from_json(v.drive_letter.as_deref()),
            filesystem: v.file_system.unwrap_or_default(),
            label: v.file_system_label.unwrap_or_default(),
            size_bytes: v.size,
        }
    }
}

/// `[char]` drive letters serialize as a one-character string, with NUL
/// standing for "no letter".
fn letter_from_json(raw: Option<&str>) -> Option<char> {
    raw.and_then(|s| s.chars().next())
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
}

/// Quote a string as a PowerShell single-quoted literal.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

const PARTITION_FIELDS: &str = "DiskNumber, PartitionNumber, @{n='DriveLetter';e={[string]$_.DriveLetter}}, Size";
const VOLUME_FIELDS: &str = "@{n='DriveLetter';e={[string]$_.DriveLetter}}, FileSystem, FileSystemLabel, Size";

impl PowerShellPlatform {
    /// Use the default executable for this host.
    pub fn new() -> Self {
        Self::with_executable(DEFAULT_EXECUTABLE)
    }

    /// Use a specific PowerShell executable (e.g. `pwsh`).
    pub fn with_executable(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Executable this platform runs.
    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Run a script; `Err` carries the reason text.
    fn run(&self, script: &str) -> std::result::Result<String, String> {
        tracing::debug!(executable = %self.executable, script, "running powershell");

        let output = Command::new(&self.executable)
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(format!("{}{}", SCRIPT_PRELUDE, script))
            .output()
            .map_err(|e| format!("could not run {}: {}", self.executable, e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            })
        }
    }

    /// Run a script and parse its JSON output.
    fn run_json<T: DeserializeOwned>(&self, script: &str) -> std::result::Result<T, String> {
        let stdout = self.run(script)?;
        serde_json::from_str(&stdout)
            .map_err(|e| format!("unexpected output ({}): {}", e, stdout))
    }

    /// Run a script returning zero or more JSON objects.
    fn run_json_list<T: DeserializeOwned>(&self, script: &str) -> std::result::Result<Vec<T>, String> {
        let stdout = self.run(script)?;
        if stdout.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<OneOrMany<T>>(&stdout)
            .map(OneOrMany::into_vec)
            .map_err(|e| format!("unexpected output ({}): {}", e, stdout))
    }

    fn letter_in_use(&self, letter: char) -> bool {
        let script = format!(
            "if (Get-Partition -DriveLetter {} -ErrorAction SilentlyContinue) {{ 'taken' }}",
            letter
        );
        matches!(self.run(&script).as_deref(), Ok("taken"))
    }
}

impl DiskPlatform for PowerShellPlatform {
    fn image_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn query_image_metadata(&self, path: &Path) -> Result<ImageMetadata> {
        let script = format!(
            "Get-VHD -Path {} | Select-Object Attached, DiskNumber | ConvertTo-Json -Compress",
            quote_path(path)
        );
        let vhd: VhdJson = self
            .run_json(&script)
            .map_err(|reason| Error::probe(path, reason))?;
        Ok(ImageMetadata {
            attached: vhd.attached,
            disk_number: vhd.disk_number.filter(|_| vhd.attached),
        })
    }

    fn allocate_dynamic_image(&self, path: &Path, size_limit_bytes: u64) -> Result<ImageHandle> {
        let script = format!(
            "New-VHD -Path {} -SizeBytes {} -Dynamic | Out-Null",
            quote_path(path),
            size_limit_bytes
        );
        self.run(&script)
            .map_err(|reason| Error::allocation(path, reason))?;
        Ok(ImageHandle { size_limit_bytes })
    }

    fn attach_image(&self, path: &Path) -> Result<DiskHandle> {
        let script = format!(
            "Mount-VHD -Path {} -Passthru | Get-Disk | Select-Object Number | ConvertTo-Json -Compress",
            quote_path(path)
        );
        let disk: DiskJson = self
            .run_json(&script)
            .map_err(|reason| Error::attach(path, reason))?;
        Ok(DiskHandle {
            disk_number: disk.number,
        })
    }

    fn detach_image(&self, path: &Path) -> Result<()> {
        let script = format!("Dismount-VHD -Path {}", quote_path(path));
        self.run(&script)
            .map_err(|reason| Error::detach(path, reason))?;
        Ok(())
    }

    fn delete_image_file(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn initialize_partition_table(&self, disk: &DiskHandle, style: PartitionStyle) -> Result<()> {
        let script = format!(
            "Initialize-Disk -Number {} -PartitionStyle {}",
            disk.disk_number,
            style.as_str()
        );
        self.run(&script)
            .map_err(|reason| Error::init(disk.disk_number, reason))?;
        Ok(())
    }

    fn create_partition(
        &self,
        disk: &DiskHandle,
        request: &PartitionRequest,
    ) -> Result<PartitionHandle> {
        let size = if request.use_maximum_size {
            "-UseMaximumSize"
        } else {
            ""
        };
        let letter = match request.drive_letter {
            Some(l) => format!("-DriveLetter {}", l.as_char()),
            None => "-AssignDriveLetter".to_string(),
        };
        let script = format!(
            "New-Partition -DiskNumber {} {} {} | Select-Object {} | ConvertTo-Json -Compress",
            disk.disk_number, size, letter, PARTITION_FIELDS
        );

        match self.run_json::<PartitionJson>(&script) {
            Ok(part) => Ok(part.into()),
            Err(reason) => match request.drive_letter {
                Some(l) if self.letter_in_use(l.as_char()) => {
                    tracing::debug!(letter = %l, reason = %reason, "partition failed on a taken letter");
                    Err(Error::drive_letter_conflict(l.as_char()))
                }
                _ => Err(Error::partition(disk.disk_number, reason)),
            },
        }
    }

    fn format_volume(&self, partition: &PartitionHandle, spec: &FormatSpec) -> Result<VolumeInfo> {
        let dev_drive = if spec.dev_workload_optimized {
            " -DevDrive"
        } else {
            ""
        };
        let script = format!(
            "Get-Partition -DiskNumber {} -PartitionNumber {} | Format-Volume -FileSystem {} -NewFileSystemLabel {}{} -Confirm:$false -Force | Select-Object {} | ConvertTo-Json -Compress",
            partition.disk_number,
            partition.partition_number,
            quote(&spec.filesystem),
            quote(&spec.label),
            dev_drive,
            VOLUME_FIELDS
        );
        let volume: VolumeJson = self.run_json(&script).map_err(|reason| {
            Error::format(partition.disk_number, partition.partition_number, reason)
        })?;
        Ok(volume.into())
    }

    fn enumerate_partitions(&self, disk_number: u32) -> Result<Vec<PartitionHandle>> {
        let script = format!(
            "ConvertTo-Json -Compress -InputObject @(Get-Partition -DiskNumber {} | Select-Object {})",
            disk_number, PARTITION_FIELDS
        );
        let parts: Vec<PartitionJson> = self
            .run_json_list(&script)
            .map_err(|reason| Error::enumeration(disk_number, None, reason))?;
        Ok(parts.into_iter().map(Into::into).collect())
    }

    fn enumerate_volumes(&self, partition: &PartitionHandle) -> Result<Vec<VolumeInfo>> {
        let script = format!(
            "ConvertTo-Json -Compress -InputObject @(Get-Partition -DiskNumber {} -PartitionNumber {} | Get-Volume | Select-Object {})",
            partition.disk_number, partition.partition_number, VOLUME_FIELDS
        );
        let volumes: Vec<VolumeJson> = self.run_json_list(&script).map_err(|reason| {
            Error::enumeration(partition.disk_number, partition.partition_number, reason)
        })?;
        Ok(volumes.into_iter().map(Into::into).collect())
    }

    fn manual_detach_command(&self, path: &Path) -> String {
        format!("Dismount-VHD -Path {}", quote_path(path))
    }
}
