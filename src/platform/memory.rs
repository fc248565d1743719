//! In-memory platform.
//!
//! Models image files, the attachment table, partitions and drive letter
//! assignment closely enough to exercise every pipeline branch without a
//! real disk or elevated privileges. Failures can be injected per
//! operation and every call is logged.

use crate::disk::FormatSpec;
use crate::error::{Error, Result};
use crate::platform::traits::{
    DiskHandle, DiskPlatform, ImageHandle, ImageMetadata, PartitionHandle, PartitionRequest,
    PartitionStyle, VolumeInfo,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

/// Space the partition table and its alignment consume.
const TABLE_OVERHEAD_BYTES: u64 = 2 * MIB;

/// Size of the reserved partition created ahead of the first data partition.
const RESERVED_PARTITION_BYTES: u64 = 16 * MIB;

/// First disk number handed out; 0 is the system disk.
const FIRST_DISK_NUMBER: u32 = 1;

/// Reason attached to injected failures.
const INJECTED: &str = "injected failure";

/// A platform operation, used for failure injection and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `query_image_metadata`
    QueryMetadata,
    /// `allocate_dynamic_image`
    Allocate,
    /// `attach_image`
    Attach,
    /// `detach_image`
    Detach,
    /// `delete_image_file`
    Delete,
    /// `initialize_partition_table`
    Initialize,
    /// `create_partition`
    CreatePartition,
    /// `format_volume`
    Format,
    /// `enumerate_partitions`
    EnumeratePartitions,
    /// `enumerate_volumes`
    EnumerateVolumes,
}

impl Operation {
    /// Whether the operation changes host state.
    pub const fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Operation::QueryMetadata | Operation::EnumeratePartitions | Operation::EnumerateVolumes
        )
    }
}

/// One logged platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Which operation ran.
    pub operation: Operation,
    /// Whether it succeeded.
    pub succeeded: bool,
}

/// Observable state of one image, for before/after comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Declared size limit.
    pub size_limit_bytes: u64,
    /// Disk number while attached.
    pub disk_number: Option<u32>,
    /// Whether a partition table has been written.
    pub initialized: bool,
    partitions: Vec<Partition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Partition {
    number: u32,
    /// Letter while attached, or the letter to restore on next attach.
    drive_letter: Option<char>,
    size_bytes: u64,
    volume: Option<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Volume {
    /// Parameters the volume was formatted with.
    spec: FormatSpec,
}

#[derive(Debug)]
struct State {
    images: BTreeMap<PathBuf, ImageRecord>,
    corrupt: HashSet<PathBuf>,
    letters_in_use: BTreeSet<char>,
    next_disk_number: u32,
    failures: HashSet<Operation>,
    calls: Vec<Call>,
}

impl State {
    fn image_on_disk(&mut self, disk_number: u32) -> Option<&mut ImageRecord> {
        self.images
            .values_mut()
            .find(|img| img.disk_number == Some(disk_number))
    }

    fn next_free_letter(&self) -> Option<char> {
        ('D'..='Z').find(|c| !self.letters_in_use.contains(c))
    }
}

/// In-memory [`DiskPlatform`].
#[derive(Debug)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// An empty host with only the system drive `C:` in use.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                images: BTreeMap::new(),
                corrupt: HashSet::new(),
                letters_in_use: BTreeSet::from(['C']),
                next_disk_number: FIRST_DISK_NUMBER,
                failures: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Make every future call to `operation` fail.
    pub fn fail_at(&self, operation: Operation) {
        self.state.lock().failures.insert(operation);
    }

    /// Mark a drive letter as held by some other volume.
    pub fn reserve_letter(&self, letter: char) {
        self.state.lock().letters_in_use.insert(letter);
    }

    /// Seed a fully provisioned, detached image: reserved partition plus
    /// one formatted data partition that will get `letter` (or the next
    /// free one) when attached. Not logged.
    pub fn seed_provisioned_image(&self, path: &Path, size_limit_bytes: u64, letter: Option<char>) {
        let data_size = size_limit_bytes
            .saturating_sub(TABLE_OVERHEAD_BYTES)
            .saturating_sub(RESERVED_PARTITION_BYTES);
        let record = ImageRecord {
            size_limit_bytes,
            disk_number: None,
            initialized: true,
            partitions: vec![
                Partition {
                    number: 1,
                    drive_letter: None,
                    size_bytes: RESERVED_PARTITION_BYTES,
                    volume: None,
                },
                Partition {
                    number: 2,
                    drive_letter: letter,
                    size_bytes: data_size,
                    volume: Some(Volume {
                        spec: FormatSpec::default(),
                    }),
                },
            ],
        };
        self.state.lock().images.insert(path.to_path_buf(), record);
    }

    /// Seed a provisioned image that is already attached. Returns its disk
    /// number. Not logged.
    pub fn seed_attached_image(&self, path: &Path, size_limit_bytes: u64) -> u32 {
        self.seed_provisioned_image(path, size_limit_bytes, None);
        let mut state = self.state.lock();
        let disk_number = state.next_disk_number;
        state.next_disk_number += 1;
        let letter = state.next_free_letter();
        if let Some(c) = letter {
            state.letters_in_use.insert(c);
        }
        if let Some(img) = state.images.get_mut(path) {
            img.disk_number = Some(disk_number);
            img.partitions[1].drive_letter = letter;
        }
        disk_number
    }

    /// Seed a file whose metadata cannot be read (foreign or corrupt image).
    pub fn seed_corrupt_image(&self, path: &Path) {
        self.state.lock().corrupt.insert(path.to_path_buf());
    }

    /// Like [`seed_attached_image`](Self::seed_attached_image) but with a
    /// fixed disk number.
    pub fn seed_attached_image_at(&self, path: &Path, size_limit_bytes: u64, disk_number: u32) {
        {
            let mut state = self.state.lock();
            state.next_disk_number = disk_number;
        }
        self.seed_attached_image(path, size_limit_bytes);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Operations called so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().calls.iter().map(|c| c.operation).collect()
    }

    /// Number of mutating calls attempted.
    pub fn mutation_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation.is_mutation())
            .count()
    }

    /// Current state of the image at `path`.
    pub fn record(&self, path: &Path) -> Option<ImageRecord> {
        self.state.lock().images.get(path).cloned()
    }

    /// Format parameters of every formatted volume on the image at `path`,
    /// in partition order.
    pub fn format_specs(&self, path: &Path) -> Vec<FormatSpec> {
        self.record(path)
            .map(|r| {
                r.partitions
                    .into_iter()
                    .filter_map(|p| p.volume.map(|v| v.spec))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the image at `path` is attached.
    pub fn is_attached(&self, path: &Path) -> bool {
        self.record(path)
            .map(|r| r.disk_number.is_some())
            .unwrap_or(false)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Log the call and return the injected failure flag.
    fn begin(&self, state: &mut State, operation: Operation) -> bool {
        let failing = state.failures.contains(&operation);
        state.calls.push(Call {
            operation,
            succeeded: !failing,
        });
        failing
    }

    fn mark_failed(state: &mut State) {
        if let Some(last) = state.calls.last_mut() {
            last.succeeded = false;
        }
    }
}

impl DiskPlatform for MemoryPlatform {
    fn image_exists(&self, path: &Path) -> bool {
        let state = self.state.lock();
        state.images.contains_key(path) || state.corrupt.contains(path)
    }

    fn query_image_metadata(&self, path: &Path) -> Result<ImageMetadata> {
        let mut state = self.state.lock();
        if self.begin(&mut state, Operation::QueryMetadata) {
            return Err(Error::probe(path, INJECTED));
        }
        if state.corrupt.contains(path) {
            Self::mark_failed(&mut state);
            return Err(Error::probe(path, "file is not a virtual disk image"));
        }
        match state.images.get(path) {
            Some(img) => Ok(ImageMetadata {
                attached: img.disk_number.is_some(),
                disk_number: img.disk_number,
            }),
            None => {
                Self::mark_failed(&mut state);
                Err(Error::probe(path, "image not found"))
            }
        }
    }

    fn allocate_dynamic_image(&self, path: &Path, size_limit_bytes: u64) -> Result<ImageHandle> {
        let mut state = self.state.lock();
        if self.begin(&mut state, Operation::Allocate) {
            return Err(Error::allocation(path, INJECTED));
        }
        if state.images.contains_key(path) || state.corrupt.contains(path) {
            Self::mark_failed(&mut state);
            return Err(Error::allocation(path, "file already exists"));
        }
        state.images.insert(
            path.to_path_buf(),
            ImageRecord {
                size_limit_bytes,
                disk_number: None,
                initialized: false,
                partitions: Vec::new(),
            },
        );
        Ok(ImageHandle { size_limit_bytes })
    }

    fn attach_image(&self, path: &Path) -> Result<DiskHandle> {
        let mut state = self.state.lock();
        if self.begin(&mut state, Operation::Attach) {
            return Err(Error::attach(path, INJECTED));
        }
        let disk_number = state.next_disk_number;
        let State {
            images,
            letters_in_use,
            ..
        } = &mut *state;

        let Some(img) = images.get_mut(path) else {
            Self::mark_failed(&mut state);
            return Err(Error::attach(path, "image not found"));
        };
        if img.disk_number.is_some() {
            Self::mark_failed(&mut state);
            return Err(Error::attach(path, "image is already attached"));
        }

        img.disk_number = Some(disk_number);
        for part in img.partitions.iter_mut().filter(|p| p.volume.is_some()) {
            let wanted = part.drive_letter.filter(|c| !letters_in_use.contains(c));
            let letter = wanted.or_else(|| ('D'..='Z').find(|c| !letters_in_use.contains(c)));
            if let Some(c) = letter {
                letters_in_use.insert(c);
            }
            part.drive_letter = letter;
        }
        state.next_disk_number += 1;
        Ok(DiskHandle { disk_number })
    }

    fn detach_image(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        if self.begin(&mut state, Operation::Detach) {
            return Err(Error::detach(path, INJECTED));
        }
        let State {
            images,
            letters_in_use,
            ..
        } = &mut *state;

        let Some(img) = images.get_mut(path).filter(|img| img.disk_number.is_some()) else {
            Self::mark_failed(&mut state);
            return Err(Error::detach(path, "image is not attached"));
        };
        img.disk_number = None;
        for letter in img.partitions.iter().filter_map(|p| p.drive_letter) {
            letters_in_use.remove(&letter);
        }
        Ok(())
    }

    fn delete_image_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        if self.begin(&mut state, Operation::Delete) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                INJECTED,
            )));
        }
        if state
            .images
            .get(path)
            .map(|img| img.disk_number.is_some())
            .unwrap_or(false)
        {
            Self::mark_failed(&mut state);
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "file is in use by an attached disk",
            )));
        }
        state.images.remove(path);
        state.corrupt.remove(path);
        Ok(())
    }

    fn initialize_partition_table(&self, disk: &DiskHandle, style: PartitionStyle) -> Result<()> {
        let mut state = self.state.lock();
        if self.begin(&mut state, Operation::Initialize) {
            return Err(Error::init(disk.disk_number, INJECTED));
        }
        let Some(img) = state.image_on_disk(disk.disk_number) else {
            Self::mark_failed(&mut state);
            return Err(Error::init(disk.disk_number, "disk not found"));
        };
        if img.initialized {
            Self::mark_failed(&mut state);
            return Err(Error::init(disk.disk_number, "disk is already initialized"));
        }
        tracing::debug!(disk_number = disk.disk_number, style = style.as_str(), "memory: initialize");
        img.initialized = true;
        Ok(())
    }

    fn create_partition(
        &self,
        disk: &DiskHandle,
        request: &PartitionRequest,
    ) -> Result<PartitionHandle> {
        let mut state = self.state.lock();
        let n = disk.disk_number;
        if self.begin(&mut state, Operation::CreatePartition) {
            return Err(Error::partition(n, INJECTED));
        }

        let letter = match request.drive_letter {
            Some(wanted) if state.letters_in_use.contains(&wanted.as_char()) => {
                Self::mark_failed(&mut state);
                return Err(Error::drive_letter_conflict(wanted.as_char()));
            }
            Some(wanted) => Some(wanted.as_char()),
            None => state.next_free_letter(),
        };

        let Some(img) = state.image_on_disk(n) else {
            Self::mark_failed(&mut state);
            return Err(Error::partition(n, "disk not found"));
        };
        if !img.initialized {
            Self::mark_failed(&mut state);
            return Err(Error::partition(n, "disk has no partition table"));
        }

        if img.partitions.is_empty() {
            img.partitions.push(Partition {
                number: 1,
                drive_letter: None,
                size_bytes: RESERVED_PARTITION_BYTES,
                volume: None,
            });
        }
        let used: u64 = img.partitions.iter().map(|p| p.size_bytes).sum();
        let free = img
            .size_limit_bytes
            .saturating_sub(TABLE_OVERHEAD_BYTES)
            .saturating_sub(used);
        if free == 0 || !request.use_maximum_size {
            Self::mark_failed(&mut state);
            return Err(Error::partition(n, "not enough free space on disk"));
        }

        let number = img.partitions.len() as u32 + 1;
        img.partitions.push(Partition {
            number,
            drive_letter: letter,
            size_bytes: free,
            volume: None,
        });
        if let Some(c) = letter {
            state.letters_in_use.insert(c);
        }

        Ok(PartitionHandle {
            disk_number: n,
            partition_number: number,
            drive_letter: letter,
            size_bytes: free,
        })
    }

    fn format_volume(&self, partition: &PartitionHandle, spec: &FormatSpec) -> Result<VolumeInfo> {
        let mut state = self.state.lock();
        let (n, p) = (partition.disk_number, partition.partition_number);
        if self.begin(&mut state, Operation::Format) {
            return Err(Error::format(n, p, INJECTED));
        }
        let Some(part) = state
            .image_on_disk(n)
            .and_then(|img| img.partitions.iter_mut().find(|x| x.number == p))
        else {
            Self::mark_failed(&mut state);
            return Err(Error::format(n, p, "partition not found"));
        };

        part.volume = Some(Volume { spec: spec.clone() });
        Ok(VolumeInfo {
            drive_letter: part.drive_letter,
            filesystem: spec.filesystem.clone(),
            label: spec.label.clone(),
            size_bytes: part.size_bytes,
        })
    }

    fn enumerate_partitions(&self, disk_number: u32) -> Result<Vec<PartitionHandle>> {
        let mut state = self.state.lock();
        if self.begin(&mut state, Operation::EnumeratePartitions) {
            return Err(Error::enumeration(disk_number, None, INJECTED));
        }
        let Some(img) = state.image_on_disk(disk_number) else {
            Self::mark_failed(&mut state);
            return Err(Error::enumeration(disk_number, None, "disk not found"));
        };
        Ok(img
            .partitions
            .iter()
            .map(|p| PartitionHandle {
                disk_number,
                partition_number: p.number,
                drive_letter: p.drive_letter,
                size_bytes: p.size_bytes,
            })
            .collect())
    }

    fn enumerate_volumes(&self, partition: &PartitionHandle) -> Result<Vec<VolumeInfo>> {
        let mut state = self.state.lock();
        let (n, p) = (partition.disk_number, partition.partition_number);
        if self.begin(&mut state, Operation::EnumerateVolumes) {
            return Err(Error::enumeration(n, p, INJECTED));
        }
        let volumes = state
            .image_on_disk(n)
            .and_then(|img| img.partitions.iter().find(|x| x.number == p))
            .and_then(|part| {
                part.volume.as_ref().map(|v| VolumeInfo {
                    drive_letter: part.drive_letter,
                    filesystem: v.spec.filesystem.clone(),
                    label: v.spec.label.clone(),
                    size_bytes: part.size_bytes,
                })
            })
            .into_iter()
            .collect();
        Ok(volumes)
    }
}
