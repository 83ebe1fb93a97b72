use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use bytemuck::Pod;

static NEXT_ARRAY_ID: AtomicU64 = AtomicU64::new(1);

/// Typed byte buffer exchanged with the compute device.
///
/// Every array carries a process-unique id, which device-side caches use to notice that the
/// array behind a handle has changed.
#[derive(Debug)]
pub struct ComputeArray {
    id: u64,
    element_size: usize,
    element_count: usize,
    data: Vec<u8>,
    filepath: Option<PathBuf>,
}

impl ComputeArray {
    /// Zero-initialized array.
    pub fn new(element_size: usize, element_count: usize) -> Self {
        Self {
            id: NEXT_ARRAY_ID.fetch_add(1, Ordering::Relaxed),
            element_size,
            element_count,
            data: vec![0u8; element_size * element_count],
            filepath: None,
        }
    }

    /// Copies as much of `bytes` as fits; the remainder stays zeroed.
    pub fn from_bytes(element_size: usize, element_count: usize, bytes: &[u8]) -> Self {
        let mut array = Self::new(element_size, element_count);
        let len = bytes.len().min(array.data.len());
        array.data[..len].copy_from_slice(&bytes[..len]);
        array
    }

    pub fn from_slice<T: Pod>(values: &[T]) -> Self {
        Self::from_bytes(size_of::<T>(), values.len(), bytemuck::cast_slice(values))
    }

    pub fn with_filepath(mut self, path: impl Into<PathBuf>) -> Self {
        self.filepath = Some(path.into());
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn filepath(&self) -> Option<&Path> {
        self.filepath.as_deref()
    }

    /// Copies the contents out as `T`, ignoring any trailing partial element.
    pub fn read<T: Pod>(&self) -> Vec<T> {
        let usable = self.data.len() / size_of::<T>() * size_of::<T>();
        bytemuck::pod_collect_to_vec(&self.data[..usable])
    }

    /// Deep copy with a fresh id.
    pub fn duplicate(&self) -> Self {
        Self {
            id: NEXT_ARRAY_ID.fetch_add(1, Ordering::Relaxed),
            element_size: self.element_size,
            element_count: self.element_count,
            data: self.data.clone(),
            filepath: self.filepath.clone(),
        }
    }
}
