use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytemuck::Pod;

use crate::{ReflectType, copy_by_name};

struct BlockState {
    descriptor: Arc<ReflectType>,
    bytes: Vec<u8>,
}

/// Parameter bytes plus the descriptor they follow, shared between a scene object and the
/// pipelines bound to it.
///
/// Every mutation bumps [`version`](ParamBlock::version) so consumers can notice edits
/// without comparing bytes.
pub struct ParamBlock {
    state: RwLock<BlockState>,
    version: AtomicU64,
}

impl std::fmt::Debug for ParamBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (descriptor, bytes) = self.snapshot();
        f.debug_struct("ParamBlock")
            .field("descriptor", &descriptor.name())
            .field("size", &bytes.len())
            .field("version", &self.version())
            .finish()
    }
}

impl ParamBlock {
    pub fn new(descriptor: ReflectType) -> Arc<Self> {
        let bytes = descriptor.default_bytes();
        Self::with_bytes(Arc::new(descriptor), bytes)
    }

    pub fn with_bytes(descriptor: Arc<ReflectType>, mut bytes: Vec<u8>) -> Arc<Self> {
        bytes.resize(descriptor.size(), 0);
        Arc::new(Self {
            state: RwLock::new(BlockState { descriptor, bytes }),
            version: AtomicU64::new(0),
        })
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, BlockState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, BlockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn descriptor(&self) -> Arc<ReflectType> {
        self.read_state().descriptor.clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.read_state().bytes.clone()
    }

    /// Descriptor and bytes read under one lock.
    pub fn snapshot(&self) -> (Arc<ReflectType>, Vec<u8>) {
        let state = self.read_state();
        (state.descriptor.clone(), state.bytes.clone())
    }

    pub fn read<R>(&self, f: impl FnOnce(&ReflectType, &[u8]) -> R) -> R {
        let state = self.read_state();
        f(&state.descriptor, &state.bytes)
    }

    pub fn write<R>(&self, f: impl FnOnce(&ReflectType, &mut [u8]) -> R) -> R {
        let mut state = self.write_state();
        let BlockState { descriptor, bytes } = &mut *state;
        let result = f(descriptor, bytes);
        self.version.fetch_add(1, Ordering::AcqRel);
        result
    }

    pub fn get<T: Pod>(&self, name: &str) -> Option<T> {
        self.read(|ty, bytes| ty.get(bytes, name))
    }

    pub fn set<T: Pod>(&self, name: &str, value: T) -> bool {
        self.write(|ty, bytes| ty.set(bytes, name, value))
    }

    /// Overwrites the bytes. Input is truncated or zero-padded to the descriptor size.
    pub fn set_bytes(&self, src: &[u8]) {
        self.write(|_, bytes| {
            let len = src.len().min(bytes.len());
            bytes[..len].copy_from_slice(&src[..len]);
            bytes[len..].fill(0);
        });
    }

    /// Copies matching fields from a blob laid out by `src_ty`.
    pub fn copy_from(&self, src_ty: &ReflectType, src: &[u8]) -> usize {
        self.write(|ty, bytes| copy_by_name(ty, bytes, src_ty, src))
    }

    /// Switches to a new descriptor, carrying over fields that still exist.
    pub fn migrate(&self, descriptor: Arc<ReflectType>) {
        let mut state = self.write_state();
        if state.descriptor.layout_eq(&descriptor) {
            state.descriptor = descriptor;
            return;
        }
        let mut bytes = descriptor.default_bytes();
        copy_by_name(&descriptor, &mut bytes, &state.descriptor, &state.bytes);
        state.descriptor = descriptor;
        state.bytes = bytes;
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Replaces descriptor and bytes together.
    pub fn replace(&self, descriptor: Arc<ReflectType>, mut bytes: Vec<u8>) {
        bytes.resize(descriptor.size(), 0);
        let mut state = self.write_state();
        state.descriptor = descriptor;
        state.bytes = bytes;
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}
