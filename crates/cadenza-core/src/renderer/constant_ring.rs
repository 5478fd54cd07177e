// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-frame scratch memory for shader constants.
//!
//! The [`ConstantRing`] pre-allocates one CPU-writable constant buffer per frame
//! slot and cycles through them in lockstep with the frame pipeline:
//!
//! ```text
//! Frame K:     [Slot K % N: CPU writes]  ← write() bump-allocates here
//! Frame K+1:   [Slot K % N: GPU reads]   ← frame K still in flight
//! Frame K+N:   [Slot K % N: CPU writes]  ← begin_frame waited for frame K
//! ```
//!
//! Inside a slot, [`write`](ConstantRing::write) is a bump allocator with
//! [`CONSTANT_ALIGNMENT`]-aligned offsets. The buffers are bound directly and
//! never occupy a descriptor table slot.

use crate::math::align_up;
use crate::renderer::api::{BufferDescriptor, BufferId, BufferUsage, CONSTANT_ALIGNMENT};
use crate::renderer::error::{DeviceError, RenderError};
use crate::renderer::traits::GpuBackend;
use std::borrow::Cow;
use std::sync::Arc;

/// A range of the current frame's constant buffer holding freshly written data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantAllocation {
    /// The slot's buffer.
    pub buffer: BufferId,
    /// Byte offset of the data, a multiple of [`CONSTANT_ALIGNMENT`].
    pub offset: u64,
    /// Size of the data in bytes.
    pub size: u64,
}

/// A single slot: a persistent buffer and the bump cursor into it.
#[derive(Debug)]
struct RingSlot {
    buffer: BufferId,
    cursor: u64,
}

/// A ring of per-frame constant buffers advanced once per frame.
#[derive(Debug)]
pub struct ConstantRing {
    backend: Arc<dyn GpuBackend>,
    slots: Vec<RingSlot>,
    current_index: usize,
    slot_size: u64,
    label: String,
}

impl ConstantRing {
    /// Allocates `slot_count` buffers of `slot_size` bytes each.
    ///
    /// ## Errors
    /// Returns a [`DeviceError`] if buffer creation fails.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        slot_count: usize,
        slot_size: u64,
        label: impl Into<String>,
    ) -> Result<Self, DeviceError> {
        let label = label.into();
        let mut slots = Vec::with_capacity(slot_count);

        for i in 0..slot_count {
            let buffer = backend.create_buffer(&BufferDescriptor {
                label: Some(Cow::Owned(format!("{label} [slot {i}]"))),
                size: slot_size,
                usage: BufferUsage::CONSTANT | BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC,
            })?;
            slots.push(RingSlot { buffer, cursor: 0 });
        }

        log::info!(
            "ConstantRing({label}): Allocated {slot_count} slots of {slot_size} bytes"
        );

        Ok(Self {
            backend,
            slots,
            current_index: 0,
            slot_size,
            label,
        })
    }

    /// Copies `data` into the current slot and returns where it landed.
    ///
    /// ## Errors
    /// Returns `DeviceError::OutOfMemory` if the slot has no room left for this frame.
    pub fn write(&mut self, data: &[u8]) -> Result<ConstantAllocation, RenderError> {
        let slot = &mut self.slots[self.current_index];
        let offset = align_up(slot.cursor, CONSTANT_ALIGNMENT);
        let size = data.len() as u64;

        if offset + size > self.slot_size {
            let err = DeviceError::OutOfMemory(format!(
                "ConstantRing({}) slot {} cannot fit {size} bytes at offset {offset} (slot size {})",
                self.label, self.current_index, self.slot_size
            ));
            log::error!("{err}");
            return Err(err.into());
        }

        self.backend.write_buffer(slot.buffer, offset, data)?;
        slot.cursor = offset + size;

        Ok(ConstantAllocation {
            buffer: slot.buffer,
            offset,
            size,
        })
    }

    /// Writes a plain-old-data value into the current slot.
    pub fn write_pod<T: bytemuck::Pod>(&mut self, value: &T) -> Result<ConstantAllocation, RenderError> {
        self.write(bytemuck::bytes_of(value))
    }

    /// Moves to the next slot and rewinds its cursor.
    ///
    /// Called exactly once per submitted frame.
    pub fn move_to_next_frame(&mut self) {
        self.current_index = (self.current_index + 1) % self.slots.len();
        self.slots[self.current_index].cursor = 0;
    }

    /// The buffer of the current slot.
    pub fn current_buffer(&self) -> BufferId {
        self.slots[self.current_index].buffer
    }

    /// The buffer of slot `index`.
    pub fn buffer(&self, index: usize) -> Option<BufferId> {
        self.slots.get(index).map(|s| s.buffer)
    }

    /// The current slot index.
    pub fn current_slot_index(&self) -> usize {
        self.current_index
    }

    /// Bytes written to the current slot this frame, including alignment padding.
    pub fn bytes_used(&self) -> u64 {
        self.slots[self.current_index].cursor
    }

    /// Returns the number of slots in the ring.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The size of each slot in bytes.
    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    /// Destroys every slot's buffer. The GPU must be idle.
    pub fn destroy(&mut self) {
        for slot in self.slots.drain(..) {
            if let Err(e) = self.backend.destroy_buffer(slot.buffer) {
                log::warn!(
                    "ConstantRing({}): Failed to destroy buffer {:?}: {e}",
                    self.label,
                    slot.buffer
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mock::MockBackend;

    #[test]
    fn test_new_creates_one_buffer_per_slot() {
        let backend = MockBackend::new();
        let ring = ConstantRing::new(backend.clone(), 3, 1024, "Constants").unwrap();

        assert_eq!(ring.slot_count(), 3);
        assert_eq!(backend.state().buffers.len(), 3);
        let ids: Vec<_> = (0..3).map(|i| ring.buffer(i).unwrap()).collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
    }

    #[test]
    fn test_writes_are_aligned_bump_allocations() {
        let backend = MockBackend::new();
        let mut ring = ConstantRing::new(backend.clone(), 2, 1024, "Constants").unwrap();

        let a = ring.write(&[1u8; 16]).unwrap();
        let b = ring.write(&[2u8; 300]).unwrap();
        let c = ring.write_pod(&[3.0f32; 4]).unwrap();

        assert_eq!((a.offset, b.offset, c.offset), (0, 256, 768));
        assert_eq!(c.size, 16);
        let state = backend.state();
        let memory = &state.buffers[&a.buffer];
        assert_eq!(&memory[0..16], &[1u8; 16]);
        assert_eq!(&memory[256..556], &[2u8; 300][..]);
    }

    #[test]
    fn test_overflow_is_reported() {
        let backend = MockBackend::new();
        let mut ring = ConstantRing::new(backend, 2, 512, "Constants").unwrap();
        ring.write(&[0u8; 300]).unwrap();

        let err = ring.write(&[0u8; 300]).unwrap_err();

        assert!(matches!(err, RenderError::Device(DeviceError::OutOfMemory(_))));
        assert_eq!(ring.bytes_used(), 300, "failed write must not move the cursor");
    }

    #[test]
    fn test_advance_cycles_and_rewinds() {
        let backend = MockBackend::new();
        let mut ring = ConstantRing::new(backend, 3, 1024, "Constants").unwrap();
        let first = ring.current_buffer();
        ring.write(&[0u8; 64]).unwrap();

        ring.move_to_next_frame();
        assert_eq!(ring.current_slot_index(), 1);
        assert_ne!(ring.current_buffer(), first);
        ring.move_to_next_frame();
        ring.move_to_next_frame();

        assert_eq!(ring.current_slot_index(), 0);
        assert_eq!(ring.current_buffer(), first);
        assert_eq!(ring.bytes_used(), 0);
        assert_eq!(ring.write(&[0u8; 4]).unwrap().offset, 0);
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let backend = MockBackend::new();
        let mut ring = ConstantRing::new(backend.clone(), 2, 256, "Constants").unwrap();
        ring.destroy();
        assert!(backend.state().buffers.is_empty());
    }
}
