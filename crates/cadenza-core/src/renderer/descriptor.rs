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

//! Fixed-capacity descriptor tables with slot recycling.
//!
//! The [`DescriptorAllocator`] owns one [`DescriptorTable`] per [`DescriptorKind`].
//! Each table hands out slot indices from a free-list stack first and from a
//! high-water mark second, so allocation and release are O(1) and a table never
//! grows or defragments. Running out of slots is a fatal configuration error.
//!
//! Handles are plain `Copy` values. For lifetimes that are easy to get wrong, two
//! ownership wrappers exist:
//!
//! - [`ScopedDescriptor`] frees its slot when dropped.
//! - [`OwnedDescriptor`] must be released exactly once with
//!   [`OwnedDescriptor::release`]; dropping it unreleased leaks the slot and logs a warning.

use crate::renderer::api::{DescriptorCapacities, DescriptorHandle, DescriptorKind};
use crate::renderer::error::{ContractViolation, DeviceError};
use crate::renderer::traits::GpuBackend;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_ALLOCATOR_ID: AtomicU32 = AtomicU32::new(1);

/// One descriptor table: a fixed slot array, a free-list stack and a high-water mark.
#[derive(Debug)]
pub struct DescriptorTable {
    kind: DescriptorKind,
    capacity: u32,
    free_list: Vec<u32>,
    high_water: u32,
    live: Vec<bool>,
}

impl DescriptorTable {
    fn new(kind: DescriptorKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            free_list: Vec::new(),
            high_water: 0,
            live: vec![false; capacity as usize],
        }
    }

    fn allocate(&mut self) -> Option<u32> {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None if self.high_water < self.capacity => {
                self.high_water += 1;
                self.high_water - 1
            }
            None => return None,
        };
        self.live[index as usize] = true;
        Some(index)
    }

    fn free(&mut self, index: u32) -> bool {
        match self.live.get_mut(index as usize) {
            Some(live) if *live => {
                *live = false;
                self.free_list.push(index);
                true
            }
            _ => false,
        }
    }

    /// Slots currently handed out.
    pub fn used(&self) -> u32 {
        self.high_water - self.free_list.len() as u32
    }

    /// The table's fixed capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The highest slot count ever reached.
    pub fn high_water_mark(&self) -> u32 {
        self.high_water
    }

    /// The kind of descriptor stored in this table.
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }
}

/// Hands out and recycles slots of the four descriptor tables.
#[derive(Debug)]
pub struct DescriptorAllocator {
    id: u32,
    tables: Mutex<[DescriptorTable; 4]>,
}

impl DescriptorAllocator {
    /// Creates the four tables with the given fixed capacities.
    pub fn new(capacities: &DescriptorCapacities) -> Self {
        let id = NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed);
        let tables = DescriptorKind::ALL.map(|kind| DescriptorTable::new(kind, capacities.get(kind)));
        log::info!(
            "DescriptorAllocator: Created allocator #{id} with capacities {capacities:?}"
        );
        Self {
            id,
            tables: Mutex::new(tables),
        }
    }

    fn tables(&self) -> MutexGuard<'_, [DescriptorTable; 4]> {
        // Tables are only mutated after validation.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The identity stamped into every handle this allocator issues.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Allocates a slot of `kind`.
    ///
    /// ## Errors
    /// * `DeviceError::DescriptorTableExhausted` - If the table is full. This is fatal.
    pub fn allocate(&self, kind: DescriptorKind) -> Result<DescriptorHandle, DeviceError> {
        let mut tables = self.tables();
        let table = &mut tables[kind.table_index()];
        match table.allocate() {
            Some(index) => Ok(DescriptorHandle {
                kind,
                index,
                allocator: self.id,
            }),
            None => {
                let err = DeviceError::DescriptorTableExhausted {
                    kind,
                    capacity: table.capacity,
                };
                log::error!("DescriptorAllocator: {err}");
                Err(err)
            }
        }
    }

    /// Returns a slot to its table.
    ///
    /// ## Errors
    /// * `ContractViolation::ForeignHandle` - If another allocator issued the handle.
    /// * `ContractViolation::DoubleFree` - If the slot is not currently allocated.
    ///
    /// In both cases the tables are left untouched.
    pub fn free(&self, handle: DescriptorHandle) -> Result<(), ContractViolation> {
        self.validate(handle)?;
        let mut tables = self.tables();
        if tables[handle.kind.table_index()].free(handle.index) {
            Ok(())
        } else {
            let violation = ContractViolation::DoubleFree(handle);
            log::error!("DescriptorAllocator: {violation}");
            Err(violation)
        }
    }

    /// Checks that a handle was issued by this allocator.
    pub fn validate(&self, handle: DescriptorHandle) -> Result<(), ContractViolation> {
        if handle.allocator != self.id {
            let violation = ContractViolation::ForeignHandle(handle);
            log::error!("DescriptorAllocator: {violation}");
            return Err(violation);
        }
        Ok(())
    }

    /// Returns `true` if the handle names a currently allocated slot of this allocator.
    pub fn is_live(&self, handle: DescriptorHandle) -> bool {
        handle.allocator == self.id
            && self.tables()[handle.kind.table_index()]
                .live
                .get(handle.index as usize)
                .copied()
                .unwrap_or(false)
    }

    /// Slots of `kind` currently handed out.
    pub fn used_count(&self, kind: DescriptorKind) -> u32 {
        self.tables()[kind.table_index()].used()
    }

    /// Slots handed out across all tables.
    pub fn total_used(&self) -> u32 {
        self.tables().iter().map(DescriptorTable::used).sum()
    }

    /// The fixed capacity of the `kind` table.
    pub fn capacity(&self, kind: DescriptorKind) -> u32 {
        self.tables()[kind.table_index()].capacity
    }

    /// The highest number of slots of `kind` ever handed out at once.
    pub fn high_water_mark(&self, kind: DescriptorKind) -> u32 {
        self.tables()[kind.table_index()].high_water
    }

    /// Allocates a slot that is freed when the returned guard is dropped.
    pub fn scoped(self: &Arc<Self>, kind: DescriptorKind) -> Result<ScopedDescriptor, DeviceError> {
        let handle = self.allocate(kind)?;
        Ok(ScopedDescriptor {
            allocator: Arc::clone(self),
            backend: None,
            handle,
        })
    }

    /// Allocates a slot that must be released explicitly by its owner.
    pub fn allocate_owned(&self, kind: DescriptorKind) -> Result<OwnedDescriptor, DeviceError> {
        Ok(OwnedDescriptor {
            handle: self.allocate(kind)?,
            released: false,
        })
    }
}

/// A descriptor slot freed when the guard goes out of scope.
///
/// Intended for transient uses such as the temporary view of a single upload.
#[derive(Debug)]
pub struct ScopedDescriptor {
    allocator: Arc<DescriptorAllocator>,
    backend: Option<Arc<dyn GpuBackend>>,
    handle: DescriptorHandle,
}

impl ScopedDescriptor {
    /// The guarded handle.
    pub fn handle(&self) -> DescriptorHandle {
        self.handle
    }

    /// Also clears the backend's view of the slot on drop.
    pub(crate) fn clearing_on_drop(mut self, backend: Arc<dyn GpuBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

impl std::ops::Deref for ScopedDescriptor {
    type Target = DescriptorHandle;

    fn deref(&self) -> &DescriptorHandle {
        &self.handle
    }
}

impl Drop for ScopedDescriptor {
    fn drop(&mut self) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.clear_descriptor(self.handle) {
                log::warn!(
                    "ScopedDescriptor: Failed to clear {} on drop: {e}",
                    self.handle
                );
            }
        }
        if let Err(e) = self.allocator.free(self.handle) {
            log::error!("ScopedDescriptor: Failed to free {} on drop: {e}", self.handle);
        }
    }
}

/// A long-lived descriptor slot owned by a resource object.
///
/// The owner releases it exactly once in its teardown. The handle is not `Copy`,
/// so it cannot be released twice.
#[derive(Debug)]
pub struct OwnedDescriptor {
    handle: DescriptorHandle,
    released: bool,
}

impl OwnedDescriptor {
    /// The owned handle.
    pub fn handle(&self) -> DescriptorHandle {
        self.handle
    }

    /// Returns the slot to the allocator that issued it.
    pub fn release(mut self, allocator: &DescriptorAllocator) -> Result<(), ContractViolation> {
        let result = allocator.free(self.handle);
        self.released = result.is_ok();
        result
    }
}

impl Drop for OwnedDescriptor {
    fn drop(&mut self) {
        if !self.released {
            log::warn!(
                "OwnedDescriptor: {} dropped without being released; the slot is leaked",
                self.handle
            );
        }
    }
}
