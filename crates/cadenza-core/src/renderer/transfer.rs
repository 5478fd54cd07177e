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

//! The staging upload path.
//!
//! The [`TransferEngine`] owns a lazily grown pool of CPU-writable staging buffers.
//! Each staging buffer has its own transfer-queue [`CommandRecorder`], whose fence
//! tells when the GPU has finished reading it. An upload:
//!
//! 1. acquires a free staging buffer, growing the pool up to its limit or blocking
//!    on the oldest in-flight upload;
//! 2. copies the source into staging memory, row by row when the source pitch
//!    differs from the pitch the device requires;
//! 3. records and submits a device-side copy into the destination;
//! 4. either blocks until the copy completes ([`upload_immediate`](TransferEngine::upload_immediate))
//!    or parks the staging buffer in the pending queue ([`upload_async`](TransferEngine::upload_async)).
//!
//! Uploads larger than one staging buffer are split into row bands (textures) or
//! byte ranges (buffers), each going through the full cycle.

use crate::math::align_up;
use crate::renderer::api::*;
use crate::renderer::error::{DeviceError, RenderError, TransferError};
use crate::renderer::recorder::CommandRecorder;
use crate::renderer::traits::GpuBackend;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Where the bytes of an upload end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDestination {
    /// A region of a texture. The region's size must equal the source's `width` x `height`.
    Texture {
        /// The destination texture.
        texture: TextureId,
        /// The region to fill.
        region: TextureRegion,
    },
    /// A byte range of a buffer starting at `offset`.
    Buffer {
        /// The destination buffer.
        buffer: BufferId,
        /// Byte offset of the first byte written.
        offset: u64,
    },
}

impl UploadDestination {
    /// The resource written by the upload.
    pub fn resource(&self) -> ResourceRef {
        match self {
            UploadDestination::Texture { texture, .. } => ResourceRef::Texture(*texture),
            UploadDestination::Buffer { buffer, .. } => ResourceRef::Buffer(*buffer),
        }
    }
}

/// A GPU resource an upload can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// A texture.
    Texture(TextureId),
    /// A buffer.
    Buffer(BufferId),
}

/// CPU data to copy into a GPU resource.
///
/// The source is tightly packed: `width * bytes_per_pixel` bytes per row, `height` rows.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    /// The source bytes.
    pub source: &'a [u8],
    /// Texels per source row.
    pub width: u32,
    /// Number of source rows.
    pub height: u32,
    /// Size of one texel in bytes.
    pub bytes_per_pixel: u32,
    /// Where the data goes.
    pub destination: UploadDestination,
}

impl<'a> UploadRequest<'a> {
    /// An upload of `width` x `height` texels into `region` of `texture`.
    pub fn texture(
        source: &'a [u8],
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        texture: TextureId,
        region: TextureRegion,
    ) -> Self {
        Self {
            source,
            width,
            height,
            bytes_per_pixel,
            destination: UploadDestination::Texture { texture, region },
        }
    }

    /// An upload covering a whole `width` x `height` texture.
    pub fn full_texture(
        source: &'a [u8],
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        texture: TextureId,
    ) -> Self {
        let region = TextureRegion::full(crate::math::Extent2D::new(width, height));
        Self::texture(source, width, height, bytes_per_pixel, texture, region)
    }

    /// An upload of raw bytes into `buffer` at `offset`.
    pub fn buffer(source: &'a [u8], buffer: BufferId, offset: u64) -> Self {
        Self {
            source,
            width: source.len() as u32,
            height: 1,
            bytes_per_pixel: 1,
            destination: UploadDestination::Buffer { buffer, offset },
        }
    }

    fn row_bytes(&self) -> u64 {
        self.width as u64 * self.bytes_per_pixel as u64
    }
}

/// Identifies an asynchronous upload until it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadTicket(pub u64);

/// Counters describing the transfer engine's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Upload requests accepted.
    pub uploads: u64,
    /// Copy submissions (one per band or byte range).
    pub chunks_submitted: u64,
    /// Bytes written into staging memory, including row padding.
    pub bytes_staged: u64,
    /// Times an acquire had to block on an in-flight upload.
    pub stalls: u64,
    /// Staging buffers created so far.
    pub pool_size: usize,
}

#[derive(Debug)]
struct StagingBuffer {
    buffer: BufferId,
    recorder: CommandRecorder,
    in_use: bool,
}

#[derive(Debug)]
struct PendingUpload {
    ticket: UploadTicket,
    staging: usize,
    fence_value: FenceValue,
    destination: ResourceRef,
}

#[derive(Debug, Clone, Copy)]
enum Chunk {
    TextureBand { first_row: u32, rows: u32 },
    BufferRange { start: u64, len: u64 },
}

#[derive(Debug)]
struct UploadPlan {
    chunks: Vec<Chunk>,
    row_bytes: u64,
    pitch: u64,
}

/// Routes CPU data into GPU resources through a pool of staging buffers.
#[derive(Debug)]
pub struct TransferEngine {
    backend: Arc<dyn GpuBackend>,
    pool: Vec<StagingBuffer>,
    pool_limit: usize,
    buffer_size: u64,
    fence_timeout: Option<Duration>,
    cursor: usize,
    pending: VecDeque<PendingUpload>,
    next_ticket: u64,
    scratch: Vec<u8>,
    stats: TransferStats,
}

/// Tags device failures as upload failures; other errors pass through.
fn as_transfer_error(err: RenderError) -> RenderError {
    match err {
        RenderError::Device(e) => TransferError::Device(e).into(),
        other => other,
    }
}

impl TransferEngine {
    /// Creates an engine that may grow up to `pool_limit` staging buffers of `buffer_size` bytes.
    ///
    /// No staging memory is allocated until the first upload.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        pool_limit: usize,
        buffer_size: u64,
        fence_timeout: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            pool: Vec::with_capacity(pool_limit),
            pool_limit,
            buffer_size,
            fence_timeout,
            cursor: 0,
            pending: VecDeque::new(),
            next_ticket: 1,
            scratch: Vec::new(),
            stats: TransferStats::default(),
        }
    }

    /// Copies `request` into its destination and blocks until the copy has completed.
    ///
    /// ## Errors
    /// * `TransferError::InvalidRequest` - If the request is malformed or out of bounds.
    /// * `TransferError::Device` - If staging memory cannot be allocated or the copy fails.
    pub fn upload_immediate(&mut self, request: &UploadRequest) -> Result<(), RenderError> {
        let plan = self.plan(request)?;
        self.stats.uploads += 1;
        for chunk in &plan.chunks {
            let (staging, _) = self
                .submit_chunk(request, &plan, chunk)
                .map_err(as_transfer_error)?;
            self.pool[staging]
                .recorder
                .wait_for_completion()
                .map_err(as_transfer_error)?;
            self.pool[staging].in_use = false;
        }
        log::debug!(
            "TransferEngine: Uploaded {} bytes to {:?} in {} chunk(s)",
            request.source.len(),
            request.destination.resource(),
            plan.chunks.len()
        );
        Ok(())
    }

    /// Submits `request` without waiting for the copy.
    ///
    /// The destination reports [`is_pending`](TransferEngine::is_pending) until
    /// [`poll`](TransferEngine::poll) observes every chunk's fence complete.
    pub fn upload_async(&mut self, request: &UploadRequest) -> Result<UploadTicket, RenderError> {
        let plan = self.plan(request)?;
        let ticket = UploadTicket(self.next_ticket);
        self.next_ticket += 1;
        self.stats.uploads += 1;

        for chunk in &plan.chunks {
            let (staging, fence_value) = self
                .submit_chunk(request, &plan, chunk)
                .map_err(as_transfer_error)?;
            self.pending.push_back(PendingUpload {
                ticket,
                staging,
                fence_value,
                destination: request.destination.resource(),
            });
        }
        log::debug!(
            "TransferEngine: Queued upload {ticket:?} of {} bytes to {:?}",
            request.source.len(),
            request.destination.resource()
        );
        Ok(ticket)
    }

    /// Retires every pending upload whose copy has completed. Never blocks.
    ///
    /// Returns the number of chunks retired.
    pub fn poll(&mut self) -> Result<usize, RenderError> {
        let completed = self
            .pending
            .iter()
            .map(|p| self.pool[p.staging].recorder.fence().is_complete(p.fence_value))
            .collect::<Result<Vec<bool>, DeviceError>>()
            .map_err(|e| as_transfer_error(e.into()))?;

        let mut retired = 0;
        let pending = std::mem::take(&mut self.pending);
        for (upload, done) in pending.into_iter().zip(completed) {
            if done {
                let staging = &mut self.pool[upload.staging];
                staging.recorder.poll_completion()?;
                staging.in_use = false;
                retired += 1;
            } else {
                self.pending.push_back(upload);
            }
        }
        if retired > 0 {
            log::trace!("TransferEngine: Retired {retired} pending upload chunk(s)");
        }
        Ok(retired)
    }

    /// Blocks until every pending upload has completed.
    pub fn flush(&mut self) -> Result<(), RenderError> {
        for upload in &self.pending {
            self.pool[upload.staging]
                .recorder
                .fence()
                .wait_until(upload.fence_value)
                .map_err(as_transfer_error)?;
        }
        self.poll()?;
        debug_assert!(self.pending.is_empty());
        Ok(())
    }

    /// Returns `true` while a copy into `resource` may still be executing.
    pub fn is_pending(&self, resource: ResourceRef) -> bool {
        self.pending.iter().any(|p| p.destination == resource)
    }

    /// Returns `true` while any chunk of the upload identified by `ticket` is executing.
    pub fn is_ticket_pending(&self, ticket: UploadTicket) -> bool {
        self.pending.iter().any(|p| p.ticket == ticket)
    }

    /// The number of upload chunks still in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Activity counters.
    pub fn stats(&self) -> TransferStats {
        TransferStats {
            pool_size: self.pool.len(),
            ..self.stats
        }
    }

    /// Copies a texture region back to the CPU, tightly packed. Blocks.
    pub fn readback_texture(
        &mut self,
        texture: TextureId,
        region: TextureRegion,
    ) -> Result<Vec<u8>, RenderError> {
        let descriptor = self.texture_descriptor(texture)?;
        if region.extent.is_empty() || !region.fits_within(descriptor.size) {
            return Err(TransferError::InvalidRequest(format!(
                "readback region {region:?} is outside {texture:?} of size {:?}",
                descriptor.size
            ))
            .into());
        }

        let row_bytes = region.extent.width as u64 * descriptor.format.bytes_per_pixel() as u64;
        let pitch = align_up(row_bytes, self.backend.copy_pitch_alignment() as u64);
        let size = pitch * region.extent.height as u64;

        let packed = self.copy_and_read(size, |recorder, readback| {
            recorder.copy_texture_to_buffer(texture, region, readback, 0, pitch as u32);
        })?;

        let mut tight = Vec::with_capacity((row_bytes * region.extent.height as u64) as usize);
        for row in packed.chunks(pitch as usize) {
            tight.extend_from_slice(&row[..row_bytes as usize]);
        }
        Ok(tight)
    }

    /// Copies a byte range of a buffer back to the CPU. Blocks.
    pub fn readback_buffer(
        &mut self,
        buffer: BufferId,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, RenderError> {
        if size == 0
            || offset % COPY_BUFFER_ALIGNMENT != 0
            || size % COPY_BUFFER_ALIGNMENT != 0
        {
            return Err(TransferError::InvalidRequest(format!(
                "buffer readback of {size} bytes at offset {offset} must be non-empty and {COPY_BUFFER_ALIGNMENT}-byte aligned"
            ))
            .into());
        }
        self.copy_and_read(size, |recorder, readback| {
            recorder.copy_buffer_to_buffer(buffer, offset, readback, 0, size);
        })
    }

    /// The number of staging fences whose last signal has not completed.
    pub fn outstanding_fences(&self) -> Result<usize, DeviceError> {
        let mut outstanding = 0;
        for staging in &self.pool {
            if staging.recorder.fence().is_outstanding()? {
                outstanding += 1;
            }
        }
        Ok(outstanding)
    }

    /// Waits for every pending upload, then destroys the staging pool.
    pub fn destroy(&mut self) -> Result<(), RenderError> {
        self.flush()?;
        for mut staging in self.pool.drain(..) {
            staging.recorder.destroy()?;
            if let Err(e) = self.backend.destroy_buffer(staging.buffer) {
                log::warn!(
                    "TransferEngine: Failed to destroy staging buffer {:?}: {e}",
                    staging.buffer
                );
            }
        }
        self.cursor = 0;
        Ok(())
    }

    // --- Internals ---

    fn texture_descriptor(&self, texture: TextureId) -> Result<TextureDescriptor<'static>, RenderError> {
        self.backend.texture_descriptor(texture).map_err(|e| match e {
            DeviceError::ResourceNotFound(_) => {
                TransferError::InvalidRequest(format!("unknown texture {texture:?}")).into()
            }
            other => TransferError::Device(other).into(),
        })
    }

    fn plan(&self, request: &UploadRequest) -> Result<UploadPlan, RenderError> {
        let invalid = |msg: String| -> RenderError { TransferError::InvalidRequest(msg).into() };

        if request.width == 0 || request.height == 0 || request.bytes_per_pixel == 0 {
            return Err(invalid(format!(
                "empty upload ({}x{} texels of {} bytes)",
                request.width, request.height, request.bytes_per_pixel
            )));
        }
        let row_bytes = request.row_bytes();
        let expected = row_bytes * request.height as u64;
        if (request.source.len() as u64) < expected {
            return Err(invalid(format!(
                "source holds {} bytes, {expected} expected",
                request.source.len()
            )));
        }

        match request.destination {
            UploadDestination::Texture { texture, region } => {
                let descriptor = self.texture_descriptor(texture)?;
                if region.extent != crate::math::Extent2D::new(request.width, request.height) {
                    return Err(invalid(format!(
                        "region {region:?} does not match a {}x{} source",
                        request.width, request.height
                    )));
                }
                if !region.fits_within(descriptor.size) {
                    return Err(invalid(format!(
                        "region {region:?} is outside {texture:?} of size {:?}",
                        descriptor.size
                    )));
                }
                if descriptor.format.bytes_per_pixel() != request.bytes_per_pixel {
                    return Err(invalid(format!(
                        "{} bytes per pixel does not match format {:?}",
                        request.bytes_per_pixel, descriptor.format
                    )));
                }

                let pitch = align_up(row_bytes, self.backend.copy_pitch_alignment() as u64);
                if pitch > self.buffer_size {
                    return Err(invalid(format!(
                        "a {pitch}-byte row does not fit a {}-byte staging buffer",
                        self.buffer_size
                    )));
                }
                let rows_per_band = (self.buffer_size / pitch).min(u32::MAX as u64) as u32;
                let chunks = (0..request.height)
                    .step_by(rows_per_band as usize)
                    .map(|first_row| Chunk::TextureBand {
                        first_row,
                        rows: rows_per_band.min(request.height - first_row),
                    })
                    .collect();
                Ok(UploadPlan {
                    chunks,
                    row_bytes,
                    pitch,
                })
            }
            UploadDestination::Buffer { offset, .. } => {
                if offset % COPY_BUFFER_ALIGNMENT != 0 || expected % COPY_BUFFER_ALIGNMENT != 0 {
                    return Err(invalid(format!(
                        "buffer upload of {expected} bytes at offset {offset} must be {COPY_BUFFER_ALIGNMENT}-byte aligned"
                    )));
                }
                let chunk_size = self.buffer_size - self.buffer_size % COPY_BUFFER_ALIGNMENT;
                let chunks = (0..expected)
                    .step_by(chunk_size as usize)
                    .map(|start| Chunk::BufferRange {
                        start,
                        len: chunk_size.min(expected - start),
                    })
                    .collect();
                Ok(UploadPlan {
                    chunks,
                    row_bytes,
                    pitch: row_bytes,
                })
            }
        }
    }

    /// Stages one chunk and submits its copy. Returns the staging slot and its fence value.
    fn submit_chunk(
        &mut self,
        request: &UploadRequest,
        plan: &UploadPlan,
        chunk: &Chunk,
    ) -> Result<(usize, FenceValue), RenderError> {
        let index = self.acquire_staging()?;
        let staging = self.pool[index].buffer;

        let staged = match *chunk {
            Chunk::TextureBand { first_row, rows } => {
                let row_bytes = plan.row_bytes as usize;
                let pitch = plan.pitch as usize;
                let start = first_row as usize * row_bytes;
                let band = &request.source[start..start + rows as usize * row_bytes];
                if pitch == row_bytes {
                    self.backend.write_buffer(staging, 0, band)?;
                    band.len()
                } else {
                    self.scratch.clear();
                    self.scratch.resize(pitch * rows as usize, 0);
                    for (src, dst) in band
                        .chunks_exact(row_bytes)
                        .zip(self.scratch.chunks_exact_mut(pitch))
                    {
                        dst[..row_bytes].copy_from_slice(src);
                    }
                    self.backend.write_buffer(staging, 0, &self.scratch)?;
                    self.scratch.len()
                }
            }
            Chunk::BufferRange { start, len } => {
                let bytes = &request.source[start as usize..(start + len) as usize];
                self.backend.write_buffer(staging, 0, bytes)?;
                bytes.len()
            }
        };

        let slot = &mut self.pool[index];
        let recorder = &mut slot.recorder;
        recorder.begin_recording()?;
        match (*chunk, request.destination) {
            (Chunk::TextureBand { first_row, rows }, UploadDestination::Texture { texture, region }) => {
                let band_region = TextureRegion::new(
                    region.origin.x,
                    region.origin.y + first_row,
                    region.extent.width,
                    rows,
                );
                recorder.copy_buffer_to_texture(staging, 0, plan.pitch as u32, texture, band_region);
            }
            (Chunk::BufferRange { start, len }, UploadDestination::Buffer { buffer, offset }) => {
                recorder.copy_buffer_to_buffer(staging, 0, buffer, offset + start, len);
            }
            _ => unreachable!("upload plans only contain chunks matching their destination"),
        }
        recorder.end_recording()?;
        let fence_value = recorder.submit()?;
        slot.in_use = true;

        self.stats.chunks_submitted += 1;
        self.stats.bytes_staged += staged as u64;
        Ok((index, fence_value))
    }

    /// Returns the index of a staging buffer the GPU is not reading.
    fn acquire_staging(&mut self) -> Result<usize, RenderError> {
        self.poll()?;

        let len = self.pool.len();
        for step in 0..len {
            let index = (self.cursor + step) % len;
            if !self.pool[index].in_use {
                self.cursor = (index + 1) % len;
                return Ok(index);
            }
        }

        if len < self.pool_limit {
            return self.grow_pool();
        }

        let oldest = self.pending.front().map(|p| p.staging).ok_or_else(|| {
            RenderError::from(DeviceError::Backend(
                "every staging buffer is in use but no upload is pending".to_string(),
            ))
        })?;
        self.stats.stalls += 1;
        log::debug!("TransferEngine: Staging pool exhausted, waiting on staging buffer {oldest}");
        self.pool[oldest].recorder.wait_for_completion()?;
        self.poll()?;
        self.cursor = (oldest + 1) % len;
        Ok(oldest)
    }

    fn grow_pool(&mut self) -> Result<usize, RenderError> {
        let index = self.pool.len();
        let label = format!("Staging [{index}]");
        let buffer = self.backend.create_buffer(&BufferDescriptor {
            label: Some(Cow::Borrowed(&label)),
            size: self.buffer_size,
            usage: BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC,
        })?;
        let recorder = CommandRecorder::new(
            self.backend.clone(),
            QueueKind::Transfer,
            label,
            self.fence_timeout,
        )?;
        self.pool.push(StagingBuffer {
            buffer,
            recorder,
            in_use: false,
        });
        log::info!(
            "TransferEngine: Grew staging pool to {}/{} buffers of {} bytes",
            self.pool.len(),
            self.pool_limit,
            self.buffer_size
        );
        Ok(index)
    }

    /// Records a copy into a temporary readback buffer, waits for it and reads the bytes.
    fn copy_and_read(
        &mut self,
        size: u64,
        record: impl FnOnce(&mut CommandRecorder, BufferId),
    ) -> Result<Vec<u8>, RenderError> {
        let readback = self
            .backend
            .create_buffer(&BufferDescriptor {
                label: Some(Cow::Borrowed("Readback")),
                size,
                usage: BufferUsage::MAP_READ | BufferUsage::COPY_DST,
            })
            .map_err(TransferError::Device)?;

        let result = self.copy_into(readback, size, record);

        if let Err(e) = self.backend.destroy_buffer(readback) {
            log::warn!("TransferEngine: Failed to destroy readback buffer {readback:?}: {e}");
        }
        result
    }

    fn copy_into(
        &mut self,
        readback: BufferId,
        size: u64,
        record: impl FnOnce(&mut CommandRecorder, BufferId),
    ) -> Result<Vec<u8>, RenderError> {
        let index = self.acquire_staging().map_err(as_transfer_error)?;
        let recorder = &mut self.pool[index].recorder;
        recorder.begin_recording()?;
        record(&mut *recorder, readback);
        recorder.end_recording()?;
        recorder.submit().map_err(as_transfer_error)?;
        recorder.wait_for_completion().map_err(as_transfer_error)?;
        self.backend
            .read_buffer(readback, 0, size)
            .map_err(|e| TransferError::Device(e).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Extent2D;
    use crate::renderer::mock::MockBackend;

    fn texture(backend: &Arc<MockBackend>, width: u32, height: u32) -> TextureId {
        backend
            .create_texture(&TextureDescriptor {
                label: None,
                size: Extent2D::new(width, height),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::COPY_DST | TextureUsage::SAMPLED,
            })
            .unwrap()
    }

    fn copies(backend: &MockBackend) -> Vec<RecordedCommand> {
        backend
            .state()
            .submissions
            .iter()
            .filter(|(queue, _)| *queue == QueueKind::Transfer)
            .flat_map(|(_, list)| list.commands().to_vec())
            .collect()
    }

    #[test]
    fn test_rows_are_repitched_into_staging() {
        let backend = MockBackend::new();
        let tex = texture(&backend, 4, 4);
        let pixels: Vec<u8> = (0..64).collect();
        let mut transfer = TransferEngine::new(backend.clone(), 2, 4096, None);

        transfer
            .upload_immediate(&UploadRequest::full_texture(&pixels, 4, 4, 4, tex))
            .unwrap();

        let commands = copies(&backend);
        assert_eq!(commands.len(), 1);
        let RecordedCommand::CopyBufferToTexture {
            src,
            bytes_per_row,
            region,
            ..
        } = commands[0]
        else {
            panic!("expected a buffer-to-texture copy, got {:?}", commands[0]);
        };
        assert_eq!(bytes_per_row, 256);
        assert_eq!(region, TextureRegion::new(0, 0, 4, 4));

        let state = backend.state();
        let staging = &state.buffers[&src];
        for row in 0..4 {
            assert_eq!(
                &staging[row * 256..row * 256 + 16],
                &pixels[row * 16..row * 16 + 16],
                "row {row} misplaced in staging memory"
            );
        }
    }

    #[test]
    fn test_immediate_upload_waits_and_frees_staging() {
        let backend = MockBackend::new();
        let tex = texture(&backend, 4, 4);
        let pixels = [7u8; 64];
        let mut transfer = TransferEngine::new(backend.clone(), 2, 4096, None);

        transfer
            .upload_immediate(&UploadRequest::full_texture(&pixels, 4, 4, 4, tex))
            .unwrap();
        transfer
            .upload_immediate(&UploadRequest::full_texture(&pixels, 4, 4, 4, tex))
            .unwrap();

        assert_eq!(backend.state().waits.len(), 2, "one blocking wait per upload");
        assert_eq!(transfer.stats().pool_size, 1, "a free staging buffer is reused");
        assert_eq!(transfer.outstanding_fences().unwrap(), 0);
    }

    #[test]
    fn test_large_texture_is_split_into_bands() {
        let backend = MockBackend::new();
        let tex = texture(&backend, 4, 7);
        let pixels = vec![1u8; 4 * 7 * 4];
        let mut transfer = TransferEngine::new(backend.clone(), 2, 512, None);

        transfer
            .upload_immediate(&UploadRequest::full_texture(&pixels, 4, 7, 4, tex))
            .unwrap();

        let regions: Vec<TextureRegion> = copies(&backend)
            .into_iter()
            .map(|c| match c {
                RecordedCommand::CopyBufferToTexture { region, .. } => region,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            regions,
            vec![
                TextureRegion::new(0, 0, 4, 2),
                TextureRegion::new(0, 2, 4, 2),
                TextureRegion::new(0, 4, 4, 2),
                TextureRegion::new(0, 6, 4, 1),
            ]
        );
        assert_eq!(transfer.stats().chunks_submitted, 4);
    }

    #[test]
    fn test_large_buffer_is_split_into_ranges() {
        let backend = MockBackend::new();
        let dst = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 1024,
                usage: BufferUsage::COPY_DST | BufferUsage::VERTEX,
            })
            .unwrap();
        let data = vec![3u8; 600];
        let mut transfer = TransferEngine::new(backend.clone(), 1, 256, None);

        transfer
            .upload_immediate(&UploadRequest::buffer(&data, dst, 16))
            .unwrap();

        let ranges: Vec<(u64, u64)> = copies(&backend)
            .into_iter()
            .map(|c| match c {
                RecordedCommand::CopyBufferToBuffer {
                    dst_offset, size, ..
                } => (dst_offset, size),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ranges, vec![(16, 256), (272, 256), (528, 88)]);
    }

    #[test]
    fn test_async_upload_stays_pending_until_fence_completes() {
        let backend = MockBackend::new();
        let tex = texture(&backend, 4, 4);
        let pixels = [9u8; 64];
        let mut transfer = TransferEngine::new(backend.clone(), 2, 4096, None);

        let ticket = transfer
            .upload_async(&UploadRequest::full_texture(&pixels, 4, 4, 4, tex))
            .unwrap();

        assert!(transfer.is_pending(ResourceRef::Texture(tex)));
        assert!(transfer.is_ticket_pending(ticket));
        assert_eq!(transfer.poll().unwrap(), 0);
        assert!(backend.state().waits.is_empty(), "async uploads never block");

        backend.complete_all();

        assert_eq!(transfer.poll().unwrap(), 1);
        assert!(!transfer.is_pending(ResourceRef::Texture(tex)));
        assert_eq!(transfer.pending_count(), 0);
    }

    #[test]
    fn test_pool_grows_then_blocks_on_oldest() {
        let backend = MockBackend::new();
        let tex = texture(&backend, 4, 4);
        let pixels = [1u8; 64];
        let mut transfer = TransferEngine::new(backend.clone(), 2, 4096, None);
        let request = UploadRequest::full_texture(&pixels, 4, 4, 4, tex);

        transfer.upload_async(&request).unwrap();
        transfer.upload_async(&request).unwrap();
        assert_eq!(transfer.stats().pool_size, 2);
        assert!(backend.state().waits.is_empty());

        transfer.upload_async(&request).unwrap();

        let stats = transfer.stats();
        assert_eq!(stats.pool_size, 2, "the pool never exceeds its limit");
        assert_eq!(stats.stalls, 1);
        assert_eq!(backend.state().waits.len(), 1);
        assert_eq!(transfer.pending_count(), 2);
    }

    #[test]
    fn test_flush_completes_everything() {
        let backend = MockBackend::new();
        let tex = texture(&backend, 4, 4);
        let pixels = [1u8; 64];
        let mut transfer = TransferEngine::new(backend.clone(), 3, 4096, None);
        for _ in 0..3 {
            transfer
                .upload_async(&UploadRequest::full_texture(&pixels, 4, 4, 4, tex))
                .unwrap();
        }

        transfer.flush().unwrap();

        assert_eq!(transfer.pending_count(), 0);
        assert_eq!(transfer.outstanding_fences().unwrap(), 0);
    }

    #[test]
    fn test_invalid_requests_are_rejected_before_staging() {
        let backend = MockBackend::new();
        let tex = texture(&backend, 4, 4);
        let mut transfer = TransferEngine::new(backend.clone(), 2, 4096, None);
        let pixels = [0u8; 64];

        let cases = [
            UploadRequest::full_texture(&pixels[..32], 4, 4, 4, tex),
            UploadRequest::texture(&pixels, 4, 4, 4, tex, TextureRegion::new(2, 2, 4, 4)),
            UploadRequest::texture(&pixels, 4, 4, 4, tex, TextureRegion::new(0, 0, 2, 2)),
            UploadRequest::full_texture(&pixels, 8, 8, 1, tex),
            UploadRequest::full_texture(&pixels, 4, 4, 4, TextureId(999)),
            UploadRequest::full_texture(&[], 0, 0, 4, tex),
        ];
        for (i, request) in cases.iter().enumerate() {
            let err = transfer.upload_immediate(request).unwrap_err();
            assert!(
                matches!(err, RenderError::Transfer(TransferError::InvalidRequest(_))),
                "case {i}: unexpected {err:?}"
            );
        }
        assert!(backend.state().submissions.is_empty());
        assert_eq!(transfer.stats().pool_size, 0);
    }

    #[test]
    fn test_destroy_releases_staging_pool() {
        let backend = MockBackend::new();
        let tex = texture(&backend, 4, 4);
        let pixels = [1u8; 64];
        let mut transfer = TransferEngine::new(backend.clone(), 2, 4096, None);
        transfer
            .upload_async(&UploadRequest::full_texture(&pixels, 4, 4, 4, tex))
            .unwrap();

        transfer.destroy().unwrap();

        let state = backend.state();
        assert!(state.buffers.is_empty());
        assert!(state.fences.is_empty());
    }
}
