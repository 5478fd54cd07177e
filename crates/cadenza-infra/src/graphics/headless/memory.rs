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

//! Host memory backing the headless device, and the command interpreter running on it.

use cadenza_core::renderer::{
    BufferId, BufferUsage, CommandList, DescriptorBinding, DescriptorHandle, RecordedCommand,
    TextureDescriptor, TextureFormat, TextureId, TextureRegion,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub(crate) struct HostBuffer {
    pub data: Vec<u8>,
    pub usage: BufferUsage,
    pub in_flight: u32,
}

#[derive(Debug)]
pub(crate) struct HostTexture {
    pub descriptor: TextureDescriptor<'static>,
    pub data: Vec<u8>,
    pub in_flight: u32,
}

impl HostTexture {
    fn row_bytes(&self, width: u32) -> usize {
        (width * self.descriptor.format.bytes_per_pixel()) as usize
    }

    fn texel_offset(&self, x: u32, y: u32) -> usize {
        let bpp = self.descriptor.format.bytes_per_pixel();
        ((y * self.descriptor.size.width + x) * bpp) as usize
    }
}

/// Counters exposed through [`HeadlessStats`](super::HeadlessStats).
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub submissions: AtomicU64,
    pub commands_executed: AtomicU64,
    pub draws: AtomicU64,
    pub presents: AtomicU64,
    pub surface_recreations: AtomicU64,
    pub hazards: AtomicU64,
    pub validation_errors: AtomicU64,
}

impl StatCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The resources a submitted list keeps alive until it has executed.
#[derive(Debug, Clone, Default)]
pub(crate) struct RetainedResources {
    pub buffers: Vec<BufferId>,
    pub textures: Vec<TextureId>,
}

/// Every live resource of the device.
#[derive(Debug, Default)]
pub(crate) struct HostMemory {
    pub buffers: HashMap<BufferId, HostBuffer>,
    pub textures: HashMap<TextureId, HostTexture>,
    pub descriptors: HashMap<DescriptorHandle, DescriptorBinding>,
}

impl HostMemory {
    /// Marks every resource referenced by `list` as used by pending work.
    ///
    /// Textures bound through descriptors are resolved now, so a later rewrite of
    /// the descriptor does not unbalance the counts.
    pub fn retain(&mut self, list: &CommandList) -> RetainedResources {
        let mut retained = RetainedResources::default();
        for command in list.commands() {
            retained.buffers.extend(command.referenced_buffers());
            retained.textures.extend(command.referenced_textures());
            if let RecordedCommand::BindResource { descriptor, .. } = command {
                if let Some(texture) = self.descriptors.get(descriptor).and_then(|b| b.texture()) {
                    retained.textures.push(texture);
                }
            }
        }
        self.adjust_in_flight(&retained, |count| *count += 1);
        retained
    }

    /// Releases the references taken by [`retain`](Self::retain).
    pub fn release(&mut self, retained: &RetainedResources) {
        self.adjust_in_flight(retained, |count| *count = count.saturating_sub(1));
    }

    fn adjust_in_flight(&mut self, retained: &RetainedResources, adjust: impl Fn(&mut u32)) {
        for id in &retained.buffers {
            if let Some(buffer) = self.buffers.get_mut(id) {
                adjust(&mut buffer.in_flight);
            }
        }
        for id in &retained.textures {
            if let Some(texture) = self.textures.get_mut(id) {
                adjust(&mut texture.in_flight);
            }
        }
    }

    /// Runs every command of `list` against host memory.
    ///
    /// Clears and copies are carried out; draws are only counted. Invalid commands
    /// are skipped and reported as validation errors.
    pub fn execute(&mut self, list: &CommandList, stats: &StatCounters, pitch_alignment: u32) {
        for command in list.commands() {
            if command.is_draw() {
                StatCounters::bump(&stats.draws);
            }
            if let Err(message) = self.execute_one(command, pitch_alignment) {
                log::error!(
                    "HeadlessBackend: Validation error in '{}': {message}",
                    list.label()
                );
                StatCounters::bump(&stats.validation_errors);
            }
            StatCounters::bump(&stats.commands_executed);
        }
    }

    fn execute_one(&mut self, command: &RecordedCommand, pitch_alignment: u32) -> Result<(), String> {
        match command {
            RecordedCommand::ClearColor { target, color } => {
                let texture = self.texture_mut(*target)?;
                let format = texture.descriptor.format;
                match encode_color(format, *color) {
                    Some(texel) => fill(&mut texture.data, &texel),
                    None if format.is_depth() => {
                        return Err(format!("color clear of depth texture {target:?}"))
                    }
                    None => log::debug!("HeadlessBackend: Clears of {format:?} are not emulated"),
                }
                Ok(())
            }
            RecordedCommand::ClearDepthStencil {
                target,
                depth,
                stencil,
            } => {
                let texture = self.texture_mut(*target)?;
                let texel = encode_depth(texture.descriptor.format, *depth, *stencil)
                    .ok_or_else(|| format!("depth clear of color texture {target:?}"))?;
                fill(&mut texture.data, &texel);
                Ok(())
            }
            RecordedCommand::CopyBufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let source = self.buffer(*src)?;
                let range = byte_range(*src_offset, *size, source.data.len())
                    .ok_or_else(|| format!("source range out of bounds of {src:?}"))?;
                let bytes = source.data[range].to_vec();
                let target = self.buffer_mut(*dst)?;
                let range = byte_range(*dst_offset, *size, target.data.len())
                    .ok_or_else(|| format!("destination range out of bounds of {dst:?}"))?;
                target.data[range].copy_from_slice(&bytes);
                Ok(())
            }
            RecordedCommand::CopyBufferToTexture {
                src,
                src_offset,
                bytes_per_row,
                dst,
                region,
            } => {
                check_pitch(*bytes_per_row, pitch_alignment)?;
                let rows = self.read_rows(*src, *src_offset, *bytes_per_row, *dst, region)?;
                let texture = self.texture_mut(*dst)?;
                let row_bytes = texture.row_bytes(region.extent.width);
                for (y, row) in rows.chunks(row_bytes).enumerate() {
                    let start = texture.texel_offset(region.origin.x, region.origin.y + y as u32);
                    texture.data[start..start + row_bytes].copy_from_slice(row);
                }
                Ok(())
            }
            RecordedCommand::CopyTextureToBuffer {
                src,
                region,
                dst,
                dst_offset,
                bytes_per_row,
            } => {
                check_pitch(*bytes_per_row, pitch_alignment)?;
                let texture = self.texture(*src)?;
                check_region(texture, region)?;
                let row_bytes = texture.row_bytes(region.extent.width);
                let rows: Vec<Vec<u8>> = (0..region.extent.height)
                    .map(|y| {
                        let start = texture.texel_offset(region.origin.x, region.origin.y + y);
                        texture.data[start..start + row_bytes].to_vec()
                    })
                    .collect();
                let target = self.buffer_mut(*dst)?;
                let span = copy_span(*bytes_per_row, row_bytes, region.extent.height);
                byte_range(*dst_offset, span, target.data.len())
                    .ok_or_else(|| format!("texture readback overruns {dst:?}"))?;
                for (y, row) in rows.iter().enumerate() {
                    let start = (*dst_offset + y as u64 * *bytes_per_row as u64) as usize;
                    target.data[start..start + row_bytes].copy_from_slice(row);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn read_rows(
        &self,
        src: BufferId,
        src_offset: u64,
        bytes_per_row: u32,
        dst: TextureId,
        region: &TextureRegion,
    ) -> Result<Vec<u8>, String> {
        let texture = self.texture(dst)?;
        check_region(texture, region)?;
        let row_bytes = texture.row_bytes(region.extent.width);
        if (bytes_per_row as usize) < row_bytes {
            return Err(format!(
                "bytes_per_row {bytes_per_row} is smaller than a row of {row_bytes} bytes"
            ));
        }
        let source = self.buffer(src)?;
        let span = copy_span(bytes_per_row, row_bytes, region.extent.height);
        byte_range(src_offset, span, source.data.len())
            .ok_or_else(|| format!("texture upload overruns {src:?}"))?;

        let mut rows = Vec::with_capacity(row_bytes * region.extent.height as usize);
        for y in 0..region.extent.height as u64 {
            let start = (src_offset + y * bytes_per_row as u64) as usize;
            rows.extend_from_slice(&source.data[start..start + row_bytes]);
        }
        Ok(rows)
    }

    fn buffer(&self, id: BufferId) -> Result<&HostBuffer, String> {
        self.buffers
            .get(&id)
            .ok_or_else(|| format!("{id:?} does not exist"))
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut HostBuffer, String> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| format!("{id:?} does not exist"))
    }

    fn texture(&self, id: TextureId) -> Result<&HostTexture, String> {
        self.textures
            .get(&id)
            .ok_or_else(|| format!("{id:?} does not exist"))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut HostTexture, String> {
        self.textures
            .get_mut(&id)
            .ok_or_else(|| format!("{id:?} does not exist"))
    }
}

fn fill(data: &mut [u8], texel: &[u8]) {
    for chunk in data.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(texel);
    }
}

fn byte_range(offset: u64, size: u64, len: usize) -> Option<std::ops::Range<usize>> {
    let end = offset.checked_add(size)?;
    (end <= len as u64).then(|| offset as usize..end as usize)
}

/// Bytes touched by a pitched copy: every row but the last is a full pitch.
fn copy_span(bytes_per_row: u32, row_bytes: usize, rows: u32) -> u64 {
    match rows {
        0 => 0,
        n => (n as u64 - 1) * bytes_per_row as u64 + row_bytes as u64,
    }
}

fn check_pitch(bytes_per_row: u32, alignment: u32) -> Result<(), String> {
    if alignment > 0 && bytes_per_row % alignment != 0 {
        return Err(format!(
            "bytes_per_row {bytes_per_row} is not a multiple of {alignment}"
        ));
    }
    Ok(())
}

fn check_region(texture: &HostTexture, region: &TextureRegion) -> Result<(), String> {
    if !region.fits_within(texture.descriptor.size) {
        return Err(format!(
            "region {region:?} exceeds texture of size {:?}",
            texture.descriptor.size
        ));
    }
    Ok(())
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// The bytes of one texel of `format` holding `color`, if clears of the format are emulated.
pub(crate) fn encode_color(format: TextureFormat, color: [f32; 4]) -> Option<Vec<u8>> {
    let [r, g, b, a] = color;
    match format {
        TextureFormat::R8Unorm => Some(vec![unorm8(r)]),
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => {
            Some(vec![unorm8(r), unorm8(g), unorm8(b), unorm8(a)])
        }
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => {
            Some(vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)])
        }
        TextureFormat::R32Float => Some(bytemuck::bytes_of(&r).to_vec()),
        TextureFormat::Rgba16Float
        | TextureFormat::Depth32Float
        | TextureFormat::Depth24PlusStencil8 => None,
    }
}

/// The bytes of one depth/stencil texel of `format`.
pub(crate) fn encode_depth(format: TextureFormat, depth: f32, stencil: u8) -> Option<Vec<u8>> {
    match format {
        TextureFormat::Depth32Float => Some(bytemuck::bytes_of(&depth).to_vec()),
        TextureFormat::Depth24PlusStencil8 => {
            let depth = (depth.clamp(0.0, 1.0) * 0x00FF_FFFF as f32).round() as u32;
            Some((depth | (stencil as u32) << 24).to_le_bytes().to_vec())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::math::Extent2D;
    use cadenza_core::renderer::{DescriptorAllocator, DescriptorCapacities, DescriptorKind, TextureUsage};

    fn memory_with(width: u32, height: u32) -> (HostMemory, BufferId, TextureId) {
        let mut memory = HostMemory::default();
        let buffer = BufferId(1);
        let texture = TextureId(2);
        memory.buffers.insert(
            buffer,
            HostBuffer {
                data: vec![0; 4096],
                usage: BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
                in_flight: 0,
            },
        );
        memory.textures.insert(
            texture,
            HostTexture {
                descriptor: TextureDescriptor {
                    label: None,
                    size: Extent2D::new(width, height),
                    format: TextureFormat::Rgba8Unorm,
                    usage: TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
                },
                data: vec![0; (width * height * 4) as usize],
                in_flight: 0,
            },
        );
        (memory, buffer, texture)
    }

    fn list(commands: Vec<RecordedCommand>) -> CommandList {
        let mut list = CommandList::new("Test");
        for command in commands {
            list.push(command);
        }
        list
    }

    #[test]
    fn test_pitched_copy_into_sub_region() {
        let (mut memory, buffer, texture) = memory_with(4, 4);
        let stats = StatCounters::default();
        // Two rows of 2 texels, pitched at 256 bytes.
        memory.buffers.get_mut(&buffer).unwrap().data[..8].copy_from_slice(&[1; 8]);
        memory.buffers.get_mut(&buffer).unwrap().data[256..264].copy_from_slice(&[2; 8]);

        memory.execute(
            &list(vec![RecordedCommand::CopyBufferToTexture {
                src: buffer,
                src_offset: 0,
                bytes_per_row: 256,
                dst: texture,
                region: TextureRegion::new(1, 2, 2, 2),
            }]),
            &stats,
            256,
        );

        let data = &memory.textures[&texture].data;
        assert_eq!(&data[(2 * 4 + 1) * 4..(2 * 4 + 3) * 4], &[1; 8]);
        assert_eq!(&data[(3 * 4 + 1) * 4..(3 * 4 + 3) * 4], &[2; 8]);
        assert_eq!(&data[..(2 * 4 + 1) * 4], &[0; 36][..]);
        assert_eq!(stats.validation_errors.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_misaligned_pitch_is_rejected() {
        let (mut memory, buffer, texture) = memory_with(4, 4);
        let stats = StatCounters::default();

        memory.execute(
            &list(vec![RecordedCommand::CopyBufferToTexture {
                src: buffer,
                src_offset: 0,
                bytes_per_row: 16,
                dst: texture,
                region: TextureRegion::new(0, 0, 4, 4),
            }]),
            &stats,
            256,
        );

        assert_eq!(stats.validation_errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_clear_then_read_back() {
        let (mut memory, buffer, texture) = memory_with(2, 2);
        let stats = StatCounters::default();

        memory.execute(
            &list(vec![
                RecordedCommand::ClearColor {
                    target: texture,
                    color: [1.0, 0.0, 0.5, 1.0],
                },
                RecordedCommand::CopyTextureToBuffer {
                    src: texture,
                    region: TextureRegion::new(0, 0, 2, 2),
                    dst: buffer,
                    dst_offset: 0,
                    bytes_per_row: 256,
                },
            ]),
            &stats,
            256,
        );

        let data = &memory.buffers[&buffer].data;
        assert_eq!(&data[0..4], &[255, 0, 128, 255]);
        assert_eq!(&data[256..260], &[255, 0, 128, 255]);
        assert_eq!(stats.commands_executed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_retain_and_release_balance() {
        let (mut memory, buffer, texture) = memory_with(2, 2);
        let work = list(vec![RecordedCommand::CopyBufferToTexture {
            src: buffer,
            src_offset: 0,
            bytes_per_row: 256,
            dst: texture,
            region: TextureRegion::new(0, 0, 2, 2),
        }]);

        let retained = memory.retain(&work);
        assert_eq!(memory.buffers[&buffer].in_flight, 1);
        assert_eq!(memory.textures[&texture].in_flight, 1);
        memory.release(&retained);
        assert_eq!(memory.buffers[&buffer].in_flight, 0);
        assert_eq!(memory.textures[&texture].in_flight, 0);
    }

    #[test]
    fn test_descriptor_bound_texture_is_retained() {
        // ARRANGE
        let (mut memory, _, texture) = memory_with(2, 2);
        let handle = DescriptorAllocator::new(&DescriptorCapacities::uniform(4))
            .allocate(DescriptorKind::ShaderResource)
            .unwrap();
        memory
            .descriptors
            .insert(handle, DescriptorBinding::ShaderResource(texture));
        let work = list(vec![RecordedCommand::BindResource {
            slot: 0,
            descriptor: handle,
        }]);

        // ACT
        let retained = memory.retain(&work);
        memory.descriptors.remove(&handle);

        // ASSERT
        assert_eq!(memory.textures[&texture].in_flight, 1);
        memory.release(&retained);
        assert_eq!(memory.textures[&texture].in_flight, 0);
    }

    #[test]
    fn test_depth_encoding() {
        assert_eq!(
            encode_depth(TextureFormat::Depth24PlusStencil8, 1.0, 7),
            Some(vec![0xFF, 0xFF, 0xFF, 7])
        );
        assert_eq!(encode_depth(TextureFormat::Rgba8Unorm, 1.0, 0), None);
        assert_eq!(encode_color(TextureFormat::Depth32Float, [0.0; 4]), None);
    }
}
