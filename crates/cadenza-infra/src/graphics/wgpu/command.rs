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

//! Translation of recorded [`CommandList`]s into WGPU command buffers.
//!
//! Clears become empty render passes. Consecutive state and draw commands are
//! replayed into a single render pass that loads the last cleared color and
//! depth targets. Copies are encoded outside of any pass.

use cadenza_core::renderer::{
    BufferId, CommandList, DescriptorHandle, DeviceError, IndexFormat, PipelineId,
    RecordedCommand, ScissorRect, TextureId, Viewport,
};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU64;

use super::conversions::IntoWgpu;
use super::device::{WgpuBufferEntry, WgpuDescriptorEntry, WgpuResources, WgpuTextureEntry};

/// A resource bound to a shader slot.
#[derive(Debug, Clone, Copy)]
enum SlotBinding {
    Descriptor(DescriptorHandle),
    Constants { buffer: BufferId, offset: u64, size: u64 },
}

/// Render state carried across passes within one command list.
#[derive(Debug, Default)]
struct DrawState {
    color_target: Option<TextureId>,
    depth_target: Option<TextureId>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    pipeline: Option<PipelineId>,
    slots: BTreeMap<u32, SlotBinding>,
    vertex_buffers: BTreeMap<u32, (BufferId, u64)>,
    index_buffer: Option<(BufferId, u64, IndexFormat)>,
}

/// Returns `true` for commands that are replayed inside a render pass.
fn is_pass_command(command: &RecordedCommand) -> bool {
    !matches!(
        command,
        RecordedCommand::ClearColor { .. }
            | RecordedCommand::ClearDepthStencil { .. }
            | RecordedCommand::CopyBufferToBuffer { .. }
            | RecordedCommand::CopyBufferToTexture { .. }
            | RecordedCommand::CopyTextureToBuffer { .. }
    )
}

/// Encodes a command list against the device's resource tables.
pub(crate) struct WgpuCommandTranslator<'a> {
    device: &'a wgpu::Device,
    resources: &'a WgpuResources,
    state: DrawState,
}

impl<'a> WgpuCommandTranslator<'a> {
    pub(crate) fn new(device: &'a wgpu::Device, resources: &'a WgpuResources) -> Self {
        Self {
            device,
            resources,
            state: DrawState::default(),
        }
    }

    /// Encodes `list` into a finished command buffer.
    ///
    /// Unknown handles fail the whole list before anything reaches the queue.
    pub(crate) fn encode(mut self, list: &CommandList) -> Result<wgpu::CommandBuffer, DeviceError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(list.label()),
            });

        let commands = list.commands();
        let mut i = 0;
        while i < commands.len() {
            match &commands[i] {
                RecordedCommand::ClearColor { target, color } => {
                    self.clear_color(&mut encoder, *target, *color)?;
                    self.state.color_target = Some(*target);
                }
                RecordedCommand::ClearDepthStencil {
                    target,
                    depth,
                    stencil,
                } => {
                    self.clear_depth_stencil(&mut encoder, *target, *depth, *stencil)?;
                    self.state.depth_target = Some(*target);
                }
                RecordedCommand::CopyBufferToBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let src = self.buffer(*src)?;
                    let dst = self.buffer(*dst)?;
                    encoder.copy_buffer_to_buffer(
                        &src.buffer,
                        *src_offset,
                        &dst.buffer,
                        *dst_offset,
                        *size,
                    );
                }
                RecordedCommand::CopyBufferToTexture {
                    src,
                    src_offset,
                    bytes_per_row,
                    dst,
                    region,
                } => {
                    let src = self.buffer(*src)?;
                    let dst = self.texture(*dst)?;
                    encoder.copy_buffer_to_texture(
                        wgpu::TexelCopyBufferInfo {
                            buffer: &src.buffer,
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: *src_offset,
                                bytes_per_row: Some(*bytes_per_row),
                                rows_per_image: None,
                            },
                        },
                        wgpu::TexelCopyTextureInfo {
                            texture: &dst.texture,
                            mip_level: 0,
                            origin: region.origin.into_wgpu(),
                            aspect: wgpu::TextureAspect::All,
                        },
                        region.extent.into_wgpu(),
                    );
                }
                RecordedCommand::CopyTextureToBuffer {
                    src,
                    region,
                    dst,
                    dst_offset,
                    bytes_per_row,
                } => {
                    let src = self.texture(*src)?;
                    let dst = self.buffer(*dst)?;
                    encoder.copy_texture_to_buffer(
                        wgpu::TexelCopyTextureInfo {
                            texture: &src.texture,
                            mip_level: 0,
                            origin: region.origin.into_wgpu(),
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::TexelCopyBufferInfo {
                            buffer: &dst.buffer,
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: *dst_offset,
                                bytes_per_row: Some(*bytes_per_row),
                                rows_per_image: None,
                            },
                        },
                        region.extent.into_wgpu(),
                    );
                }
                _ => {
                    let end = commands[i..]
                        .iter()
                        .position(|c| !is_pass_command(c))
                        .map_or(commands.len(), |p| i + p);
                    let run = &commands[i..end];
                    if run.iter().any(RecordedCommand::is_draw) {
                        self.draw_run(&mut encoder, run)?;
                    } else {
                        run.iter().for_each(|c| self.track(c));
                    }
                    i = end;
                    continue;
                }
            }
            i += 1;
        }

        Ok(encoder.finish())
    }

    fn buffer(&self, id: BufferId) -> Result<&'a WgpuBufferEntry, DeviceError> {
        self.resources
            .buffers
            .get(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))
    }

    fn texture(&self, id: TextureId) -> Result<&'a WgpuTextureEntry, DeviceError> {
        self.resources
            .textures
            .get(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))
    }

    fn clear_color(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: TextureId,
        color: [f32; 4],
    ) -> Result<(), DeviceError> {
        let view = self.texture(target)?.default_view();
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Color"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(color.into_wgpu()),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn clear_depth_stencil(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: TextureId,
        depth: f32,
        stencil: u8,
    ) -> Result<(), DeviceError> {
        let entry = self.texture(target)?;
        let view = entry.default_view();
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Depth/Stencil"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(depth),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: entry.descriptor.format.has_stencil().then_some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(stencil as u32),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    /// Updates the carried state without encoding anything.
    fn track(&mut self, command: &RecordedCommand) {
        match command {
            RecordedCommand::SetViewport(viewport) => self.state.viewport = Some(*viewport),
            RecordedCommand::SetScissor(scissor) => self.state.scissor = Some(*scissor),
            RecordedCommand::SetDepthRange { min, max } => {
                if let Some(viewport) = self.state.viewport.as_mut() {
                    viewport.min_depth = *min;
                    viewport.max_depth = *max;
                }
            }
            RecordedCommand::SetPipeline(pipeline) => self.state.pipeline = Some(*pipeline),
            RecordedCommand::BindResource { slot, descriptor } => {
                self.state
                    .slots
                    .insert(*slot, SlotBinding::Descriptor(*descriptor));
            }
            RecordedCommand::BindConstants {
                slot,
                buffer,
                offset,
                size,
            } => {
                self.state.slots.insert(
                    *slot,
                    SlotBinding::Constants {
                        buffer: *buffer,
                        offset: *offset,
                        size: *size,
                    },
                );
            }
            RecordedCommand::SetVertexBuffer {
                slot,
                buffer,
                offset,
            } => {
                self.state.vertex_buffers.insert(*slot, (*buffer, *offset));
            }
            RecordedCommand::SetIndexBuffer {
                buffer,
                offset,
                format,
            } => self.state.index_buffer = Some((*buffer, *offset, *format)),
            _ => {}
        }
    }

    /// Replays a run of state and draw commands inside one render pass.
    fn draw_run(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        run: &[RecordedCommand],
    ) -> Result<(), DeviceError> {
        let color_target = self.state.color_target.ok_or_else(|| {
            DeviceError::Backend("draw recorded before any color target was cleared".to_string())
        })?;
        let color_view = self.texture(color_target)?.default_view();
        let depth = match self.state.depth_target {
            Some(id) => {
                let entry = self.texture(id)?;
                Some((entry.default_view(), entry.descriptor.format.has_stencil()))
            }
            None => None,
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Frame Draws"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: depth.as_ref().map(|(view, has_stencil)| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: has_stencil.then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        // Everything carried in from earlier passes must be re-applied.
        let mut dirty_slots: BTreeSet<u32> = self.state.slots.keys().copied().collect();
        self.apply_fixed_state(&mut pass)?;

        for command in run {
            self.track(command);
            match command {
                RecordedCommand::SetViewport(_)
                | RecordedCommand::SetScissor(_)
                | RecordedCommand::SetDepthRange { .. }
                | RecordedCommand::SetVertexBuffer { .. }
                | RecordedCommand::SetIndexBuffer { .. } => self.apply_fixed_state(&mut pass)?,
                RecordedCommand::SetPipeline(_) => {
                    self.apply_fixed_state(&mut pass)?;
                    dirty_slots.extend(self.state.slots.keys().copied());
                }
                RecordedCommand::BindResource { slot, .. }
                | RecordedCommand::BindConstants { slot, .. } => {
                    dirty_slots.insert(*slot);
                }
                RecordedCommand::Draw {
                    vertices,
                    instances,
                } => {
                    self.flush_slots(&mut pass, &mut dirty_slots)?;
                    pass.draw(vertices.clone(), instances.clone());
                }
                RecordedCommand::DrawIndexed {
                    indices,
                    base_vertex,
                    instances,
                } => {
                    self.flush_slots(&mut pass, &mut dirty_slots)?;
                    pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_fixed_state(&self, pass: &mut wgpu::RenderPass<'_>) -> Result<(), DeviceError> {
        if let Some(v) = self.state.viewport {
            pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
        }
        if let Some(s) = self.state.scissor {
            pass.set_scissor_rect(s.x, s.y, s.width, s.height);
        }
        if let Some(id) = self.state.pipeline {
            let pipeline = self
                .resources
                .pipelines
                .get(&id)
                .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
            pass.set_pipeline(pipeline);
        }
        for (slot, (buffer, offset)) in &self.state.vertex_buffers {
            pass.set_vertex_buffer(*slot, self.buffer(*buffer)?.buffer.slice(*offset..));
        }
        if let Some((buffer, offset, format)) = self.state.index_buffer {
            pass.set_index_buffer(self.buffer(buffer)?.buffer.slice(offset..), format.into_wgpu());
        }
        Ok(())
    }

    /// Creates bind groups for the slots changed since the last draw.
    fn flush_slots(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        dirty_slots: &mut BTreeSet<u32>,
    ) -> Result<(), DeviceError> {
        if dirty_slots.is_empty() {
            return Ok(());
        }
        let Some(pipeline_id) = self.state.pipeline else {
            return Err(DeviceError::Backend(
                "resources bound without a pipeline".to_string(),
            ));
        };
        let pipeline = self
            .resources
            .pipelines
            .get(&pipeline_id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{pipeline_id:?}")))?;

        for slot in std::mem::take(dirty_slots) {
            let Some(binding) = self.state.slots.get(&slot) else {
                continue;
            };
            let layout = pipeline.get_bind_group_layout(slot);
            let resource = match binding {
                SlotBinding::Descriptor(handle) => match self.resources.descriptors.get(handle) {
                    Some(WgpuDescriptorEntry::View(view)) => wgpu::BindingResource::TextureView(view),
                    Some(WgpuDescriptorEntry::Sampler(sampler)) => {
                        wgpu::BindingResource::Sampler(sampler)
                    }
                    None => {
                        return Err(DeviceError::ResourceNotFound(format!(
                            "descriptor {handle} was never written"
                        )))
                    }
                },
                SlotBinding::Constants {
                    buffer,
                    offset,
                    size,
                } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.buffer(*buffer)?.buffer,
                    offset: *offset,
                    size: NonZeroU64::new(*size),
                }),
            };
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Slot Bind Group"),
                layout: &layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource,
                }],
            });
            pass.set_bind_group(slot, &bind_group, &[]);
        }
        Ok(())
    }
}
