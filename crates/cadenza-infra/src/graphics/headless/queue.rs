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

//! One worker thread per emulated queue.

use super::fence::FenceTimeline;
use super::memory::RetainedResources;
use super::HeadlessShared;
use cadenza_core::renderer::{CommandList, FenceValue, QueueKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Work items processed in submission order by a queue worker.
#[derive(Debug)]
pub(crate) enum QueueItem {
    /// Executes a command list, then releases its resource references.
    Execute {
        list: CommandList,
        retained: RetainedResources,
    },
    /// Raises a fence once everything before it has executed.
    Signal {
        timeline: Arc<FenceTimeline>,
        value: FenceValue,
    },
}

/// The submission side of an emulated queue.
#[derive(Debug)]
pub(crate) struct QueueWorker {
    kind: QueueKind,
    sender: Option<flume::Sender<QueueItem>>,
    handle: Option<JoinHandle<()>>,
}

impl QueueWorker {
    /// Spawns the worker thread for `kind`.
    pub fn spawn(kind: QueueKind, shared: Arc<HeadlessShared>) -> std::io::Result<Self> {
        let (sender, receiver) = flume::unbounded::<QueueItem>();
        let handle = std::thread::Builder::new()
            .name(format!("cadenza-headless-{kind:?}").to_lowercase())
            .spawn(move || run(kind, receiver, shared))?;
        Ok(Self {
            kind,
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Enqueues an item behind everything submitted so far.
    pub fn push(&self, item: QueueItem) -> Result<(), String> {
        match &self.sender {
            Some(sender) => sender
                .send(item)
                .map_err(|_| format!("{:?} queue worker has stopped", self.kind)),
            None => Err(format!("{:?} queue is shut down", self.kind)),
        }
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("HeadlessBackend: {:?} queue worker panicked", self.kind);
            }
        }
    }
}

fn run(kind: QueueKind, receiver: flume::Receiver<QueueItem>, shared: Arc<HeadlessShared>) {
    log::debug!("HeadlessBackend: {kind:?} queue worker started");
    while let Ok(item) = receiver.recv() {
        match item {
            QueueItem::Execute { list, retained } => {
                if !shared.config.submission_latency.is_zero() {
                    std::thread::sleep(shared.config.submission_latency);
                }
                let mut memory = shared.memory();
                if !shared.device_lost.load(Ordering::Acquire) {
                    memory.execute(&list, &shared.stats, shared.config.copy_pitch_alignment);
                }
                memory.release(&retained);
            }
            QueueItem::Signal { timeline, value } => {
                // A lost device never completes outstanding work.
                if !shared.device_lost.load(Ordering::Acquire) {
                    timeline.complete(value);
                }
            }
        }
    }
    log::debug!("HeadlessBackend: {kind:?} queue worker stopped");
}
