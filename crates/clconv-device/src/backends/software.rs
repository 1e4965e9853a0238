// SPDX-License-Identifier: AGPL-3.0-only

//! Software (host-simulated) compute device
//!
//! Implements [`ComputeBackend`] in plain Rust so the full pipeline runs in
//! CI and on machines without an accelerator. It keeps the properties of the
//! real device that matter for correctness:
//!
//! 1. **Deferred execution**: launches are queued and only run when the
//!    queue is drained, a blocking transfer is issued on it, or one of its
//!    events is waited on.
//! 2. **In-order queues**: a blocking read or write first completes every
//!    earlier command on the same queue.
//! 3. **Single argument slot per kernel**: binding overwrites; the slot is
//!    snapshotted at enqueue time.
//! 4. **Access flags**: a launch may not write a `ReadOnly` buffer or read
//!    a `WriteOnly` one. Host transfers ignore the flags.
//!
//! ## Program container
//!
//! The software device builds images in this container format:
//!
//! ```text
//! [4 bytes "CLCV"][u32 LE version][u32 LE entry count]
//! repeated: [u16 LE name length][name bytes, UTF-8]
//! ```
//!
//! Every entry name must be a kernel the device implements, otherwise the
//! build fails.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, trace};

use super::reference_kernels::{BufferMap, ReferenceKernel, CONVOLVE, FORWARD_NAIVE, REPEATED_ADD};
use crate::backend::{
    BackendType, BufferId, ComputeBackend, DeviceId, DeviceInfo, EventId, KernelArg, KernelId,
    MemAccess, NdRange, ProgramId, QueueId, QueueProperties,
};
use crate::buffer::ELEMENT_BYTES;
use crate::error::{DeviceError, Result};

/// Magic bytes at the start of a software program image
pub const PROGRAM_MAGIC: &[u8; 4] = b"CLCV";

/// Container version written by [`pack_software_program`]
pub const PROGRAM_VERSION: u32 = 1;

/// Largest local work-group size the software device accepts
pub const MAX_WORK_GROUP_SIZE: usize = 1024;

/// Default global memory of the software device (256 MiB)
pub const DEFAULT_GLOBAL_MEM_BYTES: usize = 256 * 1024 * 1024;

/// Serialize entry point names into a software program image
#[must_use]
pub fn pack_software_program(entry_points: &[&str]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(12 + entry_points.iter().map(|e| 2 + e.len()).sum::<usize>());
    blob.extend_from_slice(PROGRAM_MAGIC);
    blob.extend_from_slice(&PROGRAM_VERSION.to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    blob.extend_from_slice(&(entry_points.len() as u32).to_le_bytes());
    for name in entry_points {
        #[allow(clippy::cast_possible_truncation)]
        blob.extend_from_slice(&(name.len() as u16).to_le_bytes());
        blob.extend_from_slice(name.as_bytes());
    }
    blob
}

/// Image exposing all three inference entry points
#[must_use]
pub fn standard_program() -> Vec<u8> {
    pack_software_program(&[CONVOLVE, FORWARD_NAIVE, REPEATED_ADD])
}

/// Decode the entry point names of a software program image
///
/// # Errors
///
/// Returns `InvalidProgram` if the magic, version or layout is wrong.
pub fn parse_software_program(image: &[u8]) -> Result<Vec<String>> {
    let mut cursor = Cursor { data: image, pos: 0 };

    if cursor.take(4)? != PROGRAM_MAGIC {
        return Err(DeviceError::invalid_program("bad magic, not a software program image"));
    }

    let version = cursor.u32()?;
    if version != PROGRAM_VERSION {
        return Err(DeviceError::invalid_program(format!(
            "unsupported container version {version} (expected {PROGRAM_VERSION})"
        )));
    }

    let count = cursor.u32()?;
    let mut names = Vec::new();
    for _ in 0..count {
        let len = usize::from(cursor.u16()?);
        let raw = cursor.take(len)?;
        let name = std::str::from_utf8(raw)
            .map_err(|e| DeviceError::invalid_program(format!("entry point name: {e}")))?;
        names.push(name.to_string());
    }

    if cursor.pos != image.len() {
        return Err(DeviceError::invalid_program(format!(
            "{} trailing bytes after {count} entry points",
            image.len() - cursor.pos
        )));
    }

    Ok(names)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self.data.get(self.pos..end).ok_or_else(|| {
            DeviceError::invalid_program(format!("truncated at byte {} (need {len} more)", self.pos))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[derive(Debug)]
struct KernelSlot {
    kernel: ReferenceKernel,
    args: Vec<KernelArg>,
}

#[derive(Debug)]
struct PendingLaunch {
    seq: u64,
    kernel: ReferenceKernel,
    args: Vec<KernelArg>,
    range: NdRange,
    wait: Vec<EventId>,
}

impl PendingLaunch {
    fn uses(&self, buffer: BufferId) -> bool {
        self.args.contains(&KernelArg::Buffer(buffer))
    }
}

#[derive(Debug)]
struct QueueState {
    properties: QueueProperties,
    submitted: u64,
    completed: u64,
    pending: VecDeque<PendingLaunch>,
}

#[derive(Debug, Default)]
struct SoftwareState {
    next_id: u64,
    allocated_bytes: usize,
    programs: HashMap<ProgramId, Vec<ReferenceKernel>>,
    kernels: HashMap<KernelId, KernelSlot>,
    buffers: BufferMap,
    access: HashMap<BufferId, MemAccess>,
    queues: HashMap<QueueId, QueueState>,
    events: HashMap<EventId, (QueueId, u64)>,
}

impl SoftwareState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn queue_mut(&mut self, queue: QueueId) -> Result<&mut QueueState> {
        self.queues
            .get_mut(&queue)
            .ok_or_else(|| DeviceError::invalid_state(format!("queue {} is not live", queue.raw())))
    }

    /// Run queued launches on `queue` up to and including sequence `through`
    fn drain(&mut self, queue: QueueId, through: u64) -> Result<()> {
        loop {
            let launch = {
                let state = self.queue_mut(queue)?;
                if state.completed >= through {
                    break;
                }
                match state.pending.pop_front() {
                    Some(launch) => launch,
                    None => break,
                }
            };

            for &event in &launch.wait {
                self.complete_event(event)?;
            }

            let started = Instant::now();
            let outcome = launch.kernel.execute(&launch.args, launch.range, &mut self.buffers);

            let state = self.queue_mut(queue)?;
            state.completed = launch.seq;
            if state.properties.profiling {
                trace!(
                    "queue {} launch {} ({}): {:?}",
                    queue.raw(),
                    launch.seq,
                    launch.kernel.name(),
                    started.elapsed()
                );
            }
            outcome?;
        }
        Ok(())
    }

    fn drain_all(&mut self, queue: QueueId) -> Result<()> {
        self.drain(queue, u64::MAX)
    }

    /// Events of released queues are complete by construction
    fn complete_event(&mut self, event: EventId) -> Result<()> {
        if let Some(&(queue, seq)) = self.events.get(&event) {
            if self.queues.contains_key(&queue) {
                self.drain(queue, seq)?;
            }
        }
        Ok(())
    }

    fn check_access(&self, kernel: ReferenceKernel, args: &[KernelArg]) -> Result<()> {
        for (index, arg) in args.iter().enumerate() {
            let KernelArg::Buffer(buffer) = *arg else {
                continue;
            };
            let access = self.access.get(&buffer).copied().unwrap_or(MemAccess::ReadWrite);
            let writes = index == kernel.output_index();
            let denied = match access {
                MemAccess::ReadOnly => writes,
                MemAccess::WriteOnly => !writes,
                MemAccess::ReadWrite => false,
            };
            if denied {
                return Err(DeviceError::invalid_argument(format!(
                    "{} argument {index}: buffer {} is {access:?}",
                    kernel.name(),
                    buffer.raw()
                )));
            }
        }
        Ok(())
    }

    fn buffer_len(&self, buffer: BufferId) -> Result<usize> {
        self.buffers
            .get(&buffer)
            .map(Vec::len)
            .ok_or_else(|| DeviceError::invalid_argument(format!("unknown buffer {}", buffer.raw())))
    }
}

/// Host-simulated compute device
#[derive(Debug)]
pub struct SoftwareBackend {
    info: DeviceInfo,
    state: Mutex<SoftwareState>,
}

impl SoftwareBackend {
    /// Create a software device with default limits
    pub fn new() -> Self {
        Self::with_global_memory(DEFAULT_GLOBAL_MEM_BYTES)
    }

    /// Create a software device with a custom memory limit
    pub fn with_global_memory(global_mem_bytes: usize) -> Self {
        Self {
            info: DeviceInfo {
                id: DeviceId::new(0),
                name: "clconv software device".to_string(),
                vendor: "clconv".to_string(),
                max_work_group_size: MAX_WORK_GROUP_SIZE,
                global_mem_bytes,
            },
            state: Mutex::new(SoftwareState::default()),
        }
    }

    /// Bytes currently allocated to live buffers
    ///
    /// # Errors
    ///
    /// Returns error if the device state lock is poisoned.
    pub fn allocated_bytes(&self) -> Result<usize> {
        Ok(self.lock()?.allocated_bytes)
    }

    /// Number of live queues
    ///
    /// # Errors
    ///
    /// Returns error if the device state lock is poisoned.
    pub fn live_queues(&self) -> Result<usize> {
        Ok(self.lock()?.queues.len())
    }

    /// Number of live buffers
    ///
    /// # Errors
    ///
    /// Returns error if the device state lock is poisoned.
    pub fn live_buffers(&self) -> Result<usize> {
        Ok(self.lock()?.buffers.len())
    }

    /// Launches queued on `queue` that have not run yet
    ///
    /// # Errors
    ///
    /// Returns error if the queue is not live.
    pub fn pending_launches(&self, queue: QueueId) -> Result<usize> {
        Ok(self.lock()?.queue_mut(queue)?.pending.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SoftwareState>> {
        self.state
            .lock()
            .map_err(|_| DeviceError::invalid_state("software device state lock poisoned"))
    }

    fn check_range(&self, range: NdRange) -> Result<()> {
        if range.global == 0 || range.local == 0 {
            return Err(DeviceError::invalid_argument(format!(
                "empty launch (global {}, local {})",
                range.global, range.local
            )));
        }
        if range.local > self.info.max_work_group_size {
            return Err(DeviceError::invalid_argument(format!(
                "local size {} exceeds device maximum {}",
                range.local, self.info.max_work_group_size
            )));
        }
        if range.global % range.local != 0 {
            return Err(DeviceError::invalid_argument(format!(
                "global size {} is not a multiple of local size {}",
                range.global, range.local
            )));
        }
        Ok(())
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for SoftwareBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![self.info.clone()])
    }

    fn build_program(&self, device: DeviceId, image: &[u8]) -> Result<ProgramId> {
        if device != self.info.id {
            return Err(DeviceError::build_failed(format!("unknown device {}", device.raw())));
        }

        let names = parse_software_program(image)?;
        if names.is_empty() {
            return Err(DeviceError::build_failed("program exposes no entry points"));
        }

        let kernels = names
            .iter()
            .map(|name| {
                ReferenceKernel::from_name(name).ok_or_else(|| {
                    DeviceError::build_failed(format!("entry point {name} has no device implementation"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.lock()?;
        let id = ProgramId::new(state.next());
        state.programs.insert(id, kernels);
        debug!("SoftwareBackend: built program {} ({})", id.raw(), names.join(", "));
        Ok(id)
    }

    fn entry_points(&self, program: ProgramId) -> Result<Vec<String>> {
        let state = self.lock()?;
        let kernels = state
            .programs
            .get(&program)
            .ok_or_else(|| DeviceError::invalid_state(format!("program {} not built", program.raw())))?;
        Ok(kernels.iter().map(|k| k.name().to_string()).collect())
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> Result<KernelId> {
        let mut state = self.lock()?;
        let kernel = state
            .programs
            .get(&program)
            .and_then(|kernels| kernels.iter().copied().find(|k| k.name() == name))
            .ok_or_else(|| DeviceError::kernel_not_found(name))?;

        let id = KernelId::new(state.next());
        state.kernels.insert(
            id,
            KernelSlot {
                kernel,
                args: Vec::new(),
            },
        );
        Ok(id)
    }

    fn set_kernel_args(&self, kernel: KernelId, args: &[KernelArg]) -> Result<()> {
        let mut state = self.lock()?;
        let slot = state
            .kernels
            .get_mut(&kernel)
            .ok_or_else(|| DeviceError::invalid_argument(format!("unknown kernel {}", kernel.raw())))?;

        slot.kernel.check_args(args)?;
        slot.args.clear();
        slot.args.extend_from_slice(args);
        Ok(())
    }

    fn create_queue(&self, device: DeviceId, properties: QueueProperties) -> Result<QueueId> {
        if device != self.info.id {
            return Err(DeviceError::allocation_failed(format!("unknown device {}", device.raw())));
        }

        let mut state = self.lock()?;
        let id = QueueId::new(state.next());
        state.queues.insert(
            id,
            QueueState {
                properties,
                submitted: 0,
                completed: 0,
                pending: VecDeque::new(),
            },
        );
        Ok(id)
    }

    fn release_queue(&self, queue: QueueId) -> Result<()> {
        let mut state = self.lock()?;
        state.drain_all(queue)?;
        state.queues.remove(&queue);
        state.events.retain(|_, (owner, _)| *owner != queue);
        Ok(())
    }

    fn create_buffer(&self, size_bytes: usize, access: MemAccess) -> Result<BufferId> {
        if size_bytes == 0 || size_bytes % ELEMENT_BYTES != 0 {
            return Err(DeviceError::allocation_failed(format!(
                "buffer size {size_bytes} is not a positive multiple of {ELEMENT_BYTES}"
            )));
        }

        let mut state = self.lock()?;
        let available = self.info.global_mem_bytes.saturating_sub(state.allocated_bytes);
        if size_bytes > available {
            return Err(DeviceError::allocation_failed(format!(
                "{size_bytes} bytes requested, {available} available"
            )));
        }

        let id = BufferId::new(state.next());
        state.buffers.insert(id, vec![0.0; size_bytes / ELEMENT_BYTES]);
        state.access.insert(id, access);
        state.allocated_bytes += size_bytes;
        Ok(id)
    }

    fn release_buffer(&self, buffer: BufferId) -> Result<()> {
        let mut state = self.lock()?;

        let users: Vec<QueueId> = state
            .queues
            .iter()
            .filter(|(_, q)| q.pending.iter().any(|launch| launch.uses(buffer)))
            .map(|(id, _)| *id)
            .collect();
        for queue in users {
            state.drain_all(queue)?;
        }

        let data = state
            .buffers
            .remove(&buffer)
            .ok_or_else(|| DeviceError::invalid_argument(format!("unknown buffer {}", buffer.raw())))?;
        state.access.remove(&buffer);
        state.allocated_bytes -= data.len() * ELEMENT_BYTES;
        Ok(())
    }

    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[f32]) -> Result<()> {
        let mut state = self.lock()?;
        state.drain_all(queue)?;

        let len = state.buffer_len(buffer)?;
        if data.len() != len {
            return Err(DeviceError::transfer_failed(format!(
                "write of {} elements into {len}-element buffer {}",
                data.len(),
                buffer.raw()
            )));
        }

        if let Some(target) = state.buffers.get_mut(&buffer) {
            target.copy_from_slice(data);
        }
        Ok(())
    }

    fn read_buffer(&self, queue: QueueId, buffer: BufferId, wait: &[EventId], out: &mut [f32]) -> Result<()> {
        let mut state = self.lock()?;
        for &event in wait {
            state.complete_event(event)?;
        }
        state.drain_all(queue)?;

        let source = state
            .buffers
            .get(&buffer)
            .ok_or_else(|| DeviceError::transfer_failed(format!("unknown buffer {}", buffer.raw())))?;
        if source.len() != out.len() {
            return Err(DeviceError::transfer_failed(format!(
                "read of {}-element buffer {} into {} elements",
                source.len(),
                buffer.raw(),
                out.len()
            )));
        }

        out.copy_from_slice(source);
        Ok(())
    }

    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, range: NdRange, wait: &[EventId]) -> Result<EventId> {
        self.check_range(range)?;

        let mut state = self.lock()?;
        let (kernel_kind, args) = {
            let slot = state
                .kernels
                .get(&kernel)
                .ok_or_else(|| DeviceError::invalid_argument(format!("unknown kernel {}", kernel.raw())))?;
            (slot.kernel, slot.args.clone())
        };
        if args.len() != kernel_kind.arity() {
            return Err(DeviceError::invalid_argument(format!(
                "{}: arguments not bound",
                kernel_kind.name()
            )));
        }
        kernel_kind.validate(&args, &state.buffers)?;
        state.check_access(kernel_kind, &args)?;

        let seq = {
            let q = state.queue_mut(queue)?;
            q.submitted += 1;
            q.submitted
        };
        let event = EventId::new(state.next());
        state.events.insert(event, (queue, seq));
        state.queue_mut(queue)?.pending.push_back(PendingLaunch {
            seq,
            kernel: kernel_kind,
            args,
            range,
            wait: wait.to_vec(),
        });

        Ok(event)
    }

    fn wait_for_events(&self, events: &[EventId]) -> Result<()> {
        let mut state = self.lock()?;
        for &event in events {
            state.complete_event(event)?;
        }
        Ok(())
    }

    fn finish(&self, queue: QueueId) -> Result<()> {
        self.lock()?.drain_all(queue)
    }
}
