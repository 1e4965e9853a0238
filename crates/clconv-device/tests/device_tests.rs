// SPDX-License-Identifier: AGPL-3.0-only

//! Device layer integration tests against the software device

use std::sync::Arc;
use std::thread;

use clconv_device::prelude::*;
use clconv_device::{pack_software_program, standard_program, ConvGeometry, FORWARD_NAIVE, REPEATED_ADD};

fn software_device() -> (Arc<SoftwareBackend>, DeviceHandle) {
    let backend = Arc::new(SoftwareBackend::new());
    let device = DeviceHandle::with_image(
        Arc::clone(&backend) as Arc<dyn ComputeBackend>,
        ProgramImage::from_bytes(standard_program()).expect("image"),
    )
    .expect("device");
    (backend, device)
}

#[test]
fn initialize_builds_program_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kernel_file.aocx");
    std::fs::write(&path, standard_program()).unwrap();

    let device = DeviceHandle::initialize(Arc::new(SoftwareBackend::new()), &path).unwrap();
    assert_eq!(device.program().entry_points().len(), 3);
    assert!(device.program().has_entry_point(REPEATED_ADD));
    assert_eq!(device.program().image().source(), Some(path.as_path()));
}

#[test]
fn missing_program_is_a_configuration_error() {
    let err = DeviceHandle::initialize(
        Arc::new(SoftwareBackend::new()),
        std::path::Path::new("/nonexistent/kernel_file.aocx"),
    )
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn kernel_missing_from_program_is_reported_by_name() {
    let device = DeviceHandle::with_image(
        Arc::new(SoftwareBackend::new()),
        ProgramImage::from_bytes(pack_software_program(&[FORWARD_NAIVE])).unwrap(),
    )
    .unwrap();

    let err = device.create_kernel(REPEATED_ADD).unwrap_err();
    assert!(err.to_string().contains(REPEATED_ADD));
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn write_then_read_returns_written_values() {
    let (_, device) = software_device();
    let queue = device.create_queue(QueueProperties::default()).unwrap();
    let mut buffer = device
        .create_buffer(1024, MemAccess::ReadWrite, Ownership::Session)
        .unwrap();

    #[allow(clippy::cast_precision_loss)]
    let data: Vec<f32> = (0..1024).map(|i| i as f32 * 0.25 - 3.0).collect();
    queue.write(&mut buffer, &data).unwrap();
    assert_eq!(queue.read(&buffer, &[]).unwrap(), data);
    queue.release().unwrap();
}

#[test]
fn short_write_is_rejected() {
    let (_, device) = software_device();
    let queue = device.create_queue(QueueProperties::default()).unwrap();
    let mut buffer = device
        .create_buffer(8, MemAccess::ReadWrite, Ownership::Session)
        .unwrap();

    let err = queue.write(&mut buffer, &[1.0; 7]).unwrap_err();
    assert!(matches!(err, DeviceError::TransferFailed { .. }));
}

#[test]
fn dropped_handles_return_device_resources() {
    let (backend, device) = software_device();
    {
        let queue = device.create_queue(QueueProperties::default()).unwrap();
        let _a = device
            .create_buffer(16, MemAccess::ReadWrite, Ownership::Session)
            .unwrap();
        let _b = device
            .create_buffer(16, MemAccess::ReadOnly, Ownership::Persistent)
            .unwrap();
        assert_eq!(backend.live_buffers().unwrap(), 2);
        assert_eq!(backend.live_queues().unwrap(), 1);
        drop(queue);
    }
    assert_eq!(backend.live_buffers().unwrap(), 0);
    assert_eq!(backend.live_queues().unwrap(), 0);
    assert_eq!(backend.allocated_bytes().unwrap(), 0);
}

#[test]
fn broadcast_kernel_reads_source_by_channel() {
    let (_, device) = software_device();
    let queue = device.create_queue(QueueProperties::default()).unwrap();

    let mut bias = device
        .create_buffer(2, MemAccess::ReadOnly, Ownership::Persistent)
        .unwrap();
    let mut output = device
        .create_buffer(6, MemAccess::ReadWrite, Ownership::Session)
        .unwrap();
    queue.write(&mut bias, &[10.0, 20.0]).unwrap();
    queue.write(&mut output, &[1.0; 6]).unwrap();

    let kernel = device.create_kernel(REPEATED_ADD).unwrap();
    let done = kernel
        .dispatch(
            &queue,
            KernelArgs::new().int(6).int(2).int(3).output(&mut output).input(&bias),
            NdRange::new(6, 6),
            &[],
        )
        .unwrap();

    let values = queue.read(&output, &[done]).unwrap();
    assert_eq!(values, vec![11.0, 11.0, 11.0, 21.0, 21.0, 21.0]);
}

#[test]
fn event_chain_across_queues() {
    let (_, device) = software_device();
    let first = device.create_queue(QueueProperties::default()).unwrap();
    let second = device.create_queue(QueueProperties { profiling: true }).unwrap();

    let mut input = device
        .create_buffer(4, MemAccess::ReadWrite, Ownership::Session)
        .unwrap();
    let mut middle = device
        .create_buffer(4, MemAccess::ReadWrite, Ownership::Session)
        .unwrap();
    let mut output = device
        .create_buffer(4, MemAccess::ReadWrite, Ownership::Session)
        .unwrap();
    first.write(&mut input, &[0.1, 0.2, 0.3, 0.4]).unwrap();

    let tanh = device.create_kernel(FORWARD_NAIVE).unwrap();
    let produced = tanh
        .dispatch(&first, KernelArgs::new().output(&mut middle).input(&input), NdRange::new(4, 4), &[])
        .unwrap();
    let consumed = tanh
        .dispatch(
            &second,
            KernelArgs::new().output(&mut output).input(&middle),
            NdRange::new(4, 4),
            &[produced],
        )
        .unwrap();

    let values = second.read(&output, &[consumed]).unwrap();
    for (v, x) in values.iter().zip([0.1f32, 0.2, 0.3, 0.4]) {
        assert!((v - x.tanh().tanh()).abs() < 1e-6);
    }
    first.release().unwrap();
    second.release().unwrap();
}

#[test]
fn concurrent_dispatch_on_shared_kernel() {
    let (_, device) = software_device();
    let device = Arc::new(device);
    let kernel = Arc::new(device.create_kernel(FORWARD_NAIVE).unwrap());

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let device = Arc::clone(&device);
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || {
                let queue = device.create_queue(QueueProperties::default()).unwrap();
                let mut input = device
                    .create_buffer(64, MemAccess::ReadWrite, Ownership::Session)
                    .unwrap();
                let mut output = device
                    .create_buffer(64, MemAccess::ReadWrite, Ownership::Session)
                    .unwrap();

                #[allow(clippy::cast_precision_loss)]
                let value = worker as f32 * 0.1;
                queue.write(&mut input, &[value; 64]).unwrap();
                for _ in 0..20 {
                    kernel
                        .dispatch(
                            &queue,
                            KernelArgs::new().output(&mut output).input(&input),
                            NdRange::new(64, 64),
                            &[],
                        )
                        .unwrap();
                }
                let values = queue.read(&output, &[]).unwrap();
                queue.release().unwrap();
                (value, values)
            })
        })
        .collect();

    for worker in workers {
        let (value, values) = worker.join().unwrap();
        assert!(values.iter().all(|v| (v - value.tanh()).abs() < 1e-6));
    }
}

#[test]
fn reference_geometry_matches_network() {
    assert_eq!(ConvGeometry::FIRST.weights_len(), 200);
    assert_eq!(ConvGeometry::FIRST.output_len(), 8192);
    assert_eq!(ConvGeometry::SECOND.weights_len(), 65536);
    assert_eq!(ConvGeometry::SECOND.output_len(), 8);
}
