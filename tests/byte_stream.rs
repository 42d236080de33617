//! Byte stream tests: loopback, chunking, back-pressure and concurrent access.

mod common;

use common::*;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serial_session::{LineConfig, SessionError, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Read from the manager until `len` bytes have arrived.
async fn read_exactly(manager: &SessionManager, len: usize) -> Vec<u8> {
    let mut received = Vec::with_capacity(len);
    while received.len() < len {
        let chunk = within(manager.read()).await.unwrap();
        assert!(!chunk.is_empty(), "Unexpected end of stream");
        received.extend(chunk);
    }
    received
}

async fn device_read(device: &mut DuplexStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    within(device.read_exact(&mut buf)).await.unwrap();
    buf
}

fn shared() -> (serial_session::port::MockPorts, Arc<SessionManager>) {
    let (mock, manager) = mock_manager();
    (mock, Arc::new(manager))
}

// ============================================================================
// Loopback
// ============================================================================

#[tokio::test]
async fn test_host_to_device_sizes() {
    let (mock, manager) = mock_manager();
    let mut device = open_default(&mock, &manager).await;

    for len in [1, 2, 254, 255, 256, 1024, 4096, 10_000] {
        let data = pattern(len);
        assert_eq!(within(manager.write(&data)).await.unwrap(), len);
        assert_eq!(device_read(&mut device, len).await, data, "length {len}");
    }
}

#[tokio::test]
async fn test_device_to_host_sizes() {
    let (mock, manager) = mock_manager();
    let mut device = open_default(&mock, &manager).await;

    for len in [1, 2, 254, 255, 256, 1024, 4096, 10_000] {
        let data = pattern(len);
        device.write_all(&data).await.unwrap();
        assert_eq!(read_exactly(&manager, len).await, data, "length {len}");
    }
}

#[tokio::test]
async fn test_read_chunks_bounded_by_buffer_size() {
    let (mock, manager) = mock_manager();
    let config = LineConfig {
        buffer_size: 16,
        ..Default::default()
    };
    let mut device = open_with(&mock, &manager, config).await;

    device.write_all(&pattern(100)).await.unwrap();
    let mut total = 0;
    while total < 100 {
        let chunk = within(manager.read()).await.unwrap();
        assert!(!chunk.is_empty() && chunk.len() <= 16);
        total += chunk.len();
    }
    assert_eq!(total, 100);
}

#[tokio::test]
async fn test_order_preserved_across_writes() {
    let (mock, manager) = mock_manager();
    let mut device = open_default(&mock, &manager).await;

    manager.write(b"first ").await.unwrap();
    manager.write(b"second ").await.unwrap();
    manager.write(b"third").await.unwrap();
    assert_eq!(device_read(&mut device, 18).await, b"first second third");
}

#[tokio::test]
async fn test_end_of_stream_is_empty_chunk() {
    let (mock, manager) = mock_manager();
    let device = open_default(&mock, &manager).await;

    drop(device);
    assert!(within(manager.read()).await.unwrap().is_empty());
}

// ============================================================================
// Back-pressure
// ============================================================================

#[tokio::test]
async fn test_write_waits_for_device() {
    let (mock, manager) = shared();
    mock.set_duplex_capacity(8);
    let config = LineConfig {
        buffer_size: 4,
        ..Default::default()
    };
    let mut device = open_with(&mock, &manager, config).await;
    let data = pattern(64);

    let mut write = tokio_test::task::spawn(manager.write(&data));
    assert!(write.poll().is_pending());

    let (drained, written) = within(async { tokio::join!(device_read(&mut device, 64), write) }).await;
    assert_eq!(written.unwrap(), 64);
    assert_eq!(drained, data);
}

// ============================================================================
// Concurrent Access
// ============================================================================

#[tokio::test]
async fn test_second_reader_is_busy() {
    let (mock, manager) = shared();
    let mut device = open_default(&mock, &manager).await;

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.read().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(
        manager.read().await,
        Err(SessionError::ReaderBusy)
    ));

    device.write_all(b"data").await.unwrap();
    assert_eq!(within(first).await.unwrap().unwrap(), b"data");

    // Reader is free again.
    device.write_all(b"more").await.unwrap();
    assert_eq!(read_exactly(&manager, 4).await, b"more");
}

#[tokio::test]
async fn test_second_writer_is_busy() {
    let (mock, manager) = shared();
    mock.set_duplex_capacity(4);
    let mut device = open_default(&mock, &manager).await;

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.write(&pattern(32)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(
        manager.write(b"x").await,
        Err(SessionError::WriterBusy)
    ));

    assert_eq!(device_read(&mut device, 32).await, pattern(32));
    assert_eq!(within(first).await.unwrap().unwrap(), 32);
}

#[tokio::test]
async fn test_read_and_write_run_concurrently() {
    let (mock, manager) = shared();
    let mut device = open_default(&mock, &manager).await;

    let reader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.read().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A pending read must not block writes.
    within(manager.write(b"ping")).await.unwrap();
    assert_eq!(device_read(&mut device, 4).await, b"ping");

    device.write_all(b"pong").await.unwrap();
    assert_eq!(within(reader).await.unwrap().unwrap(), b"pong");
}

// ============================================================================
// Close and Detach
// ============================================================================

#[tokio::test]
async fn test_close_unblocks_pending_read() {
    let (mock, manager) = shared();
    let _device = open_default(&mock, &manager).await;

    let reader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.read().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    within(manager.close()).await.unwrap();
    assert!(matches!(
        within(reader).await.unwrap(),
        Err(SessionError::PortNotOpen)
    ));
    assert!(!mock.is_open(MOCK_PORT));
}

#[tokio::test]
async fn test_detach_unblocks_pending_read_and_write() {
    let (mock, manager) = shared();
    mock.set_duplex_capacity(4);
    let _device = open_default(&mock, &manager).await;

    let reader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.read().await })
    };
    let writer = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.write(&pattern(64)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    mock.remove_port(MOCK_PORT);
    manager.registry().notify_detach(MOCK_PORT);

    assert!(matches!(
        within(reader).await.unwrap(),
        Err(SessionError::DeviceGone)
    ));
    assert!(matches!(
        within(writer).await.unwrap(),
        Err(SessionError::DeviceGone)
    ));
    assert!(!mock.is_open(MOCK_PORT));
}

#[tokio::test]
async fn test_read_before_any_open() {
    let (_mock, manager) = mock_manager();
    assert!(matches!(
        manager.read().await,
        Err(SessionError::NoPortSelected)
    ));
    assert!(matches!(
        manager.write(b"x").await,
        Err(SessionError::NoPortSelected)
    ));
    assert!(matches!(
        manager.chunks(),
        Err(SessionError::NoPortSelected)
    ));
}

#[tokio::test]
async fn test_read_after_close() {
    let (mock, manager) = mock_manager();
    let _device = open_default(&mock, &manager).await;
    manager.close().await.unwrap();

    assert!(matches!(
        manager.read().await,
        Err(SessionError::PortNotOpen)
    ));
    assert!(matches!(
        manager.write(b"x").await,
        Err(SessionError::PortNotOpen)
    ));
}

// ============================================================================
// Chunk Stream
// ============================================================================

#[tokio::test]
async fn test_chunks_deliver_in_order() {
    let (mock, manager) = mock_manager();
    let mut device = open_default(&mock, &manager).await;
    let mut chunks = manager.chunks().unwrap();

    let data = pattern(2000);
    device.write_all(&data).await.unwrap();

    let mut received = Vec::new();
    while received.len() < data.len() {
        let chunk = within(chunks.next()).await.unwrap().unwrap();
        assert!(chunk.len() <= 255);
        received.extend(chunk);
    }
    assert_eq!(received, data);
}

#[tokio::test]
async fn test_chunks_hold_the_reader() {
    let (mock, manager) = mock_manager();
    let mut device = open_default(&mock, &manager).await;

    let chunks = manager.chunks().unwrap();
    assert!(matches!(
        manager.read().await,
        Err(SessionError::ReaderBusy)
    ));
    assert!(matches!(manager.chunks(), Err(SessionError::ReaderBusy)));

    drop(chunks);
    device.write_all(b"free").await.unwrap();
    assert_eq!(read_exactly(&manager, 4).await, b"free");
}

#[tokio::test]
async fn test_chunks_end_on_close() {
    let (mock, manager) = shared();
    let _device = open_default(&mock, &manager).await;
    let mut chunks = manager.chunks().unwrap();

    let closer = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            manager.close().await
        })
    };

    assert!(within(chunks.next()).await.is_none());
    within(closer).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_chunks_report_device_gone_once() {
    let (mock, manager) = mock_manager();
    let mut device = open_default(&mock, &manager).await;
    let mut chunks = manager.chunks().unwrap();

    device.write_all(b"last words").await.unwrap();
    let mut received = Vec::new();
    while received.len() < 10 {
        received.extend(within(chunks.next()).await.unwrap().unwrap());
    }
    assert_eq!(received, b"last words");

    manager.registry().notify_detach(MOCK_PORT);
    assert!(matches!(
        within(chunks.next()).await,
        Some(Err(SessionError::DeviceGone))
    ));
    assert!(within(chunks.next()).await.is_none());
}

#[tokio::test]
async fn test_chunks_end_at_end_of_stream() {
    let (mock, manager) = mock_manager();
    let mut device = open_default(&mock, &manager).await;
    let mut chunks = manager.chunks().unwrap();

    device.write_all(b"bye").await.unwrap();
    drop(device);

    let collected: Vec<u8> = within(chunks.by_ref().map(|c| c.unwrap()).concat()).await;
    assert_eq!(collected, b"bye");
    assert!(manager.is_open());
}
