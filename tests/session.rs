mod common;

use std::collections::VecDeque;
use std::time::Duration;

use common::{cmd_of, ecmd_of, init_logger, MockTransport};
use tokio::sync::broadcast;
use vexble::commands::{Extended, ReplyForm, Simple};
use vexble::config::TransferConfig;
use vexble::device::{FileInitOptions, FileReadOptions, Session};
use vexble::devices::{CharacteristicId, ProductType};
use vexble::errors::{DeviceError, RequestError};
use vexble::events::{ConnectionState, DeviceEvent, EventBus};
use vexble::meta::{FileTransferOptions, FileTransferTarget, FileVendor};
use vexble::oad::{FirmwareImage, FirmwareUpdateStatus};
use vexble::protocol::{crc32, Cdc2Ack};
use vexble::status::PortCommandStatus;

async fn open(
    product: ProductType,
    transport: &MockTransport,
) -> (Session<MockTransport>, broadcast::Receiver<DeviceEvent>) {
    open_with(product, transport, TransferConfig::default()).await
}

async fn open_with(
    product: ProductType,
    transport: &MockTransport,
    config: TransferConfig,
) -> (Session<MockTransport>, broadcast::Receiver<DeviceEvent>) {
    init_logger();
    let events = EventBus::default();
    let rx = events.subscribe();
    let session = Session::connect(transport.clone(), product, config, events)
        .await
        .unwrap();
    (session, rx)
}

/// Everything published so far, admin traffic left out
fn drain(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(event, DeviceEvent::AdminData(_)) {
            events.push(event);
        }
    }
    events
}

fn ack(ecmd: u8) -> Vec<u8> {
    Extended(ecmd, &[0x76]).reply().unwrap()
}

fn file_init_reply(packet_size: u16, size: u32, crc: u32) -> Vec<u8> {
    let mut body = vec![0x76];
    body.extend(packet_size.to_le_bytes());
    body.extend(size.to_le_bytes());
    body.extend(crc.to_be_bytes());
    Extended(0x11, &body).reply().unwrap()
}

/// Answers the file transfer commands of a device holding `stored`
fn file_device(stored: Vec<u8>, reported_crc: u32) -> MockTransport {
    MockTransport::admin(move |frame| {
        if cmd_of(frame) == Some(0x21) {
            return Some(Simple(0x21, &[0; 10]).reply(ReplyForm::Echo));
        }
        match ecmd_of(frame)? {
            0x11 => Some(file_init_reply(16, stored.len() as u32, reported_crc)),
            0x14 => {
                // address and size follow the length byte
                let address = u32::from_le_bytes(frame[7..11].try_into().unwrap());
                let size = u16::from_le_bytes(frame[11..13].try_into().unwrap()) as usize;
                let start = address as usize - 0x3800000;
                let mut body = address.to_le_bytes().to_vec();
                body.extend(stored.iter().skip(start).take(size));
                body.resize(4 + size, 0);
                Some(Extended(0x14, &body).reply().unwrap())
            }
            ecmd @ (0x12 | 0x13 | 0x15) => Some(ack(ecmd)),
            _ => None,
        }
    })
}

#[tokio::test]
async fn small_upload_is_one_write_then_exit() {
    let payload = b"0123456789".to_vec();
    let transport = file_device(Vec::new(), 0);
    let (session, _rx) = open(ProductType::Go, &transport).await;

    let options = FileInitOptions {
        target: FileTransferTarget::Qspi,
        vid: FileVendor::User,
        options: FileTransferOptions::OVERWRITE,
        ..Default::default()
    };
    let mut seen = Vec::new();
    session
        .save_file("slot_1.bin", &payload, &options, |p| seen.push(p))
        .await
        .unwrap();

    let frames = transport.writes_to(CharacteristicId::AdminTx);
    let commands: Vec<_> = frames
        .iter()
        .map(|f| ecmd_of(f).or_else(|| cmd_of(f)).unwrap())
        .collect();
    assert_eq!(commands, vec![0x21, 0x11, 0x13, 0x12]);

    let init = &frames[1];
    assert_eq!(&init[19..23], &crc32(&payload).to_le_bytes());
    assert_eq!(init[10], FileTransferOptions::OVERWRITE.bits());

    let write = &frames[2];
    assert_eq!(&write[7..11], &0x3800000u32.to_le_bytes());
    assert_eq!(&write[11..21], &payload[..]);

    assert_eq!(seen.last(), Some(&100));
}

#[tokio::test]
async fn uploads_are_split_at_the_negotiated_size() {
    let payload: Vec<u8> = (0..40).collect();
    let transport = file_device(Vec::new(), 0);
    let (session, _rx) = open(ProductType::Go, &transport).await;

    session
        .save_file("data.bin", &payload, &FileInitOptions::default(), |_| {})
        .await
        .unwrap();

    let writes: Vec<_> = transport
        .writes_to(CharacteristicId::AdminTx)
        .into_iter()
        .filter(|f| ecmd_of(f) == Some(0x13))
        .collect();
    assert_eq!(writes.len(), 3);
    assert_eq!(&writes[1][7..11], &(0x3800000u32 + 16).to_le_bytes());
    assert_eq!(&writes[2][7..11], &(0x3800000u32 + 32).to_le_bytes());
}

#[tokio::test]
async fn downloads_are_verified_against_the_device_crc() {
    let stored: Vec<u8> = (1..=22).collect();
    let transport = file_device(stored.clone(), crc32(&stored));
    let (session, _rx) = open(ProductType::Go, &transport).await;

    let data = session
        .read_file("slot_1.bin", &FileReadOptions::default(), |_| {})
        .await
        .unwrap();
    assert_eq!(data, stored);

    // Every read is word sized
    for frame in transport.writes_to(CharacteristicId::AdminTx) {
        if ecmd_of(&frame) == Some(0x14) {
            let size = u16::from_le_bytes([frame[11], frame[12]]);
            assert_eq!(size % 4, 0);
        }
    }
}

#[tokio::test]
async fn crc_mismatch_still_closes_the_transfer() {
    let stored = vec![7u8; 8];
    let transport = file_device(stored.clone(), 0x1234_5678);
    let (session, _rx) = open(ProductType::Go, &transport).await;

    let err = session
        .read_file("slot_1.bin", &FileReadOptions::default(), |_| {})
        .await
        .unwrap_err();
    match err {
        DeviceError::CrcMismatch { expected, actual } => {
            assert_eq!(expected, 0x1234_5678);
            assert_eq!(actual, crc32(&stored));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let last = transport.writes_to(CharacteristicId::AdminTx).pop().unwrap();
    assert_eq!(ecmd_of(&last), Some(0x12));
}

#[tokio::test]
async fn raw_reads_skip_verification() {
    let stored = vec![3u8; 8];
    let transport = file_device(stored.clone(), 0x1234_5678);
    let (session, _rx) = open(ProductType::Go, &transport).await;

    let options = FileReadOptions {
        length: Some(8),
        ..Default::default()
    };
    let data = session.read_file("raw", &options, |_| {}).await.unwrap();
    assert_eq!(data, stored);
}

fn dir_entry(idx: u8, size: u32, name: &str) -> Vec<u8> {
    let mut body = vec![0x76, idx];
    body.extend(size.to_le_bytes());
    body.extend(0x3800000u32.to_le_bytes());
    body.extend(0xABCD_EF01u32.to_le_bytes());
    body.extend(b"bin");
    body.push(0);
    body.extend(0u32.to_le_bytes());
    body.extend(0x0102_0304u32.to_le_bytes());
    body.extend(name.as_bytes());
    body.push(0);
    Extended(0x17, &body).reply().unwrap()
}

#[tokio::test]
async fn list_files_walks_the_directory() {
    let transport = MockTransport::admin(|frame| match ecmd_of(frame)? {
        0x16 => Some(Extended(0x16, &[0x76, 2, 0]).reply().unwrap()),
        0x17 => match frame[7] {
            0 => Some(dir_entry(0, 100, "slot_1.bin")),
            _ => Some(dir_entry(1, 200, "slot_2.bin")),
        },
        _ => None,
    });
    transport.set_read(CharacteristicId::Lock, &0xDEADFACEu32.to_be_bytes());
    let (session, _rx) = open(ProductType::Exp, &transport).await;

    let files = session.list_files(FileVendor::User).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name, "slot_1.bin");
    assert_eq!(files[1].idx, 1);
    assert_eq!(files[1].size, 200);
    assert_eq!(files[1].version, 0x0102_0304);
}

#[tokio::test]
async fn locked_device_waits_for_its_code() {
    let transport = MockTransport::silent();
    transport.set_read(CharacteristicId::Lock, &[0, 0, 0, 0]);
    let (mut session, mut rx) = open(ProductType::Exp, &transport).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            DeviceEvent::ConnectionState(ConnectionState::Connecting),
            DeviceEvent::ConnectionState(ConnectionState::Locked),
            DeviceEvent::LockCodeRequested,
        ]
    );
    assert!(!session.is_unlocked());
    assert!(matches!(
        session.kv_read("teamnumber").await,
        Err(DeviceError::Locked)
    ));
    assert!(transport.writes_to(CharacteristicId::AdminTx).is_empty());

    transport.set_read(CharacteristicId::Lock, &0xDEADFACEu32.to_be_bytes());
    assert!(session.unlock(1234).await.unwrap());
    assert_eq!(
        transport.writes_to(CharacteristicId::Lock),
        vec![1234u32.to_be_bytes().to_vec()]
    );

    let events = drain(&mut rx);
    assert_eq!(
        events[0],
        DeviceEvent::ConnectionState(ConnectionState::Connected)
    );
    assert!(matches!(events[1], DeviceEvent::DeviceInfo(_)));
    assert!(session.is_unlocked());
}

#[tokio::test]
async fn wrong_code_asks_again() {
    let transport = MockTransport::silent();
    transport.set_read(CharacteristicId::Lock, &[0, 0, 0, 0]);
    let (mut session, mut rx) = open(ProductType::Iq2, &transport).await;
    drain(&mut rx);

    assert!(!session.unlock(1).await.unwrap());
    assert_eq!(drain(&mut rx), vec![DeviceEvent::LockCodeRequested]);
}

#[tokio::test]
async fn short_lock_value_fails_to_connect() {
    init_logger();
    let transport = MockTransport::silent();
    transport.set_read(CharacteristicId::Lock, &[0xDE, 0xAD]);

    let result = Session::connect(
        transport.clone(),
        ProductType::Aim,
        TransferConfig::default(),
        EventBus::default(),
    )
    .await;
    assert!(matches!(result, Err(DeviceError::InvalidMagic)));
}

#[tokio::test]
async fn status_notifications_become_events() {
    let transport = MockTransport::silent();
    let (mut session, mut rx) = open(ProductType::Go, &transport).await;
    assert_eq!(transport.listener_count(CharacteristicId::PortStatus), 1);

    // Motor on port 1: flags, velocity, current, position, temperature
    let mut record = vec![0x21, 0x05, 8, 0x80, 50, 12];
    record.extend(720i32.to_le_bytes());
    record.push(31);
    transport.notify(CharacteristicId::PortStatus, &record);

    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let DeviceEvent::PortStatus(records) = rx.recv().await.unwrap() {
                return records;
            }
        }
    })
    .await
    .unwrap();

    match &event[..] {
        [PortCommandStatus::Motor(motor)] => {
            assert_eq!(motor.record.port, 1);
            assert_eq!(motor.velocity, 50);
            assert_eq!(motor.position, 720);
            assert_eq!(motor.temperature, 31);
        }
        other => panic!("unexpected records {other:?}"),
    }

    session.disconnect().await.unwrap();
    assert!(transport.is_disconnected());
}

#[tokio::test]
async fn user_channel_is_forwarded() {
    let transport = MockTransport::silent();
    transport.set_read(CharacteristicId::Lock, &0xDEADFACEu32.to_be_bytes());
    let (session, mut rx) = open(ProductType::Exp, &transport).await;

    session.write_user(b"hello").await.unwrap();
    assert_eq!(
        transport.writes_to(CharacteristicId::UserTx),
        vec![b"hello".to_vec()]
    );

    transport.notify(CharacteristicId::UserRx, b"world");
    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let DeviceEvent::UserData(data) = rx.recv().await.unwrap() {
                return data;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event, b"world");
}

#[tokio::test]
async fn legacy_only_commands_are_refused_elsewhere() {
    let transport = MockTransport::silent();
    let (session, _rx) = open(ProductType::Go, &transport).await;
    assert!(matches!(session.play(1).await, Err(DeviceError::Unsupported)));

    let (session, _rx) = open(ProductType::Coder, &transport).await;
    assert!(matches!(
        session.kv_read("teamnumber").await,
        Err(DeviceError::Unsupported)
    ));
}

fn test_image() -> FirmwareImage {
    let mut data: Vec<u8> = (0u8..40).collect();
    data[18] = 1;
    FirmwareImage::from_bytes(data, 0x2000)
}

/// A TI style bootloader with 20 byte blocks. `fail_with` is reported for the first block.
fn ti_device(fail_with: Option<u8>) -> MockTransport {
    const TOTAL_BLOCKS: u32 = 3;

    fn request(status: u8, block: u32) -> Vec<u8> {
        let mut r = vec![0x12, status];
        r.extend(block.to_le_bytes());
        r
    }

    MockTransport::new(move |id, data| {
        let reply = match (id, data) {
            (CharacteristicId::OadControl, [0x01]) => vec![0x01, 20, 0],
            (CharacteristicId::OadControl, [0x04]) => vec![0x04, 0],
            (CharacteristicId::OadIdentify, _) => request(fail_with.unwrap_or(0), 0),
            (CharacteristicId::OadBlock, block) => {
                let n = u32::from_le_bytes(block[..4].try_into().unwrap());
                if n + 1 < TOTAL_BLOCKS {
                    request(0, n + 1)
                } else {
                    request(0x0E, n + 1)
                }
            }
            _ => return Vec::new(),
        };
        vec![(CharacteristicId::OadControl, reply)]
    })
}

#[tokio::test]
async fn firmware_update_runs_to_completion() {
    let transport = ti_device(None);
    let (mut session, mut rx) = open(ProductType::Go, &transport).await;
    drain(&mut rx);

    let status = session.update_firmware(test_image()).await.unwrap();
    assert_eq!(status, FirmwareUpdateStatus::Success);
    assert_eq!(transport.writes_to(CharacteristicId::OadBlock).len(), 3);
    assert_eq!(transport.writes_to(CharacteristicId::OadIdentify)[0].len(), 22);

    let events = drain(&mut rx);
    assert!(events.contains(&DeviceEvent::FirmwareProgress(100)));
    assert_eq!(
        events.last(),
        Some(&DeviceEvent::FirmwareStatus(FirmwareUpdateStatus::Success))
    );
    assert!(!transport.is_disconnected());
}

#[tokio::test]
async fn failed_firmware_update_disconnects() {
    let transport = ti_device(Some(0x01));
    let (mut session, mut rx) = open(ProductType::Go, &transport).await;
    drain(&mut rx);

    let status = session.update_firmware(test_image()).await.unwrap();
    assert_eq!(status, FirmwareUpdateStatus::CommunicationFailure);
    assert!(transport.writes_to(CharacteristicId::OadBlock).is_empty());
    assert!(transport.is_disconnected());

    let events = drain(&mut rx);
    assert!(events.contains(&DeviceEvent::FirmwareStatus(
        FirmwareUpdateStatus::CommunicationFailure
    )));
    assert_eq!(
        events.last(),
        Some(&DeviceEvent::ConnectionState(ConnectionState::Disconnected))
    );
}

#[tokio::test(start_paused = true)]
async fn silent_bootloader_times_out() {
    let transport = MockTransport::silent();
    let (mut session, _rx) = open(ProductType::OneStick, &transport).await;

    let status = session.update_firmware(test_image()).await.unwrap();
    assert_eq!(status, FirmwareUpdateStatus::Timeout);
    assert!(transport.is_disconnected());
}

#[tokio::test]
async fn products_without_oad_refuse_updates() {
    let transport = MockTransport::silent();
    transport.set_read(CharacteristicId::Lock, &0xDEADFACEu32.to_be_bytes());
    let (mut session, _rx) = open(ProductType::Exp, &transport).await;

    assert!(matches!(
        session.update_firmware(test_image()).await,
        Err(DeviceError::Unsupported)
    ));
}

/// A file device that also programs flash, reporting `percents` one poll at a time.
/// The last value repeats once the list runs out.
fn flash_device(percents: Vec<u8>) -> MockTransport {
    let mut percents = VecDeque::from(percents);
    MockTransport::admin(move |frame| {
        if cmd_of(frame) == Some(0x21) {
            return Some(Simple(0x21, &[0; 10]).reply(ReplyForm::Echo));
        }
        match ecmd_of(frame)? {
            0x11 => Some(file_init_reply(64, 0, 0)),
            0xF1 => {
                let percent = match percents.len() {
                    0 | 1 => *percents.front()?,
                    _ => percents.pop_front()?,
                };
                Some(Extended(0xF1, &[0x76, 0, percent]).reply().unwrap())
            }
            ecmd @ (0x12 | 0x13 | 0x15 | 0xFF) => Some(ack(ecmd)),
            _ => None,
        }
    })
}

fn firmware_options() -> FileInitOptions {
    FileInitOptions {
        target: FileTransferTarget::B1,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn firmware_region_upload_waits_for_flash() {
    let payload = vec![0x5A; 10];
    let transport = flash_device(vec![40, 100]);
    let (session, _rx) = open(ProductType::Go, &transport).await;

    let mut seen = Vec::new();
    session
        .save_file("firmware.bin", &payload, &firmware_options(), |p| seen.push(p))
        .await
        .unwrap();

    let commands: Vec<_> = transport
        .writes_to(CharacteristicId::AdminTx)
        .iter()
        .map(|f| ecmd_of(f).or_else(|| cmd_of(f)).unwrap())
        .collect();
    assert_eq!(commands, vec![0x21, 0xFF, 0x11, 0x13, 0x12, 0xF1, 0xF1]);

    // The transfer fills the first half, flash programming the second
    assert_eq!(seen, vec![50, 70, 100, 100]);
}

#[tokio::test(start_paused = true)]
async fn flash_error_status_fails_the_upload() {
    let transport = flash_device(vec![30, 255]);
    let (session, _rx) = open(ProductType::Go, &transport).await;

    let result = session
        .save_file("firmware.bin", &[1, 2, 3, 4], &firmware_options(), |_| {})
        .await;
    assert!(matches!(result, Err(DeviceError::FlashFailed)));

    let polls = transport
        .writes_to(CharacteristicId::AdminTx)
        .iter()
        .filter(|f| ecmd_of(f) == Some(0xF1))
        .count();
    assert_eq!(polls, 2);
}

#[tokio::test(start_paused = true)]
async fn stalled_flash_programming_times_out() {
    let transport = flash_device(vec![10]);
    let config = TransferConfig {
        flash_program_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let (session, _rx) = open_with(ProductType::Go, &transport, config).await;

    let start = tokio::time::Instant::now();
    let result = session
        .save_file("firmware.bin", &[1, 2, 3, 4], &firmware_options(), |_| {})
        .await;
    assert!(matches!(
        result,
        Err(DeviceError::Request(RequestError::Timeout))
    ));
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(6));
}

#[tokio::test]
async fn linked_file_is_named_before_exit() {
    let transport = file_device(Vec::new(), 0);
    let (session, _rx) = open(ProductType::Go, &transport).await;

    let options = FileInitOptions {
        vid: FileVendor::User,
        linked_file: Some((FileVendor::VexVm, "python_vm.bin".into())),
        ..Default::default()
    };
    session
        .save_file("slot_1.bin", b"print(1)", &options, |_| {})
        .await
        .unwrap();

    let frames = transport.writes_to(CharacteristicId::AdminTx);
    let commands: Vec<_> = frames
        .iter()
        .map(|f| ecmd_of(f).or_else(|| cmd_of(f)).unwrap())
        .collect();
    assert_eq!(commands, vec![0x21, 0x11, 0x13, 0x15, 0x12]);

    let link = &frames[3];
    assert_eq!(link[7], FileVendor::VexVm.to_u8());
    assert_eq!(&link[9..22], b"python_vm.bin");
}

#[tokio::test(start_paused = true)]
async fn refused_file_init_returns_the_nack() {
    let transport = MockTransport::admin(|frame| {
        if cmd_of(frame) == Some(0x21) {
            return Some(Simple(0x21, &[0; 10]).reply(ReplyForm::Echo));
        }
        match ecmd_of(frame)? {
            0x11 => Some(Extended(0x11, &[0xD1]).reply().unwrap()),
            _ => None,
        }
    });
    let (session, _rx) = open(ProductType::Go, &transport).await;

    let start = tokio::time::Instant::now();
    let err = session
        .save_file("slot_1.bin", &[0; 4], &FileInitOptions::default(), |_| {})
        .await
        .unwrap_err();
    match err {
        DeviceError::Request(e) => assert_eq!(e.nack(), Some(Cdc2Ack::NackSize)),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
}

/// A VEX style bootloader that negotiates 12 byte blocks
fn vex_oad_device(total_blocks: u32) -> MockTransport {
    MockTransport::new(move |id, data| {
        let reply = match (id, data) {
            (CharacteristicId::OadControl, [0x20]) => vec![0x20, 0, 12, 0],
            (CharacteristicId::OadControl, [0x23]) => vec![0x23, 0],
            (CharacteristicId::OadIdentify, _) => vec![0x21, 0],
            (CharacteristicId::OadBlock, block) => {
                let next = u32::from_le_bytes(block[..4].try_into().unwrap()) + 1;
                let mut r = vec![0x22, 0];
                r.extend(next.to_le_bytes());
                r.extend(total_blocks.saturating_sub(next).to_le_bytes());
                r
            }
            _ => return Vec::new(),
        };
        vec![(CharacteristicId::OadControl, reply)]
    })
}

#[tokio::test]
async fn vex_firmware_update_runs_to_completion() {
    let transport = vex_oad_device(5);
    let (mut session, mut rx) = open(ProductType::OneStick, &transport).await;
    drain(&mut rx);

    let status = session.update_firmware(test_image()).await.unwrap();
    assert_eq!(status, FirmwareUpdateStatus::Success);
    assert_eq!(transport.writes_to(CharacteristicId::OadIdentify)[0].len(), 18);

    // Eight image bytes behind each block number
    let blocks = transport.writes_to(CharacteristicId::OadBlock);
    assert_eq!(blocks.len(), 5);
    for (n, block) in blocks.iter().enumerate() {
        assert_eq!(block.len(), 12);
        assert_eq!(&block[..4], &(n as u32).to_le_bytes());
    }
    assert_eq!(&blocks[4][4..], &test_image().data[32..40]);

    assert_eq!(
        transport.writes_to(CharacteristicId::OadControl).last(),
        Some(&vec![0x23])
    );
    let events = drain(&mut rx);
    assert!(events.contains(&DeviceEvent::FirmwareProgress(100)));
    assert_eq!(
        events.last(),
        Some(&DeviceEvent::FirmwareStatus(FirmwareUpdateStatus::Success))
    );
    assert!(!transport.is_disconnected());
}
