mod common;

use common::{frame_bytes, Harness};
use gpu_interop::{ApiKind, FrameBuffer, FrameBufferMut, LocalTexture, PixelFormat, TextureDesc};
use proptest::prelude::*;
use texshare::{Error, ReceiveStatus, ReceiverState, SenderState, SenderTarget};

const BGRA: PixelFormat = PixelFormat::Bgra8Unorm;

fn publish(sender: &mut texshare::SenderSession, width: u32, height: u32, value: u8) -> bool {
    let bytes = frame_bytes(width, height, value);
    let frame = FrameBuffer::from_bytes(&bytes, width, height, BGRA).unwrap();
    sender.publish_frame(&frame).unwrap()
}

fn receive(
    receiver: &mut texshare::ReceiverSession,
    width: u32,
    height: u32,
) -> (texshare::Result<ReceiveStatus>, Vec<u8>) {
    let mut bytes = frame_bytes(width, height, 0);
    let status = {
        let mut frame = FrameBufferMut::from_bytes(&mut bytes, width, height, BGRA).unwrap();
        receiver.receive_frame(&mut frame)
    };
    (status, bytes)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn bind_reports_what_create_published(
        name in "[A-Za-z0-9 _.-]{1,48}",
        width in 1u32..512,
        height in 1u32..512,
        format in prop::sample::select(PixelFormat::KNOWN.to_vec()),
    ) {
        let harness = Harness::new("prop");
        let producer = harness.context(100);
        let consumer = harness.context(200);

        let mut sender = harness.sender(&producer);
        sender.create(&name, width, height, format).unwrap();

        let mut receiver = harness.receiver(&consumer, ApiKind::Host);
        let entry = receiver.bind(name.as_str()).unwrap();
        prop_assert_eq!(entry.name, name);
        prop_assert_eq!((entry.width, entry.height), (width, height));
        prop_assert_eq!(entry.format, format);
        prop_assert_eq!(entry.owner_pid, 100);
        prop_assert_eq!(receiver.state(), ReceiverState::Bound);
    }
}

#[test]
fn live_name_is_refused_and_dead_owner_is_evicted() {
    let harness = Harness::new("names");
    let first = harness.context(101);
    let second = harness.context(102);
    let third = harness.context(103);

    let mut original = harness.sender(&first);
    original.create("stage", 64, 64, BGRA).unwrap();

    let mut rival = harness.sender(&second);
    assert!(matches!(
        rival.create("stage", 64, 64, BGRA),
        Err(Error::NameInUse(_))
    ));
    assert_eq!(rival.state(), SenderState::Unbound);

    harness.probe.kill(101);
    let mut successor = harness.sender(&third);
    let entry = successor.create("stage", 32, 16, BGRA).unwrap();
    assert_eq!(entry.owner_pid, 103);

    // The evicted owner releasing late must not remove its successor.
    original.release();
    assert_eq!(third.registry().lookup("stage").unwrap(), entry);
}

#[test]
fn resize_reports_size_changed_exactly_once() {
    let harness = Harness::new("resize");
    let producer = harness.context(110);
    let consumer = harness.context(120);

    let mut sender = harness.sender(&producer);
    sender.create("resize", 100, 100, BGRA).unwrap();
    assert!(publish(&mut sender, 100, 100, 1));

    let mut receiver = harness.receiver(&consumer, ApiKind::OpenGl);
    receiver.bind("resize").unwrap();
    let (status, pixels) = receive(&mut receiver, 100, 100);
    assert_eq!(status.unwrap(), ReceiveStatus::Delivered);
    assert!(pixels.iter().all(|&b| b == 1));

    sender.update(200, 150).unwrap();
    assert_eq!(sender.state(), SenderState::Active);
    assert!(publish(&mut sender, 200, 150, 2));

    let (status, _) = receive(&mut receiver, 100, 100);
    assert_eq!(status.unwrap(), ReceiveStatus::SizeChanged);
    let entry = receiver.bound_entry().unwrap();
    assert_eq!((entry.width, entry.height), (200, 150));

    for _ in 0..2 {
        let (status, pixels) = receive(&mut receiver, 200, 150);
        assert_eq!(status.unwrap(), ReceiveStatus::Delivered);
        assert_eq!(pixels.len(), 200 * 150 * 4);
        assert!(pixels.iter().all(|&b| b == 2));
    }
}

#[test]
fn update_to_same_size_keeps_the_texture() {
    let harness = Harness::new("same");
    let producer = harness.context(130);
    let mut sender = harness.sender(&producer);
    let entry = sender.create("same", 16, 16, BGRA).unwrap();
    let texture = sender.texture().unwrap().id();

    sender.update(16, 16).unwrap();
    assert_eq!(sender.texture().unwrap().id(), texture);
    assert_eq!(sender.entry(), Some(&entry));
}

#[test]
fn released_sender_is_gone_for_receivers() {
    let harness = Harness::new("release");
    let producer = harness.context(140);
    let consumer = harness.context(150);

    let mut sender = harness.sender(&producer);
    sender.create("leaving", 8, 8, BGRA).unwrap();
    let mut receiver = harness.receiver(&consumer, ApiKind::Host);
    receiver.bind("leaving").unwrap();

    sender.release();
    sender.release();
    assert_eq!(sender.state(), SenderState::Released);

    let (status, _) = receive(&mut receiver, 8, 8);
    assert_eq!(status.unwrap(), ReceiveStatus::SenderGone);
    assert_eq!(receiver.state(), ReceiverState::Unbound);
    assert!(matches!(receive(&mut receiver, 8, 8).0, Err(Error::NotBound)));
    assert!(matches!(receiver.bind("leaving"), Err(Error::NotFound(_))));
}

#[test]
fn crashed_sender_is_gone_for_receivers() {
    let harness = Harness::new("crash");
    let producer = harness.context(160);
    let consumer = harness.context(170);

    let mut sender = harness.sender(&producer);
    sender.create("crashy", 4, 4, BGRA).unwrap();
    let mut receiver = harness.receiver(&consumer, ApiKind::Host);
    receiver.bind("crashy").unwrap();

    harness.probe.kill(160);
    let (status, _) = receive(&mut receiver, 4, 4);
    assert_eq!(status.unwrap(), ReceiveStatus::SenderGone);
    assert!(consumer.senders().is_empty());
}

#[test]
fn new_owner_with_same_geometry_is_followed_silently() {
    let harness = Harness::new("handoff");
    let consumer = harness.context(180);
    let first = harness.context(181);
    let second = harness.context(182);

    let mut sender = harness.sender(&first);
    sender.create("handoff", 8, 8, BGRA).unwrap();
    assert!(publish(&mut sender, 8, 8, 1));

    let mut receiver = harness.receiver(&consumer, ApiKind::Host);
    receiver.bind("handoff").unwrap();
    sender.release();

    let mut replacement = harness.sender(&second);
    replacement.create("handoff", 8, 8, BGRA).unwrap();
    assert!(publish(&mut replacement, 8, 8, 5));

    let (status, pixels) = receive(&mut receiver, 8, 8);
    assert_eq!(status.unwrap(), ReceiveStatus::Delivered);
    assert!(pixels.iter().all(|&b| b == 5));
    assert_eq!(receiver.bound_entry().unwrap().owner_pid, 182);
}

#[test]
fn active_sender_fallback_follows_set_active() {
    let harness = Harness::new("active");
    let producer = harness.context(190);
    let consumer = harness.context(191);

    let mut a = harness.sender(&producer);
    a.create("a", 10, 10, BGRA).unwrap();
    let mut b = harness.sender(&producer);
    b.create("b", 20, 20, BGRA).unwrap();

    let registry = consumer.registry();
    registry.set_active("a").unwrap();
    let mut receiver = harness.receiver(&consumer, ApiKind::Host);
    let entry = receiver.bind(SenderTarget::Active).unwrap();
    assert_eq!((entry.name.as_str(), entry.width), ("a", 10));

    registry.set_active("b").unwrap();
    let entry = receiver.bind(SenderTarget::Active).unwrap();
    assert_eq!((entry.name.as_str(), entry.height), ("b", 20));

    registry.clear_active().unwrap();
    assert!(matches!(
        receiver.bind(SenderTarget::Active),
        Err(Error::NotFound(name)) if name.is_empty()
    ));

    // The pointer dangles once its sender's process is gone.
    registry.set_active("b").unwrap();
    harness.probe.kill(190);
    assert!(matches!(
        receiver.bind(SenderTarget::Active),
        Err(Error::NotFound(name)) if name.is_empty()
    ));
}

#[test]
fn incompatible_format_is_refused_without_binding() {
    let harness = Harness::new("format");
    let producer = harness.context(200);
    let consumer = harness.context(201);

    let mut rgba = harness.sender(&producer);
    rgba.create("rgba", 8, 8, PixelFormat::Rgba8Unorm).unwrap();
    let mut bgra = harness.sender(&producer);
    bgra.create("bgra", 8, 8, BGRA).unwrap();

    let mut receiver = harness.receiver(&consumer, ApiKind::Dx9);
    assert!(matches!(
        receiver.bind("rgba"),
        Err(Error::FormatIncompatible {
            format: PixelFormat::Rgba8Unorm,
            api: ApiKind::Dx9
        })
    ));
    assert_eq!(receiver.state(), ReceiverState::Unbound);
    assert!(receiver.texture().is_none());

    receiver.bind("bgra").unwrap();
    assert_eq!(receiver.state(), ReceiverState::Bound);
}

#[test]
fn configured_policy_restricts_senders() {
    let harness = Harness::new("policy");
    let mut config = harness.config.clone();
    config.interop_policy.deny(PixelFormat::Rgba16Float, ApiKind::Host);
    let context = texshare::Context::with_identity(
        config,
        texshare::texshare_registry::ProcessIdentity::with_probe(210, harness.probe.clone()),
    )
    .unwrap();

    let mut sender = harness.sender(&context);
    assert!(matches!(
        sender.create("hdr", 4, 4, PixelFormat::Rgba16Float),
        Err(Error::FormatIncompatible { .. })
    ));
    assert!(context.senders().is_empty());
    sender.create("hdr", 4, 4, BGRA).unwrap();
}

#[test]
fn publishing_outside_active_is_ignored() {
    let harness = Harness::new("idle");
    let producer = harness.context(220);
    let mut sender = harness.sender(&producer);

    assert!(!publish(&mut sender, 4, 4, 1));
    assert!(matches!(sender.update(8, 8), Err(Error::InvalidState(_))));

    sender.create("idle", 4, 4, BGRA).unwrap();
    assert!(publish(&mut sender, 4, 4, 1));

    let wrong = frame_bytes(8, 8, 1);
    let frame = FrameBuffer::from_bytes(&wrong, 8, 8, BGRA).unwrap();
    assert!(matches!(
        sender.publish_frame(&frame),
        Err(Error::StaleTexture(_))
    ));
    assert_eq!(sender.state(), SenderState::Active);

    sender.release();
    assert!(!publish(&mut sender, 4, 4, 1));
}

#[test]
fn inverted_send_and_receive_cancel_out() {
    let harness = Harness::new("invert");
    let producer = harness.context(230);
    let consumer = harness.context(231);

    let mut sender = harness.sender(&producer);
    sender.create("flip", 1, 3, BGRA).unwrap();
    let rows: Vec<u8> = [1u8, 2, 3].iter().flat_map(|&v| [v; 4]).collect();
    let frame = FrameBuffer::from_bytes(&rows, 1, 3, BGRA)
        .unwrap()
        .inverted(true);
    assert!(sender.publish_frame(&frame).unwrap());

    let mut receiver = harness.receiver(&consumer, ApiKind::Host);
    receiver.bind("flip").unwrap();
    let mut out = vec![0u8; 12];
    let mut target = FrameBufferMut::from_bytes(&mut out, 1, 3, BGRA)
        .unwrap()
        .inverted(true);
    assert_eq!(
        receiver.receive_frame(&mut target).unwrap(),
        ReceiveStatus::Delivered
    );
    assert_eq!(out, rows);
}

#[test]
fn padded_rows_travel_end_to_end() {
    let harness = Harness::new("padded");
    let producer = harness.context(270);
    let consumer = harness.context(271);
    let desc = TextureDesc::new(3, 2, BGRA);
    let row = 12;

    // Each row carries its index, followed by 4 bytes of 0xee padding.
    let mut padded = vec![0xee; 16 * 2];
    for r in 0..2 {
        padded[r * 16..r * 16 + row].fill(r as u8 + 1);
    }
    let mut sender = harness.sender(&producer);
    sender.create("padded", 3, 2, BGRA).unwrap();
    let frame = FrameBuffer::from_padded_bytes(&padded, desc, 16).unwrap();
    assert!(sender.publish_frame(&frame).unwrap());

    let mut receiver = harness.receiver(&consumer, ApiKind::Host);
    receiver.bind("padded").unwrap();
    // The receiver's rows are 20 bytes apart and its padding must survive.
    let mut out = vec![0x55; 20 + row];
    let mut target = FrameBufferMut::from_padded_bytes(&mut out, desc, 20).unwrap();
    assert_eq!(
        receiver.receive_frame(&mut target).unwrap(),
        ReceiveStatus::Delivered
    );
    assert!(out[..row].iter().all(|&b| b == 1));
    assert!(out[row..20].iter().all(|&b| b == 0x55));
    assert!(out[20..].iter().all(|&b| b == 2));
}

#[test]
fn released_receiver_refuses_to_bind() {
    let harness = Harness::new("rxdone");
    let consumer = harness.context(240);
    let mut receiver = harness.receiver(&consumer, ApiKind::Host);
    receiver.release();
    receiver.release();
    assert!(matches!(receiver.bind("x"), Err(Error::InvalidState(_))));
}

#[test]
fn sender_access_locks_the_texture() {
    let harness = Harness::new("access");
    let producer = harness.context(250);
    let mut sender = harness.sender(&producer);
    sender.create("locked", 2, 2, BGRA).unwrap();

    let desc = sender.with_access(|texture| texture.desc()).unwrap();
    assert_eq!((desc.width, desc.height), (2, 2));
    // The lock was released when the closure returned.
    assert!(sender.with_access(|_| ()).is_ok());
}

#[test]
fn frames_can_be_received_into_a_texture() {
    let harness = Harness::new("totex");
    let producer = harness.context(260);
    let consumer = harness.context(261);

    let mut sender = harness.sender(&producer);
    sender.create("totex", 3, 2, BGRA).unwrap();
    assert!(publish(&mut sender, 3, 2, 9));

    let mut receiver = harness.receiver(&consumer, ApiKind::Host);
    receiver.bind("totex").unwrap();
    let destination = LocalTexture::new_host(TextureDesc::new(3, 2, BGRA)).unwrap();
    let mut target = FrameBufferMut::from_texture(&destination);
    assert_eq!(
        receiver.receive_frame(&mut target).unwrap(),
        ReceiveStatus::Delivered
    );
    assert_eq!(destination.host_pixels().unwrap(), frame_bytes(3, 2, 9));

    // And back out through the sender from a texture source.
    assert!(sender
        .publish_frame(&FrameBuffer::from_texture(&destination))
        .unwrap());
}
