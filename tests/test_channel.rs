// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Channel lifecycle, FIFO ordering and backpressure.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use labipc::{
    Channel, ChannelConfig, ChannelError, Handler, Kind, PeerLoss, Role, Value,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{n}_{}", std::process::id())
}

#[derive(Default)]
struct Recorder {
    seen: Vec<(Kind, Value)>,
}

impl Handler for Recorder {
    fn on_notify(&mut self, kind: Kind, value: Value) {
        self.seen.push((kind, value));
    }

    fn on_call(&mut self, kind: Kind, value: Value) -> Value {
        self.seen.push((kind, value));
        Value::None
    }
}

// ========== Lifecycle ==========

#[test]
fn setup_and_open_share_the_channel() {
    let cfg = ChannelConfig::new(unique_name("share"));
    let a = Channel::setup(cfg.clone()).expect("setup");
    let b = Channel::open(cfg).expect("open");
    assert_eq!(a.capacity(), 256);
    assert_eq!(b.name(), a.name());

    let mut tx = a.sender().unwrap();
    tx.progress(0.25).unwrap();
    assert_eq!(b.len().unwrap(), 1);
    assert!(!b.is_empty().unwrap());

    drop(tx);
    drop(b);
    a.teardown().unwrap();
}

#[test]
fn open_without_setup_fails() {
    let cfg = ChannelConfig::new(unique_name("missing"));
    assert!(matches!(Channel::open(cfg), Err(ChannelError::Io(_))));
}

#[test]
fn open_with_other_geometry_fails() {
    let cfg = ChannelConfig::new(unique_name("geometry")).with_capacity(8);
    let ch = Channel::setup(cfg.clone()).unwrap();
    let err = Channel::open(cfg.with_capacity(16)).err().expect("geometry mismatch");
    assert!(matches!(err, ChannelError::Config(_)));
    ch.teardown().unwrap();
}

#[test]
fn invalid_config_is_rejected() {
    let cfg = ChannelConfig::new(unique_name("invalid")).with_capacity(1);
    assert!(matches!(Channel::setup(cfg), Err(ChannelError::Config(_))));
}

#[test]
fn prefixed_channels_are_separate() {
    let name = unique_name("prefixed");
    let plain = Channel::setup(ChannelConfig::new(name.clone())).unwrap();
    let mut prefixed_cfg = ChannelConfig::new(name);
    prefixed_cfg.prefix = "lab".into();
    let prefixed = Channel::setup(prefixed_cfg).unwrap();

    let mut tx = plain.sender().unwrap();
    tx.progress(1.0).unwrap();
    assert_eq!(plain.len().unwrap(), 1);
    assert_eq!(prefixed.len().unwrap(), 0);

    drop(tx);
    plain.teardown().unwrap();
    prefixed.teardown().unwrap();
}

#[test]
fn role_can_only_be_held_once() {
    let ch = Channel::setup(ChannelConfig::new(unique_name("roles"))).unwrap();
    let tx = ch.sender().unwrap();
    assert!(matches!(ch.sender(), Err(ChannelError::RoleTaken(Role::Producer))));

    let rx = ch.receiver().unwrap();
    assert!(matches!(ch.receiver(), Err(ChannelError::RoleTaken(Role::Consumer))));

    drop(tx);
    drop(rx);
    let _tx = ch.sender().expect("role free again after drop");
    let _rx = ch.receiver().expect("role free again after drop");
}

#[test]
fn teardown_rejects_further_use() {
    let ch = Channel::setup(ChannelConfig::new(unique_name("teardown"))).unwrap();
    let mut tx = ch.sender().unwrap();
    ch.teardown().unwrap();
    assert!(matches!(tx.progress(0.1), Err(ChannelError::TornDown)));
}

#[test]
fn clear_storage_removes_an_abandoned_channel() {
    let cfg = ChannelConfig::new(unique_name("clear"));
    {
        let ch = Channel::setup(cfg.clone()).unwrap();
        let h = ch.bulk().publish_1d(&[1.0, 2.0]).unwrap();
        assert_eq!(ch.bulk().kind(h).unwrap(), labipc::BulkKind::OneDimensional);
    }
    Channel::clear_storage(&cfg);
    assert!(Channel::open(cfg).is_err());
}

// ========== Ordering ==========

#[test]
fn envelopes_arrive_in_send_order() {
    let ch = Channel::setup(ChannelConfig::new(unique_name("fifo"))).unwrap();
    let mut tx = ch.sender().unwrap();
    let mut rx = ch.receiver().unwrap();

    for i in 0..100 {
        if i % 2 == 0 {
            tx.progress(i as f32).unwrap();
        } else {
            tx.print(&format!("line {i}")).unwrap();
        }
    }

    let mut rec = Recorder::default();
    assert_eq!(rx.pump(&mut rec).unwrap(), 100);
    for (i, (kind, value)) in rec.seen.iter().enumerate() {
        if i % 2 == 0 {
            assert_eq!(*kind, Kind::Progress);
            assert_eq!(*value, Value::Float(i as f32));
        } else {
            assert_eq!(*kind, Kind::Print);
            assert_eq!(*value, Value::text(format!("line {i}")));
        }
    }
    assert_eq!(ch.live_buffers().unwrap(), 0);
}

#[test]
fn fifo_across_threads_and_wraparound() {
    let cfg = ChannelConfig::new(unique_name("fifo_mt")).with_capacity(4);
    let ch = Channel::setup(cfg.clone()).unwrap();
    let mut tx = ch.sender().unwrap();
    const N: usize = 500;

    let consumer = thread::spawn(move || {
        let ch = Channel::open(cfg).unwrap();
        let mut rx = ch.receiver().unwrap();
        let mut rec = Recorder::default();
        rx.run(&mut rec).unwrap();
        rec.seen
    });

    for i in 0..N {
        tx.progress(i as f32).unwrap();
    }
    drop(tx);

    let seen = consumer.join().unwrap();
    assert_eq!(seen.len(), N);
    for (i, (_, v)) in seen.iter().enumerate() {
        assert_eq!(*v, Value::Float(i as f32));
    }
}

#[test]
fn pump_one_takes_a_single_envelope() {
    let ch = Channel::setup(ChannelConfig::new(unique_name("pump_one"))).unwrap();
    let mut tx = ch.sender().unwrap();
    let mut rx = ch.receiver().unwrap();
    let mut rec = Recorder::default();

    assert!(!rx.pump_one(&mut rec).unwrap());
    tx.progress(0.1).unwrap();
    tx.progress(0.2).unwrap();
    assert!(rx.pump_one(&mut rec).unwrap());
    assert_eq!(rec.seen.len(), 1);
    assert_eq!(ch.len().unwrap(), 1);
}

// ========== Backpressure ==========

#[test]
fn full_queue_blocks_until_drained() {
    let cfg = ChannelConfig::new(unique_name("backpressure")).with_capacity(2);
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();
    let mut rx = ch.receiver().unwrap();

    let third_done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&third_done);
    let producer = thread::spawn(move || {
        tx.progress(1.0).unwrap();
        tx.progress(2.0).unwrap();
        tx.progress(3.0).unwrap();
        flag.store(true, Ordering::Release);
        tx
    });

    thread::sleep(Duration::from_millis(300));
    assert!(!third_done.load(Ordering::Acquire), "third notify must block");
    assert_eq!(ch.len().unwrap(), 2);

    let mut rec = Recorder::default();
    assert!(rx.pump_one(&mut rec).unwrap());
    let _tx = producer.join().unwrap();
    assert!(third_done.load(Ordering::Acquire));

    rx.pump(&mut rec).unwrap();
    let got: Vec<Value> = rec.seen.into_iter().map(|(_, v)| v).collect();
    assert_eq!(got, vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]);
}

#[test]
fn try_notify_reports_a_full_queue() {
    let cfg = ChannelConfig::new(unique_name("try_notify")).with_capacity(2);
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();

    assert!(tx.try_notify(Kind::Print, Value::text("a")).unwrap());
    assert!(tx.try_notify(Kind::Print, Value::text("b")).unwrap());
    assert!(!tx.try_notify(Kind::Print, Value::text("c")).unwrap());
    // the rejected envelope's buffer was released again
    assert_eq!(ch.live_buffers().unwrap(), 2);
}

#[test]
fn full_queue_without_consumer_times_out() {
    let cfg = ChannelConfig::new(unique_name("enqueue_timeout"))
        .with_capacity(2)
        .with_enqueue_timeout(Some(Duration::from_millis(150)));
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();

    tx.print("one").unwrap();
    tx.print("two").unwrap();
    let err = tx.print("three").unwrap_err();
    assert!(matches!(err, ChannelError::PeerLost(PeerLoss::Unresponsive(_))));
    assert!(err.is_fatal());
    assert_eq!(ch.live_buffers().unwrap(), 2);
}

#[test]
fn blocked_notify_can_be_aborted() {
    let cfg = ChannelConfig::new(unique_name("abort_notify"))
        .with_capacity(2)
        .with_enqueue_timeout(None);
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();
    tx.progress(0.0).unwrap();
    tx.progress(0.0).unwrap();

    let abort = tx.abort_handle();
    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        abort.abort();
    });
    let err = tx.progress(0.0).unwrap_err();
    t.join().unwrap();
    assert!(matches!(err, ChannelError::Cancelled));
    assert!(!err.is_fatal());
    assert_eq!(ch.len().unwrap(), 2);
}

#[test]
fn blocked_notify_sees_consumer_leave() {
    let cfg = ChannelConfig::new(unique_name("consumer_gone")).with_capacity(2);
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();
    let rx = ch.receiver().unwrap();
    tx.progress(0.0).unwrap();
    tx.progress(0.0).unwrap();

    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        drop(rx);
    });
    let err = tx.progress(0.0).unwrap_err();
    t.join().unwrap();
    assert!(matches!(err, ChannelError::PeerLost(PeerLoss::ConsumerGone)));
}

#[test]
fn withdrawn_abort_does_not_cancel() {
    let cfg = ChannelConfig::new(unique_name("abort_reset"))
        .with_capacity(2)
        .with_enqueue_timeout(Some(Duration::from_millis(150)));
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();
    tx.progress(0.0).unwrap();
    tx.progress(0.0).unwrap();

    let abort = tx.abort_handle();
    abort.abort();
    assert!(abort.is_aborted());
    abort.reset();
    assert!(!abort.is_aborted());
    let err = tx.progress(0.0).unwrap_err();
    assert!(matches!(err, ChannelError::PeerLost(PeerLoss::Unresponsive(_))));

    // a request made while idle cancels the next wait and is used up by it
    abort.abort();
    let err = tx.progress(0.0).unwrap_err();
    assert!(matches!(err, ChannelError::Cancelled));
    assert!(!abort.is_aborted());
}

// ========== Shared buffer backpressure ==========

#[test]
fn prints_beyond_the_buffer_table_block_until_drained() {
    let mut cfg = ChannelConfig::new(unique_name("buffer_backpressure")).with_capacity(64);
    cfg.buffer_slots = 4;
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let producer = thread::spawn(move || {
        for i in 0..10 {
            tx.print(&format!("line {i}")).unwrap();
        }
        flag.store(true, Ordering::Release);
        tx
    });

    thread::sleep(Duration::from_millis(300));
    assert!(!done.load(Ordering::Acquire), "fifth print must block");
    assert_eq!(ch.len().unwrap(), 4);
    assert_eq!(ch.live_buffers().unwrap(), 4);

    let mut rx = ch.receiver().unwrap();
    let mut rec = Recorder::default();
    while rec.seen.len() < 10 {
        let n = rx
            .pump_wait(&mut rec, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(n > 0, "producer stalled after {} prints", rec.seen.len());
    }
    let _tx = producer.join().unwrap();
    assert!(done.load(Ordering::Acquire));

    let lines: Vec<Value> = rec.seen.into_iter().map(|(_, v)| v).collect();
    let expected: Vec<Value> = (0..10).map(|i| Value::text(format!("line {i}"))).collect();
    assert_eq!(lines, expected);
    assert_eq!(ch.live_buffers().unwrap(), 0);
}

#[test]
fn full_buffer_table_without_consumer_times_out() {
    let mut cfg = ChannelConfig::new(unique_name("buffer_timeout"))
        .with_enqueue_timeout(Some(Duration::from_millis(150)));
    cfg.buffer_slots = 2;
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();

    tx.print("one").unwrap();
    tx.notify(Kind::Output, Value::text("two")).unwrap();
    let err = tx.print("three").unwrap_err();
    assert!(matches!(err, ChannelError::PeerLost(PeerLoss::Unresponsive(_))));
    assert_eq!(ch.len().unwrap(), 2);
    assert_eq!(ch.live_buffers().unwrap(), 2);
}

#[test]
fn print_waiting_for_a_buffer_can_be_aborted() {
    let mut cfg = ChannelConfig::new(unique_name("buffer_abort")).with_enqueue_timeout(None);
    cfg.buffer_slots = 1;
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();
    tx.print("held").unwrap();

    let abort = tx.abort_handle();
    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        abort.abort();
    });
    let err = tx.print("waiting").unwrap_err();
    t.join().unwrap();
    assert!(matches!(err, ChannelError::Cancelled));
    assert_eq!(ch.len().unwrap(), 1);
}

#[test]
fn try_notify_reports_a_full_buffer_table() {
    let mut cfg = ChannelConfig::new(unique_name("try_buffers"));
    cfg.buffer_slots = 1;
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();

    assert!(tx.try_notify(Kind::Print, Value::text("a")).unwrap());
    assert!(!tx.try_notify(Kind::Print, Value::text("b")).unwrap());
    // inline payloads still fit
    assert!(tx.try_notify(Kind::Progress, Value::Float(0.5)).unwrap());
    assert_eq!(ch.len().unwrap(), 2);
}

// ========== Receiver waits ==========

#[test]
fn wait_times_out_on_an_empty_queue() {
    let ch = Channel::setup(ChannelConfig::new(unique_name("wait_timeout"))).unwrap();
    let _tx = ch.sender().unwrap();
    let mut rx = ch.receiver().unwrap();
    assert!(!rx.wait(Some(Duration::from_millis(50))).unwrap());

    let mut rec = Recorder::default();
    assert_eq!(rx.pump_wait(&mut rec, Some(Duration::from_millis(50))).unwrap(), 0);
}

#[test]
fn pump_wait_wakes_on_send() {
    let cfg = ChannelConfig::new(unique_name("pump_wait"));
    let ch = Channel::setup(cfg).unwrap();
    let mut tx = ch.sender().unwrap();
    let mut rx = ch.receiver().unwrap();

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        tx.print("hello").unwrap();
        tx
    });
    let mut rec = Recorder::default();
    let n = rx.pump_wait(&mut rec, Some(Duration::from_secs(5))).unwrap();
    let _tx = producer.join().unwrap();
    assert_eq!(n, 1);
    assert_eq!(rec.seen[0], (Kind::Print, Value::text("hello")));
}

#[test]
fn receiver_wait_can_be_aborted() {
    let ch = Channel::setup(ChannelConfig::new(unique_name("abort_wait"))).unwrap();
    let _tx = ch.sender().unwrap();
    let mut rx = ch.receiver().unwrap();
    let abort = rx.abort_handle();

    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        abort.abort();
    });
    assert!(matches!(rx.wait(None), Err(ChannelError::Cancelled)));
    t.join().unwrap();

    // the request was consumed
    assert!(!rx.wait(Some(Duration::from_millis(10))).unwrap());
}

#[test]
fn run_drains_then_stops_when_producer_leaves() {
    let ch = Channel::setup(ChannelConfig::new(unique_name("run_stop"))).unwrap();
    let mut tx = ch.sender().unwrap();
    let mut rx = ch.receiver().unwrap();
    tx.print("a").unwrap();
    tx.print("b").unwrap();
    drop(tx);

    let mut rec = Recorder::default();
    rx.run(&mut rec).unwrap();
    assert_eq!(rec.seen.len(), 2);
}

#[test]
fn run_stops_on_teardown() {
    let ch = Channel::setup(ChannelConfig::new(unique_name("run_teardown"))).unwrap();
    let _tx = ch.sender().unwrap();
    let mut rx = ch.receiver().unwrap();

    let consumer = thread::spawn(move || rx.run(&mut Recorder::default()));
    thread::sleep(Duration::from_millis(100));
    ch.teardown().unwrap();
    assert!(consumer.join().unwrap().is_ok());
}
