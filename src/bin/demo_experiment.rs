// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Usage:
//   demo_experiment producer [name] [steps]
//   demo_experiment consumer [name]
//
// Start the producer first. It sets up the channel, creates a slider, then
// runs <steps> measurement steps: each step reads the slider, publishes a
// 2-D array for display and reports progress. The consumer plays the display
// process and logs what it receives.

use std::thread;
use std::time::Duration;

use labipc::{
    logging, BulkTransfer, Channel, ChannelConfig, ChannelError, Field, Handler, Kind, Value,
};
use tracing::{info, warn};

fn do_producer(name: &str, steps: usize) {
    let channel = Channel::setup(ChannelConfig::new(name)).expect("setup channel");
    let mut tx = channel.sender().expect("attach producer");
    info!("producer: waiting for consumer...");
    tx.sync().expect("first sync");

    tx.print("experiment started").expect("print");
    let slider = tx
        .call(
            Kind::SliderCreate,
            Value::record([
                Field::from("Gain"),
                Field::Double(0.0),
                Field::Double(10.0),
            ]),
        )
        .expect("create slider")
        .as_long()
        .expect("slider id");
    info!(slider, "producer: slider created");

    let bulk = tx.bulk();
    let (rows, cols) = (4, 64);
    for step in 0..steps {
        let gain = tx
            .call(Kind::SliderState, Value::record([Field::Int(slider)]))
            .expect("query slider")
            .as_double()
            .unwrap_or(1.0);
        let values: Vec<f64> = (0..rows * cols)
            .map(|i| gain * ((i + step) as f64 / 8.0).sin())
            .collect();
        let handle = bulk.publish_2d(rows, cols, &values).expect("publish");
        tx.display_data(handle).expect("display data");
        tx.progress((step + 1) as f32 / steps as f32).expect("progress");
        thread::sleep(Duration::from_millis(50));
    }

    tx.call(Kind::SliderDelete, Value::Long(slider))
        .expect("delete slider");
    tx.sync().expect("final sync");
    info!("producer: done");
    drop(tx);
    channel.teardown().expect("teardown");
}

struct Display {
    bulk: BulkTransfer,
    next_id: i64,
    gain: f64,
}

impl Handler for Display {
    fn on_notify(&mut self, kind: Kind, value: Value) {
        match kind {
            Kind::DisplayData => {
                let Some(handle) = value.as_bulk() else { return };
                match self.bulk.consume(handle) {
                    Ok(data) => info!(
                        rows = data.rows(),
                        cols = data.cols(),
                        first = data.values().first().copied().unwrap_or_default(),
                        "consumer: curve"
                    ),
                    Err(e) => warn!(error = %e, "consumer: bad bulk data"),
                }
            }
            Kind::Progress => info!(progress = value.as_double(), "consumer: progress"),
            _ => info!(%kind, ?value, "consumer: notification"),
        }
    }

    fn on_call(&mut self, kind: Kind, value: Value) -> Value {
        info!(%kind, ?value, "consumer: call");
        match kind {
            Kind::SliderCreate => {
                self.next_id += 1;
                Value::Long(self.next_id)
            }
            Kind::SliderState => {
                self.gain += 0.5;
                Value::Double(self.gain)
            }
            Kind::SliderDelete => Value::Int(0),
            _ => Value::None,
        }
    }
}

fn do_consumer(name: &str) {
    let cfg = ChannelConfig::new(name);
    let channel = loop {
        match Channel::open(cfg.clone()) {
            Ok(c) => break c,
            Err(ChannelError::Io(_)) => thread::sleep(Duration::from_millis(100)),
            Err(e) => panic!("open channel: {e}"),
        }
    };
    let mut rx = channel.receiver().expect("attach consumer");
    let mut display = Display {
        bulk: rx.bulk(),
        next_id: 0,
        gain: 1.0,
    };
    rx.run(&mut display).expect("serve");
    info!("consumer: producer finished");
}

fn main() {
    logging::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: demo_experiment producer [name] [steps]");
        eprintln!("       demo_experiment consumer [name]");
        std::process::exit(1);
    }
    let name = args.get(2).map(String::as_str).unwrap_or("experiment");
    match args[1].as_str() {
        "producer" => {
            let steps = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20);
            do_producer(name, steps);
        }
        "consumer" => do_consumer(name),
        other => {
            eprintln!("unknown mode: {other}");
            std::process::exit(1);
        }
    }
}
