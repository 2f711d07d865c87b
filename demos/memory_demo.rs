//! Demonstration of the sensor monitor against the in-memory store.
//!
//! This example shows how to:
//! 1. Seed a roster into a `MemoryStore`
//! 2. Run a `MonitorSupervisor` with a roster watcher
//! 3. Receive staleness reports
//! 4. Trigger a re-partition by registering a new sensor
//!
//! Run with: cargo run --example memory_demo

use std::thread;
use std::time::Duration;

use chrono::Utc;
use sensor_monitor::{MemoryStore, MonitorSupervisor, SupervisorConfig};

fn main() {
    println!("Sensor Monitor - Memory Demo");
    println!("============================");
    println!();

    let store = MemoryStore::new();
    store.hset("functions", "1", "temp");
    store.hset("functions", "2", "valve");

    let now = Utc::now().timestamp() as f64;
    for (i, id) in ["boiler", "pump", "tank"].iter().enumerate() {
        store.hset("sensors:functions", id, "r:1;w:2;p:status");
        store.zadd(
            &format!("sensor:{id}:temp:timestamps"),
            now - 30.0 * i as f64,
            &(now - 30.0 * i as f64).to_string(),
        );
        store.sadd("sensors", id);
    }

    let config = SupervisorConfig {
        max_workers: 2,
        measurement_period: Duration::from_secs(1),
        ..SupervisorConfig::default()
    };
    let mut supervisor = MonitorSupervisor::new(store.clone(), config);
    let signal = supervisor.termination_signal();
    let reports = supervisor.reports().clone();
    let stats = supervisor.stats().clone();

    let monitor = thread::spawn(move || supervisor.run());

    // Register a sensor after a few cycles
    let registrar = {
        let store = store.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(3));
            println!("--- registering sensor 'valve-7' ---");
            store.hset("sensors:functions", "valve-7", "r:;w:2;p:status");
            store.zadd(
                "sensor:valve-7:valve:timestamps",
                now - 120.0,
                &(now - 120.0).to_string(),
            );
            store.sadd("sensors", "valve-7");
        })
    };

    // Print reports for a few seconds
    let deadline = std::time::Instant::now() + Duration::from_secs(6);
    while std::time::Instant::now() < deadline {
        if let Ok(report) = reports.recv_timeout(Duration::from_millis(200)) {
            println!("{report}");
        }
    }

    signal.raise();
    let _ = registrar.join();
    match monitor.join() {
        Ok(Ok(())) => println!("Monitor stopped."),
        Ok(Err(e)) => eprintln!("Monitor failed: {e}"),
        Err(_) => eprintln!("Monitor thread panicked"),
    }

    println!();
    println!("{}", stats.summary());
}
