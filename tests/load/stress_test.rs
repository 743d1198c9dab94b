//! Stress tests for the controller mailbox
//!
//! - Concurrent external commands racing with provider callbacks
//! - Query latency while the controller is busy
//!
//! Whatever the interleaving, the relays must match the controller's
//! bookkeeping and the controller must stay responsive.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use wattpilot::domain::{Command, ControllerState};

use crate::common::rig;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commands_racing_with_readings() {
    let rig = Arc::new(rig(12, -3000.0, 0).await);
    rig.controller.idle().await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..8u32 {
        let rig = Arc::clone(&rig);
        tasks.spawn(async move {
            for n in 0..25u32 {
                let command = match (i + n) % 3 {
                    0 => Command::Idle,
                    1 => Command::Force,
                    _ => Command::Halt,
                };
                // Refusals are expected, failures are not.
                rig.controller.command(command).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
    }
    for i in 0..8u32 {
        let rig = Arc::clone(&rig);
        tasks.spawn(async move {
            for n in 0..50u32 {
                let power = if (i + n) % 4 == 0 { 800.0 } else { -2500.0 };
                rig.power.reading(power);
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    rig.settle().await;
    assert!(!rig.controller.actor().is_stopped());
    rig.assert_pins_mirror_loads().await;

    rig.controller.halt().await.unwrap();
    assert_eq!(rig.controller.state().await.unwrap(), ControllerState::Halt);
    assert!(rig.active_pins().await.is_empty());
    rig.assert_pins_mirror_loads().await;
}

/// Query latency under concurrent load
///
/// 50 clients hammering state and load queries while readings keep the
/// controller switching relays.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Ignore by default as this is a slow test
async fn test_query_latency_under_load() {
    let rig = Arc::new(rig(12, -3000.0, 0).await);
    rig.controller.idle().await.unwrap();

    let latency_measurements = Arc::new(RwLock::new(Vec::new()));

    let sampler_rig = Arc::clone(&rig);
    let latency_clone = Arc::clone(&latency_measurements);
    let sampler = tokio::spawn(async move {
        for _ in 0..20 {
            let start = Instant::now();
            sampler_rig.controller.snapshot().await.unwrap();
            latency_clone.write().await.push(start.elapsed());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    let mut clients = JoinSet::new();
    for i in 0..50u64 {
        let rig = Arc::clone(&rig);
        clients.spawn(async move {
            for n in 0..10u64 {
                rig.controller.loads().await.unwrap();
                rig.controller.schedule_trigger().await.unwrap();
                rig.power.reading(if n % 3 == 0 { 500.0 } else { -3000.0 });
                tokio::time::sleep(Duration::from_millis(50 + i % 20)).await;
            }
        });
    }

    while let Some(joined) = clients.join_next().await {
        joined.unwrap();
    }
    sampler.await.unwrap();

    let measurements = latency_measurements.read().await;
    let max_latency = measurements.iter().max().copied().unwrap_or_default();
    let avg_latency: Duration =
        measurements.iter().sum::<Duration>() / measurements.len().max(1) as u32;
    println!("Query latency - Max: {max_latency:?}, Avg: {avg_latency:?}");

    assert!(
        max_latency < Duration::from_secs(1),
        "Query latency exceeded 1s: {max_latency:?}"
    );
    rig.assert_pins_mirror_loads().await;
}
