//! Performance benchmarks for the session hot paths

use client::progress::{ProgressTracker, TrackLayout};
use server::results::{rank, FinishReport, ResultAggregator};
use shared::{Packet, PlayerInfo, Transform};
use std::time::Instant;

/// Benchmarks ranking a large finish table
#[test]
fn benchmark_ranking() {
    let reports: Vec<FinishReport> = (0..10_000)
        .map(|i| FinishReport {
            player_id: i,
            name: format!("Player {}", i),
            elapsed_time: ((i * 7919) % 1000) as f32 * 0.1,
        })
        .collect();

    let iterations = 10;
    let start = Instant::now();

    for _ in 0..iterations {
        let ranking = rank(&reports);
        assert_eq!(ranking.len(), reports.len());
    }

    let duration = start.elapsed();
    println!(
        "Ranking 10k reports: {} iterations in {:?} ({:.2} ms/iter)",
        iterations,
        duration,
        duration.as_secs_f64() * 1000.0 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks duplicate detection in the aggregator
#[test]
fn benchmark_report_collection() {
    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut results = ResultAggregator::new();
        for id in 0..8 {
            results.report(id, "Player", 60.0 + id as f32);
            results.report(id, "Player", 1.0);
        }
        assert!(results.covers(&[0, 1, 2, 3, 4, 5, 6, 7]));
        assert!(results.publish().is_some());
    }

    let duration = start.elapsed();
    println!(
        "Report collection: {} sessions in {:?} ({:.2} μs/session)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks checkpoint validation over many laps
#[test]
fn benchmark_progress_tracking() {
    let layout = TrackLayout {
        total_checkpoints: 32,
        total_laps: 10_000,
    };
    let mut tracker = ProgressTracker::new(layout, true);
    tracker.enable_racing();

    let start = Instant::now();

    for _ in 0..layout.total_laps - 1 {
        for index in 1..=layout.total_checkpoints {
            // Out-of-order trigger first, then the valid one
            tracker.on_checkpoint_triggered(index + 1, Transform::IDENTITY);
            tracker.on_checkpoint_triggered(index, Transform::IDENTITY);
        }
        tracker.tick(0.016);
        tracker.on_finish_line_passed();
    }

    let duration = start.elapsed();
    println!(
        "Progress tracking: {} laps of {} checkpoints in {:?}",
        layout.total_laps - 1,
        layout.total_checkpoints,
        duration
    );

    assert_eq!(tracker.current_lap(), layout.total_laps);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks encoding a full lobby roster
#[test]
fn benchmark_roster_encoding() {
    let packet = Packet::RosterUpdate {
        players: (0..8)
            .map(|i| PlayerInfo {
                player_id: i + 1,
                ordinal: i,
                name: format!("Player {}", i + 1),
                vehicle: i % 3,
                ready: i % 2 == 0,
            })
            .collect(),
    };

    let iterations = 10_000;
    let start = Instant::now();
    let mut total_bytes = 0;

    for _ in 0..iterations {
        total_bytes += bincode::serialize(&packet).unwrap().len();
    }

    let duration = start.elapsed();
    println!(
        "Roster encoding: {} iterations in {:?} ({} bytes/packet)",
        iterations,
        duration,
        total_bytes / iterations
    );

    assert!(total_bytes / iterations < 1024);
    assert!(duration.as_millis() < 1000);
}
