use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use ulid::Ulid;

use slotbook::clock::ManualClock;
use slotbook::config::EngineConfig;
use slotbook::engine::{Engine, EngineError, VenueInput};
use slotbook::model::{BookingOutcome, Role, VenueKind};

const USERS: usize = 500;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

struct Site {
    gym: Ulid,
    tennis: Ulid,
    date: NaiveDate,
}

async fn setup(engine: &Engine, date: NaiveDate) -> Site {
    let venue = |name: &str, kind| VenueInput {
        name: name.into(),
        kind,
        is_outdoor: false,
        location: None,
        description: None,
    };
    let gym = engine.add_venue(venue("Gym", VenueKind::Gym)).await.unwrap().id;
    engine.add_court(gym, "Floor").await.unwrap();
    let tennis = engine.add_venue(venue("Tennis", VenueKind::Court)).await.unwrap().id;
    for i in 0..8 {
        engine.add_court(tennis, &format!("Court {i}")).await.unwrap();
    }
    let summary = engine.run_maintenance().await.unwrap();
    println!("  {summary}");

    for i in 0..USERS {
        engine
            .register_user(&format!("user{i}"), "pw", &format!("User {i}"), Role::Student, None)
            .await
            .unwrap();
    }
    println!("  registered {USERS} users");
    Site { gym, tennis, date }
}

async fn phase1_sequential(engine: &Engine, site: &Site) {
    let slots = engine.list_available_slots(site.gym, site.date).await.unwrap();
    let slot = slots[0].slot_id;
    let mut latencies = Vec::new();
    let start = Instant::now();
    for i in 0..100 {
        let t = Instant::now();
        engine.book(&format!("user{i}"), slot).await.unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    println!(
        "  100 bookings in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        100.0 / elapsed.as_secs_f64()
    );
    print_latency("book", &mut latencies);
}

async fn phase2_last_unit(engine: &Arc<Engine>, site: &Site) {
    let slots = engine.list_available_slots(site.tennis, site.date).await.unwrap();
    let slot = slots[slots.len() - 1].slot_id;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..USERS {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = engine.book(&format!("user{i}"), slot).await;
            (result, t.elapsed())
        }));
    }

    let (mut confirmed, mut full, mut contention) = (0, 0, 0);
    let mut latencies = Vec::new();
    for h in handles {
        let Ok((result, latency)) = h.await else { continue };
        latencies.push(latency);
        match result {
            Ok(BookingOutcome::Confirmed { .. }) => confirmed += 1,
            Err(EngineError::SlotFull(_)) => full += 1,
            Err(EngineError::Contention(_)) => contention += 1,
            other => println!("  unexpected: {other:?}"),
        }
    }
    println!(
        "  {USERS} racers in {:.2}s: confirmed={confirmed}, full={full}, contention={contention}",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(confirmed, 1, "exactly one booker may take a single-unit slot");
    print_latency("book (racing)", &mut latencies);
}

async fn phase3_read_under_load(engine: &Arc<Engine>, site: &Site) {
    let slots = engine.list_available_slots(site.tennis, site.date).await.unwrap();
    let targets: Vec<Ulid> = slots.iter().take(8).map(|s| s.slot_id).collect();

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut ops = 0u32;
            for round in 0..20 {
                for (k, slot) in targets.iter().enumerate() {
                    let account = format!("user{}", 200 + (round * 8 + k) % 200);
                    if let Ok(outcome) = engine.book(&account, *slot).await {
                        let _ = engine.cancel(&account, outcome.reservation_id()).await;
                        ops += 2;
                    }
                }
            }
            ops
        })
    };

    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        let _ = engine.list_available_slots(site.tennis, site.date).await;
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    let ops = writer.await.unwrap_or(0);
    println!("  writer completed {ops} book/cancel ops");
    print_latency("list_available_slots", &mut latencies);
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("slotbook_bench_{}", Ulid::new()));
    let config = EngineConfig {
        data_dir: dir.clone(),
        ..EngineConfig::default()
    };
    let date = NaiveDate::from_ymd_opt(2025, 3, 6).unwrap();
    let clock = Arc::new(ManualClock::new(date.and_hms_opt(7, 0, 0).unwrap()));
    let engine = Arc::new(Engine::new(config, clock).unwrap());

    println!("=== slotbook contention benchmark ===");
    println!("data_dir: {}\n", dir.display());

    println!("[setup]");
    let site = setup(&engine, date).await;

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&engine, &site).await;

    println!("\n[phase 2] racing for the last unit");
    phase2_last_unit(&engine, &site).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&engine, &site).await;

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== benchmark complete ===");
}
