use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use venuebook::calendar::day_start;
use venuebook::engine::Engine;
use venuebook::model::{Span, WorkingHours, HOUR_MS};
use venuebook::store::MemoryStore;

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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap_or_default()
}

/// `hour`-th one-hour slot counted from the first bench day, eight per day.
fn hour_slot(hour: usize) -> Span {
    let day = first_day() + Days::new((hour / 8) as u64);
    let start = day_start(day) + (9 + (hour % 8) as i64) * HOUR_MS;
    Span::new(start, start + HOUR_MS)
}

async fn engine(durable: bool) -> Arc<Engine> {
    let store = if durable {
        let dir = std::env::temp_dir().join(format!("venuebook_bench_{}", Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        MemoryStore::open(&dir.join("bench.wal")).unwrap()
    } else {
        MemoryStore::new()
    };
    Arc::new(Engine::new(Arc::new(store), WorkingHours::default()))
}

async fn phase1_sequential(engine: &Engine) {
    let rid = Ulid::new();
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        let booked = engine.book_time_slot(rid, hour_slot(i), Ulid::new()).await.unwrap();
        assert!(booked);
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  {n} reservations in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("book_time_slot", &mut latencies);
}

/// Many tasks race for the same small set of slots; every slot must end up
/// with exactly one winner.
async fn phase2_contention(engine: Arc<Engine>) {
    let rid = Ulid::new();
    let n_tasks = 32;
    let n_slots = 64;
    let winners = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let winners = winners.clone();
        handles.push(tokio::spawn(async move {
            for slot in 0..n_slots {
                if engine.book_time_slot(rid, hour_slot(slot), Ulid::new()).await.unwrap_or(false) {
                    winners.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = winners.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots = {} attempts in {:.2}s, {won} winners",
        n_tasks * n_slots,
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots, "double booking detected");
}

async fn phase3_read_under_load(engine: Arc<Engine>) {
    let rid = Ulid::new();
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..2000 {
                let _ = engine.book_time_slot(rid, hour_slot(i), Ulid::new()).await;
            }
        })
    };

    let mut latencies = Vec::new();
    for i in 0..2000 {
        let t = Instant::now();
        let _ = engine.check_availability(rid, hour_slot(i)).await;
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();
    print_latency("check_availability", &mut latencies);

    let mut latencies = Vec::new();
    for d in 0..200u64 {
        let t = Instant::now();
        let _ = engine.free_slots(rid, first_day() + Days::new(d), Some(30)).await;
        latencies.push(t.elapsed());
    }
    print_latency("free_slots", &mut latencies);
}

#[tokio::main]
async fn main() {
    let durable = std::env::var("VENUEBOOK_BENCH_DURABLE").is_ok_and(|v| v == "1");
    println!("=== venuebook stress benchmark ===");
    println!("store: {}\n", if durable { "memory + WAL" } else { "memory" });

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential(&*engine(durable).await).await;

    println!("\n[phase 2] contended reservations");
    phase2_contention(engine(durable).await).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(engine(durable).await).await;

    println!("\n=== benchmark complete ===");
}
