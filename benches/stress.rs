//! Stress benchmark against a running creneau instance.
//!
//! Start the server, then:
//!   CRENEAU_HOST=127.0.0.1 CRENEAU_PORT=5434 cargo bench --bench stress

use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let dbname = format!("bench_{}", Ulid::new());
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname.as_str())
        .user("creneau")
        .password("creneau");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// First Monday of the bench horizon; every date below steps weekdays only.
const BASE_MONDAY: &str = "2030-06-03";

/// The i-th bookable 60-minute slot: 8 per weekday (09:00..17:00), weekends
/// skipped.
fn slot(i: usize) -> (String, String) {
    let day = i / 8;
    let hour = 9 + (i % 8) as i64;
    let base = NaiveDate::parse_from_str(BASE_MONDAY, "%Y-%m-%d").unwrap();
    let date = base
        .checked_add_days(Days::new((day / 5 * 7 + day % 5) as u64))
        .unwrap();
    (date.to_string(), format!("{hour:02}:00"))
}

async fn seed_business(client: &tokio_postgres::Client) -> (Ulid, Ulid) {
    let business_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO businesses (id, name, buffer_minutes, min_notice_hours, slot_minutes) \
             VALUES ('{business_id}', 'Bench & Co', 0, 1, 15)"
        ))
        .await
        .unwrap();
    let service_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO services (id, business_id, name, duration_minutes, price_cents) \
             VALUES ('{service_id}', '{business_id}', 'Ménage', 60, 5000)"
        ))
        .await
        .unwrap();
    (business_id, service_id)
}

fn booking_sql(business_id: Ulid, service_id: Ulid, date: &str, time: &str) -> String {
    let id = Ulid::new();
    format!(
        "INSERT INTO bookings (id, business_id, service_id, client_name, client_email, \
         client_phone, date, time) \
         VALUES ('{id}', '{business_id}', '{service_id}', 'Bench', 'bench@exemple.fr', NULL, \
         '{date}', '{time}')"
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let (business_id, service_id) = seed_business(&client).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let (date, time) = slot(i);
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(business_id, service_id, &date, &time))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  {n} bookings in {:.2}s ({:.0}/s)",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("insert booking", &mut latencies);
}

/// Connect every phase-2 participant to one shared tenant.
async fn connect_shared(host: &str, port: u16) -> tokio_postgres::Client {
    let dbname = "bench_contention";
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("creneau")
        .password("creneau");
    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        let _ = conn.await;
    });
    client
}

/// Many writers fight over one day's slots: the engine must hand out each
/// slot exactly once and fail the rest with 23P01.
async fn phase2_slot_contention(host: &str, port: u16) {
    let setup = connect_shared(host, port).await;
    let (business_id, service_id) = seed_business(&setup).await;
    drop(setup);

    let n_workers = 20;
    let slots_per_day = 8;
    let mut handles = Vec::new();

    let start = Instant::now();
    for _ in 0..n_workers {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect_shared(&host, port).await;
            let mut wins = 0usize;
            let mut conflicts = 0usize;
            for i in 0..slots_per_day {
                let (date, time) = slot(i);
                match client
                    .batch_execute(&booking_sql(business_id, service_id, &date, &time))
                    .await
                {
                    Ok(()) => wins += 1,
                    Err(_) => conflicts += 1,
                }
            }
            (wins, conflicts)
        }));
    }

    let mut total_wins = 0;
    let mut total_conflicts = 0;
    for h in handles {
        let (wins, conflicts) = h.await.unwrap();
        total_wins += wins;
        total_conflicts += conflicts;
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_workers} workers x {slots_per_day} slots: {total_wins} wins, \
         {total_conflicts} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    println!("  (expected wins <= {slots_per_day}: each slot goes to exactly one worker)");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let n_writers = 4;
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();

    for w in 0..n_writers {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (business_id, service_id) = seed_business(&client).await;
            let mut i = w; // stagger starting slots
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let (date, time) = slot(i);
                let _ = client
                    .batch_execute(&booking_sql(business_id, service_id, &date, &time))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (business_id, service_id) = seed_business(&client).await;
            // Fill one day so availability has busy intervals to test against.
            for i in 0..8 {
                let (date, time) = slot(i);
                client
                    .batch_execute(&booking_sql(business_id, service_id, &date, &time))
                    .await
                    .unwrap();
            }

            let (date, _) = slot(0);
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE business_id = '{business_id}' \
                         AND date = '{date}' AND duration = 30"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (business_id, service_id) = seed_business(&client).await;
            for i in 0..ops_per_conn {
                let (date, time) = slot(i);
                client
                    .batch_execute(&booking_sql(business_id, service_id, &date, &time))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CRENEAU_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CRENEAU_PORT")
        .unwrap_or_else(|_| "5434".into())
        .parse()
        .expect("invalid CRENEAU_PORT");

    println!("=== creneau stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] slot contention");
    phase2_slot_contention(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
