use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::Mutex;
use ulid::Ulid;

use super::*;
use crate::model::*;
use crate::notify::{Dispatcher, LogMailer, Mailer, Notification, NotifyError};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("creneau_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn test_engine(name: &str) -> Engine {
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(LogMailer)));
    Engine::new(test_wal_path(name), dispatcher).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

// A Thursday; every booked date below is a weekday after it.
const NOW: &str = "2026-08-06 12:00";
const MONDAY: &str = "2026-08-17";

/// Business with 15-min buffer/granularity, 2h notice, one 60-min service.
async fn seed(engine: &Engine, buffer: Minutes) -> (Ulid, Ulid) {
    let business_id = Ulid::new();
    engine
        .create_business(
            business_id,
            Some("Brille & Net".into()),
            SchedulingConfig {
                buffer_minutes: buffer,
                min_notice_hours: 2,
                slot_minutes: 15,
            },
        )
        .await
        .unwrap();
    let service_id = Ulid::new();
    engine
        .add_service(
            business_id,
            Service {
                id: service_id,
                name: "Ménage complet".into(),
                duration_minutes: 60,
                price_cents: 6000,
            },
        )
        .await
        .unwrap();
    (business_id, service_id)
}

fn request(business_id: Ulid, service_id: Ulid, day: &str, start: Minutes) -> BookingRequest {
    BookingRequest {
        id: Ulid::new(),
        business_id,
        service_id,
        contact: ContactInfo {
            name: "Jean Dupont".into(),
            email: "jean@exemple.fr".into(),
            phone: None,
        },
        date: date(day),
        start,
        add_on_ids: vec![],
        answers: vec![],
    }
}

struct RecordingMailer {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

// ── Businesses and configuration ─────────────────────────

#[tokio::test]
async fn create_and_list_business() {
    let engine = test_engine("create_business.wal");
    let id = Ulid::new();
    engine
        .create_business(id, Some("Brille & Net".into()), SchedulingConfig::default())
        .await
        .unwrap();

    let listed = engine.list_businesses().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].config.slot_minutes, 15);
}

#[tokio::test]
async fn duplicate_business_rejected() {
    let engine = test_engine("dup_business.wal");
    let id = Ulid::new();
    engine
        .create_business(id, None, SchedulingConfig::default())
        .await
        .unwrap();
    let result = engine
        .create_business(id, None, SchedulingConfig::default())
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn invalid_config_rejected() {
    let engine = test_engine("bad_config.wal");
    for config in [
        SchedulingConfig { slot_minutes: 0, ..Default::default() },
        SchedulingConfig { buffer_minutes: -5, ..Default::default() },
        SchedulingConfig { min_notice_hours: -1, ..Default::default() },
    ] {
        let result = engine.create_business(Ulid::new(), None, config).await;
        assert!(matches!(result, Err(EngineError::Validation(_))), "{config:?}");
    }
}

#[tokio::test]
async fn update_business_merges_fields() {
    let engine = test_engine("update_business.wal");
    let (business_id, _) = seed(&engine, 15).await;

    engine
        .update_business(business_id, None, Some(30), None, None)
        .await
        .unwrap();

    let info = engine
        .list_businesses()
        .await
        .into_iter()
        .find(|b| b.id == business_id)
        .unwrap();
    assert_eq!(info.config.buffer_minutes, 30);
    assert_eq!(info.config.min_notice_hours, 2); // untouched
    assert_eq!(info.name.as_deref(), Some("Brille & Net"));
}

#[tokio::test]
async fn delete_business_removes_state() {
    let engine = test_engine("delete_business.wal");
    let (business_id, _) = seed(&engine, 0).await;
    engine.delete_business(business_id).await.unwrap();
    let result = engine
        .availability_at(business_id, date(MONDAY), None, dt(NOW))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ── Weekly hours ─────────────────────────────────────────

#[tokio::test]
async fn saturday_opens_when_hours_row_says_so() {
    let engine = test_engine("saturday_hours.wal");
    let (business_id, _) = seed(&engine, 0).await;
    let saturday = "2026-08-22";

    // Closed by default policy
    let slots = engine
        .availability_at(business_id, date(saturday), None, dt(NOW))
        .await
        .unwrap();
    assert!(slots.is_empty());

    engine
        .set_hours(business_id, 6, DayHours::Open { start: 600, end: 840 })
        .await
        .unwrap();
    let slots = engine
        .availability_at(business_id, date(saturday), None, dt(NOW))
        .await
        .unwrap();
    assert_eq!(slots.first().map(|s| s.start), Some(600));

    engine.clear_hours(business_id, 6).await.unwrap();
    let slots = engine
        .availability_at(business_id, date(saturday), None, dt(NOW))
        .await
        .unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn malformed_hours_rejected_at_write() {
    let engine = test_engine("bad_hours.wal");
    let (business_id, _) = seed(&engine, 0).await;
    let result = engine
        .set_hours(business_id, 1, DayHours::Open { start: 1080, end: 540 })
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    let result = engine
        .set_hours(business_id, 9, DayHours::Closed)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn clear_missing_hours_row_fails() {
    let engine = test_engine("clear_missing_hours.wal");
    let (business_id, _) = seed(&engine, 0).await;
    let result = engine.clear_hours(business_id, 3).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn availability_unknown_business_fails() {
    let engine = test_engine("avail_unknown.wal");
    let result = engine
        .availability_at(Ulid::new(), date(MONDAY), None, dt(NOW))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn availability_duration_defaults_to_sixty() {
    let engine = test_engine("avail_default_duration.wal");
    let (business_id, _) = seed(&engine, 15).await;
    let defaulted = engine
        .availability_at(business_id, date(MONDAY), None, dt(NOW))
        .await
        .unwrap();
    let explicit = engine
        .availability_at(business_id, date(MONDAY), Some(60), dt(NOW))
        .await
        .unwrap();
    assert_eq!(defaulted, explicit);
}

#[tokio::test]
async fn availability_full_weekday_grid() {
    // Default Mon-Fri hours, 15-min buffer and granularity, 2h notice, no
    // bookings, weekday well in the future, 60-min service: 09:00..=16:45.
    let engine = test_engine("avail_grid.wal");
    let (business_id, _) = seed(&engine, 15).await;
    let slots = engine
        .availability_at(business_id, date(MONDAY), Some(60), dt(NOW))
        .await
        .unwrap();
    assert_eq!(slots.len(), 32);
    assert_eq!(slots.first().unwrap().time(), "09:00");
    assert_eq!(slots.last().unwrap().time(), "16:45");
    assert!(slots.iter().all(|s| s.available));
}

#[tokio::test]
async fn availability_reflects_existing_booking() {
    // Existing confirmed 10:00-11:00 booking, 15-min buffer: for a 30-min
    // service, 10:30 shows busy and 11:15 shows free.
    let engine = test_engine("avail_reflects_booking.wal");
    let (business_id, service_id) = seed(&engine, 15).await;
    let booking_id = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();
    engine
        .set_booking_status(booking_id, BookingStatus::Confirmed)
        .await
        .unwrap();

    let slots = engine
        .availability_at(business_id, date(MONDAY), Some(30), dt(NOW))
        .await
        .unwrap();
    let by_time = |t: &str| slots.iter().find(|s| s.time() == t).unwrap();
    assert!(!by_time("10:30").available);
    assert!(by_time("11:15").available);
}

#[tokio::test]
async fn availability_ignores_cancelled_and_no_show() {
    let engine = test_engine("avail_ignores_cancelled.wal");
    let (business_id, service_id) = seed(&engine, 0).await;

    let cancelled = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();
    engine.cancel_booking(cancelled).await.unwrap();

    let no_show = engine
        .create_booking(request(business_id, service_id, MONDAY, 780))
        .await
        .unwrap();
    engine
        .set_booking_status(no_show, BookingStatus::NoShow)
        .await
        .unwrap();

    let slots = engine
        .availability_at(business_id, date(MONDAY), Some(60), dt(NOW))
        .await
        .unwrap();
    assert!(slots.iter().all(|s| s.available));
}

// ── Booking writer ───────────────────────────────────────

#[tokio::test]
async fn booking_happy_path() {
    let engine = test_engine("booking_happy.wal");
    let (business_id, service_id) = seed(&engine, 15).await;
    let id = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();

    let booking = engine.get_booking(id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.start, 600);
    assert_eq!(booking.end, 660);
    assert_eq!(booking.duration, 60);
    assert_eq!(booking.base_price_cents, 6000);
    assert_eq!(booking.total_price_cents, 6000);
}

#[tokio::test]
async fn booking_requires_known_service() {
    let engine = test_engine("booking_unknown_service.wal");
    let (business_id, _) = seed(&engine, 0).await;
    let result = engine
        .create_booking(request(business_id, Ulid::new(), MONDAY, 600))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn booking_validates_contact() {
    let engine = test_engine("booking_bad_contact.wal");
    let (business_id, service_id) = seed(&engine, 0).await;

    let mut no_name = request(business_id, service_id, MONDAY, 600);
    no_name.contact.name = "  ".into();
    assert!(matches!(
        engine.create_booking(no_name).await,
        Err(EngineError::Validation(_))
    ));

    let mut bad_email = request(business_id, service_id, MONDAY, 615);
    bad_email.contact.email = "not-an-email".into();
    assert!(matches!(
        engine.create_booking(bad_email).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn booking_rejected_outside_hours() {
    let engine = test_engine("booking_outside_hours.wal");
    let (business_id, service_id) = seed(&engine, 15).await;

    // Sunday: closed by the default policy
    let result = engine
        .create_booking(request(business_id, service_id, "2026-08-23", 600))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    // 17:30 + 60min + 15min buffer crosses the 18:00 close
    let result = engine
        .create_booking(request(business_id, service_id, MONDAY, 1050))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    // Before opening
    let result = engine
        .create_booking(request(business_id, service_id, MONDAY, 480))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn booking_conflict_detected() {
    let engine = test_engine("booking_conflict.wal");
    let (business_id, service_id) = seed(&engine, 15).await;

    engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();

    // 10:45 block 10:45-12:00 overlaps the 10:00-11:00 booking
    let result = engine
        .create_booking(request(business_id, service_id, MONDAY, 645))
        .await;
    assert!(matches!(result, Err(EngineError::Overlap(_))));

    // A different day is untouched
    engine
        .create_booking(request(business_id, service_id, "2026-08-18", 600))
        .await
        .unwrap();
}

#[tokio::test]
async fn back_to_back_legal_with_zero_buffer() {
    let engine = test_engine("booking_back_to_back.wal");
    let (business_id, service_id) = seed(&engine, 0).await;

    engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();
    // Starts exactly where the previous one ends — touching, not overlapping.
    engine
        .create_booking(request(business_id, service_id, MONDAY, 660))
        .await
        .unwrap();
}

#[tokio::test]
async fn buffer_widens_the_candidate_block() {
    let engine = test_engine("booking_buffer_block.wal");
    let (business_id, service_id) = seed(&engine, 15).await;

    engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();

    // 09:15 block runs 09:15-10:30: its own buffer collides with 10:00.
    let result = engine
        .create_booking(request(business_id, service_id, MONDAY, 555))
        .await;
    assert!(matches!(result, Err(EngineError::Overlap(_))));

    // 09:00 block runs 09:00-10:15... also collides.
    let result = engine
        .create_booking(request(business_id, service_id, MONDAY, 540))
        .await;
    assert!(matches!(result, Err(EngineError::Overlap(_))));

    // 11:00 starts at the existing booking's raw end; the stored row does
    // not carry its buffer, so this commits.
    engine
        .create_booking(request(business_id, service_id, MONDAY, 660))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_identical_bookings_exactly_one_wins() {
    let engine = Arc::new(test_engine("booking_race.wal"));
    let (business_id, service_id) = seed(&engine, 15).await;

    let a = {
        let engine = engine.clone();
        let req = request(business_id, service_id, MONDAY, 600);
        tokio::spawn(async move { engine.create_booking(req).await })
    };
    let b = {
        let engine = engine.clone();
        let req = request(business_id, service_id, MONDAY, 600);
        tokio::spawn(async move { engine.create_booking(req).await })
    };

    let (a, b) = tokio::join!(a, b);
    let results = [a.unwrap(), b.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let overlaps = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Overlap(_))))
        .count();
    assert_eq!((wins, overlaps), (1, 1), "{results:?}");
}

#[tokio::test]
async fn concurrent_disjoint_bookings_both_succeed() {
    let engine = Arc::new(test_engine("booking_disjoint.wal"));
    let (business_id, service_id) = seed(&engine, 15).await;

    let a = {
        let engine = engine.clone();
        let req = request(business_id, service_id, MONDAY, 540);
        tokio::spawn(async move { engine.create_booking(req).await })
    };
    let b = {
        let engine = engine.clone();
        let req = request(business_id, service_id, MONDAY, 780);
        tokio::spawn(async move { engine.create_booking(req).await })
    };

    let (a, b) = tokio::join!(a, b);
    assert!(a.unwrap().is_ok());
    assert!(b.unwrap().is_ok());
}

#[tokio::test]
async fn booking_with_add_ons_and_answers() {
    let engine = test_engine("booking_addons.wal");
    let (business_id, service_id) = seed(&engine, 0).await;

    let option_a = Ulid::new();
    let option_b = Ulid::new();
    engine
        .add_add_on(business_id, AddOn { id: option_a, name: "Vitres".into(), price_cents: 1500 })
        .await
        .unwrap();
    engine
        .add_add_on(business_id, AddOn { id: option_b, name: "Repassage".into(), price_cents: 2000 })
        .await
        .unwrap();

    let question_req = Ulid::new();
    let question_opt = Ulid::new();
    engine
        .add_question(
            business_id,
            Question { id: question_req, text: "Surface du logement ?".into(), required: true },
        )
        .await
        .unwrap();
    engine
        .add_question(
            business_id,
            Question { id: question_opt, text: "Animaux ?".into(), required: false },
        )
        .await
        .unwrap();

    let mut req = request(business_id, service_id, MONDAY, 600);
    req.add_on_ids = vec![option_a, option_b];
    req.answers = vec![
        (question_req, "80 m2".into()),
        (question_opt, "".into()), // empty answers are dropped
    ];
    let id = engine.create_booking(req).await.unwrap();

    let booking = engine.get_booking(id).await.unwrap();
    assert_eq!(booking.total_price_cents, 6000 + 1500 + 2000);
    assert_eq!(booking.add_ons.len(), 2);
    assert_eq!(booking.answers.len(), 1);
    assert_eq!(booking.answers[0].question_id, question_req);
}

#[tokio::test]
async fn required_question_enforced() {
    let engine = test_engine("booking_required_question.wal");
    let (business_id, service_id) = seed(&engine, 0).await;
    engine
        .add_question(
            business_id,
            Question { id: Ulid::new(), text: "Surface ?".into(), required: true },
        )
        .await
        .unwrap();

    let result = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn failed_booking_leaves_nothing_behind() {
    let engine = test_engine("booking_atomic.wal");
    let (business_id, service_id) = seed(&engine, 0).await;

    let mut req = request(business_id, service_id, MONDAY, 600);
    req.add_on_ids = vec![Ulid::new()]; // unknown option
    let id = req.id;
    assert!(engine.create_booking(req).await.is_err());

    assert!(engine.get_bookings(business_id, None).await.unwrap().is_empty());
    assert!(engine.get_booking(id).await.is_err());
}

// ── Status machine ───────────────────────────────────────

#[tokio::test]
async fn status_walks_the_machine() {
    let engine = test_engine("status_machine.wal");
    let (business_id, service_id) = seed(&engine, 0).await;
    let id = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();

    // pending -> completed skips confirmation
    let result = engine
        .set_booking_status(id, BookingStatus::Completed)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));

    engine
        .set_booking_status(id, BookingStatus::Confirmed)
        .await
        .unwrap();
    engine
        .set_booking_status(id, BookingStatus::Completed)
        .await
        .unwrap();

    // completed is terminal
    let result = engine
        .set_booking_status(id, BookingStatus::Cancelled)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn cancelling_frees_the_slot() {
    let engine = test_engine("cancel_frees_slot.wal");
    let (business_id, service_id) = seed(&engine, 15).await;

    let first = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .create_booking(request(business_id, service_id, MONDAY, 600))
            .await,
        Err(EngineError::Overlap(_))
    ));

    engine.cancel_booking(first).await.unwrap();
    engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();

    // The cancelled row is still part of history.
    let all = engine.get_bookings(business_id, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|b| b.status == BookingStatus::Cancelled));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn booking_dispatches_confirmation_and_owner_alert() {
    let mailer = Arc::new(RecordingMailer { sent: Mutex::new(Vec::new()) });
    let dispatcher = Arc::new(Dispatcher::new(mailer.clone()));
    let engine = Engine::new(test_wal_path("booking_notify.wal"), dispatcher).unwrap();
    let (business_id, service_id) = seed(&engine, 0).await;

    let id = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();

    // Dispatch is fire-and-forget; give the tasks a moment.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        if mailer.sent.lock().await.len() >= 2 || std::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let sent = mailer.sent.lock().await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|n| matches!(n, Notification::Confirmation(_))));
    assert!(sent.iter().any(|n| matches!(n, Notification::OwnerAlert(_))));
    assert!(sent.iter().all(|n| n.booking_id() == id));
    let digest = sent[0].digest();
    assert_eq!(digest.business_name, "Brille & Net");
    assert_eq!(digest.service_name, "Ménage complet");
}

#[tokio::test]
async fn reminders_select_live_bookings_for_the_date() {
    let engine = test_engine("reminders.wal");
    let (business_id, service_id) = seed(&engine, 0).await;

    let keep_a = engine
        .create_booking(request(business_id, service_id, MONDAY, 540))
        .await
        .unwrap();
    let keep_b = engine
        .create_booking(request(business_id, service_id, MONDAY, 660))
        .await
        .unwrap();
    engine
        .set_booking_status(keep_b, BookingStatus::Confirmed)
        .await
        .unwrap();
    let dropped = engine
        .create_booking(request(business_id, service_id, MONDAY, 780))
        .await
        .unwrap();
    engine.cancel_booking(dropped).await.unwrap();
    // Different date: not due.
    engine
        .create_booking(request(business_id, service_id, "2026-08-18", 540))
        .await
        .unwrap();

    let due = engine.collect_due_reminders(date(MONDAY));
    let mut ids: Vec<Ulid> = due.iter().map(|n| n.booking_id()).collect();
    ids.sort();
    let mut expected = vec![keep_a, keep_b];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(due.iter().all(|n| matches!(n, Notification::Reminder(_))));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_rebuilds_identical_availability() {
    let path = test_wal_path("replay_availability.wal");
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(LogMailer)));
    let (business_id, before) = {
        let engine = Engine::new(path.clone(), dispatcher.clone()).unwrap();
        let (business_id, service_id) = seed(&engine, 15).await;
        engine
            .set_hours(business_id, 6, DayHours::Open { start: 600, end: 840 })
            .await
            .unwrap();
        let id = engine
            .create_booking(request(business_id, service_id, MONDAY, 600))
            .await
            .unwrap();
        engine
            .set_booking_status(id, BookingStatus::Confirmed)
            .await
            .unwrap();
        let slots = engine
            .availability_at(business_id, date(MONDAY), Some(30), dt(NOW))
            .await
            .unwrap();
        (business_id, slots)
    };

    let engine = Engine::new(path, dispatcher).unwrap();
    let after = engine
        .availability_at(business_id, date(MONDAY), Some(30), dt(NOW))
        .await
        .unwrap();
    assert_eq!(before, after);

    // The Saturday override survived too.
    let sat = engine
        .availability_at(business_id, date("2026-08-22"), Some(60), dt(NOW))
        .await
        .unwrap();
    assert_eq!(sat.first().map(|s| s.start), Some(600));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(LogMailer)));
    let engine = Engine::new(path.clone(), dispatcher.clone()).unwrap();
    let (business_id, service_id) = seed(&engine, 0).await;

    // Churn the hours row, then commit a booking and flip its status.
    for _ in 0..25 {
        engine
            .set_hours(business_id, 2, DayHours::Open { start: 480, end: 1200 })
            .await
            .unwrap();
        engine.clear_hours(business_id, 2).await.unwrap();
    }
    let id = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await
        .unwrap();
    engine
        .set_booking_status(id, BookingStatus::Confirmed)
        .await
        .unwrap();

    assert!(engine.wal_appends_since_compact().await > 50);
    let size_before = std::fs::metadata(&path).unwrap().len();
    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    let size_after = std::fs::metadata(&path).unwrap().len();
    assert!(size_after < size_before, "{size_after} < {size_before}");

    drop(engine);
    let engine = Engine::new(path, dispatcher).unwrap();
    let booking = engine.get_booking(id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(engine.get_services(business_id).await.unwrap().len(), 1);
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn service_validation() {
    let engine = test_engine("service_validation.wal");
    let (business_id, _) = seed(&engine, 0).await;

    let result = engine
        .add_service(
            business_id,
            Service { id: Ulid::new(), name: "Flash".into(), duration_minutes: 0, price_cents: 100 },
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    let result = engine
        .add_service(
            business_id,
            Service { id: Ulid::new(), name: "Gratuit?".into(), duration_minutes: 30, price_cents: -1 },
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn removed_service_cannot_be_booked() {
    let engine = test_engine("remove_service.wal");
    let (business_id, service_id) = seed(&engine, 0).await;
    engine.remove_service(service_id).await.unwrap();
    let result = engine
        .create_booking(request(business_id, service_id, MONDAY, 600))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}
