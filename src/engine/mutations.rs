use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{BookingDigest, Notification};

use super::conflict::{check_no_conflict, check_within_hours};
use super::{Engine, EngineError, WalCommand};

fn validate_config(config: &SchedulingConfig) -> Result<(), EngineError> {
    if config.buffer_minutes < 0 {
        return Err(EngineError::Validation(
            "buffer_minutes must be >= 0".into(),
        ));
    }
    if config.min_notice_hours < 0 {
        return Err(EngineError::Validation(
            "min_notice_hours must be >= 0".into(),
        ));
    }
    if config.slot_minutes <= 0 || config.slot_minutes > 24 * 60 {
        return Err(EngineError::Validation(
            "slot_minutes must be between 1 and 1440".into(),
        ));
    }
    Ok(())
}

fn validate_contact(contact: &ContactInfo) -> Result<(), EngineError> {
    if contact.name.trim().is_empty() {
        return Err(EngineError::Validation("client_name is required".into()));
    }
    if !contact.email.contains('@') {
        return Err(EngineError::Validation(format!(
            "client_email is not an email address: {}",
            contact.email
        )));
    }
    if contact.name.len() > MAX_NAME_LEN || contact.email.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("contact field too long"));
    }
    Ok(())
}

fn digest_for(bs: &BusinessState, booking: &Booking) -> BookingDigest {
    let service_name = bs
        .find_service(booking.service_id)
        .map(|s| s.name.clone())
        .unwrap_or_default();
    BookingDigest {
        booking_id: booking.id,
        business_name: bs.name.clone().unwrap_or_default(),
        service_name,
        client_name: booking.contact.name.clone(),
        client_email: booking.contact.email.clone(),
        date: booking.date,
        start: booking.start,
        duration: booking.duration,
        total_price_cents: booking.total_price_cents,
    }
}

impl Engine {
    // ── Businesses ───────────────────────────────────────

    pub async fn create_business(
        &self,
        id: Ulid,
        name: Option<String>,
        config: SchedulingConfig,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_BUSINESSES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("business name too long"));
            }
        validate_config(&config)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::BusinessCreated {
            id,
            name: name.clone(),
            config,
        };
        self.wal_append(&event).await?;
        let bs = BusinessState::new(id, name, config);
        self.state.insert(id, Arc::new(RwLock::new(bs)));
        Ok(())
    }

    /// Partial update: `None` fields keep their current value.
    pub async fn update_business(
        &self,
        id: Ulid,
        name: Option<String>,
        buffer_minutes: Option<Minutes>,
        min_notice_hours: Option<i64>,
        slot_minutes: Option<Minutes>,
    ) -> Result<(), EngineError> {
        let bs = self.get_business(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = bs.write().await;

        let name = match name {
            Some(n) => {
                if n.len() > MAX_NAME_LEN {
                    return Err(EngineError::LimitExceeded("business name too long"));
                }
                Some(n)
            }
            None => guard.name.clone(),
        };
        let config = SchedulingConfig {
            buffer_minutes: buffer_minutes.unwrap_or(guard.config.buffer_minutes),
            min_notice_hours: min_notice_hours.unwrap_or(guard.config.min_notice_hours),
            slot_minutes: slot_minutes.unwrap_or(guard.config.slot_minutes),
        };
        validate_config(&config)?;

        let event = Event::BusinessUpdated { id, name, config };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_business(&self, id: Ulid) -> Result<(), EngineError> {
        let bs = self.get_business(&id).ok_or(EngineError::NotFound(id))?;
        // Hold the write lock so no booking can commit mid-delete.
        let _guard = bs.write().await;
        let event = Event::BusinessDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        Ok(())
    }

    // ── Weekly hours ─────────────────────────────────────

    pub async fn set_hours(
        &self,
        business_id: Ulid,
        weekday: u8,
        hours: DayHours,
    ) -> Result<(), EngineError> {
        if weekday > 6 {
            return Err(EngineError::Validation(format!(
                "day_of_week must be 0-6, got {weekday}"
            )));
        }
        if let DayHours::Open { start, end } = hours {
            if !(0..24 * 60).contains(&start) || !(1..=24 * 60).contains(&end) || start >= end {
                return Err(EngineError::Validation(format!(
                    "hours must satisfy 00:00 <= start < end <= 24:00, got {}-{}",
                    minutes_to_hhmm(start),
                    minutes_to_hhmm(end)
                )));
            }
        }
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        let event = Event::HoursSet {
            business_id,
            weekday,
            hours,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn clear_hours(&self, business_id: Ulid, weekday: u8) -> Result<(), EngineError> {
        if weekday > 6 {
            return Err(EngineError::Validation(format!(
                "day_of_week must be 0-6, got {weekday}"
            )));
        }
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if guard.hours.override_for(weekday).is_none() {
            return Err(EngineError::Validation(format!(
                "no hours row for weekday {weekday}"
            )));
        }
        let event = Event::HoursCleared {
            business_id,
            weekday,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Catalog ──────────────────────────────────────────

    pub async fn add_service(
        &self,
        business_id: Ulid,
        service: Service,
    ) -> Result<(), EngineError> {
        if service.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if service.duration_minutes <= 0 || service.duration_minutes > MAX_BLOCK_MINUTES {
            return Err(EngineError::Validation(format!(
                "duration_minutes must be 1-{MAX_BLOCK_MINUTES}, got {}",
                service.duration_minutes
            )));
        }
        if service.price_cents < 0 {
            return Err(EngineError::Validation("price_cents must be >= 0".into()));
        }
        if self.entity_to_business.contains_key(&service.id) {
            return Err(EngineError::AlreadyExists(service.id));
        }
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if guard.services.len() >= MAX_SERVICES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let event = Event::ServiceAdded {
            business_id,
            service,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_service(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.find_service(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceRemoved { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    pub async fn add_add_on(&self, business_id: Ulid, add_on: AddOn) -> Result<(), EngineError> {
        if add_on.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("option name too long"));
        }
        if add_on.price_cents < 0 {
            return Err(EngineError::Validation("price_cents must be >= 0".into()));
        }
        if self.entity_to_business.contains_key(&add_on.id) {
            return Err(EngineError::AlreadyExists(add_on.id));
        }
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if guard.add_ons.len() >= MAX_ADDONS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many options"));
        }
        let event = Event::AddOnAdded {
            business_id,
            add_on,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_add_on(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.find_add_on(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::AddOnRemoved { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    pub async fn add_question(
        &self,
        business_id: Ulid,
        question: Question,
    ) -> Result<(), EngineError> {
        if question.text.len() > MAX_QUESTION_LEN {
            return Err(EngineError::LimitExceeded("question text too long"));
        }
        if self.entity_to_business.contains_key(&question.id) {
            return Err(EngineError::AlreadyExists(question.id));
        }
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if guard.questions.len() >= MAX_QUESTIONS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many questions"));
        }
        let event = Event::QuestionAdded {
            business_id,
            question,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_question(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.find_question(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::QuestionRemoved { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    // ── Booking writer ───────────────────────────────────

    /// Create a booking, re-validating the chosen slot under the business
    /// write lock so that check and commit are one serialized unit. Between
    /// a customer's availability query and their submit someone else may
    /// have taken the slot — that race loses here with `Overlap`, a normal
    /// control path, and the client re-queries availability.
    ///
    /// The booking row, its add-on rows, and its answer rows travel in one
    /// WAL event: all-or-nothing. On success, confirmation and owner-alert
    /// notifications are dispatched fire-and-forget.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Ulid, EngineError> {
        validate_contact(&req.contact)?;
        if !(0..24 * 60).contains(&req.start) {
            return Err(EngineError::Validation(format!(
                "time out of range: {}",
                req.start
            )));
        }
        if req.add_on_ids.len() > MAX_ADDONS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many options on booking"));
        }
        if self.entity_to_business.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let bs = self
            .get_business(&req.business_id)
            .ok_or(EngineError::NotFound(req.business_id))?;
        let mut guard = bs.write().await;

        if guard.bookings.len() >= MAX_BOOKINGS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        let service = guard
            .find_service(req.service_id)
            .ok_or(EngineError::NotFound(req.service_id))?
            .clone();

        let mut add_ons = Vec::with_capacity(req.add_on_ids.len());
        for option_id in &req.add_on_ids {
            let add_on = guard
                .find_add_on(*option_id)
                .ok_or(EngineError::NotFound(*option_id))?;
            add_ons.push(BookingAddOn {
                option_id: add_on.id,
                price_cents: add_on.price_cents,
            });
        }

        let mut answers = Vec::with_capacity(req.answers.len());
        for (question_id, answer) in &req.answers {
            guard
                .find_question(*question_id)
                .ok_or(EngineError::NotFound(*question_id))?;
            if answer.len() > MAX_ANSWER_LEN {
                return Err(EngineError::LimitExceeded("answer too long"));
            }
            if !answer.is_empty() {
                answers.push(BookingAnswer {
                    question_id: *question_id,
                    answer: answer.clone(),
                });
            }
        }
        for question in guard.questions.iter().filter(|q| q.required) {
            if !answers.iter().any(|a| a.question_id == question.id) {
                return Err(EngineError::Validation(format!(
                    "required question not answered: {}",
                    question.id
                )));
            }
        }

        // The span that must be free is service + buffer; only the service
        // time is stored on the booking.
        let block = Span::new(
            req.start,
            req.start + service.duration_minutes + guard.config.buffer_minutes,
        );
        check_within_hours(&guard, req.date, &block)?;
        check_no_conflict(&guard, req.date, &block)?;

        let total_price_cents =
            service.price_cents + add_ons.iter().map(|o| o.price_cents).sum::<i64>();
        let booking = Booking {
            id: req.id,
            business_id: req.business_id,
            service_id: req.service_id,
            contact: req.contact,
            date: req.date,
            start: req.start,
            duration: service.duration_minutes,
            end: req.start + service.duration_minutes,
            base_price_cents: service.price_cents,
            total_price_cents,
            add_ons,
            answers,
            status: BookingStatus::Pending,
        };

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let digest = digest_for(&guard, &booking);
        drop(guard);
        self.dispatcher
            .dispatch(Notification::Confirmation(digest.clone()));
        self.dispatcher.dispatch(Notification::OwnerAlert(digest));

        Ok(booking.id)
    }

    // ── Status transitions ───────────────────────────────

    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .find_booking(id)
            .ok_or(EngineError::NotFound(id))?
            .status;
        if !current.can_transition(status) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: status,
            });
        }
        let event = Event::BookingStatusChanged {
            id,
            business_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// `DELETE FROM bookings` cancels — rows are history, not garbage.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<(), EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await
    }

    // ── Reminders ────────────────────────────────────────

    /// Reminder notifications for every live booking on `date`. The cron
    /// loop handles once-per-day dedup; this just selects.
    pub fn collect_due_reminders(&self, date: NaiveDate) -> Vec<Notification> {
        let mut due = Vec::new();
        for entry in self.state.iter() {
            let bs = entry.value().clone();
            if let Ok(guard) = bs.try_read() {
                for booking in guard.bookings_on(date) {
                    if booking.status.is_live() {
                        due.push(Notification::Reminder(digest_for(&guard, booking)));
                    }
                }
            }
        }
        due
    }

    // ── WAL compaction ───────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. Status history collapses into each booking's current status.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let business_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in business_ids {
            let Some(entry) = self.state.get(&id) else { continue };
            let bs = entry.value().clone();
            drop(entry);
            let guard = bs.read().await;

            events.push(Event::BusinessCreated {
                id: guard.id,
                name: guard.name.clone(),
                config: guard.config,
            });
            for weekday in 0..7u8 {
                if let Some(hours) = guard.hours.override_for(weekday) {
                    events.push(Event::HoursSet {
                        business_id: guard.id,
                        weekday,
                        hours,
                    });
                }
            }
            for service in &guard.services {
                events.push(Event::ServiceAdded {
                    business_id: guard.id,
                    service: service.clone(),
                });
            }
            for add_on in &guard.add_ons {
                events.push(Event::AddOnAdded {
                    business_id: guard.id,
                    add_on: add_on.clone(),
                });
            }
            for question in &guard.questions {
                events.push(Event::QuestionAdded {
                    business_id: guard.id,
                    question: question.clone(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
