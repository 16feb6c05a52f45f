use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;

use super::conflict::now_naive;
use super::slots::compute_slots;
use super::{Engine, EngineError};

impl Engine {
    /// Bookable slots for a business, date, and service duration (default 60
    /// minutes). Reads configuration, hours, and busy intervals under the
    /// read lock, then hands everything to the pure calculator together with
    /// the wall clock read here at the boundary.
    pub async fn availability(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        duration: Option<Minutes>,
    ) -> Result<Vec<TimeSlot>, EngineError> {
        self.availability_at(business_id, date, duration, now_naive())
            .await
    }

    /// Same as [`availability`] with an explicit clock, for determinism.
    pub async fn availability_at(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        duration: Option<Minutes>,
        now: NaiveDateTime,
    ) -> Result<Vec<TimeSlot>, EngineError> {
        let duration = duration.unwrap_or(DEFAULT_SERVICE_DURATION);
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        let busy = guard.busy_intervals(date);
        compute_slots(&guard.config, &guard.hours, &busy, date, duration, now)
            .map_err(|e| EngineError::Validation(e.to_string()))
    }

    pub async fn list_businesses(&self) -> Vec<BusinessInfo> {
        // Clone the Arcs out first so no map shard is held across an await.
        let businesses: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(businesses.len());
        for bs in businesses {
            let guard = bs.read().await;
            out.push(BusinessInfo {
                id: guard.id,
                name: guard.name.clone(),
                config: guard.config,
            });
        }
        out
    }

    pub async fn get_services(&self, business_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        Ok(guard.services.clone())
    }

    /// Bookings for a business, optionally restricted to one date. All
    /// statuses — the dashboard shows history, not just the live calendar.
    pub async fn get_bookings(
        &self,
        business_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        Ok(match date {
            Some(d) => guard.bookings_on(d).to_vec(),
            None => guard.bookings.clone(),
        })
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let business_id = self
            .get_business_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        guard
            .find_booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }
}
