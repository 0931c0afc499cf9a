//! Surplus lifecycle service: read, plan, conditional write.
//!
//! Every transition re-reads the record, checks who is acting, plans it
//! with [`lifecycle::plan`] and writes it with a single conditional update.
//! A lost race is retried once against a fresh read; if the fresh state
//! fails the guard the caller sees that guard, otherwise [`CoreError::Conflict`].

use foodbridge_shared::clock::Clock;
use foodbridge_shared::code::DeliveryCode;
use foodbridge_shared::error::AuthorizationError;
use foodbridge_shared::lifecycle::{self, Action};
use foodbridge_shared::stats::{self, CanteenSummary, DriverDailyStats, NgoDailyStats};
use foodbridge_shared::surplus::{NewSurplus, SurplusRecord};
use foodbridge_shared::types::{Party, Role, SurplusId, SurplusStatus};
use foodbridge_shared::CoreError;
use foodbridge_store::{
    CasOutcome, DriverFilter, StoreError, SurplusOrder, SurplusQuery, SurplusStore, UserProfile,
};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurplusSettings {
    pub default_freshness_minutes: i64,
    pub available_limit: u32,
    pub retry_on_conflict: bool,
}

/// Role-specific dashboard figures for the current UTC day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum DailyStats {
    Canteen(CanteenSummary),
    Ngo(NgoDailyStats),
    Driver(DriverDailyStats),
}

pub struct SurplusService<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
    settings: SurplusSettings,
}

impl<'a, S: SurplusStore + ?Sized> SurplusService<'a, S> {
    pub fn new(store: &'a S, clock: &'a dyn Clock, settings: SurplusSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    fn read(&self, id: SurplusId) -> Result<SurplusRecord, CoreError> {
        self.store
            .read_surplus(id)
            .map_err(|e| e.into_core(format!("surplus {id}")))
    }

    /// List a new donation on behalf of a canteen.
    pub fn create(&self, actor: &UserProfile, input: NewSurplus) -> Result<SurplusRecord, CoreError> {
        if actor.role != Role::Canteen {
            return Err(AuthorizationError::ActionNotPermitted {
                role: actor.role,
                action: "list",
            }
            .into());
        }
        let record = input.into_record(
            actor.id.clone(),
            actor.display_name.clone(),
            self.clock.now(),
            self.settings.default_freshness_minutes,
        )?;
        self.store.insert_surplus(&record)?;
        info!(
            surplus_id = %record.id,
            canteen = %record.canteen_id,
            expiry = %record.expiry_time,
            "surplus listed"
        );
        Ok(record)
    }

    pub fn get(&self, id: SurplusId) -> Result<SurplusRecord, CoreError> {
        self.read(id)
    }

    pub fn claim(&self, actor: &UserProfile, id: SurplusId) -> Result<SurplusRecord, CoreError> {
        let action = Action::Claim {
            recipient_id: actor.id.clone(),
            recipient_name: actor.display_name.clone(),
        };
        self.apply(&actor.party(), id, &action)
    }

    /// Self-assignment of a driver.  The delivery code is drawn here, once.
    pub fn assign_driver(&self, actor: &Party, id: SurplusId) -> Result<SurplusRecord, CoreError> {
        let action = Action::AssignDriver {
            driver_id: actor.id.clone(),
            code: DeliveryCode::generate(&mut rand::thread_rng()),
        };
        self.apply(actor, id, &action)
    }

    pub fn verify_pickup(
        &self,
        actor: &Party,
        id: SurplusId,
        code: &str,
    ) -> Result<SurplusRecord, CoreError> {
        let action = Action::VerifyPickup {
            code: code.to_string(),
        };
        self.apply(actor, id, &action)
    }

    pub fn verify_delivery(
        &self,
        actor: &Party,
        id: SurplusId,
        code: &str,
    ) -> Result<SurplusRecord, CoreError> {
        let action = Action::VerifyDelivery {
            code: code.to_string(),
        };
        self.apply(actor, id, &action)
    }

    pub fn expire(&self, actor: &Party, id: SurplusId) -> Result<SurplusRecord, CoreError> {
        self.apply(actor, id, &Action::Expire)
    }

    fn apply(&self, actor: &Party, id: SurplusId, action: &Action) -> Result<SurplusRecord, CoreError> {
        let attempts = if self.settings.retry_on_conflict { 2 } else { 1 };

        for attempt in 1..=attempts {
            let record = self.read(id)?;
            lifecycle::permit(actor, &record, action)?;
            let transition = lifecycle::plan(&record, action, self.clock.now())?;

            match self
                .store
                .conditional_update(id, &transition.expected, &transition.patch)?
            {
                CasOutcome::Applied(updated) => {
                    info!(
                        surplus_id = %id,
                        actor = %actor.id,
                        from = %transition.from,
                        to = %transition.to,
                        action = action.name(),
                        "transition applied"
                    );
                    return Ok(updated);
                }
                CasOutcome::NotFound => return Err(CoreError::NotFound(format!("surplus {id}"))),
                CasOutcome::PredicateFailed => {
                    warn!(surplus_id = %id, attempt, action = action.name(), "lost conditional write");
                }
            }
        }

        // The guard may now fail on the fresh state; that reason wins.
        let record = self.read(id)?;
        lifecycle::permit(actor, &record, action)?;
        lifecycle::plan(&record, action, self.clock.now())?;
        Err(CoreError::Conflict)
    }

    /// Owner delete of a listing nobody has claimed yet.
    pub fn delete(&self, actor: &Party, id: SurplusId) -> Result<(), CoreError> {
        let attempts = if self.settings.retry_on_conflict { 2 } else { 1 };
        for _ in 0..attempts {
            let record = self.read(id)?;
            let expected = lifecycle::check_delete(actor, &record)?;
            match self.store.conditional_delete(id, &expected)? {
                CasOutcome::Applied(()) => {
                    info!(surplus_id = %id, canteen = %actor.id, "surplus deleted");
                    return Ok(());
                }
                CasOutcome::NotFound => return Err(CoreError::NotFound(format!("surplus {id}"))),
                CasOutcome::PredicateFailed => warn!(surplus_id = %id, "lost conditional delete"),
            }
        }
        let record = self.read(id)?;
        lifecycle::check_delete(actor, &record)?;
        Err(CoreError::Conflict)
    }

    /// Open listings that have not yet passed their expiry, soonest first.
    pub fn available(&self) -> Result<Vec<SurplusRecord>, CoreError> {
        let query = SurplusQuery::new()
            .status(SurplusStatus::Available)
            .expires_after(self.clock.now())
            .order(SurplusOrder::ExpiryAsc)
            .limit(self.settings.available_limit);
        Ok(self.store.query_surplus(&query)?)
    }

    /// Canteen: own listings, newest first.  NGO: its claims.  Driver: its
    /// assignments.
    pub fn for_party(&self, party: &Party) -> Result<Vec<SurplusRecord>, CoreError> {
        let order = match party.role {
            Role::Canteen => SurplusOrder::CreatedDesc,
            Role::Ngo | Role::Driver => SurplusOrder::ClaimedDesc,
        };
        let query = SurplusQuery::new().linked_to(party).order(order);
        Ok(self.store.query_surplus(&query)?)
    }

    /// Claimed listings `party` is part of; the input to contact checks.
    pub fn active_for(&self, party: &Party) -> Result<Vec<SurplusRecord>, CoreError> {
        let query = SurplusQuery::new()
            .status(SurplusStatus::Claimed)
            .linked_to(party);
        Ok(self.store.query_surplus(&query)?)
    }

    pub fn needing_drivers(&self) -> Result<Vec<SurplusRecord>, CoreError> {
        let query = SurplusQuery::new()
            .status(SurplusStatus::Claimed)
            .driver(DriverFilter::Unassigned)
            .order(SurplusOrder::ClaimedDesc);
        Ok(self.store.query_surplus(&query)?)
    }

    /// Persist the expiry of every overdue, non-terminal listing.  Records
    /// that change underneath the sweep are left for the next run.
    pub fn sweep_expired(&self) -> Result<usize, CoreError> {
        let now = self.clock.now();
        let overdue = self.store.query_surplus(
            &SurplusQuery::new()
                .status(SurplusStatus::Available)
                .status(SurplusStatus::Claimed)
                .overdue_at(now)
                .order(SurplusOrder::ExpiryAsc),
        )?;

        let mut expired = 0;
        for record in &overdue {
            let transition = match lifecycle::plan(record, &Action::Expire, now) {
                Ok(transition) => transition,
                Err(e) => {
                    warn!(surplus_id = %record.id, error = %e, "cannot expire during sweep");
                    continue;
                }
            };
            match self
                .store
                .conditional_update(record.id, &transition.expected, &transition.patch)
            {
                Ok(CasOutcome::Applied(_)) => {
                    expired += 1;
                    info!(surplus_id = %record.id, from = %transition.from, to = %transition.to, "surplus expired");
                }
                Ok(CasOutcome::PredicateFailed | CasOutcome::NotFound) => {
                    debug!(surplus_id = %record.id, "skipped during sweep");
                }
                Err(e) => {
                    warn!(surplus_id = %record.id, error = %e, "sweep write failed");
                }
            }
        }
        Ok(expired)
    }

    pub fn stats(&self, party: &Party) -> Result<DailyStats, CoreError> {
        let now = self.clock.now();
        let own = self.for_party(party)?;
        Ok(match party.role {
            Role::Canteen => DailyStats::Canteen(stats::canteen_summary(&own, now)),
            Role::Ngo => DailyStats::Ngo(stats::ngo_daily(&self.available()?, &own, now)),
            Role::Driver => DailyStats::Driver(stats::driver_daily(
                &self.needing_drivers()?,
                &own,
                &party.id,
                now,
            )),
        })
    }
}

/// Absent records read as `None`; other store failures propagate.
pub fn read_optional<S: SurplusStore + ?Sized>(
    store: &S,
    id: SurplusId,
) -> Result<Option<SurplusRecord>, CoreError> {
    match store.read_surplus(id) {
        Ok(record) => Ok(Some(record)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use foodbridge_shared::clock::FixedClock;
    use foodbridge_shared::error::GuardViolation;
    use foodbridge_shared::surplus::{Claim, Precondition, SurplusPatch};
    use foodbridge_shared::types::{FoodCategory, UserId};
    use foodbridge_store::Database;

    use super::*;

    const SETTINGS: SurplusSettings = SurplusSettings {
        default_freshness_minutes: 360,
        available_limit: 50,
        retry_on_conflict: true,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn user(id: &str, role: Role) -> UserProfile {
        UserProfile {
            id: UserId::from(id),
            display_name: id.to_uppercase(),
            role,
            created_at: t0(),
        }
    }

    fn rice(window: Option<i64>) -> NewSurplus {
        NewSurplus {
            food_name: "Rice".into(),
            category: FoodCategory::Vegetarian,
            quantity: 20.0,
            unit: "kg".into(),
            pickup_location: "Hall 3".into(),
            image_url: None,
            additional_info: None,
            freshness_minutes: window,
        }
    }

    #[derive(Clone, Copy)]
    enum Rival {
        Idle,
        /// Claims the listing once, between our read and our write.
        ClaimsOnce,
        /// Touches the listing after every read, so the revision always moves.
        TouchesEvery,
    }

    /// Lets a competing writer get in between our read and our write.
    struct RacingStore {
        inner: Database,
        rival: Cell<Rival>,
    }

    impl RacingStore {
        fn new(inner: Database, rival: Rival) -> Self {
            Self {
                inner,
                rival: Cell::new(rival),
            }
        }
    }

    impl SurplusStore for RacingStore {
        fn insert_surplus(&self, record: &SurplusRecord) -> foodbridge_store::Result<()> {
            self.inner.insert_surplus(record)
        }

        fn read_surplus(&self, id: SurplusId) -> foodbridge_store::Result<SurplusRecord> {
            let snapshot = self.inner.read_surplus(id)?;
            let patch = match self.rival.get() {
                Rival::Idle => None,
                Rival::ClaimsOnce => {
                    self.rival.set(Rival::Idle);
                    Some(SurplusPatch {
                        status: Some(SurplusStatus::Claimed),
                        claim: Some(Claim {
                            claimed_by: UserId::from("rival"),
                            claimer_name: "Rival".into(),
                            claimed_at: t0(),
                        }),
                        ..SurplusPatch::touch(t0())
                    })
                }
                Rival::TouchesEvery => Some(SurplusPatch::touch(t0())),
            };
            if let Some(patch) = patch {
                self.inner
                    .conditional_update(id, &Precondition::of(&snapshot), &patch)?;
            }
            Ok(snapshot)
        }

        fn conditional_update(
            &self,
            id: SurplusId,
            expected: &Precondition,
            patch: &SurplusPatch,
        ) -> foodbridge_store::Result<CasOutcome<SurplusRecord>> {
            self.inner.conditional_update(id, expected, patch)
        }

        fn conditional_delete(
            &self,
            id: SurplusId,
            expected: &Precondition,
        ) -> foodbridge_store::Result<CasOutcome<()>> {
            self.inner.conditional_delete(id, expected)
        }

        fn query_surplus(
            &self,
            query: &SurplusQuery,
        ) -> foodbridge_store::Result<Vec<SurplusRecord>> {
            self.inner.query_surplus(query)
        }
    }

    #[test]
    fn only_canteens_list() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let service = SurplusService::new(&db, &clock, SETTINGS);

        let err = service
            .create(&user("n1", Role::Ngo), rice(None))
            .unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));

        let record = service.create(&user("c1", Role::Canteen), rice(None)).unwrap();
        assert_eq!(record.expiry_time, t0() + Duration::minutes(360));
        assert_eq!(record.canteen_name, "C1");
    }

    #[test]
    fn zero_quantity_rejected_before_store() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let service = SurplusService::new(&db, &clock, SETTINGS);
        let mut input = rice(Some(60));
        input.quantity = 0.0;
        let err = service.create(&user("c1", Role::Canteen), input).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(service.for_party(&Party::new("c1", Role::Canteen)).unwrap().is_empty());
    }

    #[test]
    fn full_handoff() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let service = SurplusService::new(&db, &clock, SETTINGS);
        let canteen = user("c1", Role::Canteen);
        let ngo = user("n1", Role::Ngo);
        let driver = user("d1", Role::Driver);

        let record = service.create(&canteen, rice(Some(240))).unwrap();
        clock.advance(Duration::minutes(5));
        let claimed = service.claim(&ngo, record.id).unwrap();
        assert_eq!(claimed.claimed_by(), Some(&ngo.id));
        assert_eq!(service.needing_drivers().unwrap().len(), 1);

        let assigned = service.assign_driver(&driver.party(), record.id).unwrap();
        let code = assigned.delivery_code.clone().unwrap();
        assert!(service.needing_drivers().unwrap().is_empty());

        let err = service
            .verify_delivery(&ngo.party(), record.id, code.as_str())
            .unwrap_err();
        assert_eq!(err, CoreError::Guard(GuardViolation::PickupNotConfirmed));

        // Only the owning canteen confirms pickup.
        let err = service
            .verify_pickup(&ngo.party(), record.id, code.as_str())
            .unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));

        service
            .verify_pickup(&canteen.party(), record.id, &format!(" {} ", code.as_str()))
            .unwrap();
        let done = service
            .verify_delivery(&ngo.party(), record.id, code.as_str())
            .unwrap();
        assert_eq!(done.status, SurplusStatus::Collected);
        assert_eq!(done.revision, 4);

        let err = service.expire(&canteen.party(), record.id).unwrap_err();
        assert_eq!(err, CoreError::Guard(GuardViolation::Terminal));
    }

    #[test]
    fn losing_claimant_sees_already_claimed() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let record = SurplusService::new(&db, &clock, SETTINGS)
            .create(&user("c1", Role::Canteen), rice(Some(60)))
            .unwrap();

        let racing = RacingStore::new(db, Rival::ClaimsOnce);
        let service = SurplusService::new(&racing, &clock, SETTINGS);
        let err = service.claim(&user("n1", Role::Ngo), record.id).unwrap_err();
        assert_eq!(err, CoreError::Guard(GuardViolation::AlreadyClaimed));

        let stored = racing.inner.read_surplus(record.id).unwrap();
        assert_eq!(stored.claimed_by(), Some(&UserId::from("rival")));
    }

    #[test]
    fn lost_race_without_retry_still_reports_guard() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let record = SurplusService::new(&db, &clock, SETTINGS)
            .create(&user("c1", Role::Canteen), rice(Some(60)))
            .unwrap();

        let racing = RacingStore::new(db, Rival::ClaimsOnce);
        let settings = SurplusSettings {
            retry_on_conflict: false,
            ..SETTINGS
        };
        let err = SurplusService::new(&racing, &clock, settings)
            .claim(&user("n1", Role::Ngo), record.id)
            .unwrap_err();
        assert_eq!(err, CoreError::Guard(GuardViolation::AlreadyClaimed));
    }

    #[test]
    fn repeated_lost_writes_report_conflict() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let record = SurplusService::new(&db, &clock, SETTINGS)
            .create(&user("c1", Role::Canteen), rice(Some(60)))
            .unwrap();

        let racing = RacingStore::new(db, Rival::TouchesEvery);
        let err = SurplusService::new(&racing, &clock, SETTINGS)
            .claim(&user("n1", Role::Ngo), record.id)
            .unwrap_err();
        assert_eq!(err, CoreError::Conflict);
        assert_eq!(err.kind(), "conflict");

        // Still available and unclaimed: nothing of ours was written.
        let stored = racing.inner.read_surplus(record.id).unwrap();
        assert_eq!(stored.status, SurplusStatus::Available);
        assert!(stored.claim.is_none());
        assert!(stored.revision > record.revision);
    }

    #[test]
    fn sweep_survives_an_unreadable_row() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let canteen = user("c1", Role::Canteen);
        let (good, bad) = {
            let service = SurplusService::new(&db, &clock, SETTINGS);
            (
                service.create(&canteen, rice(Some(30))).unwrap(),
                service.create(&canteen, rice(Some(30))).unwrap(),
            )
        };
        let bad_id = bad.id.to_string();
        db.conn()
            .execute(
                "UPDATE surplus SET expiry_time = '+10000-01-01T00:00:00.000000Z' WHERE id = ?1",
                &[&bad_id],
            )
            .unwrap();

        clock.advance(Duration::hours(1));
        let service = SurplusService::new(&db, &clock, SETTINGS);
        assert_eq!(service.sweep_expired().unwrap(), 1);
        assert_eq!(service.get(good.id).unwrap().status, SurplusStatus::Expired);

        let own = service.for_party(&canteen.party()).unwrap();
        assert_eq!(own.len(), 1);
    }

    #[test]
    fn overdue_listing_is_hidden_and_unclaimable() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let service = SurplusService::new(&db, &clock, SETTINGS);
        let record = service
            .create(&user("c1", Role::Canteen), rice(Some(30)))
            .unwrap();
        assert_eq!(service.available().unwrap().len(), 1);

        clock.advance(Duration::minutes(30));
        assert!(service.available().unwrap().is_empty());
        let err = service.claim(&user("n1", Role::Ngo), record.id).unwrap_err();
        assert_eq!(err, CoreError::Guard(GuardViolation::Expired));
        // Lazy: nothing persisted yet.
        assert_eq!(service.get(record.id).unwrap().status, SurplusStatus::Available);

        assert_eq!(service.sweep_expired().unwrap(), 1);
        assert_eq!(service.get(record.id).unwrap().status, SurplusStatus::Expired);
        assert_eq!(service.sweep_expired().unwrap(), 0);
    }

    #[test]
    fn delete_only_while_available() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let service = SurplusService::new(&db, &clock, SETTINGS);
        let canteen = user("c1", Role::Canteen);
        let first = service.create(&canteen, rice(None)).unwrap();
        let second = service.create(&canteen, rice(None)).unwrap();

        let err = service
            .delete(&Party::new("c2", Role::Canteen), first.id)
            .unwrap_err();
        assert_eq!(err, CoreError::Authorization(AuthorizationError::NotOwner));

        service.delete(&canteen.party(), first.id).unwrap();
        assert!(matches!(service.get(first.id), Err(CoreError::NotFound(_))));

        service.claim(&user("n1", Role::Ngo), second.id).unwrap();
        let err = service.delete(&canteen.party(), second.id).unwrap_err();
        assert_eq!(err, CoreError::Guard(GuardViolation::NotDeletable));
    }

    #[test]
    fn dashboard_numbers() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let service = SurplusService::new(&db, &clock, SETTINGS);
        let canteen = user("c1", Role::Canteen);
        let ngo = user("n1", Role::Ngo);
        let a = service.create(&canteen, rice(None)).unwrap();
        service.create(&canteen, rice(None)).unwrap();
        service.claim(&ngo, a.id).unwrap();

        match service.stats(&ngo.party()).unwrap() {
            DailyStats::Ngo(s) => {
                assert_eq!(s.available_surplus, 1);
                assert_eq!(s.claimed_today, 1);
                assert_eq!(s.people_fed, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        match service.stats(&canteen.party()).unwrap() {
            DailyStats::Canteen(s) => {
                assert_eq!(s.listed_today, 2);
                assert_eq!(s.claimed, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        let json = serde_json::to_value(service.stats(&Party::new("d1", Role::Driver)).unwrap()).unwrap();
        assert_eq!(json["role"], "driver");
        assert_eq!(json["availableDeliveries"], 1);
    }
}
