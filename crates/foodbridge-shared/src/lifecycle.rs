//! Surplus lifecycle state machine.
//!
//! ```text
//!   available ──claim──▶ claimed ──verify_delivery──▶ collected
//!       │                 │  ▲
//!       │                 │  └─ assign_driver, verify_pickup (stay claimed)
//!       └────expire───────┴──────────▶ expired
//! ```
//!
//! [`plan`] is pure: given a snapshot and an action it either rejects with a
//! specific reason or returns the [`Transition`] to write, together with the
//! [`Precondition`] the write must be conditioned on.  Callers must plan
//! against a snapshot read immediately before the conditional write and
//! never against state supplied by a client.

use chrono::{DateTime, Utc};

use crate::code::DeliveryCode;
use crate::error::{AuthorizationError, CoreError, GuardViolation, LifecycleError, ValidationError};
use crate::surplus::{Claim, Precondition, SurplusPatch, SurplusRecord};
use crate::types::{Party, Role, SurplusId, SurplusStatus, UserId};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Claim {
        recipient_id: UserId,
        recipient_name: String,
    },
    /// The code is drawn by the caller so that planning stays deterministic.
    AssignDriver {
        driver_id: UserId,
        code: DeliveryCode,
    },
    VerifyPickup {
        code: String,
    },
    VerifyDelivery {
        code: String,
    },
    Expire,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Claim { .. } => "claim",
            Action::AssignDriver { .. } => "assign a driver to",
            Action::VerifyPickup { .. } => "verify pickup of",
            Action::VerifyDelivery { .. } => "verify delivery of",
            Action::Expire => "expire",
        }
    }

    /// Input checks that need no record state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Action::Claim {
                recipient_id,
                recipient_name,
            } => {
                if recipient_id.as_str().trim().is_empty() {
                    return Err(ValidationError::EmptyField("recipient id"));
                }
                if recipient_name.trim().is_empty() {
                    return Err(ValidationError::EmptyField("recipient name"));
                }
            }
            Action::AssignDriver { driver_id, .. } => {
                if driver_id.as_str().trim().is_empty() {
                    return Err(ValidationError::EmptyField("driver id"));
                }
            }
            Action::VerifyPickup { code } | Action::VerifyDelivery { code } => {
                if code.trim().is_empty() {
                    return Err(ValidationError::EmptyCode);
                }
            }
            Action::Expire => {}
        }
        Ok(())
    }
}

/// A validated state change, ready for a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub surplus_id: SurplusId,
    pub from: SurplusStatus,
    pub to: SurplusStatus,
    pub expected: Precondition,
    pub patch: SurplusPatch,
}

impl Transition {
    /// The record as it will look once the write succeeds.
    pub fn preview(&self, record: &SurplusRecord) -> SurplusRecord {
        let mut next = record.clone();
        self.patch.apply_to(&mut next);
        next
    }
}

/// Evaluate `action` against `record` at time `now`.
pub fn plan(
    record: &SurplusRecord,
    action: &Action,
    now: DateTime<Utc>,
) -> Result<Transition, LifecycleError> {
    action.validate()?;

    // Terminal records reject everything before any other check.
    if record.is_terminal() {
        return Err(GuardViolation::Terminal.into());
    }

    let mut patch = SurplusPatch::touch(now);

    let to = match action {
        Action::Claim {
            recipient_id,
            recipient_name,
        } => {
            if record.status != SurplusStatus::Available {
                return Err(GuardViolation::AlreadyClaimed.into());
            }
            if record.is_past_expiry(now) {
                return Err(GuardViolation::Expired.into());
            }
            patch.status = Some(SurplusStatus::Claimed);
            patch.claim = Some(Claim {
                claimed_by: recipient_id.clone(),
                claimer_name: recipient_name.trim().to_string(),
                claimed_at: now,
            });
            SurplusStatus::Claimed
        }

        Action::AssignDriver { driver_id, code } => {
            if record.status != SurplusStatus::Claimed {
                return Err(GuardViolation::NotClaimed.into());
            }
            if record.assigned_driver_id.is_some() {
                return Err(GuardViolation::DriverAlreadyAssigned.into());
            }
            patch.assigned_driver_id = Some(driver_id.clone());
            patch.delivery_code = Some(code.clone());
            SurplusStatus::Claimed
        }

        Action::VerifyPickup { code } => {
            let stored = ready_code(record)?;
            if record.driver_pickup_verified_at.is_some() {
                return Err(GuardViolation::PickupAlreadyConfirmed.into());
            }
            if !stored.matches(code) {
                return Err(GuardViolation::IncorrectCode.into());
            }
            patch.driver_pickup_verified_at = Some(now);
            SurplusStatus::Claimed
        }

        Action::VerifyDelivery { code } => {
            let stored = ready_code(record)?;
            // Checked before the code so a correct code cannot skip pickup.
            if record.driver_pickup_verified_at.is_none() {
                return Err(GuardViolation::PickupNotConfirmed.into());
            }
            if !stored.matches(code) {
                return Err(GuardViolation::IncorrectCode.into());
            }
            patch.recipient_delivery_verified_at = Some(now);
            patch.status = Some(SurplusStatus::Collected);
            SurplusStatus::Collected
        }

        Action::Expire => {
            if !record.is_past_expiry(now) {
                return Err(GuardViolation::NotYetExpired.into());
            }
            patch.status = Some(SurplusStatus::Expired);
            SurplusStatus::Expired
        }
    };

    Ok(Transition {
        surplus_id: record.id,
        from: record.status,
        to,
        expected: Precondition::of(record),
        patch,
    })
}

/// The stored code, provided a driver has been assigned to a claimed record.
fn ready_code(record: &SurplusRecord) -> Result<&DeliveryCode, GuardViolation> {
    if record.status != SurplusStatus::Claimed || record.assigned_driver_id.is_none() {
        return Err(GuardViolation::NotReady);
    }
    record.delivery_code.as_ref().ok_or(GuardViolation::NotReady)
}

/// Who may perform which action.
///
/// - claim: an NGO, on its own behalf
/// - assign driver: a driver, assigning itself
/// - verify pickup: the owning canteen
/// - verify delivery: the claiming NGO
/// - expire: anyone, the time guard decides
pub fn permit(actor: &Party, record: &SurplusRecord, action: &Action) -> Result<(), AuthorizationError> {
    let allowed = match action {
        Action::Claim { recipient_id, .. } => {
            actor.role == Role::Ngo && &actor.id == recipient_id
        }
        Action::AssignDriver { driver_id, .. } => {
            actor.role == Role::Driver && &actor.id == driver_id
        }
        Action::VerifyPickup { .. } => {
            actor.role == Role::Canteen && actor.id == record.canteen_id
        }
        Action::VerifyDelivery { .. } => {
            actor.role == Role::Ngo && record.claimed_by() == Some(&actor.id)
        }
        Action::Expire => true,
    };

    if allowed {
        Ok(())
    } else {
        Err(AuthorizationError::ActionNotPermitted {
            role: actor.role,
            action: action.name(),
        })
    }
}

/// Deletion is reserved to the owning canteen while the listing is still
/// available.  Returns the precondition for the conditional delete.
pub fn check_delete(actor: &Party, record: &SurplusRecord) -> Result<Precondition, CoreError> {
    if actor.role != Role::Canteen || actor.id != record.canteen_id {
        return Err(AuthorizationError::NotOwner.into());
    }
    if record.status != SurplusStatus::Available {
        return Err(GuardViolation::NotDeletable.into());
    }
    Ok(Precondition::of(record))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::surplus::fixtures::{available, t0};

    fn code(s: &str) -> DeliveryCode {
        DeliveryCode::parse(s).unwrap()
    }

    fn claim(by: &str) -> Action {
        Action::Claim {
            recipient_id: UserId::from(by),
            recipient_name: format!("{by} org"),
        }
    }

    fn assign(driver: &str, c: &str) -> Action {
        Action::AssignDriver {
            driver_id: UserId::from(driver),
            code: code(c),
        }
    }

    fn pickup(c: &str) -> Action {
        Action::VerifyPickup { code: c.into() }
    }

    fn delivery(c: &str) -> Action {
        Action::VerifyDelivery { code: c.into() }
    }

    fn step(record: &SurplusRecord, action: &Action, now: DateTime<Utc>) -> SurplusRecord {
        plan(record, action, now).unwrap().preview(record)
    }

    /// A record in `status` with every prerequisite for the next step met.
    fn record_in(status: SurplusStatus) -> SurplusRecord {
        let r = available("c1");
        match status {
            SurplusStatus::Available => r,
            SurplusStatus::Claimed => {
                let r = step(&r, &claim("n1"), t0());
                step(&r, &assign("d1", "4821"), t0())
            }
            SurplusStatus::Collected => {
                let r = record_in(SurplusStatus::Claimed);
                let r = step(&r, &pickup("4821"), t0());
                step(&r, &delivery("4821"), t0())
            }
            SurplusStatus::Expired => step(&r, &Action::Expire, r.expiry_time),
        }
    }

    #[test]
    fn exhaustive_status_action_matrix() {
        use GuardViolation::*;
        use SurplusStatus::*;
        use SurplusStatus::Expired;

        let late = available("c1").expiry_time + Duration::minutes(1);
        let actions = [
            claim("n2"),
            assign("d2", "1111"),
            pickup("4821"),
            delivery("4821"),
            Action::Expire,
        ];

        // Expected outcome per (status, action) at a time past expiry for
        // `Expire` and before expiry for everything else.
        let expected: [(SurplusStatus, [Result<SurplusStatus, GuardViolation>; 5]); 4] = [
            (
                Available,
                [Ok(Claimed), Err(NotClaimed), Err(NotReady), Err(NotReady), Ok(Expired)],
            ),
            (
                Claimed,
                [
                    Err(AlreadyClaimed),
                    Err(DriverAlreadyAssigned),
                    Ok(Claimed),
                    Err(PickupNotConfirmed),
                    Ok(Expired),
                ],
            ),
            (Collected, [Err(Terminal); 5]),
            (Expired, [Err(Terminal); 5]),
        ];

        for (status, outcomes) in expected {
            let record = record_in(status);
            assert_eq!(record.status, status);
            for (action, want) in actions.iter().zip(outcomes) {
                let now = if matches!(action, Action::Expire) { late } else { t0() };
                let got = plan(&record, action, now)
                    .map(|t| t.to)
                    .map_err(|e| match e {
                        LifecycleError::Guard(g) => g,
                        other => panic!("unexpected {other:?}"),
                    });
                assert_eq!(got, want, "{status} / {}", action.name());
            }
        }
    }

    #[test]
    fn claim_sets_claimant_fields_together() {
        let record = available("c1");
        let t = plan(&record, &claim("n1"), t0()).unwrap();
        assert_eq!(t.from, SurplusStatus::Available);
        assert_eq!(t.expected, Precondition { status: SurplusStatus::Available, revision: 0 });
        let next = t.preview(&record);
        let c = next.claim.unwrap();
        assert_eq!(c.claimed_by, UserId::from("n1"));
        assert_eq!(c.claimer_name, "n1 org");
        assert_eq!(c.claimed_at, t0());
        assert_eq!(next.revision, 1);
    }

    #[test]
    fn claiming_an_overdue_listing_reports_expired() {
        let record = available("c1");
        let err = plan(&record, &claim("n1"), record.expiry_time).unwrap_err();
        assert_eq!(err, GuardViolation::Expired.into());
    }

    #[test]
    fn expire_requires_deadline() {
        let record = available("c1");
        let early = record.expiry_time - Duration::seconds(1);
        assert_eq!(
            plan(&record, &Action::Expire, early).unwrap_err(),
            GuardViolation::NotYetExpired.into()
        );
        assert!(plan(&record, &Action::Expire, record.expiry_time).is_ok());
    }

    #[test]
    fn claimed_without_driver_is_not_ready() {
        let record = step(&available("c1"), &claim("n1"), t0());
        assert_eq!(
            plan(&record, &pickup("4821"), t0()).unwrap_err(),
            GuardViolation::NotReady.into()
        );
        assert_eq!(
            plan(&record, &delivery("4821"), t0()).unwrap_err(),
            GuardViolation::NotReady.into()
        );
    }

    #[test]
    fn code_comparison_is_exact() {
        let record = step(&available("c1"), &claim("n1"), t0());
        let record = step(&record, &assign("d1", "0099"), t0());
        assert_eq!(
            plan(&record, &pickup("99"), t0()).unwrap_err(),
            GuardViolation::IncorrectCode.into()
        );
        assert!(plan(&record, &pickup("0099"), t0()).is_ok());
    }

    #[test]
    fn delivery_before_pickup_fails_regardless_of_code() {
        let record = record_in(SurplusStatus::Claimed);
        for c in ["4821", "0000", "9999"] {
            assert_eq!(
                plan(&record, &delivery(c), t0()).unwrap_err(),
                GuardViolation::PickupNotConfirmed.into()
            );
        }
    }

    #[test]
    fn pickup_cannot_be_verified_twice() {
        let record = step(&record_in(SurplusStatus::Claimed), &pickup("4821"), t0());
        assert_eq!(
            plan(&record, &pickup("4821"), t0()).unwrap_err(),
            GuardViolation::PickupAlreadyConfirmed.into()
        );
    }

    #[test]
    fn empty_code_is_a_validation_error() {
        let record = record_in(SurplusStatus::Claimed);
        assert_eq!(
            plan(&record, &pickup("   "), t0()).unwrap_err(),
            ValidationError::EmptyCode.into()
        );
    }

    #[test]
    fn full_round_trip_orders_timestamps() {
        let start = t0();
        let r = step(&available("c1"), &claim("n1"), start);
        let r = step(&r, &assign("d1", "4821"), start + Duration::minutes(5));
        let r = step(&r, &pickup("4821"), start + Duration::minutes(30));
        let r = step(&r, &delivery("4821"), start + Duration::minutes(55));

        assert_eq!(r.status, SurplusStatus::Collected);
        assert_eq!(r.quantity, 12.5);
        let picked = r.driver_pickup_verified_at.unwrap();
        let delivered = r.recipient_delivery_verified_at.unwrap();
        assert!(picked <= delivered);
        assert_eq!(r.revision, 4);
    }

    #[test]
    fn wrong_delivery_code_leaves_record_unchanged() {
        let r = step(&record_in(SurplusStatus::Claimed), &pickup("4821"), t0());
        assert_eq!(
            plan(&r, &delivery("9999"), t0()).unwrap_err(),
            GuardViolation::IncorrectCode.into()
        );
        assert!(r.recipient_delivery_verified_at.is_none());
        let done = step(&r, &delivery("4821"), t0());
        assert_eq!(done.status, SurplusStatus::Collected);
    }

    #[test]
    fn permissions_follow_roles() {
        let record = record_in(SurplusStatus::Claimed);
        let canteen = Party::new("c1", Role::Canteen);
        let other_canteen = Party::new("c2", Role::Canteen);
        let ngo = Party::new("n1", Role::Ngo);
        let driver = Party::new("d9", Role::Driver);

        assert!(permit(&canteen, &record, &pickup("4821")).is_ok());
        assert!(permit(&other_canteen, &record, &pickup("4821")).is_err());
        assert!(permit(&ngo, &record, &delivery("4821")).is_ok());
        assert!(permit(&Party::new("n2", Role::Ngo), &record, &delivery("4821")).is_err());
        assert!(permit(&driver, &record, &assign("d9", "1234")).is_ok());
        assert!(permit(&driver, &record, &assign("d1", "1234")).is_err());
        assert!(permit(&canteen, &record, &claim("c1")).is_err());
        assert!(permit(&driver, &record, &Action::Expire).is_ok());
    }

    #[test]
    fn delete_only_by_owner_while_available() {
        let owner = Party::new("c1", Role::Canteen);
        assert!(check_delete(&owner, &available("c1")).is_ok());
        assert_eq!(
            check_delete(&Party::new("c2", Role::Canteen), &available("c1")).unwrap_err(),
            AuthorizationError::NotOwner.into()
        );
        assert_eq!(
            check_delete(&owner, &record_in(SurplusStatus::Claimed)).unwrap_err(),
            GuardViolation::NotDeletable.into()
        );
    }
}
