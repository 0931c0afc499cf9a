//! Contact authorization: who may message whom.
//!
//! Two parties may talk only while some `claimed` listing links them:
//!
//! | pair | linking fields |
//! |---|---|
//! | canteen ↔ ngo | `canteenId`, `claimedBy` |
//! | canteen ↔ driver | `canteenId`, `assignedDriverId` |
//! | ngo ↔ driver | `claimedBy`, `assignedDriverId` |
//!
//! Same-role pairs are never authorized, and available or terminal listings
//! never link anyone.  The result depends only on the records passed in, so
//! callers must supply a fresh read on every send.

use crate::surplus::SurplusRecord;
use crate::types::{Party, Role, SurplusStatus};

pub fn is_authorized(a: &Party, b: &Party, records: &[SurplusRecord]) -> bool {
    linking_record(a, b, records).is_some()
}

/// The first active listing that links `a` and `b`, if any.
pub fn linking_record<'r>(
    a: &Party,
    b: &Party,
    records: &'r [SurplusRecord],
) -> Option<&'r SurplusRecord> {
    if a.role == b.role || a.id == b.id {
        return None;
    }
    records
        .iter()
        .filter(|r| r.status == SurplusStatus::Claimed)
        .find(|r| links(r, a) && links(r, b))
}

/// Whether `party` occupies its role's slot on `record`.
fn links(record: &SurplusRecord, party: &Party) -> bool {
    match party.role {
        Role::Canteen => record.canteen_id == party.id,
        Role::Ngo => record.claimed_by() == Some(&party.id),
        Role::Driver => record.assigned_driver_id.as_ref() == Some(&party.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surplus::fixtures::{available, t0};
    use crate::surplus::Claim;
    use crate::types::UserId;

    fn claimed(canteen: &str, ngo: &str, driver: Option<&str>) -> SurplusRecord {
        let mut r = available(canteen);
        r.status = SurplusStatus::Claimed;
        r.claim = Some(Claim {
            claimed_by: UserId::from(ngo),
            claimer_name: ngo.to_uppercase(),
            claimed_at: t0(),
        });
        r.assigned_driver_id = driver.map(UserId::from);
        r
    }

    fn parties() -> Vec<Party> {
        vec![
            Party::new("c1", Role::Canteen),
            Party::new("c2", Role::Canteen),
            Party::new("n1", Role::Ngo),
            Party::new("n2", Role::Ngo),
            Party::new("d1", Role::Driver),
            Party::new("d2", Role::Driver),
        ]
    }

    #[test]
    fn pairs_linked_by_an_active_record() {
        let records = vec![claimed("c1", "n1", Some("d1"))];
        let c1 = Party::new("c1", Role::Canteen);
        let n1 = Party::new("n1", Role::Ngo);
        let d1 = Party::new("d1", Role::Driver);

        assert!(is_authorized(&c1, &n1, &records));
        assert!(is_authorized(&c1, &d1, &records));
        assert!(is_authorized(&n1, &d1, &records));

        assert!(!is_authorized(&c1, &Party::new("n2", Role::Ngo), &records));
        assert!(!is_authorized(&Party::new("c2", Role::Canteen), &d1, &records));
    }

    #[test]
    fn driver_links_only_once_assigned() {
        let records = vec![claimed("c1", "n1", None)];
        let d1 = Party::new("d1", Role::Driver);
        assert!(!is_authorized(&Party::new("c1", Role::Canteen), &d1, &records));
        assert!(!is_authorized(&Party::new("n1", Role::Ngo), &d1, &records));
    }

    #[test]
    fn same_role_never_authorized() {
        let records = vec![claimed("c1", "n1", Some("d1")), claimed("c2", "n1", Some("d1"))];
        assert!(!is_authorized(
            &Party::new("c1", Role::Canteen),
            &Party::new("c2", Role::Canteen),
            &records
        ));
        assert!(!is_authorized(
            &Party::new("d1", Role::Driver),
            &Party::new("d1", Role::Driver),
            &records
        ));
    }

    #[test]
    fn available_and_terminal_records_never_authorize() {
        for status in [
            SurplusStatus::Available,
            SurplusStatus::Collected,
            SurplusStatus::Expired,
        ] {
            let mut r = claimed("c1", "n1", Some("d1"));
            r.status = status;
            let records = vec![r];
            assert!(!is_authorized(
                &Party::new("c1", Role::Canteen),
                &Party::new("n1", Role::Ngo),
                &records
            ));
        }
    }

    #[test]
    fn authorization_is_symmetric() {
        let records = vec![
            claimed("c1", "n1", Some("d1")),
            claimed("c2", "n2", None),
            claimed("c1", "n2", Some("d2")),
        ];
        let all = parties();
        for a in &all {
            for b in &all {
                assert_eq!(
                    is_authorized(a, b, &records),
                    is_authorized(b, a, &records),
                    "{a:?} / {b:?}"
                );
            }
        }
    }

    #[test]
    fn linking_record_finds_the_delivery() {
        let first = claimed("c1", "n1", Some("d1"));
        let id = first.id;
        let records = vec![claimed("c2", "n2", Some("d2")), first];
        let found = linking_record(
            &Party::new("d1", Role::Driver),
            &Party::new("n1", Role::Ngo),
            &records,
        )
        .unwrap();
        assert_eq!(found.id, id);
    }
}
