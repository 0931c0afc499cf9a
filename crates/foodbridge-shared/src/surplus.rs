//! The surplus record: one listing of donated food and its lifecycle fields.
//!
//! On the wire a record is a flat camelCase document whose field names match
//! the data already held by the document store.  [`SurplusDocument`] is that
//! flat shape; [`SurplusRecord`] is the validated in-memory form in which the
//! claimant fields can only be set together.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::code::DeliveryCode;
use crate::constants::MAX_FRESHNESS_MINUTES;
use crate::error::ValidationError;
use crate::types::{FoodCategory, SurplusId, SurplusStatus, UserId};

/// The recipient that reserved a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub claimed_by: UserId,
    pub claimer_name: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SurplusDocument", into = "SurplusDocument")]
pub struct SurplusRecord {
    pub id: SurplusId,
    pub canteen_id: UserId,
    pub canteen_name: String,
    pub food_name: String,
    pub category: FoodCategory,
    pub quantity: f64,
    pub unit: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Perishability deadline, fixed at creation.
    pub expiry_time: DateTime<Utc>,
    pub pickup_location: String,
    pub image_url: Option<String>,
    pub additional_info: Option<String>,
    pub status: SurplusStatus,
    pub claim: Option<Claim>,
    pub assigned_driver_id: Option<UserId>,
    pub delivery_code: Option<DeliveryCode>,
    pub driver_pickup_verified_at: Option<DateTime<Utc>>,
    pub recipient_delivery_verified_at: Option<DateTime<Utc>>,
    /// Compare-and-set token maintained by the store.
    pub revision: u64,
}

impl SurplusRecord {
    pub fn claimed_by(&self) -> Option<&UserId> {
        self.claim.as_ref().map(|c| &c.claimed_by)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `true` once the perishability deadline has been reached.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_time
    }

    /// Status as seen by readers: overdue non-terminal records read as
    /// expired even if the transition has not been persisted yet.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SurplusStatus {
        if !self.is_terminal() && self.is_past_expiry(now) {
            SurplusStatus::Expired
        } else {
            self.status
        }
    }

    /// Copy suitable for `viewer`: the delivery code is only disclosed to the
    /// assigned driver, who presents it at pickup and delivery.
    pub fn redacted_for(&self, viewer: &UserId) -> SurplusRecord {
        let mut copy = self.clone();
        if self.assigned_driver_id.as_ref() != Some(viewer) {
            copy.delivery_code = None;
        }
        copy
    }
}

// ---------------------------------------------------------------------------
// Wire document
// ---------------------------------------------------------------------------

/// Flat document form of a [`SurplusRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurplusDocument {
    pub id: SurplusId,
    pub canteen_id: UserId,
    pub canteen_name: String,
    pub food_name: String,
    pub category: FoodCategory,
    pub quantity: f64,
    pub unit: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub pickup_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
    pub status: SurplusStatus,
    #[serde(default)]
    pub claimed_by: Option<UserId>,
    #[serde(default)]
    pub claimer_name: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_driver_id: Option<UserId>,
    #[serde(default)]
    pub delivery_code: Option<DeliveryCode>,
    #[serde(default)]
    pub driver_pickup_verified_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "ngoDeliveryVerifiedAt",
        alias = "recipientDeliveryVerifiedAt"
    )]
    pub recipient_delivery_verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: u64,
}

impl TryFrom<SurplusDocument> for SurplusRecord {
    type Error = ValidationError;

    fn try_from(doc: SurplusDocument) -> Result<Self, Self::Error> {
        let claim = match (doc.claimed_by, doc.claimer_name, doc.claimed_at) {
            (Some(claimed_by), Some(claimer_name), Some(claimed_at)) => Some(Claim {
                claimed_by,
                claimer_name,
                claimed_at,
            }),
            (None, None, None) => None,
            _ => {
                return Err(ValidationError::InconsistentRecord(
                    "claimant fields must be set together",
                ))
            }
        };

        if doc.status == SurplusStatus::Available && claim.is_some() {
            return Err(ValidationError::InconsistentRecord(
                "available record carries a claim",
            ));
        }
        if doc.status == SurplusStatus::Claimed && claim.is_none() {
            return Err(ValidationError::InconsistentRecord(
                "claimed record has no claimant",
            ));
        }
        if doc.assigned_driver_id.is_some() && claim.is_none() {
            return Err(ValidationError::InconsistentRecord(
                "driver assigned to an unclaimed record",
            ));
        }
        if doc.driver_pickup_verified_at.is_some() && doc.assigned_driver_id.is_none() {
            return Err(ValidationError::InconsistentRecord(
                "pickup verified without a driver",
            ));
        }
        if doc.recipient_delivery_verified_at.is_some() && doc.driver_pickup_verified_at.is_none()
        {
            return Err(ValidationError::InconsistentRecord(
                "delivery verified before pickup",
            ));
        }

        Ok(SurplusRecord {
            id: doc.id,
            canteen_id: doc.canteen_id,
            canteen_name: doc.canteen_name,
            food_name: doc.food_name,
            category: doc.category,
            quantity: doc.quantity,
            unit: doc.unit,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            expiry_time: doc.expiry_time,
            pickup_location: doc.pickup_location,
            image_url: doc.image_url,
            additional_info: doc.additional_info,
            status: doc.status,
            claim,
            assigned_driver_id: doc.assigned_driver_id,
            delivery_code: doc.delivery_code,
            driver_pickup_verified_at: doc.driver_pickup_verified_at,
            recipient_delivery_verified_at: doc.recipient_delivery_verified_at,
            revision: doc.revision,
        })
    }
}

impl From<SurplusRecord> for SurplusDocument {
    fn from(r: SurplusRecord) -> Self {
        let (claimed_by, claimer_name, claimed_at) = match r.claim {
            Some(c) => (Some(c.claimed_by), Some(c.claimer_name), Some(c.claimed_at)),
            None => (None, None, None),
        };
        SurplusDocument {
            id: r.id,
            canteen_id: r.canteen_id,
            canteen_name: r.canteen_name,
            food_name: r.food_name,
            category: r.category,
            quantity: r.quantity,
            unit: r.unit,
            created_at: r.created_at,
            updated_at: r.updated_at,
            expiry_time: r.expiry_time,
            pickup_location: r.pickup_location,
            image_url: r.image_url,
            additional_info: r.additional_info,
            status: r.status,
            claimed_by,
            claimer_name,
            claimed_at,
            assigned_driver_id: r.assigned_driver_id,
            delivery_code: r.delivery_code,
            driver_pickup_verified_at: r.driver_pickup_verified_at,
            recipient_delivery_verified_at: r.recipient_delivery_verified_at,
            revision: r.revision,
        }
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Listing details submitted by a canteen.
///
/// `freshness_minutes` is the window returned by the spoilage predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSurplus {
    pub food_name: String,
    pub category: FoodCategory,
    pub quantity: f64,
    pub unit: String,
    pub pickup_location: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub additional_info: Option<String>,
    #[serde(default)]
    pub freshness_minutes: Option<i64>,
}

impl NewSurplus {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.food_name.trim().is_empty() {
            return Err(ValidationError::EmptyField("foodName"));
        }
        if self.unit.trim().is_empty() {
            return Err(ValidationError::EmptyField("unit"));
        }
        if self.pickup_location.trim().is_empty() {
            return Err(ValidationError::EmptyField("pickupLocation"));
        }
        // NaN fails this comparison as well.
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(ValidationError::NonPositiveQuantity);
        }
        if let Some(minutes) = self.freshness_minutes {
            check_freshness(minutes)?;
        }
        Ok(())
    }

    /// Build the initial `available` record.  The expiry is derived once from
    /// the freshness window and never extended afterwards.
    pub fn into_record(
        self,
        canteen_id: UserId,
        canteen_name: String,
        now: DateTime<Utc>,
        default_freshness_minutes: i64,
    ) -> Result<SurplusRecord, ValidationError> {
        self.validate()?;
        let window = self.freshness_minutes.unwrap_or(default_freshness_minutes);
        check_freshness(window)?;
        let expiry_time = Duration::try_minutes(window)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(ValidationError::FreshnessTooLong {
                max: MAX_FRESHNESS_MINUTES,
            })?;

        Ok(SurplusRecord {
            id: SurplusId::new(),
            canteen_id,
            canteen_name,
            food_name: self.food_name.trim().to_string(),
            category: self.category,
            quantity: self.quantity,
            unit: self.unit.trim().to_string(),
            created_at: now,
            updated_at: now,
            expiry_time,
            pickup_location: self.pickup_location.trim().to_string(),
            image_url: self.image_url.filter(|s| !s.trim().is_empty()),
            additional_info: self.additional_info.filter(|s| !s.trim().is_empty()),
            status: SurplusStatus::Available,
            claim: None,
            assigned_driver_id: None,
            delivery_code: None,
            driver_pickup_verified_at: None,
            recipient_delivery_verified_at: None,
            revision: 0,
        })
    }
}

fn check_freshness(minutes: i64) -> Result<(), ValidationError> {
    if minutes <= 0 {
        return Err(ValidationError::NonPositiveFreshness);
    }
    if minutes > MAX_FRESHNESS_MINUTES {
        return Err(ValidationError::FreshnessTooLong {
            max: MAX_FRESHNESS_MINUTES,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Conditional update primitives
// ---------------------------------------------------------------------------

/// The state a conditional write expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub status: SurplusStatus,
    pub revision: u64,
}

impl Precondition {
    pub fn of(record: &SurplusRecord) -> Self {
        Self {
            status: record.status,
            revision: record.revision,
        }
    }

    pub fn holds_for(&self, record: &SurplusRecord) -> bool {
        record.status == self.status && record.revision == self.revision
    }
}

/// Fields written by one transition.  Lifecycle fields only ever go from
/// null to set, so a patch never clears anything.
#[derive(Debug, Clone, PartialEq)]
pub struct SurplusPatch {
    pub status: Option<SurplusStatus>,
    pub claim: Option<Claim>,
    pub assigned_driver_id: Option<UserId>,
    pub delivery_code: Option<DeliveryCode>,
    pub driver_pickup_verified_at: Option<DateTime<Utc>>,
    pub recipient_delivery_verified_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SurplusPatch {
    /// A patch that only bumps `updated_at`.
    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            status: None,
            claim: None,
            assigned_driver_id: None,
            delivery_code: None,
            driver_pickup_verified_at: None,
            recipient_delivery_verified_at: None,
            updated_at: now,
        }
    }

    /// Apply to an in-memory copy, advancing the revision like the store does.
    pub fn apply_to(&self, record: &mut SurplusRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref claim) = self.claim {
            record.claim = Some(claim.clone());
        }
        if let Some(ref driver) = self.assigned_driver_id {
            record.assigned_driver_id = Some(driver.clone());
        }
        if let Some(ref code) = self.delivery_code {
            record.delivery_code = Some(code.clone());
        }
        if let Some(at) = self.driver_pickup_verified_at {
            record.driver_pickup_verified_at = Some(at);
        }
        if let Some(at) = self.recipient_delivery_verified_at {
            record.recipient_delivery_verified_at = Some(at);
        }
        record.updated_at = self.updated_at;
        record.revision += 1;
    }
}
