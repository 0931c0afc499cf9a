//! Surplus listings: inserts, filtered reads and the conditional update
//! primitive every lifecycle transition goes through.

use chrono::{DateTime, Utc};
use foodbridge_shared::code::DeliveryCode;
use foodbridge_shared::surplus::{Precondition, SurplusDocument, SurplusPatch, SurplusRecord};
use foodbridge_shared::types::{FoodCategory, Party, Role, SurplusId, SurplusStatus, UserId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Transaction, TransactionBehavior};

use crate::database::{conversion, parse_opt_ts, parse_ts, parse_uuid, ts, Database};
use crate::error::{not_found, Result};
use crate::repository::{CasOutcome, SurplusStore};

const COLUMNS: &str = "id, canteen_id, canteen_name, food_name, category, quantity, unit,
    created_at, updated_at, expiry_time, pickup_location, image_url, additional_info,
    status, claimed_by, claimer_name, claimed_at, assigned_driver_id, delivery_code,
    driver_pickup_verified_at, recipient_delivery_verified_at, revision";

// ---------------------------------------------------------------------------
// Query description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverFilter {
    Is(UserId),
    Unassigned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SurplusOrder {
    #[default]
    CreatedDesc,
    ExpiryAsc,
    ClaimedDesc,
}

impl SurplusOrder {
    fn sql(self) -> &'static str {
        match self {
            SurplusOrder::CreatedDesc => "created_at DESC, id",
            SurplusOrder::ExpiryAsc => "expiry_time ASC, id",
            SurplusOrder::ClaimedDesc => "claimed_at DESC, id",
        }
    }
}

/// Conjunction of filters over the `surplus` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurplusQuery {
    pub statuses: Vec<SurplusStatus>,
    pub canteen_id: Option<UserId>,
    pub claimed_by: Option<UserId>,
    pub driver: Option<DriverFilter>,
    /// `expiry_time > t`
    pub expires_after: Option<DateTime<Utc>>,
    /// `expiry_time <= t`
    pub overdue_at: Option<DateTime<Utc>>,
    pub order: SurplusOrder,
    pub limit: Option<u32>,
}

impl SurplusQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `status` to the accepted set; repeated calls widen the filter.
    pub fn status(mut self, status: SurplusStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn canteen(mut self, id: UserId) -> Self {
        self.canteen_id = Some(id);
        self
    }

    pub fn claimed_by(mut self, id: UserId) -> Self {
        self.claimed_by = Some(id);
        self
    }

    pub fn driver(mut self, filter: DriverFilter) -> Self {
        self.driver = Some(filter);
        self
    }

    /// Records where `party` occupies its role's slot.
    pub fn linked_to(self, party: &Party) -> Self {
        match party.role {
            Role::Canteen => self.canteen(party.id.clone()),
            Role::Ngo => self.claimed_by(party.id.clone()),
            Role::Driver => self.driver(DriverFilter::Is(party.id.clone())),
        }
    }

    pub fn expires_after(mut self, t: DateTime<Utc>) -> Self {
        self.expires_after = Some(t);
        self
    }

    pub fn overdue_at(mut self, t: DateTime<Utc>) -> Self {
        self.overdue_at = Some(t);
        self
    }

    pub fn order(mut self, order: SurplusOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !self.statuses.is_empty() {
            let marks = vec!["?"; self.statuses.len()].join(", ");
            clauses.push(format!("status IN ({marks})"));
            values.extend(
                self.statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }
        if let Some(ref id) = self.canteen_id {
            clauses.push("canteen_id = ?".into());
            values.push(Value::Text(id.to_string()));
        }
        if let Some(ref id) = self.claimed_by {
            clauses.push("claimed_by = ?".into());
            values.push(Value::Text(id.to_string()));
        }
        match self.driver {
            Some(DriverFilter::Is(ref id)) => {
                clauses.push("assigned_driver_id = ?".into());
                values.push(Value::Text(id.to_string()));
            }
            Some(DriverFilter::Unassigned) => clauses.push("assigned_driver_id IS NULL".into()),
            None => {}
        }
        if let Some(t) = self.expires_after {
            clauses.push("expiry_time > ?".into());
            values.push(Value::Text(ts(&t)));
        }
        if let Some(t) = self.overdue_at {
            clauses.push("expiry_time <= ?".into());
            values.push(Value::Text(ts(&t)));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM surplus");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(self.order.sql());
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::from(limit)));
        }
        (sql, values)
    }
}

// ---------------------------------------------------------------------------
// SurplusStore
// ---------------------------------------------------------------------------

impl SurplusStore for Database {
    fn insert_surplus(&self, r: &SurplusRecord) -> Result<()> {
        let claim = r.claim.as_ref();
        self.conn().execute(
            &format!(
                "INSERT INTO surplus ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                         ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
            ),
            params![
                r.id.to_string(),
                r.canteen_id.as_str(),
                r.canteen_name,
                r.food_name,
                r.category.as_str(),
                r.quantity,
                r.unit,
                ts(&r.created_at),
                ts(&r.updated_at),
                ts(&r.expiry_time),
                r.pickup_location,
                r.image_url,
                r.additional_info,
                r.status.as_str(),
                claim.map(|c| c.claimed_by.to_string()),
                claim.map(|c| c.claimer_name.clone()),
                claim.map(|c| ts(&c.claimed_at)),
                r.assigned_driver_id.as_ref().map(UserId::to_string),
                r.delivery_code.as_ref().map(|c| c.as_str().to_string()),
                r.driver_pickup_verified_at.as_ref().map(ts),
                r.recipient_delivery_verified_at.as_ref().map(ts),
                r.revision as i64,
            ],
        )?;
        tracing::debug!(surplus_id = %r.id, canteen = %r.canteen_id, "surplus inserted");
        Ok(())
    }

    fn read_surplus(&self, id: SurplusId) -> Result<SurplusRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM surplus WHERE id = ?1"),
                params![id.to_string()],
                row_to_surplus,
            )
            .map_err(not_found)
    }

    fn conditional_update(
        &self,
        id: SurplusId,
        expected: &Precondition,
        patch: &SurplusPatch,
    ) -> Result<CasOutcome<SurplusRecord>> {
        // IMMEDIATE takes the write lock up front so a concurrent writer is
        // waited on through the busy timeout instead of failing the snapshot.
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;
        let claim = patch.claim.as_ref();
        let affected = tx.execute(
            "UPDATE surplus SET
                 status                         = COALESCE(?4, status),
                 claimed_by                     = COALESCE(?5, claimed_by),
                 claimer_name                   = COALESCE(?6, claimer_name),
                 claimed_at                     = COALESCE(?7, claimed_at),
                 assigned_driver_id             = COALESCE(?8, assigned_driver_id),
                 delivery_code                  = COALESCE(?9, delivery_code),
                 driver_pickup_verified_at      = COALESCE(?10, driver_pickup_verified_at),
                 recipient_delivery_verified_at = COALESCE(?11, recipient_delivery_verified_at),
                 updated_at                     = ?12,
                 revision                       = revision + 1
             WHERE id = ?1 AND status = ?2 AND revision = ?3",
            params![
                id.to_string(),
                expected.status.as_str(),
                expected.revision as i64,
                patch.status.map(SurplusStatus::as_str),
                claim.map(|c| c.claimed_by.to_string()),
                claim.map(|c| c.claimer_name.clone()),
                claim.map(|c| ts(&c.claimed_at)),
                patch.assigned_driver_id.as_ref().map(UserId::to_string),
                patch.delivery_code.as_ref().map(|c| c.as_str().to_string()),
                patch.driver_pickup_verified_at.as_ref().map(ts),
                patch.recipient_delivery_verified_at.as_ref().map(ts),
                ts(&patch.updated_at),
            ],
        )?;

        let outcome = if affected == 1 {
            let record = tx.query_row(
                &format!("SELECT {COLUMNS} FROM surplus WHERE id = ?1"),
                params![id.to_string()],
                row_to_surplus,
            )?;
            CasOutcome::Applied(record)
        } else if exists(&tx, id)? {
            CasOutcome::PredicateFailed
        } else {
            CasOutcome::NotFound
        };
        tx.commit()?;

        match outcome {
            CasOutcome::Applied(ref r) => tracing::debug!(
                surplus_id = %id,
                status = %r.status,
                revision = r.revision,
                "conditional update applied"
            ),
            CasOutcome::PredicateFailed => tracing::debug!(
                surplus_id = %id,
                expected_status = %expected.status,
                expected_revision = expected.revision,
                "conditional update predicate failed"
            ),
            CasOutcome::NotFound => {}
        }
        Ok(outcome)
    }

    fn conditional_delete(&self, id: SurplusId, expected: &Precondition) -> Result<CasOutcome<()>> {
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;
        let affected = tx.execute(
            "DELETE FROM surplus WHERE id = ?1 AND status = ?2 AND revision = ?3",
            params![
                id.to_string(),
                expected.status.as_str(),
                expected.revision as i64
            ],
        )?;
        let outcome = if affected == 1 {
            CasOutcome::Applied(())
        } else if exists(&tx, id)? {
            CasOutcome::PredicateFailed
        } else {
            CasOutcome::NotFound
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn query_surplus(&self, query: &SurplusQuery) -> Result<Vec<SurplusRecord>> {
        let (sql, values) = query.to_sql();
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_surplus)?;

        let mut records = Vec::new();
        for row in rows {
            match row {
                Ok(record) => records.push(record),
                // One malformed row must not hide every other listing.
                Err(rusqlite::Error::FromSqlConversionFailure(column, _, e)) => {
                    tracing::warn!(column, error = %e, "skipping unreadable surplus row");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }
}

fn exists(conn: &rusqlite::Connection, id: SurplusId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM surplus WHERE id = ?1",
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn row_to_surplus(row: &rusqlite::Row<'_>) -> rusqlite::Result<SurplusRecord> {
    let text = |idx: usize| -> rusqlite::Result<String> { row.get(idx) };
    let opt = |idx: usize| -> rusqlite::Result<Option<String>> { row.get(idx) };

    let category: FoodCategory = text(4)?.parse().map_err(|e| conversion(4, e))?;
    let status: SurplusStatus = text(13)?.parse().map_err(|e| conversion(13, e))?;
    let delivery_code = opt(18)?
        .map(|s| DeliveryCode::parse(&s))
        .transpose()
        .map_err(|e| conversion(18, e))?;
    let revision: i64 = row.get(21)?;

    let doc = SurplusDocument {
        id: SurplusId(parse_uuid(0, &text(0)?)?),
        canteen_id: UserId(text(1)?),
        canteen_name: text(2)?,
        food_name: text(3)?,
        category,
        quantity: row.get(5)?,
        unit: text(6)?,
        created_at: parse_ts(7, &text(7)?)?,
        updated_at: parse_ts(8, &text(8)?)?,
        expiry_time: parse_ts(9, &text(9)?)?,
        pickup_location: text(10)?,
        image_url: opt(11)?,
        additional_info: opt(12)?,
        status,
        claimed_by: opt(14)?.map(UserId),
        claimer_name: opt(15)?,
        claimed_at: parse_opt_ts(16, opt(16)?)?,
        assigned_driver_id: opt(17)?.map(UserId),
        delivery_code,
        driver_pickup_verified_at: parse_opt_ts(19, opt(19)?)?,
        recipient_delivery_verified_at: parse_opt_ts(20, opt(20)?)?,
        revision: u64::try_from(revision).map_err(|e| conversion(21, e))?,
    };
    SurplusRecord::try_from(doc).map_err(|e| conversion(0, e))
}
