use std::collections::HashMap;

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::account::MONEY_SCALE;
use crate::error::Error;

/// Upper bound on a single mandate pull. Standing instructions above this are
/// rejected at creation, matching the onboarding flow's own cap.
pub const MAX_MANDATE_AMOUNT: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Periodicity {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Periodicity {
    /// Next execution time after a given successful execution. Days and weeks
    /// are fixed spans; months and years follow the calendar, clamping to the
    /// last day of shorter months (Jan 31 + 1 month = Feb 28).
    pub fn next_after(self, last: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Periodicity::Daily => last + Duration::days(1),
            Periodicity::Weekly => last + Duration::weeks(1),
            Periodicity::Monthly => last
                .checked_add_months(Months::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Periodicity::Yearly => last
                .checked_add_months(Months::new(12))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mandate {
    id: Uuid,
    customer: Uuid,
    source_iban: String,
    destination_iban: String,
    amount: Decimal,
    periodicity: Periodicity,
    start_date: DateTime<Utc>,
    active: bool,
    last_execution: DateTime<Utc>,
}

impl Mandate {
    pub fn new(
        customer: Uuid,
        source_iban: impl Into<String>,
        destination_iban: impl Into<String>,
        amount: Decimal,
        periodicity: Periodicity,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let amount = amount.round_dp(MONEY_SCALE);
        if amount <= Decimal::ZERO || amount > MAX_MANDATE_AMOUNT {
            return Err(Error::InvalidAmount(amount));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            customer,
            source_iban: source_iban.into(),
            destination_iban: destination_iban.into(),
            amount,
            periodicity,
            start_date: created_at,
            active: true,
            last_execution: created_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn customer(&self) -> Uuid {
        self.customer
    }

    pub fn source_iban(&self) -> &str {
        &self.source_iban
    }

    pub fn destination_iban(&self) -> &str {
        &self.destination_iban
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn periodicity(&self) -> Periodicity {
        self.periodicity
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_execution(&self) -> DateTime<Utc> {
        self.last_execution
    }

    /// Due-selection rule, recomputed fresh against wall-clock time on every
    /// tick. No "next due" field is persisted, so a mandate that missed
    /// several periods executes once at the next tick rather than catching up.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.periodicity.next_after(self.last_execution) <= now
    }

    /// Records a successful execution. The timestamp only ever moves forward.
    pub fn mark_executed(&mut self, now: DateTime<Utc>) {
        if now > self.last_execution {
            self.last_execution = now;
        }
    }

    /// Mandates are deactivated, never deleted.
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

pub trait MandateStore {
    fn put(&mut self, mandate: Mandate);
    fn find(&self, id: Uuid) -> Option<&Mandate>;
    fn find_mut(&mut self, id: Uuid) -> Option<&mut Mandate>;
    /// Ids of every stored mandate, in store iteration order. The tick walks
    /// this snapshot so mutation during the walk cannot invalidate iteration.
    fn ids(&self) -> Vec<Uuid>;
    fn count(&self) -> usize;
}

impl MandateStore for HashMap<Uuid, Mandate> {
    fn put(&mut self, mandate: Mandate) {
        self.insert(mandate.id(), mandate);
    }

    fn find(&self, id: Uuid) -> Option<&Mandate> {
        self.get(&id)
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut Mandate> {
        self.get_mut(&id)
    }

    fn ids(&self) -> Vec<Uuid> {
        self.keys().copied().collect()
    }

    fn count(&self) -> usize {
        self.len()
    }
}
