use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

mod kind;

pub use kind::PaymentKind;

use crate::account::MONEY_SCALE;
use crate::error::Error;

/// An append-only ledger entry. Never updated after creation except for the
/// logical `deleted` flag, which revocation sets on the original transfer.
#[derive(Debug, Clone)]
pub struct Movement {
    id: Uuid,
    customer: Uuid,
    created_at: DateTime<Utc>,
    deleted: bool,
    kind: PaymentKind,
}

impl Movement {
    pub fn new(customer: Uuid, created_at: DateTime<Utc>, kind: PaymentKind) -> Result<Self, Error> {
        if kind.amount() <= Decimal::ZERO {
            return Err(Error::InvalidAmount(kind.amount()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            customer,
            created_at,
            deleted: false,
            kind,
        })
    }

    pub fn mandate_execution(
        customer: Uuid,
        mandate_id: Uuid,
        source_iban: &str,
        destination_iban: &str,
        amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        Self::new(
            customer,
            created_at,
            PaymentKind::MandateExecution {
                mandate_id,
                source_iban: source_iban.to_string(),
                destination_iban: destination_iban.to_string(),
                amount: amount.round_dp(MONEY_SCALE),
            },
        )
    }

    pub fn payroll_credit(
        customer: Uuid,
        destination_iban: &str,
        amount: Decimal,
        employer: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        Self::new(
            customer,
            created_at,
            PaymentKind::PayrollCredit {
                destination_iban: destination_iban.to_string(),
                amount: amount.round_dp(MONEY_SCALE),
                employer: employer.to_string(),
            },
        )
    }

    pub fn card_payment(
        customer: Uuid,
        source_iban: &str,
        amount: Decimal,
        merchant: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        Self::new(
            customer,
            created_at,
            PaymentKind::CardPayment {
                source_iban: source_iban.to_string(),
                amount: amount.round_dp(MONEY_SCALE),
                merchant: merchant.to_string(),
            },
        )
    }

    pub fn transfer(
        customer: Uuid,
        source_iban: &str,
        destination_iban: &str,
        amount: Decimal,
        beneficiary: &str,
        reverses: Option<Uuid>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        Self::new(
            customer,
            created_at,
            PaymentKind::Transfer {
                source_iban: source_iban.to_string(),
                destination_iban: destination_iban.to_string(),
                amount: amount.round_dp(MONEY_SCALE),
                beneficiary: beneficiary.to_string(),
                reverses,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn customer(&self) -> Uuid {
        self.customer
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn kind(&self) -> &PaymentKind {
        &self.kind
    }

    pub fn amount(&self) -> Decimal {
        self.kind.amount()
    }
}

/// Per-customer aggregate of movements. At most one sheet exists per customer,
/// created lazily on the first append.
#[derive(Debug, Default)]
pub struct MovementSheet {
    movements: Vec<Movement>,
}

impl MovementSheet {
    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn len(&self) -> usize {
        self.movements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
    }
}

#[derive(Default)]
pub struct MovementLedger {
    sheets: HashMap<Uuid, MovementSheet>,
}

impl MovementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, movement: Movement) -> Uuid {
        let id = movement.id();
        self.sheets
            .entry(movement.customer())
            .or_default()
            .movements
            .push(movement);
        id
    }

    pub fn sheet(&self, customer: Uuid) -> Option<&MovementSheet> {
        self.sheets.get(&customer)
    }

    pub fn find(&self, id: Uuid) -> Option<&Movement> {
        self.sheets
            .values()
            .flat_map(|sheet| sheet.movements.iter())
            .find(|m| m.id() == id)
    }

    pub fn mark_deleted(&mut self, id: Uuid) -> Result<(), Error> {
        self.sheets
            .values_mut()
            .flat_map(|sheet| sheet.movements.iter_mut())
            .find(|m| m.id() == id)
            .map(|m| m.deleted = true)
            .ok_or(Error::MovementNotFound(id))
    }

    pub fn total(&self) -> usize {
        self.sheets.values().map(MovementSheet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[test]
    fn sheet_is_created_lazily_on_first_append() {
        let customer = Uuid::new_v4();
        let mut ledger = MovementLedger::new();
        assert!(ledger.sheet(customer).is_none());

        ledger.append(
            Movement::transfer(customer, "ES91", "ES66", dec(30), "ACME", None, Utc::now())
                .unwrap(),
        );

        assert_eq!(ledger.sheet(customer).unwrap().len(), 1);
    }

    #[test]
    fn all_movements_of_a_customer_share_one_sheet() {
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let mut ledger = MovementLedger::new();

        ledger.append(
            Movement::transfer(customer, "ES91", "ES66", dec(10), "ACME", None, now).unwrap(),
        );
        ledger
            .append(Movement::payroll_credit(customer, "ES91", dec(1800), "ACME S.L.", now).unwrap());
        ledger.append(Movement::card_payment(customer, "ES91", dec(25), "Cafeteria", now).unwrap());

        assert_eq!(ledger.sheet(customer).unwrap().len(), 3);
        assert_eq!(ledger.total(), 3);
    }

    #[test]
    fn mark_deleted_only_flips_the_flag() {
        let customer = Uuid::new_v4();
        let mut ledger = MovementLedger::new();
        let id = ledger.append(
            Movement::transfer(customer, "ES91", "ES66", dec(30), "ACME", None, Utc::now())
                .unwrap(),
        );

        ledger.mark_deleted(id).unwrap();

        let movement = ledger.find(id).unwrap();
        assert!(movement.is_deleted());
        assert_eq!(movement.amount(), dec(30));
    }

    #[test]
    fn mark_deleted_on_unknown_movement_fails() {
        let mut ledger = MovementLedger::new();

        let result = ledger.mark_deleted(Uuid::new_v4());

        assert!(matches!(result, Err(Error::MovementNotFound(_))));
    }

    #[test]
    fn non_positive_movement_amounts_rejected() {
        let result = Movement::transfer(
            Uuid::new_v4(),
            "ES91",
            "ES66",
            dec(-5),
            "ACME",
            None,
            Utc::now(),
        );

        assert!(matches!(result, Err(Error::InvalidAmount(_))));
    }
}
