use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Payment-kind payload of a movement. One variant per financial event the
/// ledger records; behavior that differs per kind (revocation applies only to
/// transfers) is matched exhaustively at the call sites.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentKind {
    MandateExecution {
        mandate_id: Uuid,
        source_iban: String,
        destination_iban: String,
        amount: Decimal,
    },
    PayrollCredit {
        destination_iban: String,
        amount: Decimal,
        employer: String,
    },
    CardPayment {
        source_iban: String,
        amount: Decimal,
        merchant: String,
    },
    Transfer {
        source_iban: String,
        destination_iban: String,
        amount: Decimal,
        beneficiary: String,
        /// Set only on a compensating entry, pointing at the movement it
        /// reverses. Originals never carry it; they are only ever marked
        /// deleted, since movements do not change after creation.
        reverses: Option<Uuid>,
    },
}

impl PaymentKind {
    pub fn amount(&self) -> Decimal {
        match self {
            PaymentKind::MandateExecution { amount, .. }
            | PaymentKind::PayrollCredit { amount, .. }
            | PaymentKind::CardPayment { amount, .. }
            | PaymentKind::Transfer { amount, .. } => *amount,
        }
    }
}
