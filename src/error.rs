use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Usage: cargo run -- <accounts.csv> <mandates.csv>")]
    MissingArgument,

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Insufficient funds on {iban}: available {available}, requested {requested}")]
    InsufficientFunds {
        iban: String,
        available: rust_decimal::Decimal,
        requested: rust_decimal::Decimal,
    },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(rust_decimal::Decimal),

    #[error("Mandate {0} not found")]
    MandateNotFound(Uuid),

    #[error("Mandate {mandate_id} execution failed: {source}")]
    MandateExecution {
        mandate_id: Uuid,
        source: Box<Error>,
    },

    #[error("Movement {0} not found")]
    MovementNotFound(Uuid),

    #[error("Transfer {movement_id} is outside the revocation window ({age_hours}h old)")]
    TransferNotRevocable { movement_id: Uuid, age_hours: i64 },
}

impl Error {
    // Insufficient funds keeps its own identity - it is a routine rejection,
    // not a fault. Everything else gets wrapped so the engine can log it
    // against the mandate and move on.
    pub fn into_execution_error(self, mandate_id: Uuid) -> Error {
        match self {
            e @ Error::InsufficientFunds { .. } => e,
            other => Error::MandateExecution {
                mandate_id,
                source: Box::new(other),
            },
        }
    }
}
