use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::info;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::account::AccountMap;
use crate::error::Error;
use crate::movement::{Movement, MovementLedger, PaymentKind};
use crate::notify::{Notification, NotificationSender};

pub const REVOCATION_WINDOW_HOURS: i64 = 24;

/// Reverses a peer-to-peer transfer within the revocation window by crediting
/// the amount back and appending a compensating movement. Synchronous and
/// user-initiated, so errors surface to the caller instead of being logged
/// away.
pub struct RevocationService {
    accounts: Arc<Mutex<AccountMap>>,
    movements: Arc<Mutex<MovementLedger>>,
    notifier: NotificationSender,
}

impl RevocationService {
    pub fn new(
        accounts: Arc<Mutex<AccountMap>>,
        movements: Arc<Mutex<MovementLedger>>,
        notifier: NotificationSender,
    ) -> Self {
        Self {
            accounts,
            movements,
            notifier,
        }
    }

    pub fn revoke(&self, movement_id: Uuid, requester: Uuid) -> Result<Movement, Error> {
        self.revoke_at(movement_id, requester, Utc::now())
    }

    /// Atomic: the balance credit, the compensating movement and the deleted
    /// flag on the original all happen under the account and movement locks
    /// held together, after every precondition has been checked. Lock order
    /// matches the engine: accounts, then movements.
    pub fn revoke_at(
        &self,
        movement_id: Uuid,
        requester: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Movement, Error> {
        let mut accounts = self.accounts.lock();
        let mut movements = self.movements.lock();

        let original = movements
            .find(movement_id)
            .ok_or(Error::MovementNotFound(movement_id))?;
        // A movement someone else owns does not exist as far as the caller is
        // concerned; same for one already revoked.
        if original.customer() != requester || original.is_deleted() {
            return Err(Error::MovementNotFound(movement_id));
        }
        let PaymentKind::Transfer {
            source_iban,
            destination_iban,
            amount,
            beneficiary,
            ..
        } = original.kind()
        else {
            return Err(Error::MovementNotFound(movement_id));
        };

        let age = now - original.created_at();
        if age > Duration::hours(REVOCATION_WINDOW_HOURS) {
            return Err(Error::TransferNotRevocable {
                movement_id,
                age_hours: age.num_hours(),
            });
        }

        let (source_iban, destination_iban, amount, beneficiary) = (
            source_iban.clone(),
            destination_iban.clone(),
            *amount,
            beneficiary.clone(),
        );
        // Fail before mutating anything if the source account is gone.
        accounts.get(&source_iban)?;

        // Funds flow back: the compensating entry mirrors the original with
        // the endpoints swapped and a link to what it reverses.
        let compensating = Movement::transfer(
            requester,
            &destination_iban,
            &source_iban,
            amount,
            &beneficiary,
            Some(movement_id),
            now,
        )?;

        accounts.credit(&source_iban, amount)?;
        let compensating_id = movements.append(compensating.clone());
        movements.mark_deleted(movement_id)?;

        drop(movements);
        drop(accounts);

        info!("Transfer {movement_id} revoked, compensating movement {compensating_id}");
        self.notifier.publish(Notification::transfer_revoked(
            requester,
            movement_id,
            compensating_id,
            amount,
            now,
        ));

        Ok(compensating)
    }
}
