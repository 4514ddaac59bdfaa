use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::account::AccountMap;
use crate::error::Error;
use crate::mandate::{Mandate, MandateStore};
use crate::movement::{Movement, MovementLedger};
use crate::notify::{Notification, NotificationSender};

/// Per-mandate result of one tick's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MandateOutcome {
    Executed {
        movement_id: Uuid,
        new_balance: Decimal,
    },
    Inactive,
    NotDue,
    FailedInsufficient,
    FailedError,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub scanned: usize,
    pub executed: usize,
    pub insufficient: usize,
    pub failed: usize,
}

/// Walks all mandates once per tick, executes the due ones and isolates their
/// failures from each other. Holds no business state of its own; the stores
/// are injected and shared with the revocation service.
pub struct ExecutionEngine {
    accounts: Arc<Mutex<AccountMap>>,
    mandates: Arc<Mutex<HashMap<Uuid, Mandate>>>,
    movements: Arc<Mutex<MovementLedger>>,
    notifier: NotificationSender,
}

impl ExecutionEngine {
    pub fn new(
        accounts: Arc<Mutex<AccountMap>>,
        mandates: Arc<Mutex<HashMap<Uuid, Mandate>>>,
        movements: Arc<Mutex<MovementLedger>>,
        notifier: NotificationSender,
    ) -> Self {
        Self {
            accounts,
            mandates,
            movements,
            notifier,
        }
    }

    pub fn tick(&self) -> TickSummary {
        self.tick_at(Utc::now())
    }

    /// One full due-scan, sequential over the store's iteration order. One
    /// mandate's failure never aborts the rest of the batch.
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickSummary {
        let ids = self.mandates.lock().ids();
        let mut summary = TickSummary {
            scanned: ids.len(),
            ..TickSummary::default()
        };

        for id in ids {
            match self.execute_if_due(id, now) {
                MandateOutcome::Executed { .. } => summary.executed += 1,
                MandateOutcome::FailedInsufficient => summary.insufficient += 1,
                MandateOutcome::FailedError => summary.failed += 1,
                MandateOutcome::Inactive | MandateOutcome::NotDue => {}
            }
        }

        info!(
            "Tick complete: {} mandates scanned, {} executed, {} insufficient, {} failed",
            summary.scanned, summary.executed, summary.insufficient, summary.failed
        );
        summary
    }

    fn execute_if_due(&self, id: Uuid, now: DateTime<Utc>) -> MandateOutcome {
        {
            let mandates = self.mandates.lock();
            let Some(mandate) = mandates.find(id) else {
                // Gone between snapshot and execution; nothing to do.
                return MandateOutcome::NotDue;
            };
            if !mandate.is_active() {
                return MandateOutcome::Inactive;
            }
            if !mandate.is_due(now) {
                return MandateOutcome::NotDue;
            }
        }
        debug!("Mandate {id} is due, executing");
        self.run_transition(id, now)
    }

    /// Manual single-mandate trigger. Runs the same execution transition as
    /// the tick, skipping the due-check; inactive mandates are still excluded.
    pub fn execute_now(&self, id: Uuid) -> Result<MandateOutcome, Error> {
        {
            let mandates = self.mandates.lock();
            let mandate = mandates.find(id).ok_or(Error::MandateNotFound(id))?;
            if !mandate.is_active() {
                return Ok(MandateOutcome::Inactive);
            }
        }
        Ok(self.run_transition(id, Utc::now()))
    }

    // DUE -> EXECUTING -> {EXECUTED | FAILED_INSUFFICIENT | FAILED_ERROR}.
    fn run_transition(&self, id: Uuid, now: DateTime<Utc>) -> MandateOutcome {
        let (customer, amount) = {
            let mandates = self.mandates.lock();
            match mandates.find(id) {
                Some(m) => (m.customer(), m.amount()),
                None => return MandateOutcome::NotDue,
            }
        };

        match self.debit_and_record(id, now) {
            Ok((movement_id, new_balance)) => {
                self.notifier.publish(Notification::mandate_executed(
                    customer,
                    id,
                    movement_id,
                    amount,
                    new_balance,
                    now,
                ));
                MandateOutcome::Executed {
                    movement_id,
                    new_balance,
                }
            }
            Err(Error::InsufficientFunds {
                iban,
                available,
                requested,
            }) => {
                // Routine rejection: no movement, lastExecution untouched so
                // the mandate is retried at the next due-check.
                warn!(
                    "Mandate {id} skipped: insufficient funds on {iban} \
                     (available {available}, requested {requested})"
                );
                MandateOutcome::FailedInsufficient
            }
            Err(e) => {
                let e = e.into_execution_error(id);
                error!("{e}");
                self.notifier.publish(Notification::mandate_failed(
                    customer,
                    id,
                    e.to_string(),
                    now,
                ));
                MandateOutcome::FailedError
            }
        }
    }

    /// The consistency boundary: balance check, debit and movement append
    /// happen under the account and movement locks held together, so a
    /// partially applied execution is never observable. The timestamp update
    /// follows only once both have succeeded.
    ///
    /// Lock order everywhere in this crate: accounts, then movements, then
    /// mandates.
    fn debit_and_record(&self, id: Uuid, now: DateTime<Utc>) -> Result<(Uuid, Decimal), Error> {
        let (customer, source, destination, amount) = {
            let mandates = self.mandates.lock();
            let mandate = mandates.find(id).ok_or(Error::MandateNotFound(id))?;
            (
                mandate.customer(),
                mandate.source_iban().to_string(),
                mandate.destination_iban().to_string(),
                mandate.amount(),
            )
        };

        let movement =
            Movement::mandate_execution(customer, id, &source, &destination, amount, now)?;

        let (movement_id, new_balance) = {
            let mut accounts = self.accounts.lock();
            let mut movements = self.movements.lock();
            let new_balance = accounts.debit(&source, amount)?;
            let movement_id = movements.append(movement);
            (movement_id, new_balance)
        };

        let mut mandates = self.mandates.lock();
        if let Some(mandate) = mandates.find_mut(id) {
            mandate.mark_executed(now);
        }

        debug!("Mandate {id} executed, movement {movement_id}, balance now {new_balance}");
        Ok((movement_id, new_balance))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::account::Account;
    use crate::mandate::Periodicity;
    use crate::movement::PaymentKind;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    struct Fixture {
        engine: ExecutionEngine,
        accounts: Arc<Mutex<AccountMap>>,
        mandates: Arc<Mutex<HashMap<Uuid, Mandate>>>,
        movements: Arc<Mutex<MovementLedger>>,
        notifications: crate::notify::TestQueue,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(Mutex::new(AccountMap::new()));
        let mandates = Arc::new(Mutex::new(HashMap::new()));
        let movements = Arc::new(Mutex::new(MovementLedger::new()));
        let (notifier, notifications) = NotificationSender::test_pair();
        let engine = ExecutionEngine::new(
            accounts.clone(),
            mandates.clone(),
            movements.clone(),
            notifier,
        );
        Fixture {
            engine,
            accounts,
            mandates,
            movements,
            notifications,
        }
    }

    fn seed_mandate(
        fx: &Fixture,
        balance: Decimal,
        amount: Decimal,
        last_executed: DateTime<Utc>,
    ) -> (Uuid, Uuid) {
        let customer = Uuid::new_v4();
        let iban = format!("ES91-{customer}");
        fx.accounts
            .lock()
            .insert(Account::new(&iban, customer, balance));
        let mandate = Mandate::new(
            customer,
            &iban,
            "ES66-DEST",
            amount,
            Periodicity::Daily,
            last_executed,
        )
        .unwrap();
        let id = mandate.id();
        fx.mandates.lock().put(mandate);
        (id, customer)
    }

    #[test]
    fn due_mandate_debits_appends_and_advances_timestamp() {
        let fx = fixture();
        let now = Utc::now();
        let (id, customer) = seed_mandate(&fx, dec(100), dec(100), now - Duration::days(2));

        let summary = fx.engine.tick_at(now);

        assert_eq!(summary.executed, 1);
        let mandate_source = {
            let mandates = fx.mandates.lock();
            let m = mandates.find(id).unwrap();
            assert_eq!(m.last_execution(), now);
            m.source_iban().to_string()
        };
        assert_eq!(fx.accounts.lock().balance(&mandate_source).unwrap(), dec(0));
        let movements = fx.movements.lock();
        let sheet = movements.sheet(customer).unwrap();
        assert_eq!(sheet.len(), 1);
        assert!(matches!(
            sheet.movements()[0].kind(),
            PaymentKind::MandateExecution { .. }
        ));
    }

    #[test]
    fn one_execution_per_tick_even_after_many_missed_periods() {
        let fx = fixture();
        let now = Utc::now();
        // Daily mandate that missed ten periods: still exactly one movement.
        let (id, customer) = seed_mandate(&fx, dec(1000), dec(10), now - Duration::days(10));

        let summary = fx.engine.tick_at(now);

        assert_eq!(summary.executed, 1);
        assert_eq!(fx.movements.lock().sheet(customer).unwrap().len(), 1);
        let mandates = fx.mandates.lock();
        assert_eq!(
            mandates.find(id).unwrap().last_execution(),
            now
        );
    }

    #[test]
    fn insufficient_funds_leaves_mandate_and_balance_untouched() {
        let fx = fixture();
        let now = Utc::now();
        let before = now - Duration::days(2);
        let (id, customer) = seed_mandate(&fx, dec(50), dec(100), before);

        let summary = fx.engine.tick_at(now);

        assert_eq!(summary.insufficient, 1);
        assert_eq!(summary.executed, 0);
        let mandates = fx.mandates.lock();
        let m = mandates.find(id).unwrap();
        assert_eq!(m.last_execution(), before);
        assert_eq!(fx.accounts.lock().balance(m.source_iban()).unwrap(), dec(50));
        assert!(fx.movements.lock().sheet(customer).is_none());
        // Routine rejection: no notification either.
        assert!(fx.notifications.try_recv().is_none());
    }

    #[test]
    fn failure_in_one_mandate_does_not_abort_the_batch() {
        let fx = fixture();
        let now = Utc::now();
        let due = now - Duration::days(2);
        let (_, first) = seed_mandate(&fx, dec(200), dec(100), due);
        let (_, third) = seed_mandate(&fx, dec(500), dec(100), due);
        // Second mandate points at an account that does not exist.
        let broken = Mandate::new(
            Uuid::new_v4(),
            "ES00-MISSING",
            "ES66-DEST",
            dec(100),
            Periodicity::Daily,
            due,
        )
        .unwrap();
        fx.mandates.lock().put(broken);

        let summary = fx.engine.tick_at(now);

        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failed, 1);
        let movements = fx.movements.lock();
        assert_eq!(movements.sheet(first).unwrap().len(), 1);
        assert_eq!(movements.sheet(third).unwrap().len(), 1);
    }

    #[test]
    fn inactive_mandate_is_skipped_no_matter_how_old() {
        let fx = fixture();
        let now = Utc::now();
        let (id, customer) = seed_mandate(&fx, dec(500), dec(100), now - Duration::days(365));
        fx.mandates.lock().find_mut(id).unwrap().deactivate();

        let summary = fx.engine.tick_at(now);

        assert_eq!(summary.executed, 0);
        assert_eq!(summary.insufficient, 0);
        assert_eq!(summary.failed, 0);
        assert!(fx.movements.lock().sheet(customer).is_none());
    }

    #[test]
    fn not_yet_due_mandate_is_left_alone() {
        let fx = fixture();
        let now = Utc::now();
        let (_, customer) = seed_mandate(&fx, dec(500), dec(100), now - Duration::hours(23));

        let summary = fx.engine.tick_at(now);

        assert_eq!(summary.executed, 0);
        assert!(fx.movements.lock().sheet(customer).is_none());
    }

    #[test]
    fn executed_mandate_publishes_execute_notification() {
        let fx = fixture();
        let now = Utc::now();
        let (id, customer) = seed_mandate(&fx, dec(100), dec(100), now - Duration::days(2));

        fx.engine.tick_at(now);

        let notification = fx.notifications.try_recv().unwrap();
        assert_eq!(notification.customer(), customer);
        assert_eq!(notification.event(), crate::notify::EventKind::Execute);
        match notification.payload() {
            crate::notify::EventPayload::MandateExecuted {
                mandate_id,
                new_balance,
                ..
            } => {
                assert_eq!(*mandate_id, id);
                assert_eq!(*new_balance, dec(0));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn execute_now_runs_even_when_not_due() {
        let fx = fixture();
        let now = Utc::now();
        let (id, customer) = seed_mandate(&fx, dec(100), dec(40), now);

        let outcome = fx.engine.execute_now(id).unwrap();

        assert!(matches!(outcome, MandateOutcome::Executed { .. }));
        assert_eq!(fx.movements.lock().sheet(customer).unwrap().len(), 1);
    }

    #[test]
    fn execute_now_rejects_unknown_mandate() {
        let fx = fixture();

        let result = fx.engine.execute_now(Uuid::new_v4());

        assert!(matches!(result, Err(Error::MandateNotFound(_))));
    }
}
