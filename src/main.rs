use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use backoffice::account::{Account, AccountMap, AccountReport};
use backoffice::engine::ExecutionEngine;
use backoffice::error::Error;
use backoffice::mandate::{Mandate, MandateStore, Periodicity};
use backoffice::movement::MovementLedger;
use backoffice::notify::{InMemoryDirectory, LogChannelRegistry, NotificationDispatcher};
use backoffice::scheduler::Scheduler;

const DEFAULT_TICK_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct AccountRow {
    iban: String,
    customer: Uuid,
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct MandateRow {
    customer: Uuid,
    source_iban: String,
    destination_iban: String,
    amount: Decimal,
    periodicity: Periodicity,
    // Seeds the mandate's creation/last-execution timestamp; empty means now.
    last_executed: Option<DateTime<Utc>>,
}

fn load_accounts(path: &str) -> Result<AccountMap, Error> {
    let file = File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut accounts = AccountMap::new();
    for result in rdr.deserialize() {
        let row: AccountRow = result?;
        accounts.insert(Account::new(row.iban, row.customer, row.balance));
    }
    Ok(accounts)
}

fn load_mandates(path: &str) -> Result<HashMap<Uuid, Mandate>, Error> {
    let file = File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let now = Utc::now();
    let mut mandates = HashMap::new();
    for result in rdr.deserialize() {
        let row: MandateRow = result?;
        let mandate = Mandate::new(
            row.customer,
            row.source_iban,
            row.destination_iban,
            row.amount,
            row.periodicity,
            row.last_executed.unwrap_or(now),
        )?;
        mandates.put(mandate);
    }
    Ok(mandates)
}

// Stand-in for the customer/user CRUD this binary does not carry: every seeded
// customer owns one user whose channel key is derived from the customer id.
fn directory_for(accounts: &AccountMap) -> InMemoryDirectory {
    let mut directory = InMemoryDirectory::new();
    for account in accounts.sorted() {
        let customer = account.customer();
        let user = Uuid::new_v4();
        let username = format!("customer-{}", &customer.to_string()[..8]);
        directory.register(customer, user, username);
    }
    directory
}

fn tick_interval() -> Duration {
    let secs = env::var("TICK_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TICK_SECS);
    Duration::from_secs(secs)
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let accounts_path = env::args().nth(1).ok_or(Error::MissingArgument)?;
    let mandates_path = env::args().nth(2).ok_or(Error::MissingArgument)?;
    let ticks: Option<u32> = env::args().nth(3).and_then(|v| v.parse().ok());

    let accounts = load_accounts(&accounts_path)?;
    let mandates = load_mandates(&mandates_path)?;
    info!(
        "Loaded {} accounts and {} mandates",
        accounts.len(),
        mandates.count()
    );

    let directory = directory_for(&accounts);
    let dispatcher =
        NotificationDispatcher::spawn(Arc::new(directory), Arc::new(LogChannelRegistry));

    let accounts = Arc::new(Mutex::new(accounts));
    let engine = Arc::new(ExecutionEngine::new(
        accounts.clone(),
        Arc::new(Mutex::new(mandates)),
        Arc::new(Mutex::new(MovementLedger::new())),
        dispatcher.sender(),
    ));

    match ticks {
        // Batch mode: run a fixed number of ticks back to back, then report
        // final account state as CSV on stdout.
        Some(n) => {
            for _ in 0..n {
                engine.tick();
            }
            dispatcher.shutdown();

            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for account in accounts.lock().sorted() {
                wtr.serialize(AccountReport::from(account))?;
            }
            wtr.flush()?;
        }
        // Service mode: tick on the wall clock until killed.
        None => {
            let handle = Scheduler::new(engine, tick_interval()).start();
            handle.join();
            error!("Scheduler exited unexpectedly");
            dispatcher.shutdown();
        }
    }

    Ok(())
}
