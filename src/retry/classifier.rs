use crate::errors::{
    FaultClass, StoreFault, CODE_CONNECTION_ACQUIRE, CODE_CONNECTION_CLOSED, CODE_IO,
    CODE_POOL_TIMED_OUT,
};

/// Codes that describe a fault expected to clear up on its own.
///
/// Connection-level failures and concurrency conflicts only. Everything else, including
/// faults with no code at all, is permanent.
const TRANSIENT_CODES: &[&str] = &[
    // Pool and transport failures surfaced by the driver.
    CODE_CONNECTION_ACQUIRE,
    CODE_CONNECTION_CLOSED,
    CODE_POOL_TIMED_OUT,
    CODE_IO,
    // Postgres class 08: connection exception.
    "08000",
    "08001",
    "08003",
    "08004",
    "08006",
    // MySQL communication link failure.
    "08S01",
    // Postgres too_many_connections.
    "53300",
    // Postgres admin_shutdown, crash_shutdown, cannot_connect_now.
    "57P01",
    "57P02",
    "57P03",
    // serialization_failure, deadlock_detected.
    "40001",
    "40P01",
    // SQLite BUSY, LOCKED, BUSY_RECOVERY, BUSY_SNAPSHOT.
    "5",
    "6",
    "261",
    "517",
];

/// Whether `fault` is worth another attempt on a fresh connection.
pub fn is_transient(fault: &StoreFault) -> bool {
    fault
        .code()
        .map(|code| TRANSIENT_CODES.contains(&code))
        .unwrap_or(false)
}

pub fn classify(fault: &StoreFault) -> FaultClass {
    if is_transient(fault) {
        FaultClass::Transient
    } else {
        FaultClass::Permanent
    }
}
