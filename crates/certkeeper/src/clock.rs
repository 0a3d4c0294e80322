//! Wall-clock source in epoch milliseconds.
//!
//! Certificate validity and order expiry are wall-clock instants, while
//! poll intervals and wait budgets use `tokio::time`.

use std::fmt::Debug;

use chrono::Utc;

pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
