pub mod checker;
pub mod churner;
pub mod config;
pub mod crl;
pub mod earlyremoval;
pub mod expiry;
pub mod issuer;
pub mod retry;
pub mod serial;
pub mod storage;
pub mod telemetry;
pub mod tracker;
