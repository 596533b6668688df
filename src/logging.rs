//! Test/application log initialization.
//!
//! Grounded on the teacher's `src/log.rs`: an `env_logger` builder with a
//! fixed `[level - target] [file:line] message` format, invoked once via
//! `Once` from test setup rather than left to each test to configure.

use env_logger::Builder;
use std::io::Write;

pub fn init_log() {
    let mut builder = Builder::from_default_env();
    builder
        .format_timestamp_secs()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} - {}] [{}:{}] {}",
                record.level(),
                record.target(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .is_test(true)
        .try_init()
        .ok();
}
