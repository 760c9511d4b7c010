use chrono::{DateTime, FixedOffset, Offset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;
use std::str::FromStr;

const DEFAULT_TIMEZONE_OFFSET_SECS: i32 = 3600;

/// Installs the process-wide logger: `<local time> [LEVEL] - message`, with the
/// offset taken from `TIMEZONE_OFFSET` (seconds) and the level from `RUST_LOG`.
pub fn init_logger(default_level: &str) {
    let offset = env::var("TIMEZONE_OFFSET")
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .and_then(FixedOffset::east_opt)
        .or_else(|| FixedOffset::east_opt(DEFAULT_TIMEZONE_OFFSET_SECS))
        .unwrap_or_else(|| Utc.fix());
    let level = LevelFilter::from_str(
        &env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string()),
    )
    .unwrap_or(LevelFilter::Info);

    let _ = Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .try_init();
}
