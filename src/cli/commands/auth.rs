use clap::{Arg, Command};

/// Lockout policy and per-request budget.
#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("max-failed-logins")
                .long("max-failed-logins")
                .help("Consecutive failed logins before an account is locked")
                .env("WARDEN_MAX_FAILED_LOGINS")
                .default_value("6")
                .value_parser(clap::value_parser!(i32).range(1..)),
        )
        .arg(
            Arg::new("lock-minutes")
                .long("lock-minutes")
                .help("How long a locked account stays locked, in minutes")
                .env("WARDEN_LOCK_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("request-timeout-ms")
                .long("request-timeout-ms")
                .help("Deadline for the store calls of a single request, in milliseconds")
                .env("WARDEN_REQUEST_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("db-max-connections")
                .long("db-max-connections")
                .help("Maximum size of the database connection pool")
                .env("WARDEN_DB_MAX_CONNECTIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}
