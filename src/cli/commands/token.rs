use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("issuer")
                .long("issuer")
                .help("Issuer URL placed in the iss claim and discovery document")
                .env("WARDEN_ISSUER")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new("signing-key-path")
                .long("signing-key-path")
                .help("PEM encoded RSA private key (PKCS#8 or PKCS#1)")
                .long_help(
                    "PEM encoded RSA private key (PKCS#8 or PKCS#1). When absent, an ephemeral 2048-bit key is generated at start-up and every token is invalidated by a restart.",
                )
                .env("WARDEN_SIGNING_KEY_PATH")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Lifetime of ID and access tokens in seconds")
                .env("WARDEN_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Lifetime of refresh tokens in seconds")
                .env("WARDEN_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}
