use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Level used when `RUST_LOG` is unset: warn, then info and debug per `-v`.
pub fn default_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber. Logs go to stderr so command output on stdout
/// stays machine-readable. Calling this twice is a no-op.
pub fn init(verbosity: u8, json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level(verbosity).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_default_level() {
        assert_eq!(default_level(0), LevelFilter::WARN);
        assert_eq!(default_level(1), LevelFilter::INFO);
        assert_eq!(default_level(2), LevelFilter::DEBUG);
        assert_eq!(default_level(9), LevelFilter::TRACE);
    }
}
