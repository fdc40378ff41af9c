use tracing_subscriber::EnvFilter;
use waku_core::config::LoggingConfig;

/// Build the filter directive: `--verbose` wins, then the configured level,
/// then `info`. Per-crate filters are appended.
pub fn filter_directive(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };

    std::iter::once(level.to_string())
        .chain(config.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides the config unless
/// `--verbose` was given.
pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let directive = filter_directive(config, verbose);
    let filter = if verbose {
        EnvFilter::try_new(&directive)?
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directive))?
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let to_stdout = config.output == "stdout";
    let result = match (config.format.as_str(), to_stdout) {
        ("json", true) => builder.json().with_writer(std::io::stdout).try_init(),
        ("json", false) => builder.json().with_writer(std::io::stderr).try_init(),
        (_, true) => builder.with_writer(std::io::stdout).try_init(),
        (_, false) => builder.with_writer(std::io::stderr).try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}
