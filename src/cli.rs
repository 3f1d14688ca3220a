use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "kubedash",
    version,
    about = "A terminal dashboard for Kubernetes clusters."
)]
pub struct CliArgs {
    /// Configuration directory (default: $KUBEDASH_CONFIG_DIR, then ~/.config/kubedash)
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Background refresh tick in milliseconds, clamped to 250..=5000
    #[arg(long)]
    pub tick_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["kubedash"]).expect("args");
        assert_eq!(args.config_dir, None);
        assert_eq!(args.log_filter, "info");
        assert_eq!(args.tick_ms, None);
    }

    #[test]
    fn explicit_values() {
        let args = CliArgs::try_parse_from([
            "kubedash",
            "--config-dir",
            "/tmp/kd",
            "--log-filter",
            "debug",
            "--tick-ms",
            "500",
        ])
        .expect("args");
        assert_eq!(args.config_dir, Some(PathBuf::from("/tmp/kd")));
        assert_eq!(args.log_filter, "debug");
        assert_eq!(args.tick_ms, Some(500));
    }
}
