use reusecache::cli;

fn main() -> anyhow::Result<()> {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use reusecache::cli::{Command, ReuseCacheCli};
    use reusecache::config::EvictionPolicyConfig;

    #[test]
    fn simulate_command_honors_flags() {
        let cli = ReuseCacheCli::parse_from([
            "reusecache",
            "simulate",
            "--limit-mb",
            "32",
            "--policy",
            "lru",
            "--threads",
            "4",
            "--no-spill",
        ]);
        match cli.command() {
            Command::Simulate(args) => {
                assert_eq!(args.limit_mb, Some(32.0));
                assert_eq!(args.policy, Some(EvictionPolicyConfig::Lru));
                assert_eq!(args.threads, 4);
                assert!(args.no_spill);
                assert!(!args.json);
            }
            other => panic!("expected simulate command, got {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = ReuseCacheCli::parse_from(["reusecache", "config", "--config", "cache.yaml"]);
        assert!(matches!(cli.command(), Command::Config));
    }
}
