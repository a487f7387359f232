//! Command printing the resolved configuration.

use std::io::{self, Write};

use anyhow::anyhow;
use shared::config::server::Config;

/// Writes `config` to `out` as YAML.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn print_config(config: &Config, out: &mut impl Write) -> anyhow::Result<()> {
    let yaml = config.to_yaml().map_err(|err| anyhow!(err))?;
    out.write_all(yaml.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Prints `config` to stdout.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn print_config_to_stdout(config: &Config) -> anyhow::Result<()> {
    print_config(config, &mut io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::server::Profile;

    #[test]
    fn prints_yaml_that_loads_back() {
        let config = Config::default_for_profile(Profile::Test);
        let mut out = Vec::new();
        print_config(&config, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let parsed: Config = serde_yml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.pagination, config.pagination);
    }
}
