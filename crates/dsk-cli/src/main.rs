//! 🚀 dsk-cli: replay an NDJSON event log through docsink and see where it all landed.
//!
//! ```text
//! dsk-cli [config.toml] [events.ndjson]
//! ```
//!
//! No config path means `docsink.toml` if it exists, env vars (`DOCSINK_*`) otherwise.
//! No events path means stdin. Logging follows `RUST_LOG`. 🦆

use std::path::Path;

use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "docsink.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a phase. we're past it.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let explicit_config = args.get(1).map(String::as_str).filter(|a| *a != "-");
    let config_file = Path::new(explicit_config.unwrap_or(DEFAULT_CONFIG));

    // 🔒 an explicit path has to exist; the default one is allowed to be missing
    let config_file = match config_file.try_exists().context(format!(
        "💀 Couldn't check whether the configuration file exists. Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false if explicit_config.is_some() => anyhow::bail!(
            "💀 Configuration file '{}' does not exist. Relative paths are relative to where you ran this from.",
            config_file.display()
        ),
        false => None,
    };

    let app_config = dsk::app_config::load_config(config_file)
        .context("💀 In dsk-cli, main, we couldn't load the configuration. Check the file and the DOCSINK_* env vars.")?;

    let events = args.get(2).map(Path::new);
    match dsk::run(app_config, events).await {
        Ok(summary) => {
            println!("{summary}");
            if summary.failed_chunks > 0 {
                std::process::exit(2);
            }
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 one layer of the onion at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            std::process::exit(1);
        }
    }
}
