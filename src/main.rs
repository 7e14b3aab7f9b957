use std::path::PathBuf;

use anyhow::{Context, Result};
use argp::{FromArgs, HelpStyle};
use log::{warn, LevelFilter};
use nscatalog::{read_file_metadata, ContentMetaAttributes, KeyRing};

#[derive(FromArgs, Debug)]
/// Lists the titles inside NSP and XCI files.
struct TopLevel {
    #[argp(option, short = 'k')]
    /// Key file to use instead of ./prod.keys or ~/.switch/prod.keys.
    keys: Option<PathBuf>,
    #[argp(switch, short = 'v')]
    /// Print debug messages.
    verbose: bool,
    #[argp(positional)]
    /// The files to read.
    files: Vec<PathBuf>,
}

fn print_record(meta: &ContentMetaAttributes) {
    let content_type = meta.content_type.map_or("UNKNOWN", |t| t.as_str());
    let name = meta.nacp.as_ref().and_then(|n| n.preferred_title()).unwrap_or("-");
    let display_version =
        meta.nacp.as_ref().map(|n| n.display_version.as_str()).filter(|v| !v.is_empty());
    match display_version {
        Some(display_version) => println!(
            "{} v{} {} {} ({})",
            meta.title_id, meta.version, content_type, name, display_version
        ),
        None => println!("{} v{} {} {}", meta.title_id, meta.version, content_type, name),
    }
}

fn main() -> Result<()> {
    let args: TopLevel = argp::parse_args_or_exit(&HelpStyle::default());
    env_logger::Builder::new()
        .filter_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Warn })
        .format_timestamp(None)
        .parse_default_env()
        .try_init()
        .context("Failed to install logger")?;

    let keys = KeyRing::load(args.keys.as_deref()).context("Failed to read keyset")?;
    for path in &args.files {
        match read_file_metadata(&keys, path) {
            Ok(records) => {
                for meta in records.values() {
                    print_record(meta);
                }
            }
            Err(e) => warn!("Skipping file: {e}"),
        }
    }

    Ok(())
}
