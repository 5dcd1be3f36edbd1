use anyhow::Result;
use customer_db::DatabaseSettings;

use super::command::UrlArgs;
use super::output;

/// Print the URL the service would connect to.
pub fn execute_url(args: &UrlArgs) -> Result<()> {
    let url = DatabaseSettings::from_env().resolve_url();

    if url.backend().is_none() {
        output::warning("URL scheme is neither postgresql nor sqlite; connecting will fail");
    }

    if args.reveal {
        output::value(url.as_str());
    } else {
        output::value(url.redacted());
    }
    Ok(())
}
