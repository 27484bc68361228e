//! `hcwatch authorize`: the browser-based OAuth authorization-code flow.

use tracing::info;

use crate::cli::AuthorizeArgs;
use crate::error::CliError;

use super::ActiveProfile;

pub async fn handle(args: AuthorizeArgs, profile: &ActiveProfile) -> Result<(), CliError> {
    let oauth = profile.oauth()?;

    let Some(code) = args.code else {
        println!("Visit the following URL and approve access:");
        println!("{}", oauth.authorization_url());
        println!();
        println!("Then run: hcwatch authorize --profile {} --code <code>", profile.name);
        return Ok(());
    };

    let token = oauth
        .exchange_code(code.trim())
        .await
        .map_err(|e| CliError::from_core(e.into(), &profile.name))?;
    let path = profile.save_token(&token)?;
    info!(profile = %profile.name, path = %path.display(), "authorization stored");
    println!("Authorized. Token saved to {}", path.display());
    Ok(())
}
