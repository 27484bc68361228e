//! `hcwatch login-simulator`: scripted login against the developer simulator.

use tracing::info;

use crate::cli::LoginSimulatorArgs;
use crate::error::CliError;

use super::ActiveProfile;

pub async fn handle(args: LoginSimulatorArgs, profile: &ActiveProfile) -> Result<(), CliError> {
    let oauth = profile.oauth()?;
    if !oauth.endpoints().supports_automated_login() {
        return Err(CliError::Validation {
            field: "simulation".into(),
            reason: format!(
                "profile '{}' targets the production cloud; use `hcwatch authorize` instead",
                profile.name
            ),
        });
    }

    let token = oauth
        .simulator_login(&args.user, &args.password)
        .await
        .map_err(|e| CliError::from_core(e.into(), &profile.name))?;
    let path = profile.save_token(&token)?;
    info!(profile = %profile.name, path = %path.display(), "simulator login stored");
    println!("Logged in to the simulator. Token saved to {}", path.display());
    Ok(())
}
