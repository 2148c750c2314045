//! Status command implementation

use std::path::Path;

use anyhow::Result;

use crate::output::format_profiles;
use crate::profiles::{profiles_path, FileProfiles};

/// Show the compute node session registered on this machine
pub fn status_command(config_path: &Path, json: bool) -> Result<()> {
    let profiles = FileProfiles::new(profiles_path(config_path)).list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
    } else {
        println!("{}", format_profiles(&profiles));
    }
    Ok(())
}
