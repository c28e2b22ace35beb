use anyhow::Result;
use std::path::Path;

use crate::cml::LabPlatform;
use crate::error::PipelineError;
use crate::testbed::Testbed;

/// Real credentials for the jump host, replacing the exported placeholders
pub struct JumpHostLogin<'a> {
    pub alias: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

/// Export the named lab's testbed, fix up the jump host login and save it.
/// When several labs share the title the first one listed is used.
pub async fn retrieve_testbed(
    lab: &dyn LabPlatform,
    title: &str,
    jump: &JumpHostLogin<'_>,
    output: &Path,
) -> Result<Testbed> {
    let labs = lab.find_labs_by_title(title).await?;
    let chosen = labs
        .first()
        .ok_or_else(|| PipelineError::LabNotFound(title.to_string()))?;

    if labs.len() > 1 {
        tracing::warn!(
            "{} labs are titled '{}', using the first one ({})",
            labs.len(),
            title,
            chosen.id
        );
    }
    tracing::info!(
        "Exporting testbed for lab '{}' ({}, state={})",
        title,
        chosen.id,
        chosen.state.as_deref().unwrap_or("unknown")
    );

    let yaml = lab.export_testbed(&chosen.id).await?;
    let mut testbed = Testbed::from_yaml(&yaml)?;
    testbed.set_jump_host_credentials(jump.alias, jump.username, jump.password)?;
    testbed.save(output)?;

    tracing::info!(
        "Saved testbed with {} device(s) to {}",
        testbed.devices.len(),
        output.display()
    );
    Ok(testbed)
}
