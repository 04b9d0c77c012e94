//! The `profile` command family: create, copy, delete, edit, list, show,
//! select, unselect, dump and diff. `profile detect` lives in
//! [`crate::commands::detect`].

use super::Context;
use crate::error::{Error, Result};
use crate::profile::{Profile, ProfilePatch};
use crate::storage::StorageLevel;
use tracing::info;

pub fn create(ctx: &Context, name: &str, level: StorageLevel, patch: &ProfilePatch) -> Result<()> {
    let mut profile = Profile::new(name);
    profile.apply(patch)?;
    ctx.store.create(profile, level)?;
    info!("Created profile {}", name);
    Ok(())
}

pub fn copy(ctx: &Context, source: &str, destination: &str) -> Result<()> {
    ctx.store.copy(source, destination)?;
    info!("Copied profile {} to {}", source, destination);
    Ok(())
}

pub fn delete(ctx: &Context, name: &str) -> Result<()> {
    ctx.store.delete(name)?;
    info!("Deleted profile {}", name);
    Ok(())
}

pub fn edit(ctx: &Context, name: &str, patch: &ProfilePatch) -> Result<()> {
    if patch.is_empty() {
        return Err(Error::InvalidArgument(
            "no edit requested; see 'profile edit --help'".to_string(),
        ));
    }
    let edited = ctx.store.update(name, |profile| profile.apply(patch))?;
    info!("Updated profile {}", edited.name);
    Ok(())
}

pub fn list(ctx: &Context, level: Option<StorageLevel>) -> Result<()> {
    let selected = ctx.store.selected()?;
    let profiles = ctx.store.list(level)?;

    if profiles.is_empty() {
        println!("No profiles. Create one with 'profile create' or 'init'.");
        return Ok(());
    }

    println!(
        "{:<2} {:<24} {:<10} {:<12} {:>9} {:>6}",
        "", "name", "level", "backend", "libraries", "files"
    );
    for (profile, level) in profiles {
        let marker = if selected.as_deref() == Some(profile.name.as_str()) {
            "*"
        } else {
            ""
        };
        println!(
            "{:<2} {:<24} {:<10} {:<12} {:>9} {:>6}",
            marker,
            profile.name,
            level.to_string(),
            profile.backend.as_deref().unwrap_or("-"),
            profile.libraries.len(),
            profile.files.len()
        );
    }
    Ok(())
}

pub fn show(ctx: &Context, name: Option<&str>) -> Result<()> {
    let profile = match name {
        Some(name) => ctx.store.get(name)?.0,
        None => ctx
            .store
            .selected_profile()?
            .ok_or(Error::NoProfileSelected)?,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&profile).map_err(|e| Error::Serialization(e.to_string()))?
    );
    Ok(())
}

pub fn select(ctx: &Context, name: &str) -> Result<()> {
    ctx.store.select(name)?;
    info!("Selected profile {}", name);
    Ok(())
}

pub fn unselect(ctx: &Context) -> Result<()> {
    ctx.store.unselect()?;
    info!("Cleared profile selection");
    Ok(())
}

pub fn dump(ctx: &Context, level: StorageLevel) -> Result<()> {
    println!("{}", ctx.store.dump(level)?);
    Ok(())
}

pub fn diff(ctx: &Context, left: &str, right: &str) -> Result<()> {
    let (left_profile, _) = ctx.store.get(left)?;
    let (right_profile, _) = ctx.store.get(right)?;

    let differences = left_profile.diff(&right_profile);
    if differences.is_empty() {
        println!("Profiles {} and {} are identical", left, right);
        return Ok(());
    }
    for difference in differences {
        println!("{}", difference);
    }
    Ok(())
}
