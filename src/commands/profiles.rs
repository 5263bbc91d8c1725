//! `deidentify profiles`: lists the closed set of recognised compliance
//! profiles, so an operator can discover valid `--profile` values
//! without reading `compliance::profiles` source.

use anyhow::Result;
use clap::Args;
use console::style;

use voxelmask::compliance::profiles;

#[derive(Args, Debug)]
pub struct ProfilesArgs {}

pub fn run(_args: ProfilesArgs) -> Result<i32> {
    println!("{}", style("Recognised compliance profiles:").bold());
    for name in profiles::PROFILE_NAMES {
        let profile = profiles::resolve(name).expect("every named profile resolves");
        println!(
            "  {:<20} pixel_policy={:?} identifier_policy={:?}",
            style(*name).cyan(),
            profile.pixel_policy,
            profile.identifier_policy,
        );
    }
    Ok(0)
}
