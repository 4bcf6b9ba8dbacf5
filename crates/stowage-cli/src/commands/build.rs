use std::path::PathBuf;

use stowage_build::bundle;
use stowage_docker::DockerClient;
use stowage_docker::client::staging_tag;

use super::Project;

/// Execute the full build pipeline.
pub async fn build(tag: Option<String>, allow_dirty: bool, no_verify: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");

    // Dirty check: refuse to build uncommitted changes unless --allow-dirty
    if !allow_dirty && bundle::is_dirty(&project_dir)? {
        anyhow::bail!(
            "uncommitted changes detected.\n\
             Commit your changes, or use `stowage build --allow-dirty` to build anyway."
        );
    }

    // Config, manifest resolution, and plan validation all happen before
    // anything reaches Docker.
    let project = Project::load(&project_dir)?;
    let tag = super::image_tag(&project.config, &project_dir, tag);
    println!(
        "Resolved {} package(s) with the {} resolver",
        project.resolved.len(),
        project.plan.strategy
    );

    let dockerfile = project.dockerfile(&project_dir)?;

    println!("Bundling source...");
    let bundle_dir = bundle::create_bundle(&project_dir, &dockerfile, &project.config.build.manifest)?;

    let client = DockerClient::new();
    if no_verify {
        println!("Building {tag}...");
        client.build(&bundle_dir, &tag).await?;
        println!("Built {tag} (verification skipped)");
        return Ok(());
    }

    // The image only receives `tag` once it passes verification.
    println!("Building {tag} (staged as {})...", staging_tag(&tag));
    let report = client
        .build_verified(&bundle_dir, &tag, &super::expected_image(&project.config))
        .await?;
    print!("{report}");
    if !report.all_passed() {
        anyhow::bail!("image does not match the build contract; {tag} was left unchanged");
    }

    println!();
    println!("Built {tag}");
    Ok(())
}
