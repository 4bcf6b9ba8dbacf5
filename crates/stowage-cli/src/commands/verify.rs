use std::path::PathBuf;

use stowage_core::StowageConfig;
use stowage_docker::DockerClient;

pub async fn verify(tag: Option<String>) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = StowageConfig::load(&project_dir)?;
    config.validate()?;
    let tag = super::image_tag(&config, &project_dir, tag);

    verify_tag(&DockerClient::new(), &config, &tag).await
}

async fn verify_tag(
    client: &DockerClient,
    config: &StowageConfig,
    tag: &str,
) -> anyhow::Result<()> {
    println!("Verifying {tag}...");
    let report = client
        .verify_image(tag, &super::expected_image(config))
        .await?;
    print!("{report}");

    if !report.all_passed() {
        anyhow::bail!("image {tag} does not match the build contract");
    }
    Ok(())
}
