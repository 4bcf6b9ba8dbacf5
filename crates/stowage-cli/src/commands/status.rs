use stowage_docker::DockerClient;

pub async fn status(container: &str) -> anyhow::Result<()> {
    let client = DockerClient::new();
    let Some(health) = client.container_health(container).await? else {
        anyhow::bail!("container {container} has no healthcheck");
    };

    println!("{container}: {}", health.status);
    println!("failing streak: {}", health.failing_streak);
    if let Some(last) = health.log.last() {
        println!(
            "last probe: exit {} {}",
            last.exit_code,
            last.output.trim()
        );
    }

    if health.status == "unhealthy" {
        anyhow::bail!("container {container} is unhealthy");
    }
    Ok(())
}
