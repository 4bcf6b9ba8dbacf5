use std::path::PathBuf;

use stowage_build::DockerfileGenerator;

use super::Project;

pub async fn eject() -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let project = Project::load(&project_dir)?;

    let dockerfile = DockerfileGenerator::new(&project.plan).render();
    stowage_build::eject::eject(&project_dir, &dockerfile)?;

    println!("Ejected build config to .stowage/Dockerfile");
    println!("You can now edit it directly. stowage build will use this file.");
    Ok(())
}
