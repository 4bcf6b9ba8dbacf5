use std::path::PathBuf;

use stowage_build::DockerfileGenerator;
use stowage_build::dockerfile::render_instruction;

use super::Project;

/// Validate everything `stowage build` would validate, without Docker.
pub async fn check() -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let project = Project::load(&project_dir)?;

    println!(
        "Manifest {} ({} requirement(s), {} package(s) resolved)",
        project.manifest.path().display(),
        project.manifest.requirements().len(),
        project.resolved.len(),
    );
    println!(
        "Plan OK: {} stage(s), {} filesystem layer(s), {} resolver",
        project.plan.stages.len(),
        project.plan.layer_count(),
        project.plan.strategy,
    );
    Ok(())
}

pub async fn render() -> anyhow::Result<()> {
    let project = Project::load(&PathBuf::from("."))?;
    print!("{}", DockerfileGenerator::new(&project.plan).render());
    Ok(())
}

pub async fn plan() -> anyhow::Result<()> {
    let project = Project::load(&PathBuf::from("."))?;

    println!("strategy: {}", project.plan.strategy);
    println!("manifest: {}", project.plan.manifest_digest);
    for stage in &project.plan.stages {
        println!();
        println!("[{}] FROM {}", stage.name, stage.base);
        for (i, instruction) in stage.instructions.iter().enumerate() {
            let marker = if instruction.creates_layer() { "+" } else { " " };
            println!("  {i:>2} {marker} {}", render_instruction(instruction));
        }
    }
    Ok(())
}
