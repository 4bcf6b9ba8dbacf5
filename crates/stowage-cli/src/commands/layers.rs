use std::path::PathBuf;

use serde::Serialize;
use stowage_build::{ContextSnapshot, LayerCache};

use super::Project;

#[derive(Serialize)]
struct LayerRow<'a> {
    stage: &'a str,
    index: usize,
    instruction: &'a str,
    key: &'a str,
    filesystem: bool,
}

/// Cache keys of every instruction for the sources in the working tree.
pub async fn layers(json: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let project = Project::load(&project_dir)?;
    let context = ContextSnapshot::capture(&project_dir)?;
    let cache = LayerCache::compute(&project.plan, &context)?;

    if json {
        let rows: Vec<LayerRow<'_>> = cache
            .layers()
            .iter()
            .map(|l| LayerRow {
                stage: &l.stage,
                index: l.index,
                instruction: &l.instruction,
                key: &l.key,
                filesystem: l.filesystem,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{} file(s) in build context", context.len());
    for layer in cache.layers() {
        let marker = if layer.filesystem { "+" } else { " " };
        println!(
            "{stage:<8} {index:>2} {marker} {key}  {instruction}",
            stage = layer.stage,
            index = layer.index,
            key = &layer.key[..12],
            instruction = first_line(&layer.instruction),
        );
    }
    Ok(())
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}
