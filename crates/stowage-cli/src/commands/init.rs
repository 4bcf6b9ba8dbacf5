use std::path::Path;

const STOWAGE_TOML: &str = r#"[project]
# name = "my-service"

[build]
# strategy = "fast"            # fast (uv) | standard (pip)
# manifest = "requirements.txt"
# build_packages = ["build-essential"]
# runtime_packages = []
# include = ["app", "main.py"]

[runtime]
# server = "uvicorn"
# app = "main:app"
# port = 8000
# workers = 2

[health]
# path = "/health"
# interval_secs = 30
# start_period_secs = 40
# retries = 3
"#;

const DOCKERIGNORE: &str = "\
.git
.venv
.env
__pycache__
*.pyc
.stowage-bundle
";

/// Initialize stowage in an existing Python project.
pub async fn init_project() -> anyhow::Result<()> {
    // Must be inside a Python project with a pinned manifest
    if !Path::new("requirements.txt").exists() {
        anyhow::bail!("requirements.txt not found. Run this command from a Python project root.");
    }

    let mut created = Vec::new();

    let stowage_toml_path = Path::new(stowage_core::CONFIG_FILE);
    if stowage_toml_path.exists() {
        eprintln!("stowage.toml already exists, skipping");
    } else {
        std::fs::write(stowage_toml_path, STOWAGE_TOML)?;
        created.push("stowage.toml");
    }

    let dockerignore_path = Path::new(".dockerignore");
    if dockerignore_path.exists() {
        eprintln!(".dockerignore already exists, skipping");
    } else {
        std::fs::write(dockerignore_path, DOCKERIGNORE)?;
        created.push(".dockerignore");
    }

    if created.is_empty() {
        println!("Nothing to create, already initialized.");
    } else {
        for f in &created {
            println!("Created {f}");
        }
    }

    println!();
    println!("Next steps:");
    println!();
    println!("  1. Serve a health endpoint from your app:");
    println!();
    println!("     @app.get(\"/health\")");
    println!("     def health():");
    println!("         return {{\"status\": \"ok\"}}");
    println!();
    println!("  2. Check the build plan:");
    println!("     stowage check");
    println!();
    println!("  3. Build:");
    println!("     stowage build");

    Ok(())
}
