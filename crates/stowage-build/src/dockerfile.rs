use crate::plan::{BUILDER_STAGE, BuildPlan, CopyStep, Instruction, RUNTIME_STAGE};

/// Renders a validated [`BuildPlan`] as a multi-stage Dockerfile.
pub struct DockerfileGenerator<'a> {
    plan: &'a BuildPlan,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(plan: &'a BuildPlan) -> Self {
        Self { plan }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# syntax=docker/dockerfile:1\n");
        out.push_str(&format!(
            "# Generated by stowage ({} resolver). Edit stowage.toml, or eject to customize.\n",
            self.plan.strategy
        ));

        for stage in &self.plan.stages {
            out.push('\n');
            out.push_str(&format!("# === {} ===\n", stage_title(&stage.name)));
            out.push_str(&format!("FROM {} AS {}\n", stage.base, stage.name));
            for instruction in &stage.instructions {
                out.push_str(&render_instruction(instruction));
                out.push('\n');
            }
        }
        out
    }
}

fn stage_title(name: &str) -> String {
    match name {
        BUILDER_STAGE => "Builder: toolchain + dependency environment".to_owned(),
        RUNTIME_STAGE => "Runtime: environment artifact + application source".to_owned(),
        other => format!("Stage: {other}"),
    }
}

/// One instruction as a single Dockerfile line.
///
/// The text doubles as the instruction's contribution to its layer key, so
/// it must be stable for a given instruction.
pub fn render_instruction(instruction: &Instruction) -> String {
    match instruction {
        Instruction::Env { key, value } => format!("ENV {key}={}", env_value(value)),
        Instruction::Workdir(dir) => format!("WORKDIR {dir}"),
        Instruction::Run(run) => format!("RUN {}", run.command),
        Instruction::Copy(copy) => render_copy(copy),
        Instruction::User(user) => format!("USER {user}"),
        Instruction::Expose(port) => format!("EXPOSE {port}"),
        Instruction::Healthcheck(hc) => format!(
            "HEALTHCHECK --interval={}s --timeout={}s --start-period={}s --retries={} CMD {}",
            hc.probe.interval.as_secs(),
            hc.probe.timeout.as_secs(),
            hc.probe.start_period.as_secs(),
            hc.probe.retries,
            exec_form(&hc.command),
        ),
        Instruction::Cmd(argv) => format!("CMD {}", exec_form(argv)),
    }
}

fn render_copy(copy: &CopyStep) -> String {
    let mut line = String::from("COPY");
    if let Some(from) = &copy.from {
        line.push_str(&format!(" --from={from}"));
    }
    if let Some(owner) = &copy.chown {
        line.push_str(&format!(" --chown={owner}"));
    }

    let mut paths = copy.sources.clone();
    paths.push(copy.dest.clone());
    if paths.iter().any(|p| p.contains(char::is_whitespace)) {
        line.push(' ');
        line.push_str(&exec_form(&paths));
    } else {
        for path in paths {
            line.push(' ');
            line.push_str(&path);
        }
    }
    line
}

/// JSON array form, as used by `CMD` and `HEALTHCHECK CMD`.
fn exec_form(argv: &[String]) -> String {
    let items: Vec<String> = argv
        .iter()
        .map(|a| serde_json::Value::String(a.clone()).to_string())
        .collect();
    format!("[{}]", items.join(", "))
}

fn env_value(value: &str) -> String {
    if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        serde_json::Value::String(value.to_owned()).to_string()
    } else {
        value.to_owned()
    }
}
