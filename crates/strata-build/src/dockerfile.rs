use crate::plan::BuildPlan;
use crate::steps::{ContextCopy, Dependencies, Step, SystemPackages, Timezone};

/// Renders a build plan as an equivalent single-stage Dockerfile.
///
/// Layer-producing lines are the same instruction text the pipeline keys
/// its layers on.
pub struct DockerfileGenerator<'a> {
    plan: &'a BuildPlan,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(plan: &'a BuildPlan) -> Self {
        Self { plan }
    }

    pub fn render(&self) -> String {
        let plan = self.plan;
        let mut out = String::new();

        out.push_str("# === Base ===\n");
        out.push_str(&format!("FROM {}\n", plan.base));

        let packages = SystemPackages::from_plan(plan);
        if !packages.is_empty() {
            out.push_str("\n# === System packages ===\n");
            push_line(&mut out, &packages.instruction());
        }

        out.push_str(&format!("\nWORKDIR {}\n", plan.destination));

        if let Some(dependencies) = Dependencies::from_plan(plan) {
            out.push_str("\n# === Dependencies (cached until the manifest changes) ===\n");
            push_line(&mut out, &dependencies.instruction());
        }

        out.push_str("\n# === Application source ===\n");
        push_line(&mut out, &ContextCopy::from_plan(plan).instruction());

        if !plan.env.is_empty() || plan.timezone.is_some() {
            out.push_str("\n# === Runtime ===\n");
        }
        for (key, value) in plan.env.iter() {
            out.push_str(&format!("ENV {key}={}\n", env_value(value)));
        }
        if let Some(tz) = &plan.timezone {
            push_line(&mut out, &Timezone::new(tz.clone()).instruction());
        }

        if let Some(argv) = plan.entrypoint() {
            let items: Vec<String> = argv
                .iter()
                .map(|arg| serde_json::Value::String(arg.clone()).to_string())
                .collect();
            out.push_str(&format!("\nENTRYPOINT [{}]\n", items.join(", ")));
        }
        out
    }
}

fn push_line(out: &mut String, instruction: &str) {
    out.push_str(instruction);
    out.push('\n');
}

fn env_value(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '"' | '\'' | '\\' | '$'));
    if plain {
        value.to_owned()
    } else {
        serde_json::Value::String(value.to_owned()).to_string()
    }
}
