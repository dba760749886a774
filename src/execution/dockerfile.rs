//! Environment image synthesis for tasks.
//!
//! Renders the Dockerfile used to provision a task environment, plus the
//! human-facing setup commands printed by the `env` command.

use tera::{Context, Tera};
use tracing::warn;

use crate::task::Task;

const DOCKERFILE_TEMPLATE: &str = r#"FROM {{ base_image }}

LABEL distro_bench.task.id="{{ task_id }}"
ENV DEBIAN_FRONTEND=noninteractive
{% if packages %}
RUN apt-get update && apt-get install -y {{ packages | join(sep=" ") }} && rm -rf /var/lib/apt/lists/*
{% endif %}
WORKDIR {{ workdir }}
"#;

const DOCKER_RUN_TEMPLATE: &str = r#"docker run -it --rm \
    -v $(pwd):{{ workdir }} \
    --name {{ prefix }}-{{ task_id }} \
    {{ base_image }} \
    bash -c "{% if packages %}apt-get update && apt-get install -y {{ packages | join(sep=" ") }} && {% endif %}bash""#;

/// Validate a package name to prevent command injection.
///
/// Package names may only contain alphanumeric characters, hyphens, underscores,
/// periods, colons (for versioning), and plus signs.
pub fn is_valid_package_name(package: &str) -> bool {
    if package.is_empty() {
        return false;
    }
    package
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '+'))
}

/// Returns the valid package names from a list, logging each one dropped.
pub fn filter_valid_packages(packages: &[String]) -> Vec<String> {
    packages
        .iter()
        .filter(|p| {
            let valid = is_valid_package_name(p);
            if !valid {
                warn!(package = %p, "Dropping invalid package name");
            }
            valid
        })
        .cloned()
        .collect()
}

fn task_context(task: &Task, workdir: &str) -> Context {
    let mut context = Context::new();
    context.insert("base_image", &task.environment.base_image);
    context.insert("task_id", &task.id);
    context.insert(
        "packages",
        &filter_valid_packages(&task.environment.required_packages),
    );
    context.insert("workdir", workdir);
    context
}

/// Renders the environment Dockerfile for a task.
pub fn render_dockerfile(task: &Task, workdir: &str) -> Result<String, tera::Error> {
    Tera::one_off(DOCKERFILE_TEMPLATE, &task_context(task, workdir), false)
}

/// Renders an interactive `docker run` one-liner that reproduces the environment.
pub fn render_docker_run(task: &Task, workdir: &str, prefix: &str) -> Result<String, tera::Error> {
    let mut context = task_context(task, workdir);
    context.insert("prefix", prefix);
    Tera::one_off(DOCKER_RUN_TEMPLATE, &context, false)
}

/// The apt-get command that installs a task's packages on the local host.
pub fn local_install_command(task: &Task) -> String {
    let packages = filter_valid_packages(&task.environment.required_packages);
    if packages.is_empty() {
        return String::from("# no packages required");
    }
    format!(
        "sudo apt-get update && sudo apt-get install -y {}",
        packages.join(" ")
    )
}
