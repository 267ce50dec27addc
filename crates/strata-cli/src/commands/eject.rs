use std::path::Path;

use strata_build::dockerfile::DockerfileGenerator;

use super::Project;

pub fn eject(config: Option<&Path>) -> anyhow::Result<()> {
    let project = Project::load(config)?;
    let plan = project.plan()?;

    let dockerfile = DockerfileGenerator::new(&plan).render();
    let path = strata_build::eject::eject(&project.dir, &dockerfile)?;

    println!("Ejected build plan to {}", path.display());
    println!("Build it with: docker build -f {} .", path.display());
    Ok(())
}
