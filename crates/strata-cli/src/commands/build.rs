use std::path::Path;

use strata_build::pipeline::StepRecord;
use strata_build::{BuildOptions, Builder};
use strata_exec::ChrootRunner;

use super::Project;

/// Build the project and seal an image.
pub async fn build(config: Option<&Path>, no_cache: bool, tag: Option<String>) -> anyhow::Result<()> {
    let project = Project::load(config)?;
    let plan = project.plan()?;
    let store = project.open_store()?;

    println!("Building from {} ...", plan.base);
    let options = BuildOptions {
        no_cache,
        tag: tag.clone(),
    };
    let result = Builder::new(&store.cache, &store.images, &store.bases, &ChrootRunner)
        .options(options)
        .build(&plan)
        .await;

    match result {
        Ok(report) => {
            let total = report.steps.len();
            for (i, record) in report.steps.iter().enumerate() {
                print_step(i + 1, total, record);
            }
            println!();
            match tag {
                Some(tag) => println!("Sealed image {} ({tag})", report.image.short_id()),
                None => println!("Sealed image {}", report.image.short_id()),
            }
            Ok(())
        }
        Err(failure) => {
            let total = failure.completed.len();
            for (i, record) in failure.completed.iter().enumerate() {
                print_step(i + 1, total, record);
            }
            eprintln!();
            eprintln!("Build failed in state {} [{}]", failure.state, failure.kind());
            if !failure.completed.is_empty() {
                eprintln!(
                    "{} completed layer(s) remain cached and will be reused on the next build.",
                    failure.completed.len()
                );
            }
            Err(failure.error.into())
        }
    }
}

fn print_step(index: usize, total: usize, record: &StepRecord) {
    let mut lines = record.instruction.lines();
    if let Some(first) = lines.next() {
        println!("Step {index}/{total} : {first}");
    }
    for line in lines {
        println!("           {line}");
    }
    println!(
        " ---> {} {} ({:.1}s)",
        record.cache,
        record.key.short(),
        record.elapsed.as_secs_f64()
    );
}
