use std::path::Path;

use strata_core::config::CONFIG_FILE;

const TEMPLATE: &str = r#"# strata build descriptor. Every key is optional; the values shown are the defaults.

[image]
# name = "python"
# tag = "3.8"

[system]
# packages = ["build-essential", "default-libmysqlclient-dev", "netcat"]
# refresh_index = true
# timeout_secs = 600

[dependencies]
# manifest = "requirements.txt"   # "" skips the dependency layer
# timeout_secs = 1200

[context]
# root = "."
# destination = "/app"
# exclude = ["*.pyc", "node_modules"]   # .git and .strata are always excluded

[runtime]
# timezone = "America/Detroit"   # "" skips timezone configuration
# env = { DJANGO_SETTINGS_MODULE = "app.settings" }

[entrypoint]
# command = ["/app/start.sh"]

[store]
# root = ".strata"   # overridden by STRATA_STORE
"#;

/// Write a commented default descriptor into the current directory.
pub fn init_project() -> anyhow::Result<()> {
    let path = Path::new(CONFIG_FILE);
    if path.exists() {
        eprintln!("{CONFIG_FILE} already exists, skipping");
        return Ok(());
    }
    std::fs::write(path, TEMPLATE)?;
    println!("Created {CONFIG_FILE}");

    if !Path::new("requirements.txt").exists() {
        eprintln!("Note: requirements.txt not found; set [dependencies].manifest or create it.");
    }

    println!();
    println!("Next steps:");
    println!();
    println!("  1. Import a base root filesystem:");
    println!("     strata import python:3.8 ./rootfs");
    println!();
    println!("  2. Build:");
    println!("     strata build --tag app");
    println!();
    println!("  3. Run:");
    println!("     strata run app");
    Ok(())
}
