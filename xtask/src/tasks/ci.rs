use colored::Colorize;
use std::{
    env,
    process::{Command, ExitStatus, Stdio},
};

use crate::{project_root, DynError};

pub fn ci() -> Result<(), DynError> {
    let tasks = vec![
        ("cargo fmt", vec!["fmt", "--all", "--", "--check"]),
        ("cargo check on code", vec!["check", "--workspace"]),
        (
            "cargo check on examples",
            vec!["check", "-p", "replset_client", "--examples"],
        ),
        (
            "cargo clippy",
            vec!["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        ),
        ("cargo test", vec!["test", "-p", "replset_client"]),
        ("cargo test on docs", vec!["test", "-p", "replset_client", "--doc"]),
        ("cargo audit", vec!["audit"]),
    ];

    for (name, args) in tasks {
        let mut cmd = cargo_command(args);
        println!(
            "{}{}{}",
            "Running ".truecolor(255, 165, 0),
            name.truecolor(255, 165, 0),
            "...".truecolor(255, 165, 0)
        );
        let status = cmd.status()?;
        print_error_with_status_code(name, status);
        if !status.success() {
            return Err(format!("`{}` failed", name).into());
        }
    }

    Ok(())
}

fn print_error_with_status_code(task: &str, status: ExitStatus) {
    let code = match status.code() {
        Some(x) => x.to_string(),
        None => "<< no status code >>".to_string(),
    };
    if !status.success() {
        println!(
            "{} `{}` finished with a non-zero status code: {}",
            "Error:".to_string().red(),
            task.blue(),
            code
        );
    }
}

fn cargo_command(args: Vec<&str>) -> Command {
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut cmd = Command::new(cargo);
    cmd.current_dir(project_root())
        .args(args)
        .stdout(Stdio::inherit());
    cmd
}
