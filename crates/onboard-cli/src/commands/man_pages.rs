use super::EXIT_SUCCESS;
use clap::{Command, CommandFactory};
use std::path::Path;

pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create dir: {e}"))?;
    let cmd = C::command();
    let mut written = render(&cmd, "onboard", dir)?;
    for sub in cmd.get_subcommands() {
        written += render(sub, &format!("onboard-{}", sub.get_name()), dir)?;
    }
    println!("{written} man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}

fn render(cmd: &Command, name: &str, dir: &Path) -> Result<usize, String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd.clone())
        .render(&mut buf)
        .map_err(|e| format!("man page render failed: {e}"))?;
    let path = dir.join(format!("{name}.1"));
    std::fs::write(&path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    Ok(1)
}
