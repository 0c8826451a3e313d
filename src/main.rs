use anyhow::Context;
use chrono::Utc;
use clap::Parser;

use yara_forge::{banner, init_logger, section_header, Cli, ForgeRunner};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug, Some(cli.log_file.as_path()));

    println!("{}", banner());
    let config = cli.resolve_config().context("无法加载配置")?;
    let runner = ForgeRunner::new(config);
    if let Err(e) = runner.cancel_on_interrupt() {
        log::warn!("Ctrl-C will not stop the run cleanly: {}", e);
    }
    let now = Utc::now();

    println!("{}", section_header("Retrieving YARA rule sets"));
    let collections = runner.collect(now);

    println!("{}", section_header("Processing YARA rules"));
    let mut output = runner
        .process(&collections, now)
        .context("规则处理失败")?;

    println!("{}", section_header("Writing YARA rule packages"));
    let summary = runner
        .write(&mut output, &collections, now)
        .context("规则包写出失败")?;

    for outcome in &summary.outcomes {
        match &outcome.error {
            None => log::info!(
                "Package '{}': {} rule(s) -> {}",
                outcome.tier,
                outcome.rules,
                outcome.path.display()
            ),
            Some(e) => log::error!("Package '{}' not written: {}", outcome.tier, e),
        }
    }
    if let Some(path) = &summary.report_path {
        log::info!("Build report: {}", path.display());
    }
    log::info!(
        "Done: {} of {} package(s) written, {} diagnostic(s)",
        summary.written(),
        summary.outcomes.len(),
        output.report.diagnostics.len()
    );
    Ok(())
}
