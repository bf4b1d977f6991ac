//! sliding-window ARQ link simulator

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use arqsim_link::FileAuditLog;
use arqsim_sim::config::{self, OUTPUT_FILE};
use arqsim_sim::{scenarios, RunSummary};
use colored::Colorize;

const DEMO_SEED: u64 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "-h" | "--help" => print_usage(),
        "--demo" => run_demo().await?,
        dir => {
            let out = match args.get(2).map(String::as_str) {
                Some("--out") => match args.get(3) {
                    Some(path) => Some(PathBuf::from(path)),
                    None => bail!("--out requires a file path"),
                },
                Some(other) => bail!("unknown option: {other}"),
                None => None,
            };
            run_scenario(PathBuf::from(dir), out).await?;
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"arq_sim - sliding-window ARQ link simulator

USAGE:
    arq_sim <SCENARIO_DIR> [--out <FILE>]
    arq_sim --demo

The scenario directory holds params.toml, coordinator.txt and
input0.txt/input1.txt. The audit log defaults to <SCENARIO_DIR>/output.txt.
Set RUST_LOG=debug for protocol tracing."#
    );
}

async fn run_scenario(dir: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let setup = config::load(&dir)
        .await
        .with_context(|| format!("loading scenario {}", dir.display()))?;
    let out = out.unwrap_or_else(|| dir.join(OUTPUT_FILE));
    let log = FileAuditLog::create(&out)
        .with_context(|| format!("creating audit log {}", out.display()))?;

    let name = dir.display().to_string();
    let summary = tokio::task::spawn_blocking(move || -> Result<RunSummary> {
        let (sim, report) = setup.run(log)?;
        Ok(RunSummary::collect(name, &sim, report))
    })
    .await??;

    print_summary(&summary);
    println!("Audit log written to {}", out.display());
    Ok(())
}

async fn run_demo() -> Result<()> {
    println!("{}", "ARQ Link Simulation".bright_blue().bold());
    println!("{}", "===================".bright_blue());

    let demo = scenarios::demo_scenarios();
    for scenario in &demo {
        println!("{} {}", scenario.name.bright_green(), scenario.description);
    }
    println!();

    let summaries = scenarios::run_all(demo, DEMO_SEED).await?;
    for summary in &summaries {
        print_summary(summary);
        println!("{}", "-".repeat(50));
    }

    let complete = summaries.iter().filter(|s| s.is_complete()).count();
    println!(
        "{}",
        format!("{complete}/{} runs completed", summaries.len())
            .bright_green()
            .bold()
    );
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("{}", format!(">>> {}", summary.name).bright_yellow().bold());

    let report = &summary.report;
    match report.finished_at {
        Some(at) => println!(
            "{} at {:.2}s after {} events",
            "Completed".green(),
            at.as_secs_f64(),
            report.events
        ),
        None => println!(
            "{} at {:.2}s after {} events",
            "Not completed".red(),
            report.ended_at.as_secs_f64(),
            report.events
        ),
    }

    if let Some(sender) = summary.sender {
        println!(
            "Sender: {} frames, {} retransmissions, {} timeouts, {} ACKs, {} NACKs",
            sender.transmissions, sender.retransmissions, sender.timeouts, sender.acks, sender.nacks
        );
    }
    if let Some(receiver) = summary.receiver {
        println!(
            "Receiver: {} frames, {} accepted, {} corrupted, {} ACKs, {} NACKs",
            receiver.frames, receiver.accepted, receiver.corrupted, receiver.acks, receiver.nacks
        );
    }
    println!("Delivered: {}", summary.delivered.join(" "));
}
