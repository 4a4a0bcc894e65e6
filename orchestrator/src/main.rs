mod demo;

use std::{env, path::PathBuf};

use anyhow::{Context, Result, bail};
use demo::{Linear, Spring};
use orchestrator::{
    ProcessLauncher, Simulations, ThreadLauncher,
    configs::{DatasetConfig, SessionConfig},
};

const USAGE: &str = "usage: orchestrator <train|run> [config.json] [--processes|--in-process]
       orchestrator client    (HOST, PORT and CLIENT_ID are read from the environment)";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!("{USAGE}");
    };

    match command.as_str() {
        "client" => run_client(),
        "train" | "run" => {
            let config = match args.get(1).filter(|arg| !arg.starts_with("--")) {
                Some(path) => SessionConfig::from_json_file(path)
                    .with_context(|| format!("failed to load {path}"))?,
                None => demo_config(command == "train"),
            };

            let simulations = simulations(&args)?;
            let network = Box::new(Linear::new(0.1));

            if config.training {
                let summary = orchestrator::train(&config, simulations, network)?;
                println!(
                    "trained {} epoch(s), last mean loss {:.6}, network at {}",
                    summary.epochs,
                    summary.last_loss,
                    summary.network_path.display()
                );
            } else {
                let steps = orchestrator::run(&config, simulations, network)?;
                println!("ran {steps} prediction step(s)");
            }

            Ok(())
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

/// The entry point of the clients spawned by a `ProcessLauncher`.
fn run_client() -> Result<()> {
    let host = env::var("HOST").context("HOST is not set")?;
    let port: u16 = env::var("PORT").context("PORT is not set")?.parse()?;
    let client_id: usize = env::var("CLIENT_ID").map_or(Ok(0), |id| id.parse())?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(client::connect(client_id, (host.as_str(), port), Spring::new(client_id as u64)))?;
    Ok(())
}

fn simulations(args: &[String]) -> Result<Simulations> {
    let processes = args.iter().any(|arg| arg == "--processes");
    let in_process = args.iter().any(|arg| arg == "--in-process");

    Ok(match (processes, in_process) {
        (true, true) => bail!("--processes and --in-process are exclusive"),
        (true, false) => {
            let program = env::current_exe().context("can't locate the client executable")?;
            Simulations::Launched(Box::new(ProcessLauncher::new(program, vec!["client".into()])))
        }
        (false, true) => Simulations::InProcess(Box::new(Spring::new(0))),
        (false, false) => Simulations::Launched(Box::new(ThreadLauncher::new(|id| Spring::new(id as u64)))),
    })
}

fn demo_config(training: bool) -> SessionConfig {
    let mut config = SessionConfig::new(PathBuf::from("sessions"), "spring");
    config.training = training;
    config.nb_epochs = 5;
    config.nb_batches = 20;
    config.batch_size = 16;
    config.nb_steps = 100;
    config.environment.number_of_thread = 2;
    config.environment.simulations_per_step = 2;
    config.dataset = Some(DatasetConfig {
        partition_size: 1e-4,
        shuffle_dataset: true,
        ..Default::default()
    });
    config
}
