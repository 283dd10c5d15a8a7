use std::fs;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;

use station_autopilot::constants::{MAX_SIM_FRAMES, WEIGHT_INIT_SEED};
use station_autopilot::{
    default_network, CancelToken, SeededRng, Simulation, SimulationResult, TrainerConfig,
    TrainingSession,
};

#[derive(Parser, Debug)]
#[command(name = "station-autopilot")]
#[command(about = "Train and evaluate the neural autopilot against the station-approach simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a wall-clock-bounded training session (press Enter to stop early)
    Train {
        /// Session length in seconds
        #[arg(long, default_value_t = 1_800)]
        duration_secs: u64,
        /// Examples per training batch
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
        #[arg(long, default_value_t = 0.01)]
        learning_rate: f32,
        /// Full fitness evaluation every N batches
        #[arg(long, default_value_t = 100)]
        eval_interval: u64,
        /// Session seed (weight init, batches, evaluation seeds)
        #[arg(long, default_value_t = WEIGHT_INIT_SEED)]
        seed: u32,
        /// Directory for model files, the training log, and the summary
        #[arg(long, default_value = "training")]
        out_dir: PathBuf,
    },
    /// Evaluate a trained model over many seeds and write a JSON report
    Evaluate {
        /// Path to a saved model file
        #[arg(long)]
        model: PathBuf,
        #[arg(long, default_value_t = 0x5EED)]
        seed_start: u32,
        #[arg(long, default_value_t = 20)]
        seed_count: u32,
        #[arg(long, default_value_t = MAX_SIM_FRAMES)]
        max_frames: u32,
        /// Thread cap for the evaluation fan-out
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Debug, Serialize)]
struct SeedRecord {
    seed: u32,
    seed_hex: String,
    #[serde(flatten)]
    result: SimulationResult,
}

#[derive(Clone, Debug, Serialize)]
struct EvaluationReport {
    model: String,
    max_frames: u32,
    seed_count: usize,
    wins: usize,
    hits: usize,
    timeouts: usize,
    win_rate: f64,
    avg_loss: f64,
    avg_frames: f64,
    runs: Vec<SeedRecord>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Train {
            duration_secs,
            batch_size,
            learning_rate,
            eval_interval,
            seed,
            out_dir,
        } => train(
            duration_secs,
            batch_size,
            learning_rate,
            eval_interval,
            seed,
            out_dir,
        ),
        Commands::Evaluate {
            model,
            seed_start,
            seed_count,
            max_frames,
            jobs,
            output,
        } => evaluate(model, seed_start, seed_count, max_frames, jobs, output),
    }
}

fn train(
    duration_secs: u64,
    batch_size: usize,
    learning_rate: f32,
    eval_interval: u64,
    seed: u32,
    out_dir: PathBuf,
) -> Result<()> {
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed creating {}", out_dir.display()))?;

    let mut config = TrainerConfig::new(&out_dir);
    config.duration = Duration::from_secs(duration_secs);
    config.examples_per_batch = batch_size;
    config.learning_rate = learning_rate;
    config.evaluation_interval = eval_interval;
    config.seed = seed;

    let mut rng = SeededRng::new(seed);
    let network = default_network(&mut rng);
    let mut session = TrainingSession::new(network, config);

    let resumed = session.initialize()?;
    println!(
        "{} | {}s budget, {} examples/batch, lr {}, eval every {} batches",
        if resumed {
            "resuming previous session"
        } else {
            "starting fresh session"
        },
        duration_secs,
        batch_size,
        learning_rate,
        eval_interval
    );
    println!("press Enter to stop early and keep the best model\n");

    let cancel = CancelToken::new();
    spawn_stdin_watcher(cancel.clone());

    let summary = session.run(&cancel)?;
    println!(
        "\ntraining {}: {} batches, best loss {:?} at batch {}, winning model: {}",
        if summary.stopped_early {
            "stopped early"
        } else {
            "complete"
        },
        summary.total_batches,
        summary.best_loss,
        summary.best_batch,
        summary.has_winning_model
    );
    Ok(())
}

/// Watch stdin from a background thread and trip the token on the first
/// line. The training loop itself never blocks on input.
fn spawn_stdin_watcher(cancel: CancelToken) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_ok() {
            cancel.cancel();
        }
    });
}

fn evaluate(
    model: PathBuf,
    seed_start: u32,
    seed_count: u32,
    max_frames: u32,
    jobs: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    if seed_count == 0 {
        return Err(anyhow!("evaluation requires at least one seed"));
    }

    let mut rng = SeededRng::new(WEIGHT_INIT_SEED);
    let mut network = default_network(&mut rng);
    network
        .load_model(&model)
        .with_context(|| format!("failed loading model {}", model.display()))?;

    let seeds: Vec<u32> = (0..seed_count).map(|i| seed_start.wrapping_add(i)).collect();
    let run_one = |seed: &u32| -> Result<SeedRecord> {
        let result = Simulation::run(&network, *seed, max_frames)
            .with_context(|| format!("evaluation failed for seed={seed:#x}"))?;
        Ok(SeedRecord {
            seed: *seed,
            seed_hex: format!("{seed:#010x}"),
            result,
        })
    };

    let results: Vec<Result<SeedRecord>> = if let Some(jobs) = jobs {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("failed to build rayon threadpool")?;
        pool.install(|| seeds.par_iter().map(run_one).collect())
    } else {
        seeds.par_iter().map(run_one).collect()
    };

    let mut runs = Vec::with_capacity(results.len());
    for result in results {
        runs.push(result?);
    }

    let wins = runs.iter().filter(|r| r.result.won).count();
    let hits = runs.iter().filter(|r| r.result.hit).count();
    let total = runs.len();
    let report = EvaluationReport {
        model: model.display().to_string(),
        max_frames,
        seed_count: total,
        wins,
        hits,
        timeouts: total - wins - hits,
        win_rate: wins as f64 / total as f64,
        avg_loss: runs.iter().map(|r| r.result.total_loss as f64).sum::<f64>() / total as f64,
        avg_frames: runs
            .iter()
            .map(|r| r.result.frames_played as f64)
            .sum::<f64>()
            / total as f64,
        runs,
    };

    println!(
        "{}/{} wins ({:.0}%), {} hits, avg loss {:.2}, avg frames {:.0}",
        report.wins,
        report.seed_count,
        report.win_rate * 100.0,
        report.hits,
        report.avg_loss,
        report.avg_frames
    );

    if let Some(path) = output {
        fs::write(
            &path,
            serde_json::to_vec_pretty(&report).context("failed to serialize report")?,
        )
        .with_context(|| format!("failed writing {}", path.display()))?;
        println!("report written to {}", path.display());
    }
    Ok(())
}
