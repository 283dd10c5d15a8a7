//! Long-running training session: heuristic batch generation, online
//! backprop, periodic fitness evaluation against the simulator, and the
//! model-acceptance protocol that decides which network survives on disk.
//!
//! Disk is the synchronization primitive: the best verified snapshot is
//! reloaded before every batch and rewritten only on acceptance, so at most
//! one batch of training is ever in flight relative to the checkpoint.
//! IO failures degrade to warnings; training never aborts over a missing
//! checkpoint, it just continues from the in-memory weights.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::matrix::Matrix;
use crate::network::{Network, TrainingExample};
use crate::rng::SeededRng;
use crate::sim::Simulation;

pub const LOG_HEADER: &str = "Batch #,Average Loss,Best Loss,Improvement";
pub const LOG_SESSION_SEPARATOR: &str = "--- Continued Training Session ---";

/// Externally injected stop signal, checked once per loop iteration; an
/// in-flight batch always completes.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct TrainerConfig {
    pub examples_per_batch: usize,
    pub learning_rate: f32,
    pub duration: Duration,
    pub evaluation_interval: u64,
    pub evaluation_max_frames: u32,
    pub validation_tests: usize,
    pub validation_required_wins: usize,
    pub validation_max_frames: u32,
    pub display_interval: u64,
    pub best_model_path: PathBuf,
    pub trained_model_path: PathBuf,
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
    pub seed: u32,
}

impl TrainerConfig {
    /// Defaults with all artifacts under `out_dir`.
    pub fn new(out_dir: &Path) -> Self {
        Self {
            examples_per_batch: EXAMPLES_PER_BATCH,
            learning_rate: LEARNING_RATE,
            duration: Duration::from_secs(TRAINING_TIME_SECONDS),
            evaluation_interval: EVALUATION_INTERVAL_BATCHES,
            evaluation_max_frames: MAX_SIM_FRAMES,
            validation_tests: VALIDATION_TESTS,
            validation_required_wins: VALIDATION_REQUIRED_WINS,
            validation_max_frames: VALIDATION_MAX_FRAMES,
            display_interval: 50,
            best_model_path: out_dir.join("best_model.nn"),
            trained_model_path: out_dir.join("trained_model.nn"),
            log_path: out_dir.join("training_log.txt"),
            summary_path: out_dir.join("training_summary.json"),
            seed: WEIGHT_INIT_SEED,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TrainerState {
    pub best_loss: f32,
    pub best_batch: u64,
    pub total_batches: u64,
    pub has_winning_model: bool,
    pub best_win_loss: f32,
}

impl Default for TrainerState {
    fn default() -> Self {
        Self {
            best_loss: f32::MAX,
            best_batch: 0,
            total_batches: 0,
            has_winning_model: false,
            best_win_loss: f32::MAX,
        }
    }
}

/// What the acceptance protocol decided about one fitness evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acceptance {
    /// First win that survived the consistency gate; accepted unconditionally.
    FirstValidatedWin,
    /// Consistent win with a strictly lower loss than the reigning winner.
    ImprovedValidatedWin,
    /// Consistent win, but not better than the reigning winner.
    WinNotBest,
    /// Won once but failed the repeated-run gate; rejected.
    LuckyWinRejected,
    /// No winner exists yet and this loss is a new best.
    ImprovedLoss,
    NoChange,
}

impl Acceptance {
    pub fn accepted(self) -> bool {
        matches!(
            self,
            Self::FirstValidatedWin | Self::ImprovedValidatedWin | Self::ImprovedLoss
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub total_batches: u64,
    pub best_loss: Option<f32>,
    pub best_batch: u64,
    pub has_winning_model: bool,
    pub best_win_loss: Option<f32>,
    pub wall_seconds: u64,
    pub stopped_early: bool,
}

pub struct TrainingSession {
    network: Network,
    config: TrainerConfig,
    state: TrainerState,
    rng: SeededRng,
}

impl TrainingSession {
    pub fn new(network: Network, config: TrainerConfig) -> Self {
        let rng = SeededRng::new(config.seed);
        Self {
            network,
            config,
            state: TrainerState::default(),
            rng,
        }
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    /// Resume from a previous session if its artifacts exist: reload the
    /// trained model and recover the best loss from the log. Returns whether
    /// a previous session was picked up.
    pub fn initialize(&mut self) -> Result<bool> {
        let resumed = if self.config.trained_model_path.exists() {
            match self.network.load_model(&self.config.trained_model_path) {
                Ok(()) => true,
                Err(err) => {
                    eprintln!(
                        "warning: could not load {}: {err}; starting from fresh weights",
                        self.config.trained_model_path.display()
                    );
                    false
                }
            }
        } else {
            false
        };

        if resumed {
            self.append_log_line(LOG_SESSION_SEPARATOR);
            if let Some(best) = read_last_best_loss(&self.config.log_path) {
                self.state.best_loss = best;
            }
        } else {
            self.append_log_line(LOG_HEADER);
        }
        Ok(resumed)
    }

    /// Run the session until the wall-clock budget elapses or the token
    /// fires. Finalizes the trained model and writes the JSON summary.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<TrainingSummary> {
        let validation_set = self.generate_examples(self.config.examples_per_batch / 5);
        let started = Instant::now();
        let mut stopped_early = false;

        loop {
            if cancel.is_cancelled() {
                stopped_early = true;
                break;
            }
            if started.elapsed() >= self.config.duration {
                break;
            }

            // Always resume from the best verified weights, not the
            // in-memory trajectory.
            self.reload_best_snapshot();

            self.state.total_batches += 1;
            let batch = self.generate_examples(self.config.examples_per_batch);
            let batch_loss = self
                .network
                .train_batch(&batch, self.config.learning_rate)
                .context("batch training failed")?;
            let validation_loss = self
                .network
                .calculate_loss(&validation_set)
                .context("validation failed")?;

            let mut improvement = 0.0f32;

            if self.state.total_batches % self.config.evaluation_interval == 0 {
                let seed = self.rng.next_u32();
                let result =
                    Simulation::run(&self.network, seed, self.config.evaluation_max_frames)
                        .context("fitness evaluation failed")?;
                let consistent = if result.won {
                    self.validate_consistency()?
                } else {
                    false
                };
                let previous_best = self.effective_best();
                let outcome = self.apply_evaluation(result.total_loss, result.won, consistent);
                if outcome.accepted() {
                    improvement = if previous_best == f32::MAX {
                        1.0
                    } else {
                        previous_best - self.effective_best()
                    };
                }
                println!(
                    "batch {:>6} | eval loss {:>8.2} | {} | {:?}",
                    self.state.total_batches,
                    result.total_loss,
                    if result.won {
                        "WIN"
                    } else if result.hit {
                        "HIT"
                    } else {
                        "TIMEOUT"
                    },
                    outcome,
                );
            } else if !self.state.has_winning_model && validation_loss < self.state.best_loss {
                improvement = if self.state.best_loss == f32::MAX {
                    1.0
                } else {
                    self.state.best_loss - validation_loss
                };
                self.state.best_loss = validation_loss;
                self.state.best_batch = self.state.total_batches;
                self.save_best_snapshot();
            }

            self.append_log_line(&format!(
                "{},{},{},{}",
                self.state.total_batches, batch_loss, self.state.best_loss, improvement
            ));

            if self.state.total_batches % self.config.display_interval == 0 {
                self.print_progress(batch_loss, started.elapsed());
            }
        }

        self.finalize();

        let summary = TrainingSummary {
            total_batches: self.state.total_batches,
            best_loss: finite(self.state.best_loss),
            best_batch: self.state.best_batch,
            has_winning_model: self.state.has_winning_model,
            best_win_loss: finite(self.state.best_win_loss),
            wall_seconds: started.elapsed().as_secs(),
            stopped_early,
        };
        if let Ok(json) = serde_json::to_vec_pretty(&summary) {
            if let Err(err) = fs::write(&self.config.summary_path, json) {
                eprintln!(
                    "warning: could not write {}: {err}",
                    self.config.summary_path.display()
                );
            }
        }
        Ok(summary)
    }

    /// The acceptance protocol. `consistent` is the verdict of the repeated
    /// validation gate and only matters when `won` is true.
    ///
    /// Once a winning model has been accepted, evaluations that do not win
    /// can never displace it; before that, any strictly better loss wins.
    pub fn apply_evaluation(&mut self, fitness: f32, won: bool, consistent: bool) -> Acceptance {
        if won {
            if !consistent {
                return Acceptance::LuckyWinRejected;
            }
            if !self.state.has_winning_model {
                self.state.has_winning_model = true;
                self.state.best_win_loss = fitness;
                self.state.best_loss = fitness;
                self.state.best_batch = self.state.total_batches;
                self.save_best_snapshot();
                return Acceptance::FirstValidatedWin;
            }
            if fitness < self.state.best_win_loss {
                self.state.best_win_loss = fitness;
                self.state.best_loss = fitness;
                self.state.best_batch = self.state.total_batches;
                self.save_best_snapshot();
                return Acceptance::ImprovedValidatedWin;
            }
            return Acceptance::WinNotBest;
        }

        if !self.state.has_winning_model && fitness < self.state.best_loss {
            self.state.best_loss = fitness;
            self.state.best_batch = self.state.total_batches;
            self.save_best_snapshot();
            return Acceptance::ImprovedLoss;
        }
        Acceptance::NoChange
    }

    /// Repeated-simulation gate: the win must recur across several fresh
    /// seeds to count as consistent rather than lucky. The runs are
    /// independent and read-only, so they fan out across threads.
    fn validate_consistency(&mut self) -> Result<bool> {
        let seeds: Vec<u32> = (0..self.config.validation_tests)
            .map(|_| self.rng.next_u32())
            .collect();
        let network = &self.network;
        let max_frames = self.config.validation_max_frames;
        let results = seeds
            .par_iter()
            .map(|&seed| Simulation::run(network, seed, max_frames))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("consistency validation failed")?;
        let wins = results.iter().filter(|r| r.won).count();
        println!(
            "  validation: {wins}/{} wins, avg loss {:.2}",
            self.config.validation_tests,
            results.iter().map(|r| r.total_loss).sum::<f32>() / results.len().max(1) as f32
        );
        Ok(wins >= self.config.validation_required_wins)
    }

    /// Synthetic teacher policy: head for the station when safe, dodge
    /// perpendicular when a projectile is close, with the rotation target
    /// rebalanced so left and right turns appear equally often.
    pub fn generate_examples(&mut self, count: usize) -> Vec<TrainingExample> {
        use core::f32::consts::{FRAC_PI_2, PI};

        let mut examples = Vec::with_capacity(count);
        for _ in 0..count {
            let ship_x = self.rng.next_f32();
            let ship_y = self.rng.next_f32();
            let ship_vx = self.rng.next_f32_range(-1.0, 1.0);
            let ship_vy = self.rng.next_f32_range(-1.0, 1.0);
            let ship_rotation = self.rng.next_f32();

            let station_dx = STATION_X / (ARENA_WIDTH / 2.0) - ship_x;
            let station_dy = STATION_Y / (ARENA_HEIGHT / 2.0) - ship_y;
            let station_dist = (station_dx * station_dx + station_dy * station_dy).sqrt();
            let station_angle = station_dy.atan2(station_dx) / PI;

            let projectile_dist = self.rng.next_f32() * 2.0;
            let projectile_angle = self.rng.next_f32_range(-1.0, 1.0);
            let projectile_vx = self.rng.next_f32_range(-1.0, 1.0);
            let projectile_vy = self.rng.next_f32_range(-1.0, 1.0);
            let projectile_count = self.rng.next_f32();

            let thrust: f32;
            let strafe;
            let mut rotation;
            let mut brake = 0.0f32;

            if projectile_dist < 0.4 {
                // Projectile is dangerous: strafe perpendicular to its
                // bearing, rotate away, thrust out of the line of fire.
                let perpendicular = projectile_angle * PI + FRAC_PI_2;
                strafe = perpendicular.sin();
                rotation = -projectile_angle;
                thrust = 0.8;
            } else {
                thrust = if station_dist > 0.3 { 0.7 } else { 0.3 };
                strafe = (station_angle * PI).sin() * 0.5;
                rotation = station_angle;
                brake = if station_dist < 0.2 { 0.5 } else { 0.0 };
            }

            // Keep the rotation distribution balanced: 25% forced left,
            // 25% forced right, 50% natural.
            let roll = self.rng.next_f32();
            if roll < 0.25 {
                rotation = -rotation.abs();
                if rotation > -0.3 {
                    rotation = -0.5;
                }
            } else if roll < 0.5 {
                rotation = rotation.abs();
                if rotation < 0.3 {
                    rotation = 0.5;
                }
            }

            // Thrust and brake live in [0,1]; remap onto the tanh output
            // range so all four targets are bounded in [-1, 1].
            let thrust_target = (thrust * 2.0 - 1.0).clamp(-1.0, 1.0);
            let brake_target = (brake * 2.0 - 1.0).clamp(-1.0, 1.0);

            examples.push(TrainingExample {
                input: Matrix::from_row(&[
                    ship_x,
                    ship_y,
                    ship_vx,
                    ship_vy,
                    ship_rotation,
                    station_dist,
                    station_angle,
                    projectile_dist,
                    projectile_angle,
                    projectile_vx,
                    projectile_vy,
                    projectile_count,
                ]),
                target: Matrix::from_row(&[
                    thrust_target,
                    strafe.clamp(-1.0, 1.0),
                    rotation.clamp(-1.0, 1.0),
                    brake_target,
                ]),
            });
        }
        examples
    }

    fn effective_best(&self) -> f32 {
        if self.state.has_winning_model {
            self.state.best_win_loss
        } else {
            self.state.best_loss
        }
    }

    fn reload_best_snapshot(&mut self) {
        if !self.config.best_model_path.exists() {
            return;
        }
        if let Err(err) = self.network.load_model(&self.config.best_model_path) {
            eprintln!(
                "warning: could not reload {}: {err}; continuing with in-memory weights",
                self.config.best_model_path.display()
            );
        }
    }

    fn save_best_snapshot(&self) {
        if let Err(err) = self.network.save_model(&self.config.best_model_path) {
            eprintln!(
                "warning: could not checkpoint {}: {err}; continuing without checkpoint",
                self.config.best_model_path.display()
            );
        }
    }

    /// Persist the final trained model: the best on-disk snapshot if one was
    /// ever accepted, otherwise the in-memory network as-is.
    fn finalize(&mut self) {
        if self.config.best_model_path.exists() {
            if let Err(err) = self.network.load_model(&self.config.best_model_path) {
                eprintln!(
                    "warning: could not load best snapshot: {err}; saving in-memory weights"
                );
            }
        }
        if let Err(err) = self.network.save_model(&self.config.trained_model_path) {
            eprintln!(
                "warning: could not write {}: {err}",
                self.config.trained_model_path.display()
            );
        }
    }

    fn append_log_line(&self, line: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.log_path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            eprintln!(
                "warning: could not append to {}: {err}",
                self.config.log_path.display()
            );
        }
    }

    fn print_progress(&self, batch_loss: f32, elapsed: Duration) {
        let best = if self.state.has_winning_model {
            format!("best WIN {:.2}", self.state.best_win_loss)
        } else if self.state.best_loss < f32::MAX {
            format!("best {:.2} (no win)", self.state.best_loss)
        } else {
            "no best yet".to_string()
        };
        println!(
            "batch {:>6} | train loss {:.6} | {} | {}s/{}s",
            self.state.total_batches,
            batch_loss,
            best,
            elapsed.as_secs(),
            self.config.duration.as_secs()
        );
    }
}

fn finite(value: f32) -> Option<f32> {
    (value < f32::MAX).then_some(value)
}

/// Recover the best loss from the last well-formed data row of a previous
/// session's log. Header, separator, and malformed rows are skipped.
pub fn read_last_best_loss(path: &Path) -> Option<f32> {
    let contents = fs::read_to_string(path).ok()?;
    let mut last = None;
    for line in contents.lines() {
        let mut fields = line.split(',');
        let (Some(batch), Some(_avg), Some(best)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if batch.trim().parse::<u64>().is_err() {
            continue;
        }
        if let Ok(value) = best.trim().parse::<f32>() {
            last = Some(value);
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRng;
    use tempfile::tempdir;

    fn session(dir: &Path) -> TrainingSession {
        let mut rng = SeededRng::new(WEIGHT_INIT_SEED);
        let network = Network::new(&[SENSOR_INPUTS, HIDDEN_NEURONS, ACTION_OUTPUTS], &mut rng);
        TrainingSession::new(network, TrainerConfig::new(dir))
    }

    #[test]
    fn generated_examples_have_contract_shapes() {
        let dir = tempdir().unwrap();
        let mut session = session(dir.path());
        let examples = session.generate_examples(16);
        assert_eq!(examples.len(), 16);
        for example in &examples {
            assert_eq!(example.input.shape(), (1, SENSOR_INPUTS));
            assert_eq!(example.target.shape(), (1, ACTION_OUTPUTS));
            for &t in example.target.as_slice() {
                assert!((-1.0..=1.0).contains(&t), "target out of range: {t}");
            }
        }
    }

    #[test]
    fn rotation_targets_cover_both_signs() {
        let dir = tempdir().unwrap();
        let mut session = session(dir.path());
        let examples = session.generate_examples(200);
        let lefts = examples.iter().filter(|e| e.target.get(0, 2) < 0.0).count();
        let rights = examples.iter().filter(|e| e.target.get(0, 2) > 0.0).count();
        assert!(lefts > 20, "only {lefts} left turns in 200 examples");
        assert!(rights > 20, "only {rights} right turns in 200 examples");
    }

    #[test]
    fn lucky_win_is_rejected() {
        let dir = tempdir().unwrap();
        let mut session = session(dir.path());
        let outcome = session.apply_evaluation(-150.0, true, false);
        assert_eq!(outcome, Acceptance::LuckyWinRejected);
        assert!(!session.state.has_winning_model);
    }

    #[test]
    fn cancel_token_flips_once_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn last_best_loss_skips_malformed_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(
            &path,
            format!(
                "{LOG_HEADER}\n1,0.5,0.45,0\n{LOG_SESSION_SEPARATOR}\ngarbage line\n7,0.2\n9,0.3,0.21,0.01\nnot,a,number\n"
            ),
        )
        .unwrap();
        assert_eq!(read_last_best_loss(&path), Some(0.21));
    }
}
