//! Train [`Agent`].
mod config;
mod sampler;
use crate::{
    record::{AggregateRecorder, Record},
    Agent, Env, Evaluator, ExperienceBufferBase, ReplayBufferBase, StepProcessor,
};
use anyhow::Result;
pub use config::TrainerConfig;
use log::{info, warn};
pub use sampler::Sampler;
use std::path::{Path, PathBuf};

/// Returns a record whose keys are prefixed with `prefix`.
fn with_prefix(prefix: &str, record: Record) -> Record {
    let mut out = Record::empty();
    for (k, v) in record.into_iter_in_record() {
        out.insert(format!("{}{}", prefix, k), v);
    }
    out
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the epoch-based training loop.
///
/// # Training loop
///
/// Each epoch does the following, in order:
///
/// 1. If `always_load_latest` is set and `(model_dir)/LATEST` exists, the
///    parameters of the agent are loaded from it.
/// 2. If `epoch % val_interval == 0`, the agent is evaluated in evaluation mode
///    with the [`Evaluator`]. The result is stored with the prefix `val/`.
///    When `val_checks_per_epoch > 0`, the evaluation episodes are processed
///    into a validation buffer separate from the replay buffer.
/// 3. If `epoch >= start_collecting_at_epoch`, the [`Sampler`] takes
///    `train_timesteps_per_epoch` environment steps with the agent and pushes
///    the processed steps into the replay buffer.
/// 4. If the buffer holds more than `dset_max_size` experiences, the oldest
///    fraction `dset_filter_pct` of them is discarded.
/// 5. If the buffer is empty, the learning phase is skipped with a warning. It
///    is also skipped while `epoch < start_learning_at_epoch`.
/// 6. Otherwise `train_grad_updates_per_epoch` optimization steps are
///    performed. Every `log_interval`-th step, counted over the whole run, is
///    performed with [`Agent::opt_with_record`] and its record is stored with
///    the prefix `train/`.
/// 7. If the agent was evaluated in this epoch and the validation buffer is not
///    empty, [`Agent::val_step`] is called `val_checks_per_epoch` times on it.
///    The records are stored with the prefix `val_update/` and the validation
///    buffer is emptied.
/// 8. If `(epoch + 1) % ckpt_interval == 0` the parameters are saved in
///    `(model_dir)/epoch_(epoch)`, and in `(model_dir)/LATEST` if
///    `save_latest` is set.
/// 9. The recorder is flushed with the epoch number.
///
/// Collection and learning never overlap.
///
/// # Interaction of objects
///
/// ```mermaid
/// graph LR
///     A[Agent]-->|Env::Act|B[Env]
///     B -->|Env::Obs|A
///     B -->|"Step&lt;E: Env&gt;"|C[StepProcessor]
///     C -->|ExperienceBufferBase::Item|D[ReplayBufferBase]
///     D -->|ReplayBufferBase::Batch|A
/// ```
///
/// [`Evaluator`]: crate::Evaluator
pub struct Trainer<E, P, R>
where
    E: Env,
    P: StepProcessor<E>,
    R: ExperienceBufferBase<Item = P::Output> + ReplayBufferBase,
{
    config: TrainerConfig,

    /// Configuration of the environment for training.
    env_config_train: E::Config,

    /// Configuration of the step processor.
    step_proc_config: P::Config,

    /// Configuration of the replay buffer.
    replay_buffer_config: R::Config,

    /// Seed of the training environment.
    env_seed: i64,
}

impl<E, P, R> Trainer<E, P, R>
where
    E: Env,
    P: StepProcessor<E>,
    R: ExperienceBufferBase<Item = P::Output> + ReplayBufferBase,
{
    /// Constructs a trainer.
    pub fn build(
        config: TrainerConfig,
        env_config_train: E::Config,
        step_proc_config: P::Config,
        replay_buffer_config: R::Config,
    ) -> Self {
        Self {
            config,
            env_config_train,
            step_proc_config,
            replay_buffer_config,
            env_seed: 0,
        }
    }

    /// Sets the seed of the training environment.
    pub fn env_seed(mut self, seed: i64) -> Self {
        self.env_seed = seed;
        self
    }

    fn latest_dir(&self) -> Option<PathBuf> {
        self.config
            .model_dir
            .as_ref()
            .map(|d| Path::new(d).join("LATEST"))
    }

    fn save_model<A: Agent<E, R>>(agent: &A, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        agent.save_params(dir)?;
        info!("Saved the model in {:?}", dir);
        Ok(())
    }

    fn checkpoint<A: Agent<E, R>>(&self, agent: &A, epoch: usize) -> Result<()> {
        let model_dir = match self.config.model_dir.as_ref() {
            Some(d) => Path::new(d),
            None => return Ok(()),
        };
        if self.config.ckpt_interval > 0 && (epoch + 1) % self.config.ckpt_interval == 0 {
            Self::save_model(agent, &model_dir.join(format!("epoch_{}", epoch)))?;
        }
        if self.config.save_latest {
            Self::save_model(agent, &model_dir.join("LATEST"))?;
        }
        Ok(())
    }

    /// Trains the agent.
    pub fn train<A, D>(
        &mut self,
        agent: &mut A,
        recorder: &mut dyn AggregateRecorder,
        evaluator: &mut D,
    ) -> Result<()>
    where
        A: Agent<E, R>,
        D: Evaluator<E>,
    {
        let env = E::build(&self.env_config_train, self.env_seed)?;
        let step_proc = P::build(&self.step_proc_config);
        let mut buffer = R::build(&self.replay_buffer_config)?;
        let mut sampler = Sampler::new(env, step_proc);
        let mut val_step_proc = P::build(&self.step_proc_config);
        let mut val_buffer = R::build(&self.replay_buffer_config)?;
        let mut grad_steps: usize = 0;
        agent.train();

        for epoch in 0..self.config.epochs {
            if self.config.always_load_latest {
                if let Some(dir) = self.latest_dir().filter(|d| d.exists()) {
                    agent.load_params(&dir)?;
                }
            }

            // Evaluation
            let val_epoch = self.config.val_interval > 0 && epoch % self.config.val_interval == 0;
            if val_epoch {
                agent.eval();
                let record = match self.config.val_checks_per_epoch {
                    0 => evaluator.evaluate(agent)?,
                    _ => evaluator.evaluate_and_push(agent, &mut val_step_proc, &mut val_buffer)?,
                };
                agent.train();
                recorder.store(with_prefix("val/", record));
            }

            // Collection
            if epoch >= self.config.start_collecting_at_epoch {
                for _ in 0..self.config.train_timesteps_per_epoch {
                    let record = sampler.sample_and_push(agent, &mut buffer)?;
                    if !record.is_empty() {
                        recorder.store(with_prefix("train/", record));
                    }
                }
            }

            if buffer.len() > self.config.dset_max_size {
                if let Some(pct) = self.config.dset_filter_pct {
                    let n = buffer.filter(pct)?;
                    info!("Discarded {} old experiences from the replay buffer", n);
                }
            }

            let mut record = Record::empty();
            record.insert_scalar("Epoch", epoch as _);
            record.insert_scalar("Buffer size", buffer.len() as _);
            record.insert_scalar("Total env steps", sampler.env_steps() as _);
            recorder.store(record);

            // Learning
            if buffer.len() == 0 {
                warn!("Skipping learning in epoch {}: the replay buffer is empty", epoch);
            } else if epoch >= self.config.start_learning_at_epoch {
                for _ in 0..self.config.train_grad_updates_per_epoch {
                    let log_step =
                        self.config.log_interval > 0 && grad_steps % self.config.log_interval == 0;
                    if log_step {
                        let record = agent.opt_with_record(&mut buffer)?;
                        recorder.store(with_prefix("train/", record));
                    } else {
                        agent.opt(&mut buffer)?;
                    }
                    grad_steps += 1;
                }
            }

            // Losses on validation trajectories
            if val_epoch && val_buffer.len() > 0 {
                agent.eval();
                for _ in 0..self.config.val_checks_per_epoch {
                    let record = agent.val_step(&mut val_buffer)?;
                    if !record.is_empty() {
                        recorder.store(with_prefix("val_update/", record));
                    }
                }
                agent.train();
                val_buffer = R::build(&self.replay_buffer_config)?;
            }

            self.checkpoint(agent, epoch)?;
            recorder.flush(epoch as _);
        }

        Ok(())
    }
}
