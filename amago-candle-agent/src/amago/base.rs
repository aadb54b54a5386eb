use super::{rollout::Rollout, AmagoConfig};
use crate::{
    actor::{Actor, ActorConfig},
    batch::TrajectoryBatch,
    critic::{NCritics, NCriticsConfig},
    encoder::{TrajEncoder, TstepEncoder},
    model::{SubModel1, SubModel2},
    opt::{clip_grad_norm, grad_norm, Optimizer, WarmupSchedule},
    popart::PopArt,
    timestep::Timestep,
    util::{copy_vars, track, vars_with_prefix},
};
use amago_core::{
    record::{Record, RecordValue},
    Agent, Configurable, Env, Policy, ReplayBufferBase,
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::{info, trace};
use rand::{rngs::SmallRng, SeedableRng};
use std::{convert::TryInto, fs, marker::PhantomData, path::Path};

const MODULES: [&str; 4] = ["tstep_encoder", "traj_encoder", "critics", "actor"];

/// Multi-gamma actor-critic agent.
///
/// The online networks (timestep encoder, trajectory encoder, critics and
/// actor) live in one [`VarMap`] trained by a single optimizer. The target
/// critics and the target actor live in a second map that tracks the online
/// networks with a soft update, and the maximized critics, which score the
/// actions of the policy gradient term, live in a third map that is an
/// exact copy of the online critics after every update.
///
/// Rollouts in training mode and in evaluation mode keep separate contexts,
/// so an evaluation between two training steps does not change the context
/// of the running training episode.
pub struct Amago<E, R> {
    pub(super) config: AmagoConfig,
    pub(super) gammas: Vec<f32>,
    pub(super) device: Device,
    pub(super) varmap: VarMap,
    pub(super) varmap_tgt: VarMap,
    pub(super) varmap_max: VarMap,
    pub(super) tstep_encoder: TstepEncoder,
    pub(super) traj_encoder: TrajEncoder,
    pub(super) critics: NCritics,
    pub(super) target_critics: NCritics,
    pub(super) maximized_critics: NCritics,
    pub(super) actor: Actor,
    pub(super) target_actor: Actor,
    pub(super) popart: PopArt,
    pub(super) opt: Optimizer,
    pub(super) schedule: WarmupSchedule,
    pub(super) rng: SmallRng,
    pub(super) n_updates: usize,
    pub(super) train: bool,
    pub(super) rollout: Rollout,
    pub(super) val_rollout: Rollout,
    pub(super) phantom: PhantomData<(E, R)>,
}

impl<E, R> Amago<E, R> {
    /// Builds the agent.
    ///
    /// # Errors
    ///
    /// Returns [`AmagoError::Config`](amago_core::error::AmagoError::Config)
    /// for inconsistent configurations and
    /// [`AmagoError::Capability`](amago_core::error::AmagoError::Capability)
    /// when the policy gradient term is enabled for a non-continuous action
    /// space.
    pub fn new(config: AmagoConfig) -> Result<Self> {
        config.validate()?;
        let device: Device = config.device.unwrap_or(crate::Device::Cpu).try_into()?;
        let gammas = config.gammas();

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let tstep_encoder =
            TstepEncoder::build(vb.pp("tstep_encoder"), config.tstep_encoder_config.clone())?;
        let traj_encoder =
            TrajEncoder::build(vb.pp("traj_encoder"), config.traj_encoder_config.clone())?;

        let critic_config = NCriticsConfig {
            state_dim: traj_encoder.emb_dim(),
            action_dim: config.action_space.action_dim(),
            gammas: gammas.clone(),
            num_critics: config.num_critics,
            units: config.critic_units.clone(),
            activation: config.activation,
            kind: config.critic_kind.clone(),
        };
        let actor_config = ActorConfig {
            state_dim: traj_encoder.emb_dim(),
            action_space: config.action_space,
            n_gammas: gammas.len(),
            units: config.actor_units.clone(),
            activation: config.activation,
            log_std_min: config.log_std_min,
            log_std_max: config.log_std_max,
        };
        let critics = NCritics::build(vb.pp("critics"), critic_config.clone())?;
        let actor = Actor::build(vb.pp("actor"), actor_config.clone())?;

        let varmap_tgt = VarMap::new();
        let vb_tgt = VarBuilder::from_varmap(&varmap_tgt, DType::F32, &device);
        let target_critics = NCritics::build(vb_tgt.pp("critics"), critic_config.clone())?;
        let target_actor = Actor::build(vb_tgt.pp("actor"), actor_config)?;

        let varmap_max = VarMap::new();
        let vb_max = VarBuilder::from_varmap(&varmap_max, DType::F32, &device);
        let maximized_critics = NCritics::build(vb_max.pp("critics"), critic_config)?;

        let opt = config.optimizer.build(varmap.all_vars())?;
        let schedule =
            WarmupSchedule::new(config.optimizer.get_learning_rate(), config.lr_warmup_steps);
        let popart = PopArt::new(config.popart.clone(), gammas.len(), &device);
        let rng = SmallRng::seed_from_u64(config.seed);
        let rollout = Rollout::new(&config);
        let val_rollout = Rollout::new(&config);

        let agent = Self {
            config,
            gammas,
            device,
            varmap,
            varmap_tgt,
            varmap_max,
            tstep_encoder,
            traj_encoder,
            critics,
            target_critics,
            maximized_critics,
            actor,
            target_actor,
            popart,
            opt,
            schedule,
            rng,
            n_updates: 0,
            train: false,
            rollout,
            val_rollout,
            phantom: PhantomData,
        };
        agent.hard_sync_targets()?;
        Ok(agent)
    }

    /// Discount factors, the primary one last.
    pub fn gammas(&self) -> &[f32] {
        &self.gammas
    }

    /// Configuration.
    pub fn config(&self) -> &AmagoConfig {
        &self.config
    }

    /// Online parameters.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Parameters of the target critics and the target actor.
    pub fn varmap_tgt(&self) -> &VarMap {
        &self.varmap_tgt
    }

    /// Parameters of the maximized critics.
    pub fn varmap_max(&self) -> &VarMap {
        &self.varmap_max
    }

    /// Value normalizer.
    pub fn popart(&self) -> &PopArt {
        &self.popart
    }

    /// Number of parameter updates so far.
    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// Reseeds the generator of action samples and critic subsets.
    pub fn seed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    /// Copies the online critics and actor into the target networks and the
    /// online critics into the maximized critics.
    pub fn hard_sync_targets(&self) -> Result<()> {
        copy_vars(&self.varmap_tgt, &self.varmap)?;
        copy_vars(&self.varmap_max, &self.varmap)
    }

    /// Moves the target networks towards the online networks with
    /// coefficient `tau` and copies the online critics into the maximized
    /// critics.
    pub fn soft_sync_targets(&self) -> Result<()> {
        track(&self.varmap_tgt, &self.varmap, self.config.tau)?;
        copy_vars(&self.varmap_max, &self.varmap)
    }

    fn grad_norms(&self, grads: &candle_core::backprop::GradStore) -> Result<Record> {
        let mut record = Record::empty();
        for module in MODULES.iter() {
            let vars = vars_with_prefix(&self.varmap, &[module])?
                .into_iter()
                .map(|(_, v)| v)
                .collect::<Vec<_>>();
            record.insert_scalar(format!("{} Grad Norm", module), grad_norm(grads, &vars)?);
        }
        Ok(record)
    }

    /// Performs one parameter update on `batch`.
    ///
    /// Statistics other than the losses are computed only when `log_step`
    /// is `true`.
    pub fn update(&mut self, batch: &TrajectoryBatch, log_step: bool) -> Result<Record> {
        let mut record = Record::empty();

        trace!("compute_loss()");
        let loss = {
            let stats = match log_step {
                true => Some(&mut record),
                false => None,
            };
            self.compute_loss(batch, stats)?
        };
        let total = match &loss.critic_loss {
            Some(critic_loss) => {
                let w = self.config.critic_loss_weight as f64;
                (&loss.actor_loss + (critic_loss * w)?)?
            }
            None => loss.actor_loss.clone(),
        };

        trace!("backward()");
        let mut grads = total.backward()?;
        if log_step {
            record.merge_inplace(self.grad_norms(&grads)?);
        }
        let vars = self.varmap.all_vars();
        let norm = clip_grad_norm(&mut grads, &vars, self.config.grad_clip)?;

        trace!("step()");
        let lr = self.schedule.lr(self.n_updates);
        self.opt.set_learning_rate(lr);
        self.opt.step(&grads)?;
        self.soft_sync_targets()?;
        self.n_updates += 1;

        if let Some(critic_loss) = &loss.critic_loss {
            record.insert_scalar("critic_loss", critic_loss.to_scalar::<f32>()?);
        }
        record.insert_scalar("actor_loss", loss.actor_loss.to_scalar::<f32>()?);
        record.insert_scalar("total_loss", total.to_scalar::<f32>()?);
        if log_step {
            record.insert_scalar("Grad Norm", norm);
            record.insert_scalar("Learning Rate", lr as f32);
            record.merge_inplace(self.popart.stats());
            let seq_len = batch.state_mask()?.sum(1)?.mean_all()?;
            record.insert("Mean Seq. Length", RecordValue::Scalar(seq_len.to_scalar()?));
        }
        Ok(record)
    }

    /// Computes the losses and statistics of `batch` without changing the
    /// agent.
    ///
    /// The parameters are not updated, and the value normalizer and the
    /// random generator are restored after the forward pass.
    pub fn validate(&mut self, batch: &TrajectoryBatch) -> Result<Record> {
        let popart = self.popart.state().clone();
        let rng = self.rng.clone();
        let mut record = Record::empty();
        let loss = self.compute_loss(batch, Some(&mut record));
        self.popart.restore(popart);
        self.rng = rng;

        let loss = loss?;
        if let Some(critic_loss) = &loss.critic_loss {
            record.insert_scalar("critic_loss", critic_loss.to_scalar::<f32>()?);
        }
        record.insert_scalar("actor_loss", loss.actor_loss.to_scalar::<f32>()?);
        Ok(record)
    }

    /// Saves the parameters and the value normalizer in `path`.
    pub fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        self.varmap.save(path.join("amago.pt"))?;
        self.varmap_tgt.save(path.join("amago_tgt.pt"))?;
        self.varmap_max.save(path.join("amago_max.pt"))?;
        self.popart.save(path.join("popart.yaml"))?;
        info!("Save AMAGO agent to {:?}", path);
        Ok(())
    }

    /// Loads the parameters and the value normalizer from `path`.
    pub fn load_params(&mut self, path: &Path) -> Result<()> {
        self.varmap.load(path.join("amago.pt"))?;
        self.varmap_tgt.load(path.join("amago_tgt.pt"))?;
        self.varmap_max.load(path.join("amago_max.pt"))?;
        self.popart.load(path.join("popart.yaml"))?;
        info!("Load AMAGO agent from {:?}", path);
        Ok(())
    }
}

impl<E, R> Policy<E> for Amago<E, R>
where
    E: Env,
    E::Obs: Into<Timestep>,
    E::Act: From<Tensor>,
{
    /// Samples an action in training mode, takes the most likely action in
    /// evaluation mode.
    fn sample(&mut self, obs: &E::Obs) -> Result<E::Act> {
        let timestep: Timestep = obs.clone().into();
        let sample = self.train;
        Ok(self.act(&timestep, sample)?.into())
    }

    fn reset(&mut self, is_done: Option<&[i8]>) {
        let rollout = self.active_rollout();
        match is_done {
            None => rollout.clear(),
            Some(is_done) => {
                if is_done.first() == Some(&1) {
                    rollout.end_episode();
                }
            }
        }
    }
}

impl<E, R> Configurable<E> for Amago<E, R>
where
    E: Env,
{
    type Config = AmagoConfig;

    fn build(config: Self::Config) -> Result<Self> {
        Self::new(config)
    }
}

impl<E, R> Agent<E, R> for Amago<E, R>
where
    E: Env,
    E::Obs: Into<Timestep>,
    E::Act: From<Tensor>,
    R: ReplayBufferBase<Batch = TrajectoryBatch>,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn opt_with_record(&mut self, buffer: &mut R) -> Result<Record> {
        trace!("batch()");
        let batch = buffer.batch(self.config.batch_size)?;
        self.update(&batch, true)
    }

    fn opt(&mut self, buffer: &mut R) -> Result<()> {
        let batch = buffer.batch(self.config.batch_size)?;
        self.update(&batch, false).map(|_| ())
    }

    fn val_step(&mut self, buffer: &mut R) -> Result<Record> {
        let batch = buffer.batch(self.config.batch_size)?;
        self.validate(&batch)
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        Amago::save_params(self, path)
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        Amago::load_params(self, path)
    }
}
