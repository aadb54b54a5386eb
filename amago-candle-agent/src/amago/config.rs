//! Configuration of [`Amago`](super::Amago).
use super::AdvantageFilter;
use crate::{
    actor::ActionSpace,
    critic::CriticKind,
    encoder::{TrajEncoderConfig, TstepEncoderConfig},
    mlp::Activation,
    opt::OptimizerConfig,
    popart::PopArtConfig,
    Device,
};
use amago_core::error::AmagoError;
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

fn default_multigammas() -> Vec<f32> {
    vec![0.1, 0.9, 0.95, 0.97, 0.99, 0.995]
}

/// Configuration of [`Amago`](super::Amago).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct AmagoConfig {
    /// Dimension of flattened observations.
    pub obs_dim: usize,

    /// Dimension of flattened goals.
    pub goal_dim: usize,

    /// Action space.
    pub action_space: ActionSpace,

    /// Maximum length of the context kept during rollouts.
    pub max_seq_len: usize,

    /// Timestep encoder.
    pub tstep_encoder_config: TstepEncoderConfig,

    /// Trajectory encoder.
    pub traj_encoder_config: TrajEncoderConfig,

    /// Hidden units of each critic.
    pub critic_units: Vec<usize>,

    /// Hidden units of the actor.
    pub actor_units: Vec<usize>,

    /// Activation of the hidden layers of the actor and the critics.
    pub activation: Activation,

    /// Output head of the critics.
    pub critic_kind: CriticKind,

    /// Lower bound of the log standard deviation of continuous actions.
    pub log_std_min: f64,

    /// Upper bound of the log standard deviation of continuous actions.
    pub log_std_max: f64,

    /// Batch size.
    pub batch_size: usize,

    /// Optimizer of the online networks. Its learning rate is the one
    /// reached after warmup.
    pub optimizer: OptimizerConfig,

    /// Weight of the critic loss in the total loss.
    pub critic_loss_weight: f32,

    /// Number of updates with a linearly increasing learning rate.
    pub lr_warmup_steps: usize,

    /// Maximum global norm of the gradients.
    pub grad_clip: f64,

    /// Number of critics.
    pub num_critics: usize,

    /// Size of the random subset of critics forming TD targets.
    pub num_critics_td: usize,

    /// Weight of the policy gradient term.
    pub online_coeff: f32,

    /// Weight of the filtered behavior cloning term.
    pub offline_coeff: f32,

    /// Primary discount factor.
    pub gamma: f32,

    /// Additional discount factors used when `use_multigamma` is set.
    pub multigammas: Vec<f32>,

    /// Learns values and policies for all discount factors.
    pub use_multigamma: bool,

    /// Multiplier of rewards in TD targets.
    pub reward_multiplier: f32,

    /// Coefficient of the soft update of the target networks.
    pub tau: f64,

    /// Replaces the advantage filter with constant weights (plain BC).
    pub fake_filter: bool,

    /// Advantage filter of the behavior cloning term.
    pub advantage_filter: AdvantageFilter,

    /// Number of actions sampled to estimate state values in the filter.
    pub fbc_filter_k: usize,

    /// Samples next actions from the target actor instead of the online one.
    pub use_target_actor: bool,

    /// Value normalization.
    pub popart: PopArtConfig,

    /// Random seed of action sampling and critic subsets.
    pub seed: u64,

    /// Device.
    pub device: Option<Device>,
}

impl Default for AmagoConfig {
    fn default() -> Self {
        Self::new(1, 1, ActionSpace::Continuous(1))
    }
}

impl AmagoConfig {
    /// Default configuration of an agent with the given input and action spaces.
    pub fn new(obs_dim: usize, goal_dim: usize, action_space: ActionSpace) -> Self {
        let rl2_dim = 3 + action_space.action_dim();
        let tstep_encoder_config = TstepEncoderConfig::new(obs_dim, goal_dim, rl2_dim);
        let traj_encoder_config = TrajEncoderConfig::gru(tstep_encoder_config.d_output, 256, 256);
        Self {
            obs_dim,
            goal_dim,
            action_space,
            max_seq_len: 128,
            tstep_encoder_config,
            traj_encoder_config,
            critic_units: vec![256, 256],
            actor_units: vec![256, 256],
            activation: Activation::LeakyReLU,
            critic_kind: CriticKind::Scalar,
            log_std_min: -5.0,
            log_std_max: 2.0,
            batch_size: 24,
            optimizer: OptimizerConfig::adamw(1e-4, 1e-3),
            critic_loss_weight: 10.0,
            lr_warmup_steps: 500,
            grad_clip: 1.0,
            num_critics: 4,
            num_critics_td: 2,
            online_coeff: 1.0,
            offline_coeff: 0.1,
            gamma: 0.999,
            multigammas: default_multigammas(),
            use_multigamma: true,
            reward_multiplier: 10.0,
            tau: 0.003,
            fake_filter: false,
            advantage_filter: AdvantageFilter::default(),
            fbc_filter_k: 1,
            use_target_actor: true,
            popart: PopArtConfig::default(),
            seed: 42,
            device: None,
        }
    }

    /// Preset of the multi-task agent: two-hot critics trained without the
    /// policy gradient term, and a value baseline averaged over 3 actions.
    pub fn multi_task(mut self) -> Self {
        self.critic_kind = CriticKind::two_hot();
        self.online_coeff = 0.0;
        self.offline_coeff = 1.0;
        self.fbc_filter_k = 3;
        self
    }

    /// Discount factors; the last one is the primary discount factor.
    pub fn gammas(&self) -> Vec<f32> {
        let mut gammas = match self.use_multigamma {
            true => self.multigammas.clone(),
            false => vec![],
        };
        gammas.push(self.gamma);
        gammas
    }

    /// Checks the consistency of the configuration.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| -> Result<()> { Err(AmagoError::Config(msg).into()) };
        if self.num_critics == 0 {
            return err("num_critics must be positive".into());
        }
        if self.num_critics_td == 0 || self.num_critics_td > self.num_critics {
            return err(format!(
                "num_critics_td = {} must be in [1, num_critics = {}]",
                self.num_critics_td, self.num_critics
            ));
        }
        if let Some(g) = self.gammas().iter().find(|g| !(0.0..1.0).contains(*g)) {
            return err(format!("discount factor {} is not in [0, 1)", g));
        }
        if self.action_space.action_dim() == 0 {
            return err("the action space is empty".into());
        }
        if self.fbc_filter_k == 0 {
            return err("fbc_filter_k must be positive".into());
        }
        let tstep = &self.tstep_encoder_config;
        if (tstep.obs_dim, tstep.goal_dim) != (self.obs_dim, self.goal_dim) {
            return err("the timestep encoder does not match the observation space".into());
        }
        if tstep.rl2_dim != 3 + self.action_space.action_dim() {
            return err("the timestep encoder does not match the action space".into());
        }
        if self.traj_encoder_config.tstep_dim != tstep.d_output {
            return err("the trajectory encoder does not match the timestep encoder".into());
        }
        if self.online_coeff > 0.0 && !matches!(self.action_space, ActionSpace::Continuous(_)) {
            let msg = "the policy gradient term requires continuous actions, set online_coeff = 0";
            return Err(AmagoError::Capability(msg.into()).into());
        }
        Ok(())
    }

    /// Sets the maximum length of the rollout context.
    pub fn max_seq_len(mut self, v: usize) -> Self {
        self.max_seq_len = v;
        self
    }

    /// Sets the timestep encoder.
    pub fn tstep_encoder_config(mut self, v: TstepEncoderConfig) -> Self {
        self.tstep_encoder_config = v;
        self
    }

    /// Sets the trajectory encoder.
    pub fn traj_encoder_config(mut self, v: TrajEncoderConfig) -> Self {
        self.traj_encoder_config = v;
        self
    }

    /// Sets the hidden units of the critics.
    pub fn critic_units(mut self, v: Vec<usize>) -> Self {
        self.critic_units = v;
        self
    }

    /// Sets the hidden units of the actor.
    pub fn actor_units(mut self, v: Vec<usize>) -> Self {
        self.actor_units = v;
        self
    }

    /// Sets the critic head.
    pub fn critic_kind(mut self, v: CriticKind) -> Self {
        self.critic_kind = v;
        self
    }

    /// Batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Optimizer.
    pub fn optimizer(mut self, v: OptimizerConfig) -> Self {
        self.optimizer = v;
        self
    }

    /// Learning rate.
    pub fn learning_rate(mut self, v: f64) -> Self {
        self.optimizer = self.optimizer.learning_rate(v);
        self
    }

    /// Number of warmup updates.
    pub fn lr_warmup_steps(mut self, v: usize) -> Self {
        self.lr_warmup_steps = v;
        self
    }

    /// Gradient clipping.
    pub fn grad_clip(mut self, v: f64) -> Self {
        self.grad_clip = v;
        self
    }

    /// Number of critics.
    pub fn num_critics(mut self, v: usize) -> Self {
        self.num_critics = v;
        self
    }

    /// Size of the random subsets of critics.
    pub fn num_critics_td(mut self, v: usize) -> Self {
        self.num_critics_td = v;
        self
    }

    /// Weight of the policy gradient term.
    pub fn online_coeff(mut self, v: f32) -> Self {
        self.online_coeff = v;
        self
    }

    /// Weight of the behavior cloning term.
    pub fn offline_coeff(mut self, v: f32) -> Self {
        self.offline_coeff = v;
        self
    }

    /// Primary discount factor.
    pub fn gamma(mut self, v: f32) -> Self {
        self.gamma = v;
        self
    }

    /// Additional discount factors.
    pub fn multigammas(mut self, v: Vec<f32>) -> Self {
        self.multigammas = v;
        self
    }

    /// Enables the additional discount factors.
    pub fn use_multigamma(mut self, v: bool) -> Self {
        self.use_multigamma = v;
        self
    }

    /// Reward multiplier.
    pub fn reward_multiplier(mut self, v: f32) -> Self {
        self.reward_multiplier = v;
        self
    }

    /// Soft update coefficient.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// Plain behavior cloning.
    pub fn fake_filter(mut self, v: bool) -> Self {
        self.fake_filter = v;
        self
    }

    /// Advantage filter.
    pub fn advantage_filter(mut self, v: AdvantageFilter) -> Self {
        self.advantage_filter = v;
        self
    }

    /// Number of actions sampled in the advantage filter.
    pub fn fbc_filter_k(mut self, v: usize) -> Self {
        self.fbc_filter_k = v;
        self
    }

    /// Target actor.
    pub fn use_target_actor(mut self, v: bool) -> Self {
        self.use_target_actor = v;
        self
    }

    /// Value normalization.
    pub fn popart(mut self, v: PopArtConfig) -> Self {
        self.popart = v;
        self
    }

    /// Random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = Some(v);
        self
    }

    /// Constructs [`AmagoConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(&path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of AMAGO agent from {:?}", path.as_ref());
        Ok(b)
    }

    /// Saves [`AmagoConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(&path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of AMAGO agent into {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_gammas() {
        let config = AmagoConfig::default();
        assert_eq!(config.gammas(), vec![0.1, 0.9, 0.95, 0.97, 0.99, 0.995, 0.999]);
        let config = config.use_multigamma(false);
        assert_eq!(config.gammas(), vec![0.999]);
    }

    #[test]
    fn test_validate() {
        assert!(AmagoConfig::default().validate().is_ok());

        let config = AmagoConfig::default().num_critics(2).num_critics_td(3);
        assert!(config.validate().is_err());

        let config = AmagoConfig::new(3, 1, ActionSpace::Discrete(4));
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AmagoError>(),
            Some(AmagoError::Capability(_))
        ));
        assert!(config.online_coeff(0.0).validate().is_ok());
    }

    #[test]
    fn test_multi_task_preset() {
        let config = AmagoConfig::default().multi_task();
        assert_eq!(config.critic_kind, CriticKind::two_hot());
        assert_eq!(config.online_coeff, 0.0);
        assert_eq!(config.offline_coeff, 1.0);
        assert_eq!(config.fbc_filter_k, 3);
    }

    #[test]
    fn test_serde_amago_config() -> Result<()> {
        let config = AmagoConfig::new(5, 2, ActionSpace::MultiBinary(3))
            .num_critics(6)
            .optimizer(OptimizerConfig::Adam { lr: 3e-4 })
            .online_coeff(0.0)
            .advantage_filter(AdvantageFilter::Exp {
                beta: 1.0,
                clip: 100.0,
            });

        let dir = TempDir::new("amago_config")?;
        let path = dir.path().join("amago_config.yaml");
        config.save(&path)?;
        let config_ = AmagoConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
