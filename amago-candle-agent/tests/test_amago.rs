use amago_candle_agent::{
    amago::{AdvantageFilter, LossOutput},
    batch::{MAGIC_PAD_VAL, OBSERVATION_KEY},
    encoder::{TrajEncoderConfig, TstepEncoderConfig},
    popart::PopArtConfig,
    ActionSpace, Amago, AmagoConfig, Timestep, TrajectoryBatch, TrajectoryProcessor,
    TrajectoryProcessorConfig, TrajectoryReplayBuffer, TrajectoryReplayBufferConfig,
};
use amago_core::{
    record::{BufferedRecorder, Record},
    Act, Agent, DefaultEvaluator, Env, Evaluator, Obs, Policy, Step, Trainer, TrainerConfig,
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarMap;
use std::collections::HashMap;
use tempdir::TempDir;

const OBS_DIM: usize = 2;
const GOAL_DIM: usize = 1;

#[derive(Clone, Debug)]
struct BanditObs {
    t: u32,
    reward: f32,
    prev_action: Option<f32>,
}

impl Obs for BanditObs {
    fn len(&self) -> usize {
        1
    }
}

impl From<BanditObs> for Timestep {
    fn from(obs: BanditObs) -> Self {
        let observation = vec![obs.t as f32 / 4.0, 1.0];
        match obs.prev_action {
            None => Timestep::first(observation, vec![0.5]),
            Some(a) => Timestep::next(observation, vec![0.5], obs.reward, vec![a], obs.t),
        }
    }
}

#[derive(Clone, Debug)]
struct BanditAct(f32);

impl Act for BanditAct {
    fn len(&self) -> usize {
        1
    }
}

impl From<Tensor> for BanditAct {
    fn from(t: Tensor) -> Self {
        let v = t.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        Self(v[0])
    }
}

impl From<BanditAct> for Vec<f32> {
    fn from(act: BanditAct) -> Self {
        vec![act.0]
    }
}

/// Rewards actions close to 0.5, episodes have 4 steps.
struct BanditEnv {
    t: u32,
}

impl Env for BanditEnv {
    type Config = ();
    type Obs = BanditObs;
    type Act = BanditAct;
    type Info = ();

    fn build(_config: &Self::Config, _seed: i64) -> Result<Self> {
        Ok(Self { t: 0 })
    }

    fn step(&mut self, a: &Self::Act) -> (Step<Self>, Record) {
        self.t += 1;
        let reward = -(a.0 - 0.5).powi(2);
        let obs = BanditObs {
            t: self.t,
            reward,
            prev_action: Some(a.0),
        };
        let is_terminated = (self.t >= 4) as i8;
        let step = Step::new(obs, a.clone(), vec![reward], vec![is_terminated], vec![0], (), None);
        (step, Record::empty())
    }

    fn reset(&mut self, _is_done: Option<&Vec<i8>>) -> Result<Self::Obs> {
        self.t = 0;
        Ok(BanditObs {
            t: 0,
            reward: 0.0,
            prev_action: None,
        })
    }

    fn step_with_reset(&mut self, a: &Self::Act) -> (Step<Self>, Record) {
        let (mut step, record) = self.step(a);
        if step.is_done() {
            step.init_obs = Some(self.reset(None).unwrap());
        }
        (step, record)
    }

    fn reset_with_index(&mut self, _ix: usize) -> Result<Self::Obs> {
        self.reset(None)
    }
}

type TestAgent = Amago<BanditEnv, TrajectoryReplayBuffer>;

fn config(action_space: ActionSpace) -> AmagoConfig {
    let rl2_dim = 3 + action_space.action_dim();
    let tstep_encoder_config = TstepEncoderConfig {
        d_hidden: 16,
        d_output: 8,
        ..TstepEncoderConfig::new(OBS_DIM, GOAL_DIM, rl2_dim)
    };
    AmagoConfig::new(OBS_DIM, GOAL_DIM, action_space)
        .tstep_encoder_config(tstep_encoder_config)
        .traj_encoder_config(TrajEncoderConfig::gru(8, 16, 8))
        .critic_units(vec![16])
        .actor_units(vec![16])
        .multigammas(vec![0.9])
        .gamma(0.99)
        .lr_warmup_steps(0)
        .learning_rate(1e-3)
        .batch_size(4)
}

fn values(n: usize, offset: usize) -> impl Iterator<Item = f32> {
    (0..n).map(move |i| ((i + offset) as f32 * 0.37).sin() * 0.9)
}

/// A batch of continuous-action windows of `L` timesteps where row `i` has
/// `lengths[i]` valid timesteps.
///
/// Entries that never reach a masked loss term are filled with `fill`. The
/// action slot of the last valid timestep is kept at the pad value.
fn batch(lengths: &[usize], l: usize, a_dim: usize, fill: f32) -> Result<TrajectoryBatch> {
    let b = lengths.len();
    let mut obs = vec![];
    let mut goals = vec![];
    let mut rl2s = vec![];
    let mut actions = vec![];
    let mut rews = vec![];
    let mut dones = vec![];
    let mut time_idxs = vec![];

    for (i, n) in lengths.iter().copied().enumerate() {
        for t in 0..l {
            let seed = 31 * i + 7 * t;
            if t < n {
                obs.extend(values(OBS_DIM, seed));
                goals.push(0.5);
                rl2s.extend([(t == 0) as u8 as f32, 0.1 * t as f32, t as f32]);
                rl2s.extend(values(a_dim, seed + 3));
                time_idxs.push(t as f32);
            } else {
                obs.extend(vec![fill; OBS_DIM]);
                goals.push(fill);
                rl2s.extend(vec![MAGIC_PAD_VAL; 3 + a_dim]);
                time_idxs.push(fill);
            }
            if t + 1 == l {
                continue;
            }
            match t {
                t if t + 1 < n => {
                    actions.extend(values(a_dim, seed + 5));
                    rews.push(0.1 * t as f32);
                    dones.push((t + 2 == n) as u8 as f32);
                }
                t if t + 1 == n => {
                    actions.extend(vec![MAGIC_PAD_VAL; a_dim]);
                    rews.push(fill);
                    dones.push(fill);
                }
                _ => {
                    actions.extend(vec![fill; a_dim]);
                    rews.push(fill);
                    dones.push(fill);
                }
            }
        }
    }

    let dev = &Device::Cpu;
    Ok(TrajectoryBatch {
        obs: HashMap::from([(
            OBSERVATION_KEY.to_string(),
            Tensor::from_vec(obs, (b, l, OBS_DIM), dev)?,
        )]),
        goals: Tensor::from_vec(goals, (b, l, 1, GOAL_DIM), dev)?,
        rl2s: Tensor::from_vec(rl2s, (b, l, 3 + a_dim), dev)?,
        actions: Tensor::from_vec(actions, (b, l - 1, a_dim), dev)?,
        rews: Tensor::from_vec(rews, (b, l - 1, 1), dev)?,
        dones: Tensor::from_vec(dones, (b, l - 1, 1), dev)?,
        time_idxs: Tensor::from_vec(time_idxs, (b, l, 1), dev)?,
    })
}

fn snapshot(varmap: &VarMap) -> HashMap<String, Vec<f32>> {
    varmap
        .data()
        .lock()
        .unwrap()
        .iter()
        .map(|(k, v)| (k.clone(), v.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap()))
        .collect()
}

fn scalar(t: &Tensor) -> f32 {
    t.to_scalar::<f32>().unwrap()
}

/// Replaces the actions of `batch` with one-hot vectors of their argmax.
fn one_hot_actions(mut batch: TrajectoryBatch) -> Result<TrajectoryBatch> {
    let a_dim = batch.actions.dim(2)?;
    let idx = batch.actions.argmax_keepdim(D::Minus1)?;
    let range = Tensor::arange(0u32, a_dim as u32, &Device::Cpu)?.reshape((1, 1, a_dim))?;
    batch.actions = range.broadcast_eq(&idx)?.to_dtype(DType::F32)?;
    Ok(batch)
}

/// Replaces the actions of `batch` with their signs as 0/1 flags.
fn binary_actions(mut batch: TrajectoryBatch) -> Result<TrajectoryBatch> {
    batch.actions = batch.actions.ge(0f64)?.to_dtype(DType::F32)?;
    Ok(batch)
}

/// Checks the shapes of the losses of a batch `[B, L]` and that they are finite.
fn check_losses(loss: &LossOutput, b: usize, l: usize, c: usize, with_critic: bool) {
    let g = 2;
    assert_eq!(loss.actor_loss_elementwise.dims(), [b, l - 1, g, 1]);
    assert_eq!(loss.actor_mask.dims(), [b, l - 1, g, 1]);
    assert_eq!(loss.critic_mask.dims(), [b, l - 1, c, g, 1]);
    assert!(scalar(&loss.actor_loss).is_finite());
    assert_eq!(loss.critic_loss.is_some(), with_critic);
    assert_eq!(loss.critic_loss_elementwise.is_some(), with_critic);
    if let (Some(critic_loss), Some(elementwise)) =
        (&loss.critic_loss, &loss.critic_loss_elementwise)
    {
        assert_eq!(elementwise.dims(), [b, l - 1, c, g, 1]);
        assert!(scalar(critic_loss).is_finite());
    }
}

#[test]
fn test_padding_does_not_change_losses() -> Result<()> {
    let popart = PopArtConfig {
        enabled: false,
        ..PopArtConfig::default()
    };
    let mut agent = TestAgent::new(config(ActionSpace::Continuous(2)).popart(popart))?;
    let lengths = [6, 4, 2];

    agent.seed(7);
    let loss_a = agent.compute_loss(&batch(&lengths, 6, 2, MAGIC_PAD_VAL)?, None)?;
    agent.seed(7);
    let loss_b = agent.compute_loss(&batch(&lengths, 6, 2, 2.5)?, None)?;

    let critic_a = scalar(loss_a.critic_loss.as_ref().unwrap());
    let critic_b = scalar(loss_b.critic_loss.as_ref().unwrap());
    assert!((critic_a - critic_b).abs() < 1e-5);
    assert!((scalar(&loss_a.actor_loss) - scalar(&loss_b.actor_loss)).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_padding_does_not_change_value_statistics() -> Result<()> {
    let tmp_dir = TempDir::new("amago")?;
    let make_config = || {
        config(ActionSpace::Continuous(2))
            .num_critics(4)
            .num_critics_td(2)
    };
    let mut agent_a = TestAgent::new(make_config())?;
    agent_a.save_params(tmp_dir.path())?;
    let mut agent_b = TestAgent::new(make_config())?;
    agent_b.load_params(tmp_dir.path())?;
    assert!(agent_a.config().popart.enabled);

    // Padded rewards, observations and actions differ between the batches
    let lengths = [6, 4, 2, 0];
    agent_a.seed(11);
    agent_b.seed(11);
    let loss_a = agent_a.compute_loss(&batch(&lengths, 6, 2, MAGIC_PAD_VAL)?, None)?;
    let loss_b = agent_b.compute_loss(&batch(&lengths, 6, 2, 2.5)?, None)?;

    let critic_a = scalar(loss_a.critic_loss.as_ref().unwrap());
    let critic_b = scalar(loss_b.critic_loss.as_ref().unwrap());
    assert!((critic_a - critic_b).abs() < 1e-5);
    assert!((scalar(&loss_a.actor_loss) - scalar(&loss_b.actor_loss)).abs() < 1e-5);

    let (popart_a, popart_b) = (agent_a.popart(), agent_b.popart());
    assert!(popart_a.mu().iter().all(|m| *m != 0.0));
    for (x, y) in popart_a.mu().iter().zip(popart_b.mu().iter()) {
        assert!((x - y).abs() <= 1e-6 * x.abs().max(1.0));
    }
    for (x, y) in popart_a.nu().iter().zip(popart_b.nu().iter()) {
        assert!((x - y).abs() <= 1e-6 * x.abs().max(1.0));
    }
    Ok(())
}

#[test]
fn test_losses_with_all_padding_row() -> Result<()> {
    let config = config(ActionSpace::Continuous(2))
        .num_critics(4)
        .num_critics_td(2);
    let mut agent = TestAgent::new(config)?;
    let batch = batch(&[5, 3, 0], 5, 2, MAGIC_PAD_VAL)?;
    let mut stats = Record::empty();
    let loss = agent.compute_loss(&batch, Some(&mut stats))?;

    assert_eq!(loss.mask.dims(), [3, 5, 1]);
    assert_eq!(loss.critic_mask.dims(), [3, 4, 4, 2, 1]);
    assert_eq!(loss.actor_mask.dims(), [3, 4, 2, 1]);
    assert_eq!(loss.actor_loss_elementwise.dims(), [3, 4, 2, 1]);

    // The padding row contributes nothing
    let critic_mask = loss.critic_mask.narrow(0, 2, 1)?.sum_all()?;
    let actor_mask = loss.actor_mask.narrow(0, 2, 1)?.sum_all()?;
    assert_eq!(scalar(&critic_mask), 0.0);
    assert_eq!(scalar(&actor_mask), 0.0);
    // Rows of 5 and 3 valid timesteps have 4 and 2 transitions into valid states
    assert_eq!(scalar(&loss.critic_mask.sum_all()?), ((4 + 2) * 4 * 2) as f32);
    assert_eq!(scalar(&loss.actor_mask.sum_all()?), ((4 + 3) * 2) as f32);

    assert!(scalar(loss.critic_loss.as_ref().unwrap()).is_finite());
    assert!(scalar(&loss.actor_loss).is_finite());
    assert!(stats.get_scalar("Mean Reward (in training sequences)")?.is_finite());
    Ok(())
}

#[test]
fn test_update_moves_online_parameters() -> Result<()> {
    let mut agent = TestAgent::new(config(ActionSpace::Continuous(2)))?;
    let before = snapshot(agent.varmap());
    let batch = batch(&[5, 3], 5, 2, MAGIC_PAD_VAL)?;

    let record = agent.update(&batch, true)?;
    assert_eq!(agent.n_updates(), 1);
    assert!(record.get_scalar("total_loss")?.is_finite());
    assert!(record.get_scalar("critic_loss")?.is_finite());
    assert!(record.get_scalar("actor Grad Norm")?.is_finite());
    assert_eq!(record.get_scalar("Mean Seq. Length")?, 4.0);

    let after = snapshot(agent.varmap());
    assert!(before.iter().any(|(k, v)| after[k] != *v));

    // Without logging only the losses are recorded
    let record = agent.update(&batch, false)?;
    assert!(record.get_scalar("Grad Norm").is_err());
    assert!(record.get_scalar("actor_loss").is_ok());
    Ok(())
}

#[test]
fn test_hard_sync_copies_online_parameters() -> Result<()> {
    let mut agent = TestAgent::new(config(ActionSpace::Continuous(1)))?;
    let batch = batch(&[4, 4], 4, 1, MAGIC_PAD_VAL)?;
    agent.update(&batch, false)?;
    agent.hard_sync_targets()?;

    let online = snapshot(agent.varmap());
    for varmap in [agent.varmap_tgt(), agent.varmap_max()].iter() {
        let synced = snapshot(varmap);
        assert!(!synced.is_empty());
        for (k, v) in synced.iter() {
            assert_eq!(online[k], *v, "{}", k);
        }
    }
    Ok(())
}

#[test]
fn test_soft_sync_tracks_online_parameters() -> Result<()> {
    let tau = 0.25;
    let agent = TestAgent::new(config(ActionSpace::Continuous(1)).tau(tau))?;

    // Move the online critics away from the targets
    for (k, v) in agent.varmap().data().lock().unwrap().iter() {
        if k.starts_with("critics") {
            v.set(&(v.as_tensor() + 1.0)?)?;
        }
    }
    let online = snapshot(agent.varmap());
    let target = snapshot(agent.varmap_tgt());

    agent.soft_sync_targets()?;
    let tracked = snapshot(agent.varmap_tgt());
    for (k, v) in tracked.iter() {
        for ((x, o), t) in v.iter().zip(online[k].iter()).zip(target[k].iter()) {
            let expected = tau as f32 * o + (1.0 - tau as f32) * t;
            assert!((x - expected).abs() < 1e-5, "{}", k);
        }
    }
    for (k, v) in snapshot(agent.varmap_max()).iter() {
        assert_eq!(online[k], *v, "{}", k);
    }
    Ok(())
}

#[test]
fn test_greedy_discrete_actions() -> Result<()> {
    let config = config(ActionSpace::Discrete(4))
        .online_coeff(0.0)
        .actor_units(vec![8]);
    let mut agent = TestAgent::new(config)?;
    assert_eq!(agent.gammas(), [0.9, 0.99]);

    // Constant logits, the primary gamma prefers action 1
    {
        let data = agent.varmap().data().lock().unwrap();
        let w = &data["actor.mlp.ln1.weight"];
        w.set(&w.as_tensor().zeros_like()?)?;
        let bias = [0f32, 0.0, 5.0, 0.0, 0.0, 3.0, 0.0, 1.0];
        data["actor.mlp.ln1.bias"].set(&Tensor::from_slice(&bias, (8,), &Device::Cpu)?)?;
    }

    let (n, l) = (2, 3);
    let obs = Tensor::randn(0f32, 1.0, (n, l, OBS_DIM), &Device::Cpu)?;
    let goals = Tensor::ones((n, l, GOAL_DIM), DType::F32, &Device::Cpu)?;
    let rl2s = Tensor::randn(0f32, 1.0, (n, l, 7), &Device::Cpu)?;
    let time_idxs = Tensor::zeros((n, l, 1), DType::F32, &Device::Cpu)?;

    let (actions, hidden) =
        agent.get_actions(&obs, &goals, &rl2s, &[3, 2], &time_idxs, None, false)?;
    assert_eq!(actions.dtype(), DType::U8);
    assert_eq!(actions.flatten_all()?.to_vec1::<u8>()?, vec![1, 1]);
    assert!(hidden.is_some());

    let hidden = Tensor::zeros((n, 16), DType::F32, &Device::Cpu)?;
    let (actions, hidden) =
        agent.get_actions(&obs, &goals, &rl2s, &[3, 2], &time_idxs, Some(hidden), false)?;
    assert_eq!(actions.flatten_all()?.to_vec1::<u8>()?, vec![1, 1]);
    assert_eq!(hidden.unwrap().dims(), [n, 16]);
    Ok(())
}

#[test]
fn test_two_hot_losses() -> Result<()> {
    let mut agent = TestAgent::new(config(ActionSpace::Continuous(2)).multi_task())?;
    let batch = batch(&[5, 3, 4], 5, 2, MAGIC_PAD_VAL)?;
    let mut stats = Record::empty();
    let loss = agent.compute_loss(&batch, Some(&mut stats))?;
    check_losses(&loss, 3, 5, 4, true);
    assert!(stats.get_scalar("Mean Maximum Bin (All Gammas)")?.is_finite());

    // The policy gradient term scores actions with the bin expectation
    let config = config(ActionSpace::Continuous(2))
        .multi_task()
        .online_coeff(1.0);
    let mut agent = TestAgent::new(config)?;
    let loss = agent.compute_loss(&batch, None)?;
    check_losses(&loss, 3, 5, 4, true);

    let record = agent.update(&batch, true)?;
    assert!(record.get_scalar("critic_loss")?.is_finite());
    Ok(())
}

#[test]
fn test_discrete_losses() -> Result<()> {
    let config = config(ActionSpace::Discrete(3))
        .online_coeff(0.0)
        .fbc_filter_k(3);
    let mut agent = TestAgent::new(config)?;
    let batch = one_hot_actions(batch(&[5, 3, 4], 5, 3, MAGIC_PAD_VAL)?)?;
    let mut stats = Record::empty();
    let loss = agent.compute_loss(&batch, Some(&mut stats))?;
    check_losses(&loss, 3, 5, 4, true);
    assert!(stats.get_scalar("Minimum Action Logprob")?.is_finite());

    let record = agent.update(&batch, true)?;
    assert!(record.get_scalar("total_loss")?.is_finite());
    Ok(())
}

#[test]
fn test_multi_binary_losses() -> Result<()> {
    let mut agent = TestAgent::new(config(ActionSpace::MultiBinary(3)).online_coeff(0.0))?;
    let batch = binary_actions(batch(&[5, 3, 4], 5, 3, MAGIC_PAD_VAL)?)?;
    let loss = agent.compute_loss(&batch, None)?;
    check_losses(&loss, 3, 5, 4, true);

    // Log-likelihoods are clamped
    let logp_bound = 1e3 * agent.config().offline_coeff;
    let actor = loss.actor_loss_elementwise.flatten_all()?.to_vec1::<f32>()?;
    assert!(actor.iter().all(|x| x.abs() <= logp_bound));

    let record = agent.update(&batch, true)?;
    assert!(record.get_scalar("total_loss")?.is_finite());
    Ok(())
}

#[test]
fn test_plain_behavior_cloning() -> Result<()> {
    let config = config(ActionSpace::Continuous(2))
        .online_coeff(0.0)
        .fake_filter(true);
    let mut agent = TestAgent::new(config)?;
    let batch = batch(&[5, 3, 4], 5, 2, MAGIC_PAD_VAL)?;
    let loss = agent.compute_loss(&batch, None)?;
    check_losses(&loss, 3, 5, 4, false);

    // Without a critic loss the critics receive no gradient
    let critics = |agent: &TestAgent| {
        snapshot(agent.varmap())
            .into_iter()
            .filter(|(k, _)| k.starts_with("critics"))
            .collect::<HashMap<_, _>>()
    };
    let before = critics(&agent);
    let record = agent.update(&batch, false)?;
    assert!(record.get_scalar("critic_loss").is_err());
    assert!(record.get_scalar("actor_loss")?.is_finite());
    assert_eq!(critics(&agent), before);
    Ok(())
}

#[test]
fn test_exp_filter_losses() -> Result<()> {
    let filter = AdvantageFilter::Exp {
        beta: 1.0,
        clip: 5.0,
    };
    let batch = batch(&[5, 3, 4], 5, 2, MAGIC_PAD_VAL)?;
    for online_coeff in [0.0, 1.0].iter() {
        let config = config(ActionSpace::Continuous(2))
            .advantage_filter(filter.clone())
            .online_coeff(*online_coeff);
        let mut agent = TestAgent::new(config)?;
        let loss = agent.compute_loss(&batch, None)?;
        check_losses(&loss, 3, 5, 4, true);
    }
    Ok(())
}

#[test]
fn test_validate_leaves_agent_unchanged() -> Result<()> {
    let mut agent = TestAgent::new(config(ActionSpace::Continuous(2)))?;
    let batch = batch(&[5, 3], 5, 2, MAGIC_PAD_VAL)?;
    let params = snapshot(agent.varmap());
    let popart = agent.popart().state().clone();

    let record = agent.validate(&batch)?;
    assert!(record.get_scalar("critic_loss")?.is_finite());
    assert!(record.get_scalar("actor_loss")?.is_finite());
    assert_eq!(snapshot(agent.varmap()), params);
    assert_eq!(agent.popart().state(), &popart);
    assert_eq!(agent.n_updates(), 0);
    Ok(())
}

/// Actions of a 4-step training episode, optionally with an evaluation run
/// between the second and the third step.
fn training_actions(agent: &mut TestAgent, evaluate_midway: bool) -> Result<Vec<f32>> {
    agent.train();
    agent.reset(None);
    let mut env = BanditEnv::build(&(), 0)?;
    let mut obs = env.reset(None)?;
    let mut actions = vec![];
    for t in 0..4 {
        if t == 2 && evaluate_midway {
            agent.eval();
            DefaultEvaluator::<BanditEnv>::new(&(), 0, 2)?.evaluate(agent)?;
            agent.train();
        }
        let act = agent.sample(&obs)?;
        actions.push(act.0);
        obs = env.step(&act).0.obs;
    }
    Ok(actions)
}

#[test]
fn test_evaluation_keeps_training_context() -> Result<()> {
    let tmp_dir = TempDir::new("amago")?;
    let mut agent = TestAgent::new(config(ActionSpace::Continuous(1)))?;
    agent.save_params(tmp_dir.path())?;
    let mut reference = TestAgent::new(config(ActionSpace::Continuous(1)))?;
    reference.load_params(tmp_dir.path())?;

    let actions = training_actions(&mut agent, true)?;
    let expected = training_actions(&mut reference, false)?;
    assert_eq!(actions, expected);
    Ok(())
}

#[test]
fn test_policy_gradient_needs_continuous_actions() {
    assert!(TestAgent::new(config(ActionSpace::Discrete(3)).online_coeff(1.0)).is_err());
    assert!(TestAgent::new(config(ActionSpace::MultiBinary(3)).online_coeff(0.0)).is_ok());
}

#[test]
fn test_save_and_load() -> Result<()> {
    let tmp_dir = TempDir::new("amago")?;
    let model_dir = tmp_dir.path().join("model");

    let mut agent = TestAgent::new(config(ActionSpace::Continuous(1)))?;
    agent.update(&batch(&[4, 3], 4, 1, MAGIC_PAD_VAL)?, false)?;
    agent.save_params(&model_dir)?;
    let saved = snapshot(agent.varmap());
    let saved_tgt = snapshot(agent.varmap_tgt());
    let saved_popart = agent.popart().state().clone();

    let mut loaded = TestAgent::new(config(ActionSpace::Continuous(1)))?;
    loaded.load_params(&model_dir)?;
    assert_eq!(snapshot(loaded.varmap()), saved);
    assert_eq!(snapshot(loaded.varmap_tgt()), saved_tgt);
    assert_eq!(loaded.popart().state(), &saved_popart);
    Ok(())
}

#[test]
fn test_train_on_bandit() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp_dir = TempDir::new("amago")?;
    let model_dir = tmp_dir.path().to_str().unwrap().to_string();

    let trainer_config = TrainerConfig::default()
        .epochs(2)
        .train_timesteps_per_epoch(6)
        .train_grad_updates_per_epoch(3)
        .val_interval(1)
        .val_checks_per_epoch(2)
        .log_interval(2)
        .ckpt_interval(1)
        .model_dir(model_dir);
    let step_proc_config = TrajectoryProcessorConfig::new(ActionSpace::Continuous(1));
    let replay_buffer_config = TrajectoryReplayBufferConfig::default().max_seq_len(4);
    let mut trainer = Trainer::<
        BanditEnv,
        TrajectoryProcessor<BanditEnv>,
        TrajectoryReplayBuffer,
    >::build(trainer_config, (), step_proc_config, replay_buffer_config);

    let config = config(ActionSpace::Continuous(1))
        .max_seq_len(4)
        .advantage_filter(AdvantageFilter::Exp {
            beta: 1.0,
            clip: 50.0,
        });
    let mut agent = TestAgent::new(config)?;
    let mut recorder = BufferedRecorder::new();
    let mut evaluator = DefaultEvaluator::<BanditEnv>::new(&(), 0, 2)?;
    trainer.train(&mut agent, &mut recorder, &mut evaluator)?;

    assert_eq!(agent.n_updates(), 6);
    assert!(tmp_dir.path().join("epoch_1").join("amago.pt").exists());
    let returns = recorder
        .iter()
        .filter_map(|r| r.get_scalar("val/Episode return").ok())
        .collect::<Vec<_>>();
    assert_eq!(returns.len(), 2);
    assert!(returns.iter().all(|r| r.is_finite() && *r <= 0.0));
    let val_losses = recorder
        .iter()
        .filter_map(|r| r.get_scalar("val_update/critic_loss_mean").ok())
        .collect::<Vec<_>>();
    assert_eq!(val_losses.len(), 2);
    assert!(val_losses.iter().all(|l| l.is_finite()));
    Ok(())
}
