//! R2D2-style agent: epsilon-greedy acting plus the double-DQN, multi-step,
//! prioritized-replay training objective.
//!
//! The agent owns an online and a target Q-network. The target's parameters
//! change only through [`R2d2Agent::sync_target_with_online`], a wholesale
//! copy; gradient descent touches the online network alone, and the caller
//! serializes syncs against in-flight forward passes. In VDN mode the
//! per-agent action-values are summed into one joint value before the TD
//! error, while reward and bootstrap stay per batch element.

use burn::prelude::*;
use burn::tensor::{Distribution, ElementConversion};

use crate::batch::{SequenceBatch, TransitionBatch};
use crate::error::SymError;
use crate::net::{QNet, SymQNet, SymQNetConfig, hand_pred_loss};
use crate::sym::lstm::RecurrentState;

/// Aggregate agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Q-network configuration (the network variant is fixed here, once).
    pub net: SymQNetConfig,
    /// Sum per-agent values into a joint value (factorized cooperative mode).
    pub vdn: bool,
    /// Multi-step return horizon.
    pub multi_step: usize,
    /// Discount factor.
    pub gamma: f64,
    /// Priority aggregation mix: `eta * max + (1 - eta) * mean` over time.
    pub eta: f64,
    /// Skip the TD computation and give every sample priority 1.
    pub uniform_priority: bool,
}

impl AgentConfig {
    pub fn new(net: SymQNetConfig) -> Self {
        Self {
            net,
            vdn: false,
            multi_step: 1,
            gamma: 0.99,
            eta: 0.9,
            uniform_priority: false,
        }
    }
}

/// Field overrides applied while cloning an agent to another device.
#[derive(Debug, Clone, Default)]
pub struct CloneOverrides {
    pub vdn: Option<bool>,
}

/// Observation for one epsilon-greedy acting step.
#[derive(Debug, Clone)]
pub struct ActInput<B: Backend> {
    /// Private observations, `[rows, in_size]`.
    pub priv_s: Tensor<B, 2>,
    /// Legal-move mask, `[rows, num_actions]`.
    pub legal_move: Tensor<B, 2>,
    /// Per-row exploration probability, `[rows]`.
    pub eps: Tensor<B, 1>,
    /// Recurrent state entering this step.
    pub state: RecurrentState<B>,
}

/// Reply from one acting step. The greedy action is reported even when the
/// exploratory one was taken, for callers that track the on-policy choice.
#[derive(Debug, Clone)]
pub struct ActReply<B: Backend> {
    pub action: Tensor<B, 1, Int>,
    pub greedy_action: Tensor<B, 1, Int>,
    pub state: RecurrentState<B>,
}

/// Double-DQN agent over any [`QNet`] implementation.
pub struct R2d2Agent<B: Backend, N: QNet<B>> {
    pub online_net: N,
    pub target_net: N,
    vdn: bool,
    multi_step: usize,
    gamma: f64,
    eta: f64,
    uniform_priority: bool,
    device: B::Device,
}

impl<B: Backend> R2d2Agent<B, SymQNet<B>> {
    /// Build an agent with the symmetric network variant; the freshly built
    /// target starts as a copy of the online network.
    pub fn new(config: &AgentConfig, device: &B::Device) -> Result<Self, SymError> {
        let online_net = config.net.init::<B>(device)?;
        let target_net = online_net.clone();
        tracing::info!(
            vdn = config.vdn,
            multi_step = config.multi_step,
            gamma = config.gamma,
            "built R2D2 agent"
        );
        Ok(Self {
            online_net,
            target_net,
            vdn: config.vdn,
            multi_step: config.multi_step,
            gamma: config.gamma,
            eta: config.eta,
            uniform_priority: config.uniform_priority,
            device: device.clone(),
        })
    }
}

impl<B: Backend, N: QNet<B>> R2d2Agent<B, N> {
    pub fn vdn(&self) -> bool {
        self.vdn
    }

    /// Zero recurrent state for `rows` concurrent sequences.
    pub fn init_state(&self, rows: usize) -> RecurrentState<B> {
        self.online_net.init_state(rows, &self.device)
    }

    /// Replace the target parameters with the online ones, wholesale.
    pub fn sync_target_with_online(&mut self) {
        self.target_net = self.online_net.clone();
        tracing::debug!("synced target network with online network");
    }

    /// Parameter-identical copy on another device, with optional overrides.
    pub fn clone_to(&self, device: &B::Device, overrides: CloneOverrides) -> Self {
        tracing::info!(?device, "cloning agent");
        Self {
            online_net: self.online_net.clone().fork(device),
            target_net: self.target_net.clone().fork(device),
            vdn: overrides.vdn.unwrap_or(self.vdn),
            multi_step: self.multi_step,
            gamma: self.gamma,
            eta: self.eta,
            uniform_priority: self.uniform_priority,
            device: device.clone(),
        }
    }

    /// Greedy action per row: shift advantages so illegal slots become
    /// exactly zero and legal ones stay strictly positive, then arg-max.
    pub fn greedy_act(
        &self,
        priv_s: Tensor<B, 2>,
        legal_move: Tensor<B, 2>,
        state: &RecurrentState<B>,
    ) -> (Tensor<B, 1, Int>, RecurrentState<B>) {
        let (adv, next_state) = self.online_net.act(priv_s, state);
        assert_eq!(
            adv.dims(),
            legal_move.dims(),
            "advantage/legal-mask shape mismatch"
        );
        let adv_min: f32 = adv.clone().min().into_scalar().elem();
        let legal_adv = adv.sub_scalar(adv_min).add_scalar(1.0) * legal_move;
        let greedy = legal_adv.argmax(1).squeeze::<1>(1);
        (greedy, next_state)
    }

    /// Epsilon-greedy acting step: a uniformly random legal action replaces
    /// the greedy one with per-row probability `eps`.
    pub fn act(&self, input: ActInput<B>) -> ActReply<B> {
        let ActInput {
            priv_s,
            legal_move,
            eps,
            state,
        } = input;
        let rows = priv_s.dims()[0];
        assert_eq!(eps.dims()[0], rows, "eps/observation row mismatch");

        let (greedy_action, next_state) = self.greedy_act(priv_s, legal_move.clone(), &state);

        // uniform draw over legal slots: iid noise masked to the legal set
        let noise = Tensor::random(
            legal_move.dims(),
            Distribution::Uniform(0.0, 1.0),
            &self.device,
        ) * legal_move;
        let random_action = noise.argmax(1).squeeze::<1>(1);

        let explore = Tensor::<B, 1>::random([rows], Distribution::Uniform(0.0, 1.0), &self.device)
            .lower(eps)
            .int();
        let keep = explore.clone().mul_scalar(-1).add_scalar(1);
        let action = greedy_action.clone() * keep + random_action * explore;

        ActReply {
            action,
            greedy_action,
            state: next_state.detach(),
        }
    }

    /// Per-sample replay priority for one batch of single transitions:
    /// |double-DQN TD error|, or constant 1 in uniform-priority mode.
    pub fn compute_priority(&self, batch: &TransitionBatch<B>) -> Tensor<B, 1> {
        if self.uniform_priority {
            return batch.reward.ones_like();
        }

        let rows = batch.priv_s.dims()[0];
        let batch_size = batch.reward.dims()[0];
        let num_players = if self.vdn { rows / batch_size } else { 1 };
        assert_eq!(
            batch_size * num_players,
            rows,
            "observation rows are not a whole number of players per sample"
        );

        let online = self.online_net.forward(
            batch.priv_s.clone().unsqueeze::<3>(),
            batch.legal_move.clone().unsqueeze::<3>(),
            batch.action.clone().unsqueeze::<2>(),
            Some(&batch.state),
        );
        let online_qa = online.qa.squeeze::<1>(0);

        // double-DQN: the online network picks, the target network values
        let (next_greedy, _) = self.greedy_act(
            batch.next_priv_s.clone(),
            batch.next_legal_move.clone(),
            &batch.next_state,
        );
        let target = self.target_net.forward(
            batch.next_priv_s.clone().unsqueeze::<3>(),
            batch.next_legal_move.clone().unsqueeze::<3>(),
            next_greedy.unsqueeze::<2>(),
            Some(&batch.next_state),
        );
        let target_qa = target.qa.squeeze::<1>(0);

        let (online_qa, target_qa) = if self.vdn {
            (
                sum_players(online_qa, batch_size, num_players),
                sum_players(target_qa, batch_size, num_players),
            )
        } else {
            (online_qa, target_qa)
        };

        assert_eq!(
            batch.reward.dims(),
            batch.bootstrap.dims(),
            "reward/bootstrap shape mismatch"
        );
        let target = batch.reward.clone()
            + batch.bootstrap.clone()
                * target_qa.mul_scalar(self.gamma.powi(self.multi_step as i32));
        (target - online_qa).abs().detach()
    }

    /// Double-DQN multi-step TD error over a padded sequence batch.
    ///
    /// Returns the per-step error `[seq_len, batch]` (zero beyond each
    /// sample's true length) and the recurrent outputs feeding the auxiliary
    /// head. Only works on trajectories padded after the terminal step.
    pub fn td_error(&self, batch: &SequenceBatch<B>) -> (Tensor<B, 2>, Tensor<B, 3>) {
        let [max_seq_len, rows, _] = batch.priv_s.dims();
        let batch_size = batch.seq_len.dims()[0];
        let num_players = if self.vdn { rows / batch_size } else { 1 };
        assert_eq!(
            batch_size * num_players,
            rows,
            "observation rows are not a whole number of players per sample"
        );

        let online = self.online_net.forward(
            batch.priv_s.clone(),
            batch.legal_move.clone(),
            batch.action.clone(),
            batch.state.as_ref(),
        );
        let target = self.target_net.forward(
            batch.priv_s.clone(),
            batch.legal_move.clone(),
            online.greedy_action.clone(),
            batch.state.as_ref(),
        );

        let online_qa = online.qa;
        let target_qa = target.qa.detach();
        let (online_qa, target_qa) = if self.vdn {
            (
                sum_players_seq(online_qa, max_seq_len, batch_size, num_players),
                sum_players_seq(target_qa, max_seq_len, batch_size, num_players),
            )
        } else {
            (online_qa, target_qa)
        };

        // shift the target stream back by the horizon; there is no further
        // return beyond sequence end
        let k = self.multi_step;
        let shifted = if k >= max_seq_len {
            target_qa.zeros_like()
        } else {
            Tensor::cat(
                vec![
                    target_qa.narrow(0, k, max_seq_len - k),
                    Tensor::zeros([k, batch_size], &self.device),
                ],
                0,
            )
        };

        assert_eq!(
            batch.reward.dims(),
            batch.bootstrap.dims(),
            "reward/bootstrap shape mismatch"
        );
        assert_eq!(shifted.dims(), batch.reward.dims());
        let target = batch.reward.clone()
            + batch.bootstrap.clone() * shifted.mul_scalar(self.gamma.powi(k as i32));

        let mask = self.seq_mask(max_seq_len, batch_size, &batch.seq_len);
        let err = (target.detach() - online_qa) * mask;
        (err, online.lstm_o)
    }

    /// Composite training loss: smooth-L1 of the TD error summed over time,
    /// normalized by true sequence length and averaged over the batch, plus
    /// `pred_weight` times the auxiliary own-hand loss. Also returns the
    /// per-sample replay priorities.
    pub fn loss(&self, batch: &SequenceBatch<B>, pred_weight: f64) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let (err, lstm_o) = self.td_error(batch);
        let seq_len_f = batch.seq_len.clone().float();

        let rl_loss = smooth_l1(err.clone()).sum_dim(0).squeeze::<1>(0);
        let mut loss = (rl_loss / seq_len_f.clone()).mean();

        if pred_weight > 0.0 {
            let logits = self.online_net.hand_logits(lstm_o);
            let xent = hand_pred_loss(logits, batch.own_hand.clone());
            let aux = (xent / seq_len_f.clone()).mean();
            loss = loss + aux.mul_scalar(pred_weight);
        }

        let priority = self.aggregate_priority(err, &seq_len_f);
        (loss, priority)
    }

    /// R2D2 priority aggregation over time: `eta * max + (1 - eta) * mean`
    /// of |TD error| across each sample's valid steps.
    fn aggregate_priority(&self, err: Tensor<B, 2>, seq_len_f: &Tensor<B, 1>) -> Tensor<B, 1> {
        let abs = err.abs();
        let p_max = abs.clone().max_dim(0).squeeze::<1>(0);
        let p_mean = abs.sum_dim(0).squeeze::<1>(0) / seq_len_f.clone();
        (p_max.mul_scalar(self.eta) + p_mean.mul_scalar(1.0 - self.eta)).detach()
    }

    /// `[seq_len, batch]` mask of valid (unpadded) time steps.
    fn seq_mask(
        &self,
        max_seq_len: usize,
        batch_size: usize,
        seq_len: &Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        let steps = Tensor::<B, 1, Int>::arange(0..max_seq_len as i64, &self.device)
            .reshape([max_seq_len, 1])
            .expand([max_seq_len, batch_size]);
        let lens = seq_len
            .clone()
            .reshape([1, batch_size])
            .expand([max_seq_len, batch_size]);
        steps.lower(lens).float()
    }
}

/// Sum the player dimension out of `[batch * players]` values.
fn sum_players<B: Backend>(
    qa: Tensor<B, 1>,
    batch_size: usize,
    num_players: usize,
) -> Tensor<B, 1> {
    qa.reshape([batch_size, num_players])
        .sum_dim(1)
        .squeeze::<1>(1)
}

/// Sum the player dimension out of `[seq_len, batch * players]` values.
fn sum_players_seq<B: Backend>(
    qa: Tensor<B, 2>,
    seq_len: usize,
    batch_size: usize,
    num_players: usize,
) -> Tensor<B, 2> {
    qa.reshape([seq_len, batch_size, num_players])
        .sum_dim(2)
        .squeeze::<2>(2)
}

/// Smooth (Huber-like) loss of the raw error against zero, elementwise.
fn smooth_l1<B: Backend>(err: Tensor<B, 2>) -> Tensor<B, 2> {
    let abs = err.clone().abs();
    let quadratic = err.powf_scalar(2.0).mul_scalar(0.5);
    let linear = abs.clone().sub_scalar(0.5);
    linear.mask_where(abs.lower_elem(1.0), quadratic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SymQNetConfig;

    type TestBackend = burn::backend::NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn net_config() -> SymQNetConfig {
        // n=2 agents: in width 3+2=5, hidden width 2+2=4, 4 actions
        SymQNetConfig::new(2, vec![3, 1], vec![2, 1], vec![2, 1], 2).with_num_lstm_layers(1)
    }

    fn agent(vdn: bool, uniform_priority: bool) -> R2d2Agent<TestBackend, SymQNet<TestBackend>> {
        let mut config = AgentConfig::new(net_config());
        config.vdn = vdn;
        config.uniform_priority = uniform_priority;
        config.gamma = 0.9;
        R2d2Agent::new(&config, &device()).unwrap()
    }

    fn rand2(rows: usize, cols: usize) -> Tensor<TestBackend, 2> {
        Tensor::random([rows, cols], Distribution::Uniform(-1.0, 1.0), &device())
    }

    fn transition_batch(rows: usize, batch_size: usize) -> TransitionBatch<TestBackend> {
        let state = RecurrentState::zeros(1, rows, 4, &device());
        TransitionBatch {
            priv_s: rand2(rows, 5),
            legal_move: Tensor::ones([rows, 4], &device()),
            action: Tensor::zeros([rows], &device()),
            reward: rand2(batch_size, 1).squeeze::<1>(1),
            bootstrap: Tensor::ones([batch_size], &device()),
            next_priv_s: rand2(rows, 5),
            next_legal_move: Tensor::ones([rows, 4], &device()),
            state: state.clone(),
            next_state: state,
        }
    }

    fn sequence_batch(
        seq_len: usize,
        batch_size: usize,
        reward: Tensor<TestBackend, 2>,
        bootstrap: Tensor<TestBackend, 2>,
        lens: Tensor<TestBackend, 1, Int>,
    ) -> SequenceBatch<TestBackend> {
        let terminal = bootstrap.ones_like() - bootstrap.clone();
        SequenceBatch {
            priv_s: Tensor::random(
                [seq_len, batch_size, 5],
                Distribution::Uniform(-1.0, 1.0),
                &device(),
            ),
            legal_move: Tensor::ones([seq_len, batch_size, 4], &device()),
            action: Tensor::zeros([seq_len, batch_size], &device()),
            reward,
            terminal,
            bootstrap,
            seq_len: lens,
            own_hand: Tensor::zeros([seq_len, batch_size, 1, 2, 3], &device()),
            state: None,
        }
    }

    #[test]
    fn test_uniform_priority_is_exactly_one() {
        let agent = agent(false, true);
        let batch = transition_batch(3, 3);
        let priority: Vec<f32> = agent
            .compute_priority(&batch)
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(priority, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_priority_non_negative() {
        let agent = agent(false, false);
        let batch = transition_batch(4, 4);
        let priority: Vec<f32> = agent
            .compute_priority(&batch)
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(priority.len(), 4);
        for p in priority {
            assert!(p >= 0.0, "negative priority {p}");
        }
    }

    #[test]
    fn test_vdn_priority_is_per_sample() {
        let agent = agent(true, false);
        // 2 samples x 2 players = 4 observation rows
        let batch = transition_batch(4, 2);
        let priority = agent.compute_priority(&batch);
        assert_eq!(priority.dims(), [2]);
    }

    #[test]
    fn test_double_dqn_terminal_target() {
        // reward 1 at the terminal step, bootstrap 0 there: the target at
        // that step is exactly the reward, no bootstrapped future value
        let agent = agent(false, false);
        let reward =
            Tensor::<TestBackend, 1>::from_floats([0.0, 0.0, 1.0], &device()).reshape([3, 1]);
        let bootstrap =
            Tensor::<TestBackend, 1>::from_floats([1.0, 1.0, 0.0], &device()).reshape([3, 1]);
        let lens = Tensor::<TestBackend, 1, Int>::from_ints([3], &device());
        let batch = sequence_batch(3, 1, reward, bootstrap, lens);

        let (err, _) = agent.td_error(&batch);
        let online = agent.online_net.forward(
            batch.priv_s.clone(),
            batch.legal_move.clone(),
            batch.action.clone(),
            None,
        );
        let err_v: Vec<f32> = err.into_data().to_vec().unwrap();
        let qa: Vec<f32> = online.qa.into_data().to_vec().unwrap();
        let target_terminal = err_v[2] + qa[2];
        assert!(
            (target_terminal - 1.0).abs() < 1e-5,
            "terminal target {target_terminal} != reward"
        );
    }

    #[test]
    fn test_error_masked_beyond_seq_len() {
        let agent = agent(false, false);
        let reward = Tensor::<TestBackend, 2>::zeros([4, 2], &device());
        let bootstrap = Tensor::<TestBackend, 2>::ones([4, 2], &device());
        let lens = Tensor::<TestBackend, 1, Int>::from_ints([2, 4], &device());
        let batch = sequence_batch(4, 2, reward, bootstrap, lens);

        let (err, _) = agent.td_error(&batch);
        let err_v: Vec<f32> = err.into_data().to_vec().unwrap();
        // row-major [seq, batch]: sample 0 is padded after step 2
        assert_eq!(err_v[2 * 2], 0.0);
        assert_eq!(err_v[3 * 2], 0.0);
    }

    #[test]
    fn test_act_respects_legal_mask() {
        let agent = agent(false, false);
        let rows = 8;
        let legal = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 1.0, 0.0], &device())
            .reshape([1, 4])
            .expand([rows, 4]);

        // always explore: selected actions must still be legal
        let reply = agent.act(ActInput {
            priv_s: rand2(rows, 5),
            legal_move: legal.clone(),
            eps: Tensor::ones([rows], &device()),
            state: agent.init_state(rows),
        });
        let actions: Vec<i64> = reply.action.into_data().to_vec().unwrap();
        for a in actions {
            assert!(a == 0 || a == 2, "selected illegal action {a}");
        }

        // never explore: selection equals the greedy action
        let reply = agent.act(ActInput {
            priv_s: rand2(rows, 5),
            legal_move: legal,
            eps: Tensor::zeros([rows], &device()),
            state: agent.init_state(rows),
        });
        let actions: Vec<i64> = reply.action.into_data().to_vec().unwrap();
        let greedy: Vec<i64> = reply.greedy_action.into_data().to_vec().unwrap();
        assert_eq!(actions, greedy);
    }

    #[test]
    fn test_loss_and_priority_shapes() {
        let agent = agent(false, false);
        let reward = Tensor::<TestBackend, 2>::zeros([3, 2], &device());
        let bootstrap = Tensor::<TestBackend, 2>::ones([3, 2], &device());
        let lens = Tensor::<TestBackend, 1, Int>::from_ints([3, 2], &device());
        let batch = sequence_batch(3, 2, reward, bootstrap, lens);

        let (loss, priority) = agent.loss(&batch, 0.5);
        let loss_v: Vec<f32> = loss.into_data().to_vec().unwrap();
        assert_eq!(loss_v.len(), 1);
        assert!(loss_v[0].is_finite());

        assert_eq!(priority.dims(), [2]);
        for p in priority.into_data().to_vec::<f32>().unwrap() {
            assert!(p >= 0.0);
        }
    }

    #[test]
    fn test_clone_preserves_parameters() {
        let agent = agent(false, false);
        let cloned = agent.clone_to(&device(), CloneOverrides { vdn: Some(true) });
        assert!(cloned.vdn());

        let priv_s = rand2(2, 5);
        let legal = Tensor::ones([2, 4], &device());
        let (a, _) = agent.greedy_act(priv_s.clone(), legal.clone(), &agent.init_state(2));
        let (b, _) = cloned.greedy_act(priv_s, legal, &cloned.init_state(2));
        let a: Vec<i64> = a.into_data().to_vec().unwrap();
        let b: Vec<i64> = b.into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sync_target_with_online() {
        let mut agent = agent(false, false);
        agent.sync_target_with_online();

        // after a sync the target values the same actions the online net picks
        let batch = transition_batch(2, 2);
        let priority = agent.compute_priority(&batch);
        assert_eq!(priority.dims(), [2]);
    }
}
