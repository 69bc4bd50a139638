//! Dueling recurrent Q-network over the equivariant layer system.
//!
//! Composition: embedding transform + ReLU -> recurrent stack -> dueling
//! value/advantage heads -> masked dueling combination, plus an auxiliary
//! head predicting the acting agent's own hidden hand. The single-step entry
//! point is the sequence form with time length 1, so interactive inference
//! and training share one set of numerics.

use burn::module::Module;
use burn::nn::Relu;
use burn::prelude::*;
use burn::tensor::ElementConversion;
use burn::tensor::activation::log_softmax;

use crate::error::SymError;
use crate::sym::linear::{SymLinear, SymLinearConfig};
use crate::sym::lstm::{RecurrentState, SymLstm, SymLstmConfig};
use crate::sym::orbit::sizes_to_size;

/// Everything one training forward pass produces.
#[derive(Debug, Clone)]
pub struct QForward<B: Backend> {
    /// Q-value of the given action, `[seq_len, batch]`.
    pub qa: Tensor<B, 2>,
    /// Action the network would take greedily, `[seq_len, batch]`.
    pub greedy_action: Tensor<B, 2, Int>,
    /// Per-action Q-values, `[seq_len, batch, num_actions]`.
    pub q: Tensor<B, 3>,
    /// Top-layer recurrent outputs, `[seq_len, batch, hid_size]`; feeds the
    /// auxiliary head.
    pub lstm_o: Tensor<B, 3>,
    /// Recurrent state after the last step.
    pub state: RecurrentState<B>,
}

/// Contract every Q-network variant implements. The agent is generic over
/// this seam and never branches on network kind; the variant is fixed once
/// at construction.
pub trait QNet<B: Backend>: Module<B> {
    /// Zero recurrent state for a cold sequence start.
    fn init_state(&self, batch_size: usize, device: &B::Device) -> RecurrentState<B>;

    /// Single-step advantage inference for interactive action selection.
    /// `priv_s` is `[rows, in_size]`; returns `[rows, num_actions]` and the
    /// updated state.
    fn act(&self, priv_s: Tensor<B, 2>, state: &RecurrentState<B>)
    -> (Tensor<B, 2>, RecurrentState<B>);

    /// Full-sequence forward pass used by the training step.
    fn forward(
        &self,
        priv_s: Tensor<B, 3>,
        legal_move: Tensor<B, 3>,
        action: Tensor<B, 2, Int>,
        state: Option<&RecurrentState<B>>,
    ) -> QForward<B>;

    /// Auxiliary own-hand logits from the recurrent outputs,
    /// `[seq_len, rows, hand_size * num_card_labels]`.
    fn hand_logits(&self, lstm_o: Tensor<B, 3>) -> Tensor<B, 3>;
}

/// Configuration for the symmetric (permutation-equivariant) Q-network.
#[derive(Debug, Config)]
pub struct SymQNetConfig {
    /// Number of interchangeable agents.
    pub num_agents: usize,
    /// Input size signature.
    pub in_sizes: Vec<usize>,
    /// Hidden size signature, shared by the embedding and the recurrence.
    pub hid_sizes: Vec<usize>,
    /// Action-space size signature.
    pub out_sizes: Vec<usize>,
    #[config(default = 2)]
    pub num_lstm_layers: usize,
    /// Number of hidden cards per hand for the auxiliary task.
    pub hand_size: usize,
    /// Label alphabet per hand slot for the auxiliary task.
    #[config(default = 3)]
    pub num_card_labels: usize,
}

impl SymQNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SymQNet<B>, SymError> {
        let n = self.num_agents;
        let embed = SymLinearConfig::new(n, self.in_sizes.clone(), self.hid_sizes.clone())
            .init(device)?;
        let lstm = SymLstmConfig::new(n, self.hid_sizes.clone(), self.hid_sizes.clone())
            .with_num_layers(self.num_lstm_layers)
            .init(device)?;
        // scalar per time step: everything in the arity-0 class
        let fc_v = SymLinearConfig::new(n, self.hid_sizes.clone(), zero_arity_signature(n, 1))
            .init(device)?;
        let fc_a = SymLinearConfig::new(n, self.hid_sizes.clone(), self.out_sizes.clone())
            .init(device)?;
        let pred = SymLinearConfig::new(
            n,
            self.hid_sizes.clone(),
            zero_arity_signature(n, self.hand_size * self.num_card_labels),
        )
        .init(device)?;

        Ok(SymQNet {
            embed,
            lstm,
            fc_v,
            fc_a,
            pred,
            activation: Relu::new(),
            in_size: sizes_to_size(n, &self.in_sizes),
            out_size: sizes_to_size(n, &self.out_sizes),
            hand_size: self.hand_size,
            num_card_labels: self.num_card_labels,
        })
    }
}

/// Permutation-equivariant dueling Q-network.
#[derive(Module, Debug)]
pub struct SymQNet<B: Backend> {
    embed: SymLinear<B>,
    lstm: SymLstm<B>,
    fc_v: SymLinear<B>,
    fc_a: SymLinear<B>,
    pred: SymLinear<B>,
    activation: Relu,
    in_size: usize,
    out_size: usize,
    hand_size: usize,
    num_card_labels: usize,
}

impl<B: Backend> SymQNet<B> {
    pub fn in_size(&self) -> usize {
        self.in_size
    }

    /// Width of the action dimension.
    pub fn out_size(&self) -> usize {
        self.out_size
    }

    pub fn hand_size(&self) -> usize {
        self.hand_size
    }

    pub fn num_card_labels(&self) -> usize {
        self.num_card_labels
    }
}

impl<B: Backend> QNet<B> for SymQNet<B> {
    fn init_state(&self, batch_size: usize, device: &B::Device) -> RecurrentState<B> {
        self.lstm.init_state(batch_size, device)
    }

    fn act(
        &self,
        priv_s: Tensor<B, 2>,
        state: &RecurrentState<B>,
    ) -> (Tensor<B, 2>, RecurrentState<B>) {
        let x = self.activation.forward(self.embed.forward(priv_s));
        let (o, next_state) = self.lstm.forward(x.unsqueeze::<3>(), Some(state.clone()));
        let adv = self.fc_a.forward_seq(o).squeeze::<2>(0);
        (adv, next_state)
    }

    fn forward(
        &self,
        priv_s: Tensor<B, 3>,
        legal_move: Tensor<B, 3>,
        action: Tensor<B, 2, Int>,
        state: Option<&RecurrentState<B>>,
    ) -> QForward<B> {
        let [seq_len, batch_size, _] = priv_s.dims();
        assert_eq!(action.dims(), [seq_len, batch_size], "action shape mismatch");

        let x = self.activation.forward(self.embed.forward_seq(priv_s));
        let (o, next_state) = self.lstm.forward(x, state.cloned());
        let a = self.fc_a.forward_seq(o.clone());
        let v = self.fc_v.forward_seq(o.clone());
        let q = duel(v, a, legal_move.clone());

        let qa = q
            .clone()
            .gather(2, action.unsqueeze_dim::<3>(2))
            .squeeze::<2>(2);

        // shift so illegal slots land on exactly zero and legal ones stay
        // strictly positive and rank-preserving
        let q_min: f32 = q.clone().min().into_scalar().elem();
        let legal_q = q.clone().sub_scalar(q_min).add_scalar(1.0) * legal_move;
        let greedy_action = legal_q.argmax(2).squeeze::<2>(2);

        QForward {
            qa,
            greedy_action,
            q,
            lstm_o: o,
            state: next_state,
        }
    }

    fn hand_logits(&self, lstm_o: Tensor<B, 3>) -> Tensor<B, 3> {
        self.pred.forward_seq(lstm_o)
    }
}

/// Dueling combination `Q = V + A*legal - mean_over_actions(A*legal)`.
///
/// Illegal actions are zeroed out of the advantage before the mean but still
/// receive a defined Q-value through `V`.
pub fn duel<B: Backend>(
    v: Tensor<B, 3>,
    a: Tensor<B, 3>,
    legal_move: Tensor<B, 3>,
) -> Tensor<B, 3> {
    assert_eq!(
        a.dims(),
        legal_move.dims(),
        "advantage/legal-mask shape mismatch"
    );
    let legal_a = a * legal_move;
    v + legal_a.clone() - legal_a.mean_dim(2)
}

/// Masked cross-entropy of the auxiliary own-hand prediction.
///
/// `logits` is `[seq_len, batch * players, hand * labels]`; `target` is
/// `[seq_len, batch, players, hand, labels]` (players = 1 outside VDN).
/// Slots with no valid label are excluded via the slot mask; the divisor is
/// clamped since padding can legitimately zero a whole slot. Returns the
/// per-sample loss summed over time, `[batch]`; the caller normalizes by the
/// true sequence length.
pub fn hand_pred_loss<B: Backend>(logits: Tensor<B, 3>, target: Tensor<B, 5>) -> Tensor<B, 1> {
    let [seq_len, batch_size, players, hand, labels] = target.dims();
    let logit = logits.reshape([seq_len, batch_size, players, hand, labels]);

    let slot_mask = target.clone().sum_dim(4).squeeze::<4>(4);
    let logq = log_softmax(logit, 4);
    let plogq = (target * logq).sum_dim(4).squeeze::<4>(4);
    let xent = (-(plogq * slot_mask.clone())).sum_dim(3).squeeze::<3>(3)
        / slot_mask.sum_dim(3).squeeze::<3>(3).clamp_min(1e-6);

    // mean over agents, sum over time
    let xent = xent.mean_dim(2).squeeze::<2>(2);
    xent.sum_dim(0).squeeze::<1>(0)
}

/// Everything in the arity-0 class: the plain (non-equivariant) output slot.
fn zero_arity_signature(n: usize, width: usize) -> Vec<usize> {
    let mut sizes = vec![0; n];
    sizes[0] = width;
    sizes
}
