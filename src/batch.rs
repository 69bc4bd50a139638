//! Transition containers consumed by priority scoring and the training step.
//!
//! Row convention: observation tensors are flattened to `rows = batch *
//! players` before they reach the agent (players = 1 outside VDN), while
//! reward/bootstrap/seq_len stay per batch element, since the team shares
//! one reward stream. Batches are immutable once constructed and consumed by
//! exactly one call.

use burn::prelude::*;

use crate::sym::lstm::RecurrentState;

/// One-step transitions, used to score replay priorities at insertion time.
#[derive(Debug, Clone)]
pub struct TransitionBatch<B: Backend> {
    /// Private observation at t, `[rows, in_size]`.
    pub priv_s: Tensor<B, 2>,
    /// Legal-move mask at t, `[rows, num_actions]`.
    pub legal_move: Tensor<B, 2>,
    /// Action taken at t, `[rows]`.
    pub action: Tensor<B, 1, Int>,
    /// Multi-step return accumulated from t, `[batch]`.
    pub reward: Tensor<B, 1>,
    /// 1 while the bootstrapped tail is alive, 0 at terminal, `[batch]`.
    pub bootstrap: Tensor<B, 1>,
    /// Private observation at t + multi_step, `[rows, in_size]`.
    pub next_priv_s: Tensor<B, 2>,
    /// Legal-move mask at t + multi_step, `[rows, num_actions]`.
    pub next_legal_move: Tensor<B, 2>,
    /// Recurrent state entering step t.
    pub state: RecurrentState<B>,
    /// Recurrent state entering step t + multi_step.
    pub next_state: RecurrentState<B>,
}

/// Sequence-major padded trajectories for the training step.
///
/// Trajectories are padded past the terminal step; `seq_len` holds each
/// sample's true (unpadded) length and everything beyond it is masked out of
/// the TD error.
#[derive(Debug, Clone)]
pub struct SequenceBatch<B: Backend> {
    /// Private observations, `[seq_len, rows, in_size]`.
    pub priv_s: Tensor<B, 3>,
    /// Legal-move masks, `[seq_len, rows, num_actions]`.
    pub legal_move: Tensor<B, 3>,
    /// Actions taken, `[seq_len, rows]`.
    pub action: Tensor<B, 2, Int>,
    /// Multi-step returns, `[seq_len, batch]`.
    pub reward: Tensor<B, 2>,
    /// Terminal flags, `[seq_len, batch]`.
    pub terminal: Tensor<B, 2>,
    /// Bootstrap flags, `[seq_len, batch]`.
    pub bootstrap: Tensor<B, 2>,
    /// True sequence lengths, `[batch]`.
    pub seq_len: Tensor<B, 1, Int>,
    /// Own-hand ground truth for the auxiliary task,
    /// `[seq_len, batch, players, hand_size, num_card_labels]`.
    pub own_hand: Tensor<B, 5>,
    /// Recurrent state at sequence start; `None` for a cold start.
    pub state: Option<RecurrentState<B>>,
}
