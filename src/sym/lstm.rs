//! Equivariant recurrent memory built from [`SymLinear`] transforms.
//!
//! A cell maps input and hidden tensors into a `4 x hidden` gate signature
//! through two equivariant linears, then applies the standard gated-memory
//! update independently per arity-class block. Equivariance of the linears
//! makes the whole recurrence equivariant across time steps. The stack owns
//! no state between calls; the caller drives the recurrence.

use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};

use crate::error::SymError;

use super::linear::{SymLinear, SymLinearConfig};
use super::orbit::{num_perms, sizes_to_size};

/// Per-sequence recurrent state: one (hidden, memory) pair per layer,
/// `[num_layers, batch, hid_size]` each.
///
/// Zero-initialized at sequence start or carried from a prior rollout
/// segment. Single-writer, single-reader per sequence.
#[derive(Debug, Clone)]
pub struct RecurrentState<B: Backend> {
    pub h: Tensor<B, 3>,
    pub c: Tensor<B, 3>,
}

impl<B: Backend> RecurrentState<B> {
    /// Zero state for a cold sequence start.
    pub fn zeros(num_layers: usize, batch_size: usize, hid_size: usize, device: &B::Device) -> Self {
        let shape = [num_layers, batch_size, hid_size];
        Self {
            h: Tensor::zeros(shape, device),
            c: Tensor::zeros(shape, device),
        }
    }

    /// Detach the state from the autodiff graph (rollout bookkeeping).
    pub fn detach(self) -> Self {
        Self {
            h: self.h.detach(),
            c: self.c.detach(),
        }
    }
}

/// Configuration for a single equivariant recurrent cell.
#[derive(Debug, Config)]
pub struct SymLstmCellConfig {
    pub n: usize,
    pub in_sizes: Vec<usize>,
    pub hid_sizes: Vec<usize>,
}

impl SymLstmCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SymLstmCell<B>, SymError> {
        let gate_sizes: Vec<usize> = self.hid_sizes.iter().map(|&d| d * 4).collect();
        let ih = SymLinearConfig::new(self.n, self.in_sizes.clone(), gate_sizes.clone())
            .init(device)?;
        let hh = SymLinearConfig::new(self.n, self.hid_sizes.clone(), gate_sizes).init(device)?;
        let hid_size = sizes_to_size(self.n, &self.hid_sizes);
        Ok(SymLstmCell {
            ih,
            hh,
            n: self.n,
            hid_sizes: self.hid_sizes.clone(),
            hid_size,
        })
    }
}

/// One equivariant gated-memory cell.
#[derive(Module, Debug)]
pub struct SymLstmCell<B: Backend> {
    ih: SymLinear<B>,
    hh: SymLinear<B>,
    n: usize,
    hid_sizes: Vec<usize>,
    hid_size: usize,
}

impl<B: Backend> SymLstmCell<B> {
    pub fn hid_size(&self) -> usize {
        self.hid_size
    }

    /// One time step: `[batch, in]` plus `(h, c)` of `[batch, hid]` each.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
        h: Tensor<B, 2>,
        c: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        assert_eq!(
            h.dims()[1],
            self.hid_size,
            "hidden state width does not match the configured hidden signature"
        );
        let gates = self.ih.forward(input) + self.hh.forward(h);

        let mut h_blocks = Vec::new();
        let mut c_blocks = Vec::new();
        let mut offset = 0;
        for m in 0..self.n {
            let width = self.hid_sizes[m];
            if width == 0 {
                continue;
            }
            for _ in 0..num_perms(self.n, m) {
                // gate offset is 4x the hidden offset: every block widens by 4
                let block = gates.clone().narrow(1, offset * 4, width * 4);
                let parts = block.chunk(4, 1);
                let (g, i, f, o) = (
                    parts[0].clone(),
                    parts[1].clone(),
                    parts[2].clone(),
                    parts[3].clone(),
                );
                let c_prev = c.clone().narrow(1, offset, width);
                let c_new = tanh(g) * sigmoid(i) + c_prev * sigmoid(f);
                let h_new = tanh(c_new.clone()) * sigmoid(o);
                h_blocks.push(h_new);
                c_blocks.push(c_new);
                offset += width;
            }
        }
        (Tensor::cat(h_blocks, 1), Tensor::cat(c_blocks, 1))
    }
}

/// Configuration for the multi-layer recurrent stack.
#[derive(Debug, Config)]
pub struct SymLstmConfig {
    pub n: usize,
    pub in_sizes: Vec<usize>,
    pub hid_sizes: Vec<usize>,
    #[config(default = 2)]
    pub num_layers: usize,
}

impl SymLstmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SymLstm<B>, SymError> {
        let mut layers = Vec::with_capacity(self.num_layers);
        for l in 0..self.num_layers {
            let in_sizes = if l == 0 {
                self.in_sizes.clone()
            } else {
                self.hid_sizes.clone()
            };
            layers.push(
                SymLstmCellConfig::new(self.n, in_sizes, self.hid_sizes.clone()).init(device)?,
            );
        }
        let hid_size = sizes_to_size(self.n, &self.hid_sizes);
        Ok(SymLstm {
            layers,
            num_layers: self.num_layers,
            hid_size,
        })
    }
}

/// Stack of equivariant recurrent cells; layer 0 consumes the external input
/// signature, deeper layers consume the hidden signature.
#[derive(Module, Debug)]
pub struct SymLstm<B: Backend> {
    layers: Vec<SymLstmCell<B>>,
    num_layers: usize,
    hid_size: usize,
}

impl<B: Backend> SymLstm<B> {
    pub fn hid_size(&self) -> usize {
        self.hid_size
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Zero state for a cold sequence start.
    pub fn init_state(&self, batch_size: usize, device: &B::Device) -> RecurrentState<B> {
        RecurrentState::zeros(self.num_layers, batch_size, self.hid_size, device)
    }

    /// Run the stack over `[seq_len, batch, in]`, returning the per-step
    /// outputs of the top layer and the state after the last step.
    ///
    /// A provided state whose shapes disagree with the configured signature
    /// is a fatal configuration error.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: Option<RecurrentState<B>>,
    ) -> (Tensor<B, 3>, RecurrentState<B>) {
        let [seq_len, batch_size, _] = input.dims();
        let device = input.device();
        let state = state.unwrap_or_else(|| self.init_state(batch_size, &device));
        assert_eq!(
            state.h.dims(),
            [self.num_layers, batch_size, self.hid_size],
            "recurrent state shape does not match the configured hidden signature"
        );
        assert_eq!(state.h.dims(), state.c.dims());

        let mut hs: Vec<Tensor<B, 2>> = Vec::with_capacity(self.num_layers);
        let mut cs: Vec<Tensor<B, 2>> = Vec::with_capacity(self.num_layers);
        for l in 0..self.num_layers {
            hs.push(state.h.clone().narrow(0, l, 1).squeeze::<2>(0));
            cs.push(state.c.clone().narrow(0, l, 1).squeeze::<2>(0));
        }

        let mut outputs = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let mut x = input.clone().narrow(0, t, 1).squeeze::<2>(0);
            for (l, cell) in self.layers.iter().enumerate() {
                let (h, c) = cell.forward(x, hs[l].clone(), cs[l].clone());
                x = h.clone();
                hs[l] = h;
                cs[l] = c;
            }
            outputs.push(x);
        }

        let output = Tensor::stack::<3>(outputs, 0);
        let state = RecurrentState {
            h: Tensor::stack::<3>(hs, 0),
            c: Tensor::stack::<3>(cs, 0),
        };
        (output, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn small_stack() -> SymLstm<TestBackend> {
        SymLstmConfig::new(2, vec![3, 1], vec![2, 1])
            .with_num_layers(2)
            .init(&device())
            .unwrap()
    }

    #[test]
    fn test_cold_start_state_shape() {
        let lstm = small_stack();
        assert_eq!(lstm.hid_size(), 2 + 2 * 1);
        let state = lstm.init_state(5, &device());
        assert_eq!(state.h.dims(), [2, 5, 4]);
        assert_eq!(state.c.dims(), [2, 5, 4]);
        let sum: f32 = state.h.sum().into_data().to_vec::<f32>().unwrap()[0];
        assert_eq!(sum, 0.0);
    }

    #[test]
    fn test_forward_shapes() {
        let lstm = small_stack();
        let input = Tensor::<TestBackend, 3>::random(
            [4, 3, 3 + 2],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device(),
        );
        let (output, state) = lstm.forward(input, None);
        assert_eq!(output.dims(), [4, 3, 4]);
        assert_eq!(state.h.dims(), [2, 3, 4]);
    }

    #[test]
    fn test_state_carry_matches_full_sequence() {
        let lstm = small_stack();
        let input = Tensor::<TestBackend, 3>::random(
            [2, 1, 5],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device(),
        );

        let (full, _) = lstm.forward(input.clone(), None);

        let first = input.clone().narrow(0, 0, 1);
        let second = input.narrow(0, 1, 1);
        let (_, mid) = lstm.forward(first, None);
        let (stepped, _) = lstm.forward(second, Some(mid));

        let want: Vec<f32> = full.narrow(0, 1, 1).into_data().to_vec().unwrap();
        let got: Vec<f32> = stepped.into_data().to_vec().unwrap();
        for (a, b) in want.iter().zip(got.iter()) {
            assert!((a - b).abs() < 1e-6, "segmented recurrence diverged: {a} vs {b}");
        }
    }

    #[test]
    #[should_panic(expected = "recurrent state shape")]
    fn test_mismatched_state_is_fatal() {
        let lstm = small_stack();
        let input = Tensor::<TestBackend, 3>::zeros([1, 2, 5], &device());
        let bad = RecurrentState::<TestBackend>::zeros(2, 2, 9, &device());
        lstm.forward(input, Some(bad));
    }
}
