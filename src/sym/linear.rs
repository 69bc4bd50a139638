//! Equivariant linear transform with per-orbit weight sharing.
//!
//! One weight matrix is learned per distinct (output arity class, masked
//! input permutation) orbit and shared by every permutation pair in that
//! orbit. Every one of the `P(n,m1) x P(n,m0)` permutation pairs is computed
//! in the forward pass, but only `#orbits` distinct matrices exist; that
//! compression is what encodes permutation equivariance. Bias is shared per
//! output arity class, since it has no input permutation to mask against.

use std::collections::BTreeMap;

use burn::module::{Ignored, Param};
use burn::nn::Initializer;
use burn::prelude::*;

use crate::error::SymError;

use super::orbit::{OrbitKey, mask_perm, masked_perms, perms, sizes_to_size};

/// Configuration for an equivariant linear transform.
#[derive(Debug, Config)]
pub struct SymLinearConfig {
    /// Number of interchangeable agents.
    pub n: usize,
    /// Input size signature, one feature width per arity class.
    pub in_sizes: Vec<usize>,
    /// Output size signature, one feature width per arity class.
    pub out_sizes: Vec<usize>,
}

impl SymLinearConfig {
    /// Build the weight-sharing table and bias vectors.
    ///
    /// Fails if either signature has the wrong number of arity classes or if
    /// the signatures yield a layer with no learnable weight.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SymLinear<B>, SymError> {
        check_signature(self.n, &self.in_sizes)?;
        check_signature(self.n, &self.out_sizes)?;

        let in_size = sizes_to_size(self.n, &self.in_sizes);
        let out_size = sizes_to_size(self.n, &self.out_sizes);
        let stdv = 1.0 / (out_size.max(1) as f64).sqrt();
        let initializer = Initializer::Uniform {
            min: -stdv,
            max: stdv,
        };

        let mut weights = Vec::new();
        let mut orbit_index = BTreeMap::new();
        for m1 in 0..self.n {
            if self.out_sizes[m1] == 0 {
                continue;
            }
            for m0 in 0..self.n {
                if self.in_sizes[m0] == 0 {
                    continue;
                }
                for masked in masked_perms(self.n, m0, m1) {
                    let key = OrbitKey {
                        out_class: m1,
                        masked,
                    };
                    orbit_index.insert(key, weights.len());
                    let weight: Param<Tensor<B, 2>> =
                        initializer.init([self.out_sizes[m1], self.in_sizes[m0]], device);
                    weights.push(weight);
                }
            }
        }
        if weights.is_empty() {
            return Err(SymError::EmptyLayer {
                in_sizes: self.in_sizes.clone(),
                out_sizes: self.out_sizes.clone(),
            });
        }

        let mut biases = Vec::new();
        for m1 in 0..self.n {
            if self.out_sizes[m1] > 0 {
                let bias: Param<Tensor<B, 1>> = initializer.init([self.out_sizes[m1]], device);
                biases.push(bias);
            }
        }

        Ok(SymLinear {
            weights,
            biases,
            orbit_index: Ignored(orbit_index),
            n: self.n,
            in_sizes: self.in_sizes.clone(),
            out_sizes: self.out_sizes.clone(),
            in_size,
            out_size,
        })
    }
}

/// Linear transform that is equivariant to relabeling of the `n` agents.
#[derive(Module, Debug)]
pub struct SymLinear<B: Backend> {
    /// One shared weight matrix per orbit, in construction order.
    weights: Vec<Param<Tensor<B, 2>>>,
    /// One bias vector per nonzero output arity class, in class order.
    biases: Vec<Param<Tensor<B, 1>>>,
    /// Orbit key -> index into `weights`. Read-only after construction.
    orbit_index: Ignored<BTreeMap<OrbitKey, usize>>,
    n: usize,
    in_sizes: Vec<usize>,
    out_sizes: Vec<usize>,
    in_size: usize,
    out_size: usize,
}

impl<B: Backend> SymLinear<B> {
    /// Total input feature width.
    pub fn in_size(&self) -> usize {
        self.in_size
    }

    /// Total output feature width.
    pub fn out_size(&self) -> usize {
        self.out_size
    }

    /// Number of distinct weight-sharing orbits.
    pub fn num_orbits(&self) -> usize {
        self.weights.len()
    }

    /// Apply the transform to `[batch, in_size]`, producing
    /// `[batch, out_size]`.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let [_, width] = input.dims();
        assert_eq!(
            width, self.in_size,
            "input width {width} does not match signature width {}",
            self.in_size
        );

        let mut out_blocks = Vec::new();
        let mut bias_slot = 0;
        for m1 in 0..self.n {
            let out_width = self.out_sizes[m1];
            if out_width == 0 {
                continue;
            }
            let bias = self.biases[bias_slot].val();
            bias_slot += 1;
            for perm1 in perms(self.n, m1) {
                // [1, w] start so the bias broadcasts over the batch
                let mut acc = bias.clone().unsqueeze::<2>();
                let mut in_off = 0;
                for m0 in 0..self.n {
                    let in_width = self.in_sizes[m0];
                    if in_width == 0 {
                        continue;
                    }
                    for perm0 in perms(self.n, m0) {
                        let key = OrbitKey {
                            out_class: m1,
                            masked: mask_perm(&perm0, &perm1),
                        };
                        let idx = *self
                            .orbit_index
                            .0
                            .get(&key)
                            .expect("orbit table covers every permutation pair");
                        let weight = self.weights[idx].val();
                        let block = input.clone().narrow(1, in_off, in_width);
                        acc = acc + block.matmul(weight.transpose());
                        in_off += in_width;
                    }
                }
                out_blocks.push(acc);
            }
        }
        Tensor::cat(out_blocks, 1)
    }

    /// Apply the transform to `[seq_len, batch, in_size]`, preserving the
    /// leading dimensions.
    pub fn forward_seq(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [seq_len, batch, width] = input.dims();
        let flat = input.reshape([seq_len * batch, width]);
        self.forward(flat).reshape([seq_len, batch, self.out_size])
    }
}

fn check_signature(n: usize, sizes: &[usize]) -> Result<(), SymError> {
    if sizes.len() != n {
        return Err(SymError::SignatureLength {
            expected: n,
            got: sizes.len(),
        });
    }
    Ok(())
}
