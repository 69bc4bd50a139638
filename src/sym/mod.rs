//! Permutation-equivariant layer system.
//!
//! - [`orbit`]: permutation patterns, masked sub-permutations, and the
//!   signature-width bookkeeping that every transform honors.
//! - [`linear`]: the weight-sharing store and the equivariant linear
//!   transform built on it.
//! - [`lstm`]: a recurrent cell/stack assembled from equivariant linears,
//!   preserving equivariance across time steps.

pub mod linear;
pub mod lstm;
pub mod orbit;

pub use linear::{SymLinear, SymLinearConfig};
pub use lstm::{RecurrentState, SymLstm, SymLstmCell, SymLstmCellConfig, SymLstmConfig};
pub use orbit::{OrbitKey, SENTINEL, mask_perm, masked_perms, num_perms, perms, sizes_to_size};
