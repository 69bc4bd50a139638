//! Permutation-equivariant recurrent DQN core for cooperative card games.
//!
//! Layer order, from the bottom up:
//! - [`sym`]: permutation orbits, the weight-sharing equivariant linear
//!   transform, and the recurrent stack built from it.
//! - [`net`]: the dueling recurrent Q-network and the auxiliary own-hand
//!   prediction head.
//! - [`batch`]: transition and padded-sequence containers.
//! - [`agent`]: epsilon-greedy acting, double-DQN multi-step TD error,
//!   replay priorities, and the composite training loss.
//!
//! Networks built with the same agent count produce action-values that
//! commute with any relabeling of the agents, so a single set of parameters
//! serves every seat at the table.

pub mod agent;
pub mod batch;
pub mod error;
pub mod net;
pub mod sym;

pub use agent::{ActInput, ActReply, AgentConfig, CloneOverrides, R2d2Agent};
pub use batch::{SequenceBatch, TransitionBatch};
pub use error::SymError;
pub use net::{QForward, QNet, SymQNet, SymQNetConfig};
pub use sym::{RecurrentState, SymLinear, SymLinearConfig, SymLstm, SymLstmConfig};
