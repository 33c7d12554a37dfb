//! NCCL environment derivation module
//!
//! Maps a detected [`HostTopology`](crate::system::HostTopology) and
//! operator overrides to the ordered set of variables NCCL, PyTorch and
//! DeepSpeed read at startup.

mod derive;
mod overrides;
mod vars;

pub use derive::*;
pub use overrides::*;
pub use vars::*;
