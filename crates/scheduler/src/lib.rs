//! Multi-client job scheduling over [`comfypool_client`] transports.
//!
//! A [`ClientPool`] holds any number of backend clients and a weighted
//! job queue; a pluggable [`Policy`] decides which client runs the next
//! job, and a broadcast notice stream mirrors every state transition.

pub mod notice;
pub mod policy;
pub mod pool;
pub mod queue;

pub use notice::{NoticeKind, PoolNotice};
pub use policy::{ClientFilter, Policy};
pub use pool::{
    gather, ClientPool, ClientState, JobHandle, PoolClient, PoolError, SubmitOptions,
};
pub use queue::WeightedQueue;
