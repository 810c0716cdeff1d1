//! Sluice core types: work keys, ingress variants, owner kinds and errors.

#![forbid(unsafe_code)]

pub mod crd;
pub mod error;
pub mod ingress;
pub mod key;
pub mod owner;

pub use error::{DispatchError, ErrorHandler, ErrorSink};
pub use ingress::{Ingress, Tombstone};
pub use key::{KeyError, KeyFunc, WorkKey};
pub use owner::{controller_ref, OwnerKind};

pub mod prelude {
    pub use super::crd::{Experiment, ExperimentSpec, Rollout, RolloutSpec};
    pub use super::{
        controller_ref, DispatchError, ErrorSink, Ingress, KeyError, KeyFunc, OwnerKind, Tombstone, WorkKey,
    };
}
