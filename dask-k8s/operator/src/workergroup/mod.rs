//! Reconciliation of DaskWorkerGroups: adoption by the owning cluster and
//! convergence of the worker pods towards the declared replica count.
mod adopt;
mod scale;

pub(crate) use adopt::{adopt, AdoptError};
pub(crate) use scale::{converge, ScaleError, ScaleOutcome};
