//! Security Core: Principal, PKR, RWS, and the Identity wrapper (spec.md §4.3).

mod identity;
mod pkey;
mod principal;
mod registry;
mod rws;

pub use identity::{IdentityHandle, KernelLink, ResponseRequiredOpts, SendOptions};
pub use pkey::PKey;
pub use principal::{Mint, Pkr, Principal, PrincipalKind};
pub use registry::{CreatePrincipalOpts, PrincipalRegistry};
pub use rws::{Role, Rws};
