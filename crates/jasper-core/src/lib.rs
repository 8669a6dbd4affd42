//! Join-semilattice state types shared by the replicated workloads.

pub mod datum;
pub mod gcounter;
pub mod gset;
pub mod lattice;
pub mod pncounter;

pub use datum::Datum;
pub use gcounter::GCounter;
pub use gset::GSet;
pub use lattice::Lattice;
pub use pncounter::PNCounter;
