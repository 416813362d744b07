pub mod hash;
pub mod mask;
pub mod repl;
pub mod req;
pub mod set_assoc;
pub mod stats;
pub mod vcl;
pub mod zarray;

#[cfg(test)]
mod unit_tests;

pub use hash::{HashFamily, IdentityHash, MixHash};
pub use repl::{LruPolicy, ReplPolicy, VclLruPolicy};
pub use req::{Address, AccessType, Cycle, MemReq, FULLMISS, LINE_BITS, LINE_BYTES, OUTOFRANGEMISS};
pub use set_assoc::{CacheArray, Eviction, LineEntry, Lookup, SetAssocArray};
pub use stats::{ArrayStats, ByteHistogram};
pub use vcl::{ReplacementCandidate, VclArray};
pub use zarray::ZArray;
