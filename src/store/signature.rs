use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Content identity for one captured call path.
///
/// Wraps the ordered return-address sequence exactly as delivered by the
/// trace source (capture order is preserved verbatim) and is used as a map
/// key inside the store. The structural hash is computed once at
/// construction and cached, so repeated probes against the same signature
/// cost a single `u64` compare before falling back to the full sequence.
#[derive(Debug, Clone)]
pub struct StackSignature {
    addresses: Arc<[u64]>,
    hash: u64,
}

impl StackSignature {
    /// Builds a signature from a captured address sequence.
    pub fn new(addresses: impl Into<Arc<[u64]>>) -> Self {
        let addresses = addresses.into();
        let hash = combine(&addresses);
        Self { addresses, hash }
    }

    /// The captured return addresses, outermost-to-innermost as delivered.
    pub fn addresses(&self) -> &[u64] {
        &self.addresses
    }

    /// Number of frames in the signature.
    pub fn depth(&self) -> usize {
        self.addresses.len()
    }
}

/// Multiply-and-add fold over length and every frame. Any combiner works
/// here as long as it agrees with structural equality; call depth is tens
/// of frames, so the O(depth) cost is paid once per construction.
fn combine(addresses: &[u64]) -> u64 {
    let mut h = addresses.len() as u64;
    for addr in addresses {
        h = h.wrapping_mul(37).wrapping_add(*addr);
    }
    h
}

impl PartialEq for StackSignature {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.addresses == other.addresses
    }
}

impl Eq for StackSignature {}

impl Hash for StackSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for StackSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack[{} frames]", self.addresses.len())
    }
}
