use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::AHasher;

/// Identity of one computation (operation plus operand identities).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    id: u64,
    opcode: Arc<str>,
}

impl CacheKey {
    pub fn new(id: u64, opcode: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            opcode: opcode.into(),
        }
    }

    /// Derives a key from an opcode and the keys of its operands.
    pub fn derive(opcode: &str, operands: &[&CacheKey]) -> Self {
        let mut hasher = AHasher::default();
        opcode.hash(&mut hasher);
        for operand in operands {
            operand.id.hash(&mut hasher);
            operand.opcode.hash(&mut hasher);
        }
        Self::new(hasher.finish(), opcode)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    /// Prefix of the spill files written for this key.
    pub fn file_stem(&self) -> String {
        format!("{:016x}", self.id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:x}", self.opcode, self.id)
    }
}
