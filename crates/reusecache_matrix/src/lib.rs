//! Matrix and scalar values held by the reuse cache, together with their
//! size estimates and the binary payload used for spill files.

pub mod block;
pub mod codec;
pub mod error;
pub mod scalar;

pub use block::{BLOCK_HEADER_BYTES, CsrData, MatrixBlock, MatrixData};
pub use error::MatrixError;
pub use scalar::ScalarValue;
