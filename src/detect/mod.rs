mod backend;
pub mod backends;
mod count;
pub mod postprocess;
mod result;

pub use backend::{DetectorBackend, SharedDetector};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use count::{count_class, PERSON_CLASS_ID};
pub use result::{BoundingBox, Detection};
