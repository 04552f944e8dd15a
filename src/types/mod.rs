// ABOUTME: Validated domain types shared across pipeline stages.
// ABOUTME: Revisions, digests, Kubernetes resource names, image references, secrets.

mod digest;
mod image_ref;
mod resource_name;
mod revision;
mod secret;

pub use digest::{Digest, ParseDigestError};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use resource_name::{ResourceName, ResourceNameError};
pub use revision::{Revision, RevisionError};
pub use secret::SecretString;
