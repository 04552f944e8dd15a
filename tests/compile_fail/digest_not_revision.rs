// ABOUTME: Compile-fail test verifying Digest and Revision are not interchangeable.
// ABOUTME: This test should fail to compile, validating type safety.

use shipline::types::{Digest, Revision};

fn takes_digest(_digest: Digest) {}

fn main() {
    let revision = Revision::new("abc123").unwrap();
    takes_digest(revision); // ERROR: expected Digest, found Revision
}
