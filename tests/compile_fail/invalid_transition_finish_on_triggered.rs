// ABOUTME: Compile-fail test verifying a run cannot finish before any stage ran.
// ABOUTME: This test should fail to compile, validating state transitions.

use shipline::pipeline::Run;
use shipline::types::Revision;

fn main() {
    let run = Run::new(Revision::new("abc123").unwrap());
    let _ = run.finish(); // ERROR: no method `finish` on Run<Triggered>
}
