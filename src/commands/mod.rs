// ABOUTME: Command module aggregator for the shipline CLI.
// ABOUTME: Re-exports run, status, and verify command handlers.

mod run;
mod status;
mod verify;
mod wiring;

pub use run::run;
pub use status::status;
pub use verify::verify;
