//! CLI command implementations, one module per subcommand: each module
//! owns an `Args` struct and a `run` function; `main.rs` only dispatches.

pub mod deidentify;
pub mod profiles;
