#![forbid(unsafe_code)]
#![warn(
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Binary entrypoint for the `satchel` command line.

use std::process;

/// Runs the requested command and exits with its status code.
#[tokio::main]
async fn main() {
    let code = satchel_app::cli::run().await;
    process::exit(code);
}
