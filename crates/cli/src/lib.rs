//! `tp-cli`: the `toolpool` command-line front end.

pub mod cli;
