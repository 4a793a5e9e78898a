//! Parses command-line arguments for the gateway node.
use std::path::PathBuf;

use clap::{crate_version, Parser};

use crate::constants::DEFAULT_CONFIG_FILE;

#[derive(Debug, Parser)]
#[clap(
    name = "gateway-node",
    about = "Node communication and event distribution core of the transaction gateway",
    version = crate_version!()
)]
pub(crate) struct Cli {
    #[clap(
        long,
        short = 'c',
        help = "The file containing the configuration for the gateway",
        default_value = DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,
}
