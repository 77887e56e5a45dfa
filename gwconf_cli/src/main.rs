//! gwconf CLI
//!

#![deny(missing_docs)]

use anyhow::Result;

fn main() -> Result<()> {
    gwconf_lib::cli()
}
