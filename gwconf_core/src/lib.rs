//!
//! Move gateway configuration between deployable XML bundles and a
//! project directory of policy XML, YAML/JSON and properties files.
//!
//! [`build`] turns a loaded project into a bundle, [`filter`] narrows an
//! exported bundle down to one folder, and [`read`] and [`write`] cover the
//! other direction.
#![deny(missing_docs)]

pub use gwconf::{Gwconf, GwconfConfig};

pub mod build;
pub mod bundle;
pub mod error;
pub mod filter;
pub mod gwconf;
pub mod load;
pub mod logging;
pub mod project;
pub mod properties;
pub mod read;
pub mod write;
pub mod xml;

#[macro_export]
/// Time the code inside the macro. Write the elapsed time to debug logs.
/// Derived from https://notes.iveselov.info/programming/time_it-a-case-study-in-rust-macros
macro_rules! log_runtime {
    ($context:literal, $($tt:tt)+) => {
        {
            debug!("{}: starting", $context);
            let timer = std::time::Instant::now();
            let x =
            $(
                $tt
            )+;
            debug!("{}: {:?}", $context, timer.elapsed());
            x
        }
    }
}
