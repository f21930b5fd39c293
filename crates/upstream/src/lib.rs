pub mod dialer;

pub use dialer::{dial, DialRequest, UpstreamSocket};
