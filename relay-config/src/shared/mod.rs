mod base;
mod batch;
mod broker;
mod leadership;
mod pipeline;

pub use base::*;
pub use batch::*;
pub use broker::*;
pub use leadership::*;
pub use pipeline::*;
