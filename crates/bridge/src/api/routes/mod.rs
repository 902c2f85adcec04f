mod approvals;
mod page;
mod system;

pub use approvals::*;
pub use page::*;
pub use system::*;
