pub mod adapter;
pub mod approval;
pub mod bridge;
pub mod dispatcher;
pub mod queue;
pub mod session;

pub use adapter::{BridgeError, ChannelAdapter, Routed};
pub use approval::{
    ApprovalAction, ApprovalDecision, ApprovalKind, ApprovalRequest, Approvals, GateError,
};
pub use bridge::{Bridge, BridgeConfig};
pub use dispatcher::{DispatchError, MethodDispatcher};
pub use queue::{DispatchLoop, Queued, RequestQueue};
pub use session::{PageOrigin, PageSink, Session, SessionError, SessionHandle};
