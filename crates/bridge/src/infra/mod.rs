pub mod rpc;
pub mod secrets;
pub mod signer;

// Mock implementations only available with e2e-testing feature or debug builds
#[cfg(any(feature = "e2e-testing", debug_assertions))]
pub mod rpc_mock;
#[cfg(any(feature = "e2e-testing", debug_assertions))]
pub mod signer_mock;
