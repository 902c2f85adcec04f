use bridge_core::ProviderError;

/// Outbound half of the page to host pipe
pub trait Transport {
    fn post(&self, message: String) -> Result<(), ProviderError>;
}

impl<F> Transport for F
where
    F: Fn(String) -> Result<(), ProviderError>,
{
    fn post(&self, message: String) -> Result<(), ProviderError> {
        self(message)
    }
}
