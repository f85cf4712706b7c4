/// Plugin execution phases around the proxy step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before forwarding: may mutate the outgoing request, set
    /// metadata, or abort the chain.
    BeforeRequest,
    /// After the upstream response head has been captured: used for
    /// observability and header emission registered during
    /// BeforeRequest.
    AfterResponse,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeRequest => "before_request",
            Phase::AfterResponse => "after_response",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
