//! The identity tag carried by every request and ledger row.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum Principal {
    #[n(0)]
    Human,
    #[n(1)]
    Ai,
}

impl Principal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Principal::Human => "human",
            Principal::Ai => "ai",
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
