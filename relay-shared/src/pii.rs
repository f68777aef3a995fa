use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wrapper for secrets (boarding codes, tokens) that masks its value in
/// Debug/Display output. Serialization passes the real value through, since
/// the API has to hand the secret to its owner exactly once.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hides_value_in_logs() {
        let code = Masked("042137".to_string());
        assert_eq!(format!("{:?}", code), "********");
        assert_eq!(format!("{}", code), "********");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"042137\"");
    }
}
