/// Cryptographically secure random value, used as `nonce` and as the random part of `state`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Nonce {
    nonce: String,
}

impl Nonce {
    /// Generate a new nonce, using 32 bytes of cryptographically secure random data, base64 url
    /// encoded as a 43 character string.
    pub fn new() -> Self {
        use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
        use rand::Rng;

        let mut rng = rand::rng();
        let bytes: [u8; 32] = rng.random();
        let nonce = URL_SAFE_NO_PAD.encode(bytes);

        Self { nonce }
    }

    pub fn as_str(&self) -> &str {
        &self.nonce
    }

    pub fn into_string(self) -> String {
        self.nonce
    }
}

impl Default for Nonce {
    fn default() -> Self {
        Self::new()
    }
}
