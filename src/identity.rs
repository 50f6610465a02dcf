//! Device identity and broker endpoint.

use heapless::String;

use crate::codec::Topics;
use crate::error::EncodeError;

/// Capacity of each credential and hostname field.
pub const FIELD_CAPACITY: usize = 64;

pub const DEFAULT_HOSTNAME: &str = "mqtt.mydevices.com";
pub const DEFAULT_PORT: u16 = 1883;

/// Credentials and broker address for one device.
///
/// Fixed for the lifetime of a session; the root topic is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub(crate) username: String<FIELD_CAPACITY>,
    pub(crate) password: String<FIELD_CAPACITY>,
    pub(crate) client_id: String<FIELD_CAPACITY>,
    pub(crate) hostname: String<FIELD_CAPACITY>,
    pub(crate) port: u16,
}

fn field(value: &str) -> Result<String<FIELD_CAPACITY>, EncodeError> {
    String::try_from(value).map_err(|_| EncodeError::Overflow)
}

impl Identity {
    /// An identity pointing at the default broker.
    pub fn new(username: &str, password: &str, client_id: &str) -> Result<Self, EncodeError> {
        Ok(Self {
            username: field(username)?,
            password: field(password)?,
            client_id: field(client_id)?,
            hostname: field(DEFAULT_HOSTNAME)?,
            port: DEFAULT_PORT,
        })
    }

    /// Overrides the broker endpoint.
    pub fn with_broker(mut self, hostname: &str, port: u16) -> Result<Self, EncodeError> {
        self.hostname = field(hostname)?;
        self.port = port;
        Ok(self)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Topic builder rooted at `v1/{username}/things/{client_id}`.
    pub fn topics(&self) -> Result<Topics, EncodeError> {
        Topics::new(&self.username, &self.client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_override() {
        let identity = Identity::new("alice", "secret", "dev1").unwrap();
        assert_eq!(identity.hostname(), DEFAULT_HOSTNAME);
        assert_eq!(identity.port(), 1883);

        let identity = identity.with_broker("localhost", 1884).unwrap();
        assert_eq!(identity.hostname(), "localhost");
        assert_eq!(identity.port(), 1884);
        assert_eq!(identity.topics().unwrap().root(), "v1/alice/things/dev1");
    }

    #[test]
    fn oversized_field_is_rejected() {
        let long = "x".repeat(FIELD_CAPACITY + 1);
        assert_eq!(
            Identity::new(&long, "pw", "dev"),
            Err(EncodeError::Overflow)
        );
    }
}
