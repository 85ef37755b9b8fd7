//! The station's view of a flow, from tag detection to a forged session.

use crate::{
    config::StationConfig,
    errors::*,
    key_derivation::{derive_dh_private, DhPrivateKey, SharedSecret},
    session::{forge, ForgedSession, MasterKey},
    tls::{ClientRandom, ServerRandom},
};
use log::{debug, trace};
use num_bigint::BigUint;
use std::{ops::Deref, sync::Arc};
use telex_elligator::FieldElement;

/// A client random which is a valid Elligator2 representative.
///
/// Roughly half of all random strings qualify, so this alone says nothing about whether the
/// client is participating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovertTag {
    representative: [u8; 32],
    point: FieldElement,
}

impl CovertTag {
    /// The bytes as they appeared in the client random.
    pub fn representative(&self) -> &[u8; 32] {
        &self.representative
    }

    /// The curve point the representative decodes to.
    pub fn point(&self) -> &FieldElement {
        &self.point
    }
}

/// The key-management side of the station.
pub trait SharedSecretProvider {
    /// Fetch the secret shared with whichever client produced `tag`, if there is one.
    fn shared_secret(&self, tag: &CovertTag) -> Option<SharedSecret>;
}

impl<'a, T: SharedSecretProvider> SharedSecretProvider for &'a T {
    fn shared_secret(&self, tag: &CovertTag) -> Option<SharedSecret> {
        self.deref().shared_secret(tag)
    }
}

impl<T: SharedSecretProvider> SharedSecretProvider for Arc<T> {
    fn shared_secret(&self, tag: &CovertTag) -> Option<SharedSecret> {
        let t: &T = self;
        t.shared_secret(tag)
    }
}

/// Everything the flow layer needs, tied to one configuration.
#[derive(Clone)]
pub struct Station {
    config: Arc<StationConfig>,
    secrets: Arc<dyn SharedSecretProvider + Send + Sync>,
}

impl Station {
    pub fn new(
        config: Arc<StationConfig>,
        secrets: Arc<dyn SharedSecretProvider + Send + Sync>,
    ) -> Self {
        Station { config, secrets }
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// Try to read a covert tag out of a client random. `None` means this isn't a tagged flow.
    pub fn detect_tag(&self, client_random: &ClientRandom) -> Option<CovertTag> {
        let point = telex_elligator::decode(&client_random.0)?;
        trace!("Client random {} decodes to a curve point", hex::encode(client_random.0));
        Some(CovertTag {
            representative: client_random.0,
            point,
        })
    }

    /// Detect a tag, look up its shared secret, and derive the flow's DH private key.
    pub fn derive_private_key(&self, client_random: &ClientRandom) -> Option<DhPrivateKey> {
        let tag = self.detect_tag(client_random)?;
        let secret = self.secrets.shared_secret(&tag)?;
        debug!(
            "Deriving a DH private key for the covert tag in client random {}",
            hex::encode(client_random.0)
        );
        Some(derive_dh_private(&secret))
    }

    /// Our DH public value, for the configured group.
    pub fn public_value(&self, priv_key: &DhPrivateKey) -> Result<BigUint> {
        self.config.dh_group().compute_public_value(priv_key)
    }

    /// Complete the DH exchange with the peer's public value, in the configured group.
    pub fn shared_secret(&self, priv_key: &DhPrivateKey, peer_public: &BigUint) -> Result<Vec<u8>> {
        self.config
            .dh_group()
            .compute_shared_secret(priv_key, peer_public)
    }

    /// Forge a session with the configured role and cipher suite allow-list.
    pub fn forge(
        &self,
        raw_cipher_suite: u16,
        client_random: &ClientRandom,
        server_random: &ServerRandom,
        master_key: &[u8],
    ) -> Result<ForgedSession> {
        let master_key = MasterKey::new(master_key)?;
        forge(
            &self.config,
            raw_cipher_suite,
            client_random,
            server_random,
            &master_key,
        )
    }
}
