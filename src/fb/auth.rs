//! Authentication state for one attachment.
//!
//! The client advertises `Srp256` with a fallback to `Srp` in the connect
//! packet. The server answers with the plugin it accepted and, once it has
//! the client's public key, its salt and public key. Each step goes through
//! [`AuthBlock::start`], which prepares the data for the next packet.

use bytes::Bytes;
use tracing::debug;

use super::error::{FbError, FbResult};
use super::params::ParamBuffer;
use super::protocol::{cnct, dpb, ContAuth, WIRE_CRYPT_DISABLED};
use super::srp::{normalize_login, SrpClient, SrpPlugin};

/// Longest chunk of a multi-part CNCT value (the length byte counts the part number).
const MULTIPART_CHUNK: usize = 254;

pub struct AuthBlock {
    srp256: SrpClient,
    srp: SrpClient,
    user: String,
    password: String,
    server_data: Bytes,
    plugin_name: String,
    authenticated: bool,
    server_keys: Bytes,
    public_client_data: Vec<u8>,
    client_data: Option<Vec<u8>>,
    session_key: Option<Vec<u8>>,
}

impl AuthBlock {
    pub fn new(user: &str, password: &str) -> Self {
        Self::with_clients(
            user,
            password,
            SrpClient::new(SrpPlugin::Srp256),
            SrpClient::new(SrpPlugin::Srp),
        )
    }

    /// Auth block with fixed SRP clients (deterministic keys in tests).
    pub fn with_clients(user: &str, password: &str, srp256: SrpClient, srp: SrpClient) -> Self {
        Self {
            srp256,
            srp,
            user: user.to_string(),
            password: password.to_string(),
            server_data: Bytes::new(),
            plugin_name: String::new(),
            authenticated: false,
            server_keys: Bytes::new(),
            public_client_data: Vec::new(),
            client_data: None,
            session_key: None,
        }
    }

    /// CNCT user identification buffer for `op_connect`.
    pub fn user_identification(&self) -> FbResult<Vec<u8>> {
        let os_user = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_default();
        let mut uid = ParamBuffer::empty();
        uid.put_str(cnct::USER, &os_user)?;
        uid.put_str(cnct::HOST, &local_host_name())?;
        uid.put_raw(&[cnct::USER_VERIFICATION, 0]);

        if !self.user.is_empty() {
            uid.put_str(cnct::LOGIN, &self.user)?;
            uid.put_str(cnct::PLUGIN_NAME, SrpPlugin::Srp256.name())?;
            let key = self.srp256.public_key_hex();
            for (part, chunk) in key.as_bytes().chunks(MULTIPART_CHUNK).enumerate() {
                uid.put_raw(&[cnct::SPECIFIC_DATA, chunk.len() as u8 + 1, part as u8]);
                uid.put_raw(chunk);
            }
            let plugins = format!("{},{}", SrpPlugin::Srp256.name(), SrpPlugin::Srp.name());
            uid.put_str(cnct::PLUGIN_LIST, &plugins)?;
            uid.put_bytes(cnct::CLIENT_CRYPT, &WIRE_CRYPT_DISABLED.to_be_bytes())?;
        }
        Ok(uid.into_bytes())
    }

    /// Absorb one server authentication step.
    ///
    /// With non-empty `server_data` the proof for the accepted plugin is
    /// computed and becomes the client data of the next packet.
    pub fn start(
        &mut self,
        server_data: Bytes,
        plugin_name: &str,
        authenticated: bool,
        server_keys: Bytes,
    ) -> FbResult<()> {
        let plugin = SrpPlugin::from_name(plugin_name).ok_or_else(|| {
            FbError::Auth(format!("Not supported plugin: {:?}", plugin_name))
        })?;
        debug!(plugin = plugin_name, authenticated, "auth step");

        let client = match plugin {
            SrpPlugin::Srp256 => &mut self.srp256,
            SrpPlugin::Srp => &mut self.srp,
        };
        self.public_client_data = client.public_key_hex().into_bytes();
        if !server_data.is_empty() {
            let proof = client.client_proof(
                &normalize_login(&self.user),
                &self.password,
                &server_data,
            )?;
            self.client_data = Some(hex::encode_upper(proof).into_bytes());
        }
        self.session_key = client.session_key().map(<[u8]>::to_vec);

        self.server_data = server_data;
        self.plugin_name = plugin_name.to_string();
        self.authenticated = authenticated;
        self.server_keys = server_keys;
        Ok(())
    }

    /// Next `op_cont_auth` packet: the proof if known, else the public key.
    pub fn cont_auth(&self) -> ContAuth {
        ContAuth {
            data: self
                .client_data
                .clone()
                .unwrap_or_else(|| self.public_client_data.clone()),
            plugin_name: self.plugin_name.clone(),
            plugin_list: self.plugin_name.clone(),
            keys: self.server_keys.to_vec(),
        }
    }

    /// Record the server keys of the final generic response.
    pub fn complete(&mut self, server_keys: Bytes) {
        self.server_keys = server_keys;
        self.authenticated = true;
    }

    /// Authentication clusters of a protocol 13 DPB.
    pub fn write_dpb(&self, dpb_buf: &mut ParamBuffer) -> FbResult<()> {
        match &self.client_data {
            Some(data) => {
                dpb_buf.put_bytes(dpb::SPECIFIC_AUTH_DATA, data)?;
            }
            None => {
                dpb_buf.put_str(dpb::AUTH_PLUGIN_NAME, &self.plugin_name)?;
                dpb_buf.put_bytes(dpb::SPECIFIC_AUTH_DATA, &self.public_client_data)?;
            }
        }
        Ok(())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn has_client_data(&self) -> bool {
        self.client_data.is_some()
    }

    pub fn server_keys(&self) -> &[u8] {
        &self.server_keys
    }

    /// Session key K, kept for callers that negotiate wire encryption themselves.
    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }
}

impl std::fmt::Debug for AuthBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBlock")
            .field("user", &self.user)
            .field("plugin_name", &self.plugin_name)
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

fn local_host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn block() -> AuthBlock {
        AuthBlock::with_clients(
            "sysdba",
            "masterkey",
            SrpClient::with_private_key(SrpPlugin::Srp256, BigUint::from(7u32)),
            SrpClient::with_private_key(SrpPlugin::Srp, BigUint::from(11u32)),
        )
    }

    /// Walk `(tag, len, value)` clusters after the fixed verification pair.
    fn clusters(buf: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let tag = buf[pos];
            let len = buf[pos + 1] as usize;
            out.push((tag, buf[pos + 2..pos + 2 + len].to_vec()));
            pos += 2 + len;
        }
        out
    }

    #[test]
    fn test_user_identification_advertises_srp256() {
        let auth = block();
        let uid = auth.user_identification().unwrap();
        let items = clusters(&uid);

        assert!(items.contains(&(cnct::USER_VERIFICATION, vec![])));
        assert!(items.contains(&(cnct::LOGIN, b"sysdba".to_vec())));
        assert!(items.contains(&(cnct::PLUGIN_NAME, b"Srp256".to_vec())));
        assert!(items.contains(&(cnct::PLUGIN_LIST, b"Srp256,Srp".to_vec())));
        assert!(items.contains(&(cnct::CLIENT_CRYPT, vec![0, 0, 0, 0])));

        let key: Vec<u8> = items
            .iter()
            .filter(|(tag, _)| *tag == cnct::SPECIFIC_DATA)
            .enumerate()
            .flat_map(|(i, (_, value))| {
                assert_eq!(value[0] as usize, i);
                value[1..].to_vec()
            })
            .collect();
        assert_eq!(key, auth.srp256.public_key_hex().into_bytes());
    }

    #[test]
    fn test_start_without_server_data_uses_public_key() {
        let mut auth = block();
        auth.start(Bytes::new(), "Srp", false, Bytes::new()).unwrap();
        assert!(!auth.has_client_data());
        let msg = auth.cont_auth();
        assert_eq!(msg.data, auth.srp.public_key_hex().into_bytes());
        assert_eq!(msg.plugin_name, "Srp");
        assert_eq!(msg.plugin_list, "Srp");

        let mut dpb_buf = ParamBuffer::new(dpb::VERSION1);
        auth.write_dpb(&mut dpb_buf).unwrap();
        assert_eq!(&dpb_buf.as_bytes()[1..6], &[dpb::AUTH_PLUGIN_NAME, 3, b'S', b'r', b'p']);
    }

    #[test]
    fn test_unknown_plugin_rejected() {
        let mut auth = block();
        let err = auth
            .start(Bytes::new(), "Legacy_Auth", false, Bytes::new())
            .unwrap_err();
        assert!(matches!(err, FbError::Auth(_)));
    }

    #[test]
    fn test_complete_marks_authenticated() {
        let mut auth = block();
        auth.complete(Bytes::from_static(b"keys"));
        assert!(auth.is_authenticated());
        assert_eq!(auth.server_keys(), b"keys");
    }
}
