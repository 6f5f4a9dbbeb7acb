//! SRP-6a client used by the `Srp` and `Srp256` authentication plugins.
//!
//! Big integers are hashed as their minimal big-endian magnitude; the
//! scramble pads both public keys to the 128-byte group size. Under `Srp256`
//! only the final proof uses SHA-256, everything else stays SHA-1.

use num_bigint::BigUint;
use once_cell::sync::Lazy;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::error::{FbError, FbResult};

const SRP_KEY_SIZE: usize = 128;
const PRIVATE_KEY_BYTES: usize = 16;

const N_HEX: &[u8] = b"E67D2E994B2F900C3F41F08F5BB2627ED0D49EE1FE767A52EFCD565CD6E768812C3E1E9CE8F0A8BEA6CB13CD29DDEBF7A96D4A93B55D488DF099A15C89DCB0640738EB2CBDD9A8F7BAB561AB1B0DC1C6CDABF303264A08D1BCA932D1F1EE428B619D970F342ABA9A65793B8B2F041AE5364350C16F735F56ECBCA87BD57B29E7";
const K_DEC: &[u8] = b"1277432915985975349439481660349303019122249719989";

static N: Lazy<BigUint> = Lazy::new(|| BigUint::parse_bytes(N_HEX, 16).unwrap_or_default());
static K: Lazy<BigUint> = Lazy::new(|| BigUint::parse_bytes(K_DEC, 10).unwrap_or_default());
static G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));

/// Authentication plugin flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpPlugin {
    Srp,
    Srp256,
}

impl SrpPlugin {
    pub fn name(self) -> &'static str {
        match self {
            SrpPlugin::Srp => "Srp",
            SrpPlugin::Srp256 => "Srp256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Srp" => Some(SrpPlugin::Srp),
            "Srp256" => Some(SrpPlugin::Srp256),
            _ => None,
        }
    }
}

// ============================================================================
// Big integer helpers
// ============================================================================

/// Minimal big-endian magnitude; zero is empty.
fn to_bytes(n: &BigUint) -> Vec<u8> {
    if n.bits() == 0 {
        Vec::new()
    } else {
        n.to_bytes_be()
    }
}

fn from_bytes(b: &[u8]) -> BigUint {
    BigUint::from_bytes_be(b)
}

/// Last `SRP_KEY_SIZE` bytes of the magnitude.
fn pad(n: &BigUint) -> Vec<u8> {
    let bytes = to_bytes(n);
    let start = bytes.len().saturating_sub(SRP_KEY_SIZE);
    bytes[start..].to_vec()
}

fn hash<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

fn sha1(parts: &[&[u8]]) -> Vec<u8> {
    hash::<Sha1>(parts)
}

fn user_hash(user: &str, password: &str, salt: &[u8]) -> BigUint {
    let inner = sha1(&[user.as_bytes(), b":", password.as_bytes()]);
    from_bytes(&sha1(&[salt, &inner]))
}

fn scramble(a: &BigUint, b: &BigUint) -> BigUint {
    from_bytes(&sha1(&[&pad(a), &pad(b)]))
}

// ============================================================================
// Client
// ============================================================================

/// One SRP exchange. A fresh client is created per attach.
#[derive(Debug, Clone)]
pub struct SrpClient {
    plugin: SrpPlugin,
    private_key: BigUint,
    public_key: BigUint,
    session_key: Option<Vec<u8>>,
}

impl SrpClient {
    /// Client with a random 128-bit private key.
    pub fn new(plugin: SrpPlugin) -> Self {
        let secret: [u8; PRIVATE_KEY_BYTES] = rand::thread_rng().gen();
        Self::with_private_key(plugin, from_bytes(&secret))
    }

    pub fn with_private_key(plugin: SrpPlugin, private_key: BigUint) -> Self {
        let public_key = G.modpow(&private_key, &N);
        Self {
            plugin,
            private_key,
            public_key,
            session_key: None,
        }
    }

    pub fn plugin(&self) -> SrpPlugin {
        self.plugin
    }

    pub fn public_key(&self) -> &BigUint {
        &self.public_key
    }

    /// Padded public key as upper-case hex, the form sent to the server.
    pub fn public_key_hex(&self) -> String {
        hex::encode_upper(pad(&self.public_key))
    }

    /// Session key K of the last proof, if one was computed.
    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }

    /// Compute the proof from the server's auth data.
    ///
    /// `auth_data` is `u16le salt_len, salt, u16le key_len, hex(B)`. The key
    /// length field is ignored; the key runs to the end of the buffer.
    pub fn client_proof(&mut self, user: &str, password: &str, auth_data: &[u8]) -> FbResult<Vec<u8>> {
        if auth_data.len() < 2 {
            return Err(FbError::Auth("server auth data too short".to_string()));
        }
        let salt_len = usize::from(auth_data[0]) + usize::from(auth_data[1]) * 256;
        let key_start = salt_len + 4;
        if auth_data.len() < key_start {
            return Err(FbError::Auth(format!(
                "server auth data truncated: salt of {} bytes in {} bytes",
                salt_len,
                auth_data.len()
            )));
        }
        let salt = &auth_data[2..2 + salt_len];
        let server_key = BigUint::parse_bytes(&auth_data[key_start..], 16)
            .ok_or_else(|| FbError::Auth("server public key is not valid hex".to_string()))?;
        Ok(self.proof(user, password, salt, &server_key))
    }

    /// M = H(H(N)^H(g) mod N, H(user), salt, A, B, K).
    pub fn proof(&mut self, user: &str, password: &str, salt: &[u8], server_key: &BigUint) -> Vec<u8> {
        let k = self.client_session_key(user, password, salt, server_key);

        let hn = from_bytes(&sha1(&[&to_bytes(&N)]));
        let hg = from_bytes(&sha1(&[&to_bytes(&G)]));
        let n1 = hn.modpow(&hg, &N);
        let n2 = from_bytes(&sha1(&[user.as_bytes()]));

        let (n1, n2) = (to_bytes(&n1), to_bytes(&n2));
        let (a, b) = (to_bytes(&self.public_key), to_bytes(server_key));
        let parts: [&[u8]; 6] = [&n1, &n2, salt, &a, &b, &k];
        let proof = match self.plugin {
            SrpPlugin::Srp => sha1(&parts),
            SrpPlugin::Srp256 => hash::<Sha256>(&parts),
        };
        self.session_key = Some(k);
        proof
    }

    fn client_session_key(&self, user: &str, password: &str, salt: &[u8], server_key: &BigUint) -> Vec<u8> {
        let n: &BigUint = &N;
        let u = scramble(&self.public_key, server_key);
        let x = user_hash(user, password, salt);
        let kgx = (&*K * G.modpow(&x, n)) % n;
        let diff = if server_key >= &kgx {
            (server_key - &kgx) % n
        } else {
            (server_key + n - &kgx) % n
        };
        let ux = (&u * &x) % n;
        let aux = (&self.private_key + ux) % n;
        let secret = diff.modpow(&aux, n);
        sha1(&[&to_bytes(&secret)])
    }
}

/// Canonical login used in the proof.
///
/// Double-quoted logins keep their case: the quotes are stripped and `""`
/// becomes `"`. A lone quote inside ends the name. Anything else is
/// upper-cased.
pub fn normalize_login(login: &str) -> String {
    if login.len() > 2 && login.starts_with('"') && login.ends_with('"') {
        let inner = &login[1..login.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    out.push('"');
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return out;
    }
    login.to_uppercase()
}

// ============================================================================
// Server side (used to check the client against a known verifier)
// ============================================================================

/// B = (k·v + g^b) mod N for the given user and private key `b`.
#[cfg(test)]
pub(crate) fn server_public_key(user: &str, password: &str, salt: &[u8], b: &BigUint) -> BigUint {
    let n: &BigUint = &N;
    let v = G.modpow(&user_hash(user, password, salt), n);
    let kv = (&*K * v) % n;
    (kv + G.modpow(b, n)) % n
}

/// Server view of K: H((A·v^u)^b mod N).
#[cfg(test)]
pub(crate) fn server_session_key(
    user: &str,
    password: &str,
    salt: &[u8],
    client_key: &BigUint,
    server_key: &BigUint,
    b: &BigUint,
) -> Vec<u8> {
    let n: &BigUint = &N;
    let u = scramble(client_key, server_key);
    let v = G.modpow(&user_hash(user, password, salt), n);
    let avu = (client_key * v.modpow(&u, n)) % n;
    sha1(&[&to_bytes(&avu.modpow(b, n))])
}

#[cfg(test)]
mod tests {
    use super::*;

    const A_HEX: &str = "535E68E994A09E4C230894A6CC5F2B2485048097578E647222329B71A0AE81A91ADB0130AFEA1137DC1D2E6E22B0344C27C1572EDC5458B467087F05949B06B48F93E24D03A6320DCD07650E427F15F29DCDC90BAE5C81B37F418AB2CD48C27E2B919526A02AF70DC8FC0AED061B44CD3B17FB5042043FD2EDBE81296075102E";
    const B_HEX: &str = "5DF4264F10511DBCCE0958A9394739E95496F2741D86D76201741FEDB11CD192A66EEBD3DA50C28C7485C02EFAB5B7025FAEF95D0D6A084748E97D127CE3CD9D33AB1BBEA3510BEA72CE1357F71BA8E2C6CE3762BF190CE34C47B04A64CB30A491251F97E21B4FB10B3DF0277083AC289381A662C02861FF12A5F54FCCB837F8";

    fn fixture() -> (Vec<u8>, BigUint, BigUint) {
        let salt: Vec<u8> = (0u8..32).collect();
        let a = from_bytes(&(1u8..=16).collect::<Vec<_>>());
        let b = from_bytes(&(0x21u8..=0x30).collect::<Vec<_>>());
        (salt, a, b)
    }

    fn auth_data(salt: &[u8], server_key: &BigUint) -> Vec<u8> {
        let key_hex = hex::encode_upper(to_bytes(server_key));
        let mut data = Vec::new();
        data.extend_from_slice(&(salt.len() as u16).to_le_bytes());
        data.extend_from_slice(salt);
        data.extend_from_slice(&(key_hex.len() as u16).to_le_bytes());
        data.extend_from_slice(key_hex.as_bytes());
        data
    }

    #[test]
    fn test_reference_vectors_sha1() {
        let (salt, a, b) = fixture();
        let mut client = SrpClient::with_private_key(SrpPlugin::Srp, a);
        assert_eq!(client.public_key_hex(), A_HEX);

        let server_key = server_public_key("SYSDBA", "masterkey", &salt, &b);
        assert_eq!(hex::encode_upper(to_bytes(&server_key)), B_HEX);

        let proof = client
            .client_proof("SYSDBA", "masterkey", &auth_data(&salt, &server_key))
            .unwrap();
        assert_eq!(hex::encode(&proof), "ff2300c81afd751ebba2d64f3bb802b6f2d1dedd");
        assert_eq!(
            hex::encode(client.session_key().unwrap()),
            "908d3eed5d45972c6ad1fa4b8b6d12c1b4610df6"
        );
    }

    #[test]
    fn test_reference_vectors_sha256() {
        let (salt, a, b) = fixture();
        let mut client = SrpClient::with_private_key(SrpPlugin::Srp256, a);
        let server_key = server_public_key("SYSDBA", "masterkey", &salt, &b);
        let proof = client
            .client_proof("SYSDBA", "masterkey", &auth_data(&salt, &server_key))
            .unwrap();
        assert_eq!(
            hex::encode(&proof),
            "3ec58566199ff2008fe8be3fe3a5465470b72efe7e9a8730dc5a53a19502e066"
        );
    }

    #[test]
    fn test_server_and_client_agree_on_session_key() {
        let salt: Vec<u8> = vec![7; 32];
        let b = from_bytes(&[0x5A; 16]);
        let mut client = SrpClient::new(SrpPlugin::Srp256);
        let server_key = server_public_key("ALICE", "secret", &salt, &b);
        client.proof("ALICE", "secret", &salt, &server_key);
        let server = server_session_key("ALICE", "secret", &salt, client.public_key(), &server_key, &b);
        assert_eq!(client.session_key().unwrap(), server.as_slice());
    }

    #[test]
    fn test_truncated_auth_data() {
        let mut client = SrpClient::new(SrpPlugin::Srp);
        assert!(matches!(
            client.client_proof("A", "B", &[32, 0, 1, 2]),
            Err(FbError::Auth(_))
        ));
    }

    #[test]
    fn test_normalize_login() {
        assert_eq!(normalize_login("sysdba"), "SYSDBA");
        assert_eq!(normalize_login("\"MixedCase\""), "MixedCase");
        assert_eq!(normalize_login("\"a\"\"b\""), "a\"b");
        assert_eq!(normalize_login("\"a\"b\""), "a");
        assert_eq!(normalize_login("\"\""), "\"\"");
    }
}
