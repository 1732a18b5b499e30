//! MPPE session key derivation from MS-CHAP credentials (RFC 3079).
//!
//! MS-CHAPv2 derives a master key from the password hash and the
//! NT-Response, then splits it into asymmetric send/receive keys whose
//! roles swap between the two ends of the link. MS-CHAP (v1) derives one
//! start key used in both directions.
use md4::{Digest, Md4};
use sha1::Sha1;

/// The 128-bit session keys of one end of the link.
#[derive(Clone, PartialEq, Eq)]
pub struct MppeKeys {
    pub send: [u8; 16],
    pub recv: [u8; 16],
}

impl core::fmt::Debug for MppeKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        // Key material stays out of logs.
        f.write_str("MppeKeys { .. }")
    }
}

const SHA1_PAD1: [u8; 40] = [0x00; 40];
const SHA1_PAD2: [u8; 40] = [0xf2; 40];

const MASTER_KEY_MAGIC: &[u8; 27] = b"This is the MPPE Master Key";

/// On the sending side of a client, and the receiving side of a server.
const CLIENT_SEND_MAGIC: &[u8; 84] =
    b"On the client side, this is the send key; on the server side, it is the receive key.";

/// On the receiving side of a client, and the sending side of a server.
const CLIENT_RECV_MAGIC: &[u8; 84] =
    b"On the client side, this is the receive key; on the server side, it is the send key.";

/// MD4 of the UTF-16LE encoding of the password.
pub(crate) fn nt_password_hash(password: &str) -> [u8; 16] {
    let mut md4 = Md4::new();
    for unit in password.encode_utf16() {
        md4.update(unit.to_le_bytes());
    }
    md4.finalize().into()
}

/// MD4 of the password hash itself.
pub(crate) fn password_hash_hash(password: &str) -> [u8; 16] {
    let mut md4 = Md4::new();
    md4.update(nt_password_hash(password));
    md4.finalize().into()
}

fn sha1_16(parts: &[&[u8]]) -> [u8; 16] {
    let mut sha = Sha1::new();
    for part in parts {
        sha.update(part);
    }
    let digest = sha.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// The MS-CHAPv2 master key (RFC 3079 §3.4).
fn master_key(password: &str, nt_response: &[u8; 24]) -> [u8; 16] {
    sha1_16(&[&password_hash_hash(password), nt_response, MASTER_KEY_MAGIC])
}

fn asymmetric_key(master: &[u8; 16], magic: &[u8; 84]) -> [u8; 16] {
    sha1_16(&[master, &SHA1_PAD1, magic, &SHA1_PAD2])
}

/// Derive both MS-CHAPv2 session keys for one end of the link.
///
/// The authenticator's send key is the authenticatee's receive key and
/// vice versa.
pub fn mschap2_keys(password: &str, nt_response: &[u8; 24], is_server: bool) -> MppeKeys {
    let master = master_key(password, nt_response);
    let (send_magic, recv_magic) = if is_server {
        (CLIENT_RECV_MAGIC, CLIENT_SEND_MAGIC)
    } else {
        (CLIENT_SEND_MAGIC, CLIENT_RECV_MAGIC)
    };
    MppeKeys {
        send: asymmetric_key(&master, send_magic),
        recv: asymmetric_key(&master, recv_magic),
    }
}

/// Derive the MS-CHAP (v1) start key (RFC 3079 §2).
///
/// The same key serves both directions, computed from the authenticator
/// challenge exactly as it appeared on the wire.
pub fn mschap1_keys(password: &str, challenge: &[u8; 8]) -> MppeKeys {
    let hash = password_hash_hash(password);
    let key = sha1_16(&[&hash, &hash, challenge]);
    MppeKeys { send: key, recv: key }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn magic_lengths() {
        assert_eq!(MASTER_KEY_MAGIC.len(), 27);
        assert_eq!(CLIENT_SEND_MAGIC.len(), 84);
        assert_eq!(CLIENT_RECV_MAGIC.len(), 84);
    }

    #[test]
    fn keys_mirror_between_roles() {
        let response = [0x11u8; 24];
        let server = mschap2_keys("clientPass", &response, true);
        let client = mschap2_keys("clientPass", &response, false);
        assert_eq!(server.send, client.recv);
        assert_eq!(server.recv, client.send);
        assert_ne!(server.send, server.recv);
    }

    #[test]
    fn v1_key_is_symmetric() {
        let keys = mschap1_keys("secret", &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(keys.send, keys.recv);
    }
}
